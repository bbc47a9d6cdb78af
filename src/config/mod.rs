//! Process configuration, read once from the environment at startup.
//!
//! Every setting has a default. A value that fails to parse is logged and
//! replaced by that default; configuration never aborts startup.
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::labels::{self, CustomLabelMapping};
use crate::runtime::docker;

mod error;

pub use error::{Error, Result};

pub const POLL_INTERVAL_VAR: &str = "POLL_INTERVAL";
pub const OPT_IN_ONLY_VAR: &str = "OPT_IN_ONLY";
pub const NO_DEFAULT_LABELS_VAR: &str = "NO_DEFAULT_LABELS";
pub const CUSTOM_LABELS_VAR: &str = "CUSTOM_LABELS";
pub const DOCKER_HOST_VAR: &str = "DOCKER_HOST";
pub const DOCKER_TIMEOUT_VAR: &str = "DOCKER_TIMEOUT";
pub const LISTEN_ADDR_VAR: &str = "LISTEN_ADDR";
pub const METRICS_NAMESPACE_VAR: &str = "METRICS_NAMESPACE";
pub const STALE_SERIES_TICKS_VAR: &str = "STALE_SERIES_TICKS";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(15);
const DEFAULT_DOCKER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub poll_interval: Duration,
    pub opt_in_only: bool,
    pub no_default_labels: bool,
    pub custom_labels: CustomLabelMapping,
    pub docker_socket: PathBuf,
    pub docker_timeout: Duration,
    pub listen_addr: SocketAddr,
    pub metrics_namespace: String,
    /// Zero disables removal of series for vanished containers.
    pub stale_series_ticks: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            opt_in_only: false,
            no_default_labels: false,
            custom_labels: CustomLabelMapping::default(),
            docker_socket: PathBuf::from(docker::DEFAULT_SOCKET_PATH),
            docker_timeout: DEFAULT_DOCKER_TIMEOUT,
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            metrics_namespace: String::new(),
            stale_series_ticks: 0,
        }
    }
}

impl Config {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Reads the configuration through `lookup`, which returns the raw value of
    /// a variable if set.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

        Self {
            poll_interval: setting(get(POLL_INTERVAL_VAR), defaults.poll_interval, |v| {
                parse_positive_secs(POLL_INTERVAL_VAR, v)
            }),
            opt_in_only: setting(get(OPT_IN_ONLY_VAR), defaults.opt_in_only, |v| {
                parse_bool(OPT_IN_ONLY_VAR, v)
            }),
            no_default_labels: setting(
                get(NO_DEFAULT_LABELS_VAR),
                defaults.no_default_labels,
                |v| parse_bool(NO_DEFAULT_LABELS_VAR, v),
            ),
            custom_labels: get(CUSTOM_LABELS_VAR)
                .map(|raw| CustomLabelMapping::parse_or_empty(&raw))
                .unwrap_or(defaults.custom_labels),
            docker_socket: setting(get(DOCKER_HOST_VAR), defaults.docker_socket, |v| {
                docker::socket_path_from_host(v).ok_or_else(|| Error::UnsupportedDockerHost {
                    var: DOCKER_HOST_VAR,
                    value: v.to_owned(),
                })
            }),
            docker_timeout: setting(get(DOCKER_TIMEOUT_VAR), defaults.docker_timeout, |v| {
                parse_positive_secs(DOCKER_TIMEOUT_VAR, v)
            }),
            listen_addr: setting(get(LISTEN_ADDR_VAR), defaults.listen_addr, |v| {
                v.trim()
                    .parse::<SocketAddr>()
                    .map_err(|source| Error::InvalidAddress {
                        var: LISTEN_ADDR_VAR,
                        value: v.to_owned(),
                        source,
                    })
            }),
            metrics_namespace: setting(
                get(METRICS_NAMESPACE_VAR),
                defaults.metrics_namespace,
                parse_namespace,
            ),
            stale_series_ticks: setting(
                get(STALE_SERIES_TICKS_VAR),
                defaults.stale_series_ticks,
                |v| {
                    v.trim().parse::<u64>().map_err(|_| Error::NotAnInteger {
                        var: STALE_SERIES_TICKS_VAR,
                        value: v.to_owned(),
                    })
                },
            ),
        }
    }
}

/// Parses `raw` if present, logging and returning `default` on failure.
fn setting<T>(raw: Option<String>, default: T, parse: impl FnOnce(&str) -> Result<T>) -> T {
    let Some(raw) = raw else {
        return default;
    };
    match parse(&raw) {
        Ok(value) => value,
        Err(err) => {
            log::warn!("Ignoring invalid configuration, using the default: {err}");
            default
        }
    }
}

fn parse_positive_secs(var: &'static str, raw: &str) -> Result<Duration> {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(Error::NotAPositiveInteger {
            var,
            value: raw.to_owned(),
        }),
    }
}

/// Accepts `true`/`false`, `1`/`0` and `yes`/`no`, case-insensitively.
pub fn parse_bool(var: &'static str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(Error::NotABoolean {
            var,
            value: raw.to_owned(),
        }),
    }
}

fn parse_namespace(raw: &str) -> Result<String> {
    let raw = raw.trim();
    if labels::is_valid_label_name(raw) {
        Ok(raw.to_owned())
    } else {
        Err(Error::InvalidNamespace {
            var: METRICS_NAMESPACE_VAR,
            value: raw.to_owned(),
        })
    }
}
