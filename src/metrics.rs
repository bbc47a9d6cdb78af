//! The two health gauges and the registry they are exposed from.
//!
//! The collector is the only writer. Readers (the `/metrics` handler) encode a
//! snapshot under a shared lock, so both gauges of one container are always
//! observed from the same poll.
use std::fmt;
use std::sync::{PoisonError, RwLock};

use dashmap::DashMap;
use prometheus::core::Collector;
use prometheus::{Encoder, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::container::ContainerRecord;
use crate::labels::LabelSchema;

pub const HEALTH_STATUS_METRIC: &str = "container_health_status";
pub const FAILURE_STREAK_METRIC: &str = "container_health_failure_streak";

/// Content type of the text exposition format.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to create metric `{name}`: {source}")]
    Create {
        name: &'static str,
        #[source]
        source: prometheus::Error,
    },
    #[error("failed to register metric `{name}`: {source}")]
    Register {
        name: &'static str,
        #[source]
        source: prometheus::Error,
    },
    #[error("failed to set series {labels:?}: {source}")]
    Series {
        labels: Vec<String>,
        #[source]
        source: prometheus::Error,
    },
    #[error("failed to encode metrics: {0}")]
    Encode(#[source] prometheus::Error),
    #[error("encoded metrics are not valid UTF-8: {0}")]
    Utf8(#[source] std::string::FromUtf8Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Health gauges keyed by the process wide [`LabelSchema`].
pub struct HealthMetrics {
    registry: Registry,
    schema: LabelSchema,
    health_status: IntGaugeVec,
    failure_streak: IntGaugeVec,
    publish_lock: RwLock<()>,
    /// Tick at which each label tuple was last written.
    last_seen: DashMap<Vec<String>, u64>,
    stale_after_ticks: u64,
}

impl fmt::Debug for HealthMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthMetrics")
            .field("schema", &self.schema)
            .field("tracked_series", &self.last_seen.len())
            .field("stale_after_ticks", &self.stale_after_ticks)
            .finish_non_exhaustive()
    }
}

impl HealthMetrics {
    /// Creates both gauges with `schema` as their label names and registers them
    /// on a fresh registry.
    ///
    /// `namespace` prefixes the metric names when non-empty. With a non-zero
    /// `stale_after_ticks`, series not written for that many ticks are dropped by
    /// [`expire_stale`](Self::expire_stale).
    ///
    /// # Errors
    ///
    /// Fails if a label or metric name is rejected by the registry.
    pub fn new(schema: LabelSchema, namespace: &str, stale_after_ticks: u64) -> Result<Self> {
        let registry = Registry::new();
        let label_names: Vec<&str> = schema.iter().collect();

        let health_status = IntGaugeVec::new(
            Opts::new(
                HEALTH_STATUS_METRIC,
                "Health status of containers (0=unhealthy, 1=healthy, 2=starting, 3=no health check or unknown)",
            )
            .namespace(namespace),
            &label_names,
        )
        .map_err(|source| Error::Create {
            name: HEALTH_STATUS_METRIC,
            source,
        })?;
        let failure_streak = IntGaugeVec::new(
            Opts::new(FAILURE_STREAK_METRIC, "Number of consecutive failed health checks")
                .namespace(namespace),
            &label_names,
        )
        .map_err(|source| Error::Create {
            name: FAILURE_STREAK_METRIC,
            source,
        })?;

        registry
            .register(Box::new(health_status.clone()))
            .map_err(|source| Error::Register {
                name: HEALTH_STATUS_METRIC,
                source,
            })?;
        registry
            .register(Box::new(failure_streak.clone()))
            .map_err(|source| Error::Register {
                name: FAILURE_STREAK_METRIC,
                source,
            })?;

        Ok(Self {
            registry,
            schema,
            health_status,
            failure_streak,
            publish_lock: RwLock::new(()),
            last_seen: DashMap::new(),
            stale_after_ticks,
        })
    }

    pub fn schema(&self) -> &LabelSchema {
        &self.schema
    }

    /// Writes the health status and failure streak of `record`.
    ///
    /// Both series are looked up before either is set, so a failure leaves
    /// neither written.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Series`] if the registry rejects the label values.
    pub fn publish(&self, record: &ContainerRecord, tick: u64) -> Result<()> {
        let values = record.label_values(&self.schema);
        let series_err = |source| Error::Series {
            labels: values.iter().map(|v| (*v).to_owned()).collect(),
            source,
        };

        let _guard = self
            .publish_lock
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let health = self
            .health_status
            .get_metric_with_label_values(&values)
            .map_err(series_err)?;
        let streak = self
            .failure_streak
            .get_metric_with_label_values(&values)
            .map_err(series_err)?;

        health.set(record.health.as_gauge_value());
        streak.set(i64::try_from(record.failure_streak).unwrap_or(i64::MAX));
        if self.stale_after_ticks > 0 {
            self.last_seen
                .insert(values.iter().map(|v| (*v).to_owned()).collect(), tick);
        }

        Ok(())
    }

    /// Removes series not written during the last `stale_after_ticks` ticks.
    ///
    /// Returns the number of label tuples dropped; always zero when expiry is
    /// disabled.
    pub fn expire_stale(&self, current_tick: u64) -> usize {
        if self.stale_after_ticks == 0 {
            return 0;
        }

        let _guard = self
            .publish_lock
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;
        self.last_seen.retain(|labels, last_tick| {
            if current_tick.saturating_sub(*last_tick) < self.stale_after_ticks {
                return true;
            }
            let values: Vec<&str> = labels.iter().map(String::as_str).collect();
            // `remove_label_values` errs when the tuple is absent
            let _ = self.health_status.remove_label_values(&values);
            let _ = self.failure_streak.remove_label_values(&values);
            log::debug!("Dropped stale series {labels:?} (last written in tick {last_tick})");
            removed += 1;
            false
        });
        removed
    }

    /// Number of label tuples currently exported.
    pub fn series_count(&self) -> usize {
        let _guard = self
            .publish_lock
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        self.health_status
            .collect()
            .first()
            .map_or(0, |family| family.get_metric().len())
    }

    /// Encodes a consistent snapshot of the registry in the text format.
    ///
    /// # Errors
    ///
    /// Fails if the encoder rejects a metric family.
    pub fn encode(&self) -> Result<String> {
        let families = {
            let _guard = self
                .publish_lock
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            self.registry.gather()
        };

        let mut buf = Vec::with_capacity(4096);
        TextEncoder::new()
            .encode(&families, &mut buf)
            .map_err(Error::Encode)?;
        String::from_utf8(buf).map_err(Error::Utf8)
    }
}
