//! Normalisation of raw runtime descriptors into exportable records.
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::health::{self, HealthState};
use crate::labels::{self, CustomLabelMapping, LabelSchema};
use crate::runtime::ContainerDescriptor;

mod error;

pub use error::{Error, Result};

/// The maximum allowed length for a [`ContainerID`].
const CONTAINER_ID_MAX_LEN: usize = 255;

/// Length of the short identity exported as `container_id`.
pub const SHORT_ID_LEN: usize = 12;

/// Placeholder for identity and image when the runtime reports nothing usable.
pub const UNKNOWN: &str = "unknown";

pub const COMPOSE_PROJECT_LABEL: &str = "com.docker.compose.project";
pub const COMPOSE_SERVICE_LABEL: &str = "com.docker.compose.service";
pub const STACK_NAMESPACE_LABEL: &str = "com.docker.stack.namespace";
pub const SWARM_SERVICE_LABEL: &str = "com.docker.swarm.service.name";

const DIGEST_PREFIX: &str = "sha256:";

/// A validated container identifier, safe to embed in an API path.
///
/// # Examples
///
/// ```
/// # use docker_health_exporter::container::ContainerID;
/// let id = ContainerID::new("4f2c1d9e8b7a6f5e4d3c2b1a0f9e8d7c6b5a4f3e2d1c0b9a8f7e6d5c4b3a2f1e").unwrap();
/// assert_eq!(id.as_ref().len(), 64);
/// assert!(ContainerID::new("../info").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerID(Arc<str>);

impl ContainerID {
    /// Creates a new `ContainerID` from the given raw id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidContainerID`] if the input is empty, longer than
    /// [`CONTAINER_ID_MAX_LEN`], or contains anything but ASCII alphanumerics,
    /// `-` and `_`.
    pub fn new(src: impl AsRef<str>) -> Result<Self> {
        let src = src.as_ref();
        if src.is_empty()
            || src.len() > CONTAINER_ID_MAX_LEN
            || !src
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(Error::InvalidContainerID(src.to_owned()));
        }

        Ok(Self(src.into()))
    }
}

impl AsRef<str> for ContainerID {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ContainerID {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything exported for one container in one poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    pub short_id: String,
    pub name: String,
    pub image: String,
    pub stack: String,
    pub service: String,
    /// Value for every label of the schema (and every custom target).
    pub labels: HashMap<String, String>,
    pub health: HealthState,
    pub failure_streak: u64,
}

impl ContainerRecord {
    /// Label values in schema order, `""` for anything unset.
    pub fn label_values<'a>(&'a self, schema: &'a LabelSchema) -> Vec<&'a str> {
        schema
            .iter()
            .map(|name| self.labels.get(name).map_or("", String::as_str))
            .collect()
    }
}

/// Builds a [`ContainerRecord`] from a raw descriptor.
///
/// Never fails: missing fields become `"unknown"` (identity, image), `""`
/// (everything else textual), [`HealthState::Unknown`] and a zero streak.
/// Custom labels are applied before the well-known ones, so a custom target
/// named like a default label keeps the custom value.
pub fn inspect(
    descriptor: &ContainerDescriptor,
    schema: &LabelSchema,
    custom: &CustomLabelMapping,
) -> ContainerRecord {
    let empty = HashMap::new();
    let runtime_labels = descriptor.labels().unwrap_or(&empty);

    let short_id = descriptor
        .id
        .as_deref()
        .filter(|id| !id.is_empty())
        .map_or_else(|| UNKNOWN.to_owned(), |id| id.chars().take(SHORT_ID_LEN).collect());
    let name = descriptor
        .name
        .as_deref()
        .map(|n| n.trim_start_matches('/').to_owned())
        .unwrap_or_default();
    let image = image_reference(descriptor);
    let stack = first_non_empty(runtime_labels, &[COMPOSE_PROJECT_LABEL, STACK_NAMESPACE_LABEL]);
    let service = first_non_empty(runtime_labels, &[COMPOSE_SERVICE_LABEL, SWARM_SERVICE_LABEL]);

    let (health, failure_streak) = match descriptor.health() {
        Some(report) => (
            health::classify(report.status.as_deref().unwrap_or_default()),
            report
                .failing_streak
                .map_or(0, |streak| u64::try_from(streak).unwrap_or(0)),
        ),
        None => (HealthState::Unknown, 0),
    };

    let mut values = HashMap::with_capacity(schema.len() + custom.len());
    for (runtime_key, metric_label) in custom.iter() {
        values.insert(
            metric_label.to_owned(),
            runtime_labels.get(runtime_key).cloned().unwrap_or_default(),
        );
    }
    for name_in_schema in schema.iter() {
        if values.contains_key(name_in_schema) {
            continue;
        }
        let value = match name_in_schema {
            labels::LABEL_CONTAINER_ID => short_id.clone(),
            labels::LABEL_CONTAINER_NAME => name.clone(),
            labels::LABEL_IMAGE => image.clone(),
            labels::LABEL_STACK => stack.clone(),
            labels::LABEL_SERVICE => service.clone(),
            _ => String::new(),
        };
        values.insert(name_in_schema.to_owned(), value);
    }

    ContainerRecord {
        short_id,
        name,
        image,
        stack,
        service,
        labels: values,
        health,
        failure_streak,
    }
}

/// Prefers the human readable reference from the container config, then the
/// short image digest, then [`UNKNOWN`].
fn image_reference(descriptor: &ContainerDescriptor) -> String {
    let configured = descriptor
        .config
        .as_ref()
        .and_then(|c| c.image.as_deref())
        .filter(|image| !image.is_empty() && !image.starts_with(DIGEST_PREFIX));
    if let Some(image) = configured {
        return image.to_owned();
    }

    descriptor
        .image
        .as_deref()
        .map(|digest| digest.trim_start_matches(DIGEST_PREFIX))
        .filter(|digest| !digest.is_empty())
        .map_or_else(
            || UNKNOWN.to_owned(),
            |digest| digest.chars().take(SHORT_ID_LEN).collect(),
        )
}

fn first_non_empty(labels: &HashMap<String, String>, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|key| labels.get(*key))
        .find(|value| !value.is_empty())
        .cloned()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::{BASE_LABELS, resolve};
    use crate::runtime::{ContainerConfig, ContainerState, HealthReport};

    fn descriptor(labels: &[(&str, &str)], health: Option<HealthReport>) -> ContainerDescriptor {
        ContainerDescriptor {
            id: Some("abc123def456abc123def456abc123def456".to_owned()),
            name: Some("/test-container".to_owned()),
            image: Some("sha256:feedfacecafebeef0011".to_owned()),
            config: Some(ContainerConfig {
                image: Some("nginx:latest".to_owned()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                        .collect(),
                ),
            }),
            state: Some(ContainerState {
                status: Some("running".to_owned()),
                health,
            }),
        }
    }

    fn healthy() -> Option<HealthReport> {
        Some(HealthReport {
            status: Some("healthy".to_owned()),
            failing_streak: Some(0),
        })
    }

    fn default_schema() -> LabelSchema {
        resolve(&BASE_LABELS, &CustomLabelMapping::default(), false)
    }

    #[test]
    fn test_inspect_full_descriptor() {
        let d = descriptor(
            &[
                (COMPOSE_PROJECT_LABEL, "testproject"),
                (COMPOSE_SERVICE_LABEL, "web"),
                ("com.example.team", "devops"),
            ],
            healthy(),
        );
        let record = inspect(&d, &default_schema(), &CustomLabelMapping::default());
        assert_eq!(record.short_id, "abc123def456");
        assert_eq!(record.name, "test-container");
        assert_eq!(record.image, "nginx:latest");
        assert_eq!(record.stack, "testproject");
        assert_eq!(record.service, "web");
        assert_eq!(record.health, HealthState::Healthy);
        assert_eq!(record.failure_streak, 0);
        assert_eq!(
            record.label_values(&default_schema()),
            vec!["abc123def456", "test-container", "nginx:latest", "testproject", "web"]
        );
    }

    #[test]
    fn test_inspect_without_health_block() {
        let record = inspect(
            &descriptor(&[], None),
            &default_schema(),
            &CustomLabelMapping::default(),
        );
        assert_eq!(record.health, HealthState::Unknown);
        assert_eq!(record.failure_streak, 0);
    }

    #[test]
    fn test_inspect_unhealthy_streak() {
        let health = Some(HealthReport {
            status: Some("unhealthy".to_owned()),
            failing_streak: Some(4),
        });
        let record = inspect(
            &descriptor(&[], health),
            &default_schema(),
            &CustomLabelMapping::default(),
        );
        assert_eq!(record.health, HealthState::Unhealthy);
        assert_eq!(record.failure_streak, 4);
    }

    #[test]
    fn test_inspect_partial_health_block() {
        let health = Some(HealthReport {
            status: None,
            failing_streak: Some(-3),
        });
        let record = inspect(
            &descriptor(&[], health),
            &default_schema(),
            &CustomLabelMapping::default(),
        );
        assert_eq!(record.health, HealthState::Unknown);
        assert_eq!(record.failure_streak, 0);
    }

    #[test]
    fn test_inspect_empty_descriptor() {
        let schema = default_schema();
        let record = inspect(
            &ContainerDescriptor::default(),
            &schema,
            &CustomLabelMapping::default(),
        );
        assert_eq!(record.short_id, UNKNOWN);
        assert_eq!(record.image, UNKNOWN);
        assert_eq!(record.name, "");
        assert_eq!(record.health, HealthState::Unknown);
        assert_eq!(
            record.label_values(&schema),
            vec![UNKNOWN, "", UNKNOWN, "", ""]
        );
    }

    #[test]
    fn test_grouping_falls_back_to_swarm() {
        let d = descriptor(
            &[
                (STACK_NAMESPACE_LABEL, "swarmstack"),
                (SWARM_SERVICE_LABEL, "swarmstack_api"),
            ],
            healthy(),
        );
        let record = inspect(&d, &default_schema(), &CustomLabelMapping::default());
        assert_eq!(record.stack, "swarmstack");
        assert_eq!(record.service, "swarmstack_api");
    }

    #[test]
    fn test_grouping_prefers_compose() {
        let d = descriptor(
            &[
                (COMPOSE_PROJECT_LABEL, "compose"),
                (COMPOSE_SERVICE_LABEL, "web"),
                (STACK_NAMESPACE_LABEL, "swarmstack"),
                (SWARM_SERVICE_LABEL, "swarmstack_api"),
            ],
            healthy(),
        );
        let record = inspect(&d, &default_schema(), &CustomLabelMapping::default());
        assert_eq!(record.stack, "compose");
        assert_eq!(record.service, "web");
    }

    #[test]
    fn test_grouping_fallback_is_independent() {
        let d = descriptor(
            &[
                (COMPOSE_PROJECT_LABEL, ""),
                (COMPOSE_SERVICE_LABEL, "web"),
                (STACK_NAMESPACE_LABEL, "swarmstack"),
                (SWARM_SERVICE_LABEL, "swarmstack_api"),
            ],
            healthy(),
        );
        let record = inspect(&d, &default_schema(), &CustomLabelMapping::default());
        assert_eq!(record.stack, "swarmstack");
        assert_eq!(record.service, "web");
    }

    #[test]
    fn test_image_falls_back_to_digest() {
        let mut d = descriptor(&[], healthy());
        if let Some(config) = d.config.as_mut() {
            config.image = Some("sha256:feedfacecafebeef0011".to_owned());
        }
        let record = inspect(&d, &default_schema(), &CustomLabelMapping::default());
        assert_eq!(record.image, "feedfacecafe");

        d.config = None;
        d.image = None;
        let record = inspect(&d, &default_schema(), &CustomLabelMapping::default());
        assert_eq!(record.image, UNKNOWN);
    }

    #[test]
    fn test_custom_labels() {
        let custom = CustomLabelMapping::new([
            ("com.example.team", "team"),
            ("com.example.tier", "tier"),
        ]);
        let schema = resolve(&BASE_LABELS, &custom, false);
        let d = descriptor(&[("com.example.team", "devops")], healthy());
        let record = inspect(&d, &schema, &custom);
        assert_eq!(record.labels["team"], "devops");
        assert_eq!(record.labels["tier"], "");
        assert_eq!(record.label_values(&schema).len(), schema.len());
    }

    #[test]
    fn test_custom_label_overrides_default() {
        let custom = CustomLabelMapping::new([("com.example.svc", "service")]);
        let schema = resolve(&BASE_LABELS, &custom, false);
        let d = descriptor(
            &[(COMPOSE_SERVICE_LABEL, "web"), ("com.example.svc", "frontend")],
            healthy(),
        );
        let record = inspect(&d, &schema, &custom);
        assert_eq!(record.labels["service"], "frontend");
        assert_eq!(record.service, "web");
    }

    #[test]
    fn test_no_defaults_schema() {
        let custom = CustomLabelMapping::new([("com.example.team", "team")]);
        let schema = resolve(&BASE_LABELS, &custom, true);
        let d = descriptor(&[("com.example.team", "devops")], healthy());
        let record = inspect(&d, &schema, &custom);
        assert_eq!(record.label_values(&schema), vec!["devops"]);
    }

    #[test]
    fn test_container_id_validation() {
        assert!(ContainerID::new("abc123").is_ok());
        assert!(ContainerID::new("").is_err());
        assert!(ContainerID::new("../../etc").is_err());
        assert!(ContainerID::new("a".repeat(256)).is_err());
        assert_eq!(ContainerID::new("abc").unwrap().to_string(), "abc");
    }
}
