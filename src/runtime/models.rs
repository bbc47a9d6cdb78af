//! Container descriptors as returned by the Docker Engine API.
//!
//! Every field is optional: daemons differ across versions and partially
//! created containers omit whole sections. Normalisation into defaults is the
//! job of [`crate::container::inspect`].
use std::collections::HashMap;

use bollard::models;

/// One entry of the running container listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSummary {
    pub id: Option<String>,
    pub labels: Option<HashMap<String, String>>,
    pub state: Option<String>,
}

impl ContainerSummary {
    /// Whether the runtime reports this container as exited or dead.
    pub fn is_stopped(&self) -> bool {
        matches!(self.state.as_deref(), Some("exited" | "dead"))
    }
}

impl From<models::ContainerSummary> for ContainerSummary {
    fn from(raw: models::ContainerSummary) -> Self {
        Self {
            id: raw.id,
            labels: raw.labels,
            state: raw.state,
        }
    }
}

/// Result of inspecting one container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerDescriptor {
    pub id: Option<String>,
    pub name: Option<String>,
    /// Image digest, e.g. `sha256:4f2...`.
    pub image: Option<String>,
    pub config: Option<ContainerConfig>,
    pub state: Option<ContainerState>,
}

impl ContainerDescriptor {
    pub fn labels(&self) -> Option<&HashMap<String, String>> {
        self.config.as_ref().and_then(|c| c.labels.as_ref())
    }

    pub fn health(&self) -> Option<&HealthReport> {
        self.state.as_ref().and_then(|s| s.health.as_ref())
    }
}

impl From<models::ContainerInspectResponse> for ContainerDescriptor {
    fn from(raw: models::ContainerInspectResponse) -> Self {
        Self {
            id: raw.id,
            name: raw.name,
            image: raw.image,
            config: raw.config.map(|config| ContainerConfig {
                image: config.image,
                labels: config.labels,
            }),
            state: raw.state.map(|state| ContainerState {
                status: state.status.map(|status| status.to_string()),
                health: state.health.map(|health| HealthReport {
                    // `EMPTY` renders as "", which classifies as unknown
                    status: health.status.map(|status| status.to_string()),
                    failing_streak: health.failing_streak,
                }),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerConfig {
    /// Image reference as requested by the user, e.g. `nginx:latest`.
    pub image: Option<String>,
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerState {
    pub status: Option<String>,
    pub health: Option<HealthReport>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HealthReport {
    pub status: Option<String>,
    pub failing_streak: Option<i64>,
}
