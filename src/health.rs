use std::fmt;

/// Health of a container as reported by its runtime health check.
///
/// The discriminant is the exported gauge value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum HealthState {
    Unhealthy = 0,
    Healthy = 1,
    Starting = 2,
    /// No health check configured, or a status this exporter does not know.
    #[default]
    Unknown = 3,
}

impl HealthState {
    pub fn as_gauge_value(self) -> i64 {
        self as i64
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HealthState::Unhealthy => "unhealthy",
            HealthState::Healthy => "healthy",
            HealthState::Starting => "starting",
            HealthState::Unknown => "none",
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a runtime health status string to a [`HealthState`].
///
/// Matching is exact; anything else, including the empty string, is
/// [`HealthState::Unknown`].
pub fn classify(raw_status: &str) -> HealthState {
    match raw_status {
        "unhealthy" => HealthState::Unhealthy,
        "healthy" => HealthState::Healthy,
        "starting" => HealthState::Starting,
        _ => HealthState::Unknown,
    }
}
