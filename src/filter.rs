use std::collections::HashMap;

/// Runtime label controlling whether a container is exported.
pub const ENABLED_LABEL: &str = "prometheus.health.enabled";

/// Decides whether a container with the given runtime labels is monitored.
///
/// An explicit `false` always excludes the container. Otherwise, in opt-in-only
/// mode the label must be `true`; in normal mode everything else is included.
/// Values are compared case-insensitively.
pub fn eligible(labels: &HashMap<String, String>, opt_in_only: bool) -> bool {
    let value = labels.get(ENABLED_LABEL).map(String::as_str);
    if value.is_some_and(|v| v.eq_ignore_ascii_case("false")) {
        return false;
    }
    if opt_in_only {
        return value.is_some_and(|v| v.eq_ignore_ascii_case("true"));
    }
    true
}
