//! Label schema resolution.
//!
//! Every series exported by this process carries the same ordered set of label
//! names. The set is computed once at startup from the built-in labels and the
//! user supplied mapping of runtime label keys to metric label names.
use std::fmt;

/// Labels attached to every series unless `NO_DEFAULT_LABELS` is set.
pub const BASE_LABELS: [&str; 5] = [
    LABEL_CONTAINER_ID,
    LABEL_CONTAINER_NAME,
    LABEL_IMAGE,
    LABEL_STACK,
    LABEL_SERVICE,
];

pub const LABEL_CONTAINER_ID: &str = "container_id";
pub const LABEL_CONTAINER_NAME: &str = "container_name";
pub const LABEL_IMAGE: &str = "image";
pub const LABEL_STACK: &str = "stack";
pub const LABEL_SERVICE: &str = "service";

/// The only label left when defaults are disabled and no custom labels exist.
pub const FALLBACK_LABEL: &str = LABEL_CONTAINER_ID;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("custom label mapping is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),
    #[error("custom label mapping must be a JSON object, found {found}")]
    NotAnObject { found: &'static str },
    #[error("custom label mapping value for key `{key}` must be a string")]
    NonStringValue { key: String },
    #[error("custom label mapping target `{label}` (key `{key}`) is not a valid metric label name")]
    InvalidLabelName { key: String, label: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Mapping of runtime label key to metric label name, in configuration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomLabelMapping(Vec<(String, String)>);

impl CustomLabelMapping {
    /// Builds a mapping from `(runtime_key, metric_label)` pairs.
    ///
    /// A repeated runtime key replaces the earlier entry in place.
    pub fn new<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut out: Vec<(String, String)> = Vec::new();
        for (key, label) in pairs {
            let (key, label) = (key.into(), label.into());
            match out.iter_mut().find(|(k, _)| *k == key) {
                Some(entry) => entry.1 = label,
                None => out.push((key, label)),
            }
        }
        Self(out)
    }

    /// Parses a JSON object of string values, e.g. `{"com.example.team": "team"}`.
    ///
    /// # Errors
    ///
    /// Fails if the input is not a JSON object, if any value is not a string, or
    /// if a value is not usable as a metric label name.
    pub fn parse(raw: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw).map_err(Error::InvalidJson)?;
        let object = match value {
            serde_json::Value::Object(object) => object,
            other => {
                return Err(Error::NotAnObject {
                    found: json_kind(&other),
                });
            }
        };

        let mut pairs = Vec::with_capacity(object.len());
        for (key, value) in object {
            let serde_json::Value::String(label) = value else {
                return Err(Error::NonStringValue { key });
            };
            if !is_valid_label_name(&label) {
                return Err(Error::InvalidLabelName { key, label });
            }
            pairs.push((key, label));
        }

        Ok(Self::new(pairs))
    }

    /// Parses `raw`, degrading to an empty mapping on any error.
    ///
    /// Blank input is treated as "no custom labels" without a warning.
    pub fn parse_or_empty(raw: &str) -> Self {
        if raw.trim().is_empty() {
            return Self::default();
        }
        match Self::parse(raw) {
            Ok(mapping) => mapping,
            Err(err) => {
                log::warn!("Ignoring CUSTOM_LABELS, falling back to no custom labels: {err}");
                Self::default()
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Ordered, duplicate free label names shared by every exported series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSchema(Vec<String>);

impl LabelSchema {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// A schema built by [`resolve`] is never empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for LabelSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(","))
    }
}

/// Computes the label schema for this process.
///
/// With `no_defaults` unset the schema is `base` followed by the distinct custom
/// targets not already present. With `no_defaults` set it is the distinct custom
/// targets alone, or `[FALLBACK_LABEL]` when there are none; the fallback is
/// logged because it overrides the configured intent.
///
/// Targets that collide with each other or with a base label are logged: the
/// custom value wins at emission time.
pub fn resolve(base: &[&str], custom: &CustomLabelMapping, no_defaults: bool) -> LabelSchema {
    let mut names: Vec<String> = Vec::with_capacity(base.len() + custom.len());
    if !no_defaults {
        for name in base {
            push_distinct(&mut names, name);
        }
    }

    let mut targets: Vec<&str> = Vec::with_capacity(custom.len());
    for (key, label) in custom.iter() {
        if targets.contains(&label) {
            log::warn!(
                "Custom label `{label}` is mapped from more than one runtime key; the value from `{key}` wins"
            );
        } else if !no_defaults && base.contains(&label) {
            log::warn!(
                "Custom label `{label}` (from `{key}`) shadows a default label; the custom value wins"
            );
        }
        targets.push(label);
        push_distinct(&mut names, label);
    }

    if names.is_empty() {
        log::warn!(
            "NO_DEFAULT_LABELS is set but no custom labels are configured; using `{FALLBACK_LABEL}` as the only label"
        );
        names.push(FALLBACK_LABEL.to_owned());
    }

    LabelSchema(names)
}

fn push_distinct(names: &mut Vec<String>, name: &str) {
    if !names.iter().any(|n| n == name) {
        names.push(name.to_owned());
    }
}

/// Checks the Prometheus label name grammar `[a-zA-Z_][a-zA-Z0-9_]*`, excluding
/// the reserved `__` prefix.
pub fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    !name.starts_with("__") && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
