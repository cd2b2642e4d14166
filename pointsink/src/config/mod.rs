//! Sink configuration: the normalized map each sink is built from, plus the
//! descriptor parser that produces those maps from operator input.

use std::{collections::BTreeMap, fmt::Display, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

mod descriptor;
mod fingerprint;

pub use descriptor::{
    descriptors_from_env, merge, parse_descriptors, parse_single_descriptor, DESCRIPTOR_SEPARATOR,
};
pub use fingerprint::{fingerprint, Fingerprint};

/// Key naming the sink implementation
pub const TARGET: &str = "target";
/// Key naming the sink instance
pub const ID: &str = "id";
/// Key holding the descriptor authority
pub const HOST: &str = "host";
/// Query key kept as a list rather than collapsed to its first value
pub const FILTERS: &str = "filters";

/// A configuration value. Descriptors only produce strings and lists; the
/// composition root may hand over integers and booleans as well.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    /// A boolean flag
    Bool(bool),
    /// An integer
    Int(i64),
    /// A string
    String(String),
    /// A list of strings
    List(Vec<String>),
}

impl Display for ConfigValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigValue::Bool(b) => write!(f, "{b}"),
            ConfigValue::Int(i) => write!(f, "{i}"),
            ConfigValue::String(s) => f.write_str(s),
            ConfigValue::List(l) => f.write_str(&l.join(",")),
        }
    }
}

impl From<&str> for ConfigValue {
    #[inline]
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for ConfigValue {
    #[inline]
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<i64> for ConfigValue {
    #[inline]
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<bool> for ConfigValue {
    #[inline]
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<Vec<String>> for ConfigValue {
    #[inline]
    fn from(l: Vec<String>) -> Self {
        Self::List(l)
    }
}

/// One sink instance's configuration: a flat key/value map plus the upper-case
/// category tags the instance serves.
///
/// Built once at startup and not mutated once handed to the manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Upper-case category short tags, e.g. `["M", "L"]`
    #[serde(default)]
    pub categories: Vec<String>,
    /// Everything else: `target`, `id`, `host` and the sink-specific keys
    #[serde(flatten)]
    pub values: BTreeMap<String, ConfigValue>,
}

impl SinkConfig {
    /// An empty config
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Builder-style category assignment. Tags are stored upper-case.
    pub fn with_categories(mut self, categories: impl IntoIterator<Item = impl AsRef<str>>) -> Self {
        self.categories = categories
            .into_iter()
            .map(|c| c.as_ref().to_uppercase())
            .collect();
        self
    }

    /// Set a value, replacing any previous one
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) {
        self.values.insert(key.into(), value.into());
    }

    /// Raw value lookup
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.values.get(key)
    }

    /// True for the "no sink configured" placeholder
    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.categories.is_empty()
    }

    /// The `target` value, or "" when unset
    pub fn target(&self) -> &str {
        self.get_str(TARGET).unwrap_or_default()
    }

    /// The `id` value, or "" when unset
    pub fn id(&self) -> &str {
        self.get_str(ID).unwrap_or_default()
    }

    /// A string value. Non-string values are not coerced.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(ConfigValue::String(s)) => Some(s),
            _ => None,
        }
    }

    /// A string value that must be present and non-blank
    pub fn require_str(&self, target: &str, key: &str) -> Result<&str, ConfigError> {
        match self.values.get(key) {
            Some(ConfigValue::String(s)) if !s.trim().is_empty() => Ok(s),
            Some(ConfigValue::String(_)) | None => Err(ConfigError::missing(target, key)),
            Some(other) => Err(ConfigError::invalid(
                target,
                key,
                format!("expected a string, got `{other}`"),
            )),
        }
    }

    /// An optional string value. Present values must be strings.
    pub fn optional_str(&self, target: &str, key: &str) -> Result<Option<&str>, ConfigError> {
        match self.values.get(key) {
            Some(ConfigValue::String(s)) => Ok(Some(s)),
            None => Ok(None),
            Some(other) => Err(ConfigError::invalid(
                target,
                key,
                format!("expected a string, got `{other}`"),
            )),
        }
    }

    /// An optional integer. Strings holding a decimal integer are accepted since
    /// descriptor query values are always strings.
    pub fn get_int(&self, target: &str, key: &str) -> Result<Option<i64>, ConfigError> {
        match self.values.get(key) {
            None => Ok(None),
            Some(ConfigValue::Int(i)) => Ok(Some(*i)),
            Some(ConfigValue::String(s)) if s.trim().is_empty() => Ok(None),
            Some(ConfigValue::String(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::invalid(target, key, format!("`{s}` is not an integer"))),
            Some(other) => Err(ConfigError::invalid(
                target,
                key,
                format!("expected an integer, got `{other}`"),
            )),
        }
    }

    /// An optional duration string like `10s` or `1m30s`, falling back to `default`
    pub fn get_duration(
        &self,
        target: &str,
        key: &str,
        default: Duration,
    ) -> Result<Duration, ConfigError> {
        match self.optional_str(target, key)? {
            None => Ok(default),
            Some(s) if s.trim().is_empty() => Ok(default),
            Some(s) => parse_duration(s.trim()).ok_or_else(|| {
                ConfigError::invalid(target, key, format!("`{s}` is not a duration"))
            }),
        }
    }

    /// A list value. A lone string is treated as a one-element list.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        match self.values.get(key) {
            Some(ConfigValue::List(l)) => l.clone(),
            Some(ConfigValue::String(s)) if !s.is_empty() => vec![s.clone()],
            _ => Vec::new(),
        }
    }
}

/// Parses duration strings: a sequence of decimal numbers, each with an
/// optional fraction and a unit suffix (`ns`, `us`, `µs`, `ms`, `s`, `m`, `h`).
/// A bare `0` is accepted.
pub fn parse_duration(s: &str) -> Option<Duration> {
    if s == "0" {
        return Some(Duration::ZERO);
    }
    if s.is_empty() {
        return None;
    }

    let mut total_nanos: f64 = 0.0;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        if number_len == 0 {
            return None;
        }
        let number: f64 = rest[..number_len].parse().ok()?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let scale = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };
        rest = &rest[unit_len..];
        total_nanos += number * scale;
    }
    Some(Duration::from_nanos(total_nanos.round() as u64))
}
