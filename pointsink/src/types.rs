use std::{
    collections::BTreeMap,
    fmt::Display,
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};

use serde::{Serialize, Serializer};

/// The value part of a field's key/value pair.
///
/// This is a closed set: encoders switch over these variants instead of inspecting
/// values at runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// A signed integer.
    Int(i64),
    /// An unsigned integer. Line protocol writes these with a `u` suffix.
    Uint(u64),
    /// A floating point value.
    Float(f64),
    /// A string value.
    String(String),
    /// A boolean value.
    Bool(bool),
    /// A nested string-keyed map of values.
    Map(BTreeMap<String, FieldValue>),
    /// An ordered list of values.
    Slice(Vec<FieldValue>),
}

impl FieldValue {
    /// A string view of the value, when it is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// An integer view of the value, when it is any integer kind that fits in i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(i) => Some(*i),
            FieldValue::Uint(u) => i64::try_from(*u).ok(),
            _ => None,
        }
    }

    /// A numeric view of the value for integer and floating kinds.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(i) => Some(*i as f64),
            FieldValue::Uint(u) => Some(*u as f64),
            FieldValue::Float(f) => Some(*f),
            _ => None,
        }
    }
}

impl Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FieldValue::Int(i) => write!(f, "{i}"),
            FieldValue::Uint(u) => write!(f, "{u}"),
            FieldValue::Float(n) => write!(f, "{n}"),
            FieldValue::String(s) => f.write_str(s),
            FieldValue::Bool(b) => write!(f, "{b}"),
            FieldValue::Map(m) => {
                f.write_str("{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if 0 < i {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
            FieldValue::Slice(s) => {
                f.write_str("[")?;
                for (i, v) in s.iter().enumerate() {
                    if 0 < i {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl Serialize for FieldValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            FieldValue::Int(i) => serializer.serialize_i64(*i),
            FieldValue::Uint(u) => serializer.serialize_u64(*u),
            FieldValue::Float(f) => serializer.serialize_f64(*f),
            FieldValue::String(s) => serializer.serialize_str(s),
            FieldValue::Bool(b) => serializer.serialize_bool(*b),
            FieldValue::Map(m) => m.serialize(serializer),
            FieldValue::Slice(s) => s.serialize(serializer),
        }
    }
}

impl From<i64> for FieldValue {
    #[inline]
    fn from(n: i64) -> Self {
        FieldValue::Int(n)
    }
}

impl From<i32> for FieldValue {
    #[inline]
    fn from(n: i32) -> Self {
        FieldValue::Int(n.into())
    }
}

impl From<u64> for FieldValue {
    #[inline]
    fn from(n: u64) -> Self {
        FieldValue::Uint(n)
    }
}

impl From<u32> for FieldValue {
    #[inline]
    fn from(n: u32) -> Self {
        FieldValue::Uint(n.into())
    }
}

impl From<f64> for FieldValue {
    #[inline]
    fn from(n: f64) -> Self {
        FieldValue::Float(n)
    }
}

impl From<f32> for FieldValue {
    #[inline]
    fn from(n: f32) -> Self {
        FieldValue::Float(n.into())
    }
}

impl From<bool> for FieldValue {
    #[inline]
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<&str> for FieldValue {
    #[inline]
    fn from(s: &str) -> Self {
        FieldValue::String(s.to_owned())
    }
}

impl From<String> for FieldValue {
    #[inline]
    fn from(s: String) -> Self {
        FieldValue::String(s)
    }
}

impl<T: Into<FieldValue>> From<Vec<T>> for FieldValue {
    fn from(v: Vec<T>) -> Self {
        FieldValue::Slice(v.into_iter().map(Into::into).collect())
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for FieldValue {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        FieldValue::Map(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// One unit of telemetry. Points arrive already collected; sinks only read them.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    /// The measurement name.
    pub name: String,
    /// String tags. Keys are unique.
    pub tags: BTreeMap<String, String>,
    /// Typed fields. Keys are unique.
    pub fields: BTreeMap<String, FieldValue>,
    /// When the point was observed.
    pub time: SystemTime,
}

impl Point {
    /// A point with no tags or fields, stamped now.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: Default::default(),
            fields: Default::default(),
            time: SystemTime::now(),
        }
    }

    /// Add a tag.
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Add a field.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Set the timestamp.
    pub fn at(mut self, time: SystemTime) -> Self {
        self.time = time;
        self
    }
}

impl Display for Point {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;
        for (k, v) in &self.tags {
            write!(f, ",{k}={v}")?;
        }
        for (i, (k, v)) in self.fields.iter().enumerate() {
            f.write_str(if i == 0 { " " } else { "," })?;
            write!(f, "{k}={v}")?;
        }
        write!(f, " {}", self.time.nanos_since_epoch())
    }
}

/// A provider of unix epoch time at various resolutions
pub trait EpochTime {
    /// return nanos since the unix epoch
    fn nanos_since_epoch(&self) -> u64;

    /// return micros since the unix epoch
    fn micros_since_epoch(&self) -> u64 {
        self.nanos_since_epoch() / 1_000
    }

    /// return millis since the unix epoch
    fn millis_since_epoch(&self) -> u64 {
        self.nanos_since_epoch() / 1_000_000
    }
}

impl EpochTime for SystemTime {
    fn nanos_since_epoch(&self) -> u64 {
        // Times before the epoch clamp to 0
        self.duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default()
    }
}

/// The logical partition a point belongs to. Sinks subscribe to categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    /// Time series metrics.
    Metric,
    /// Network flow data.
    Network,
    /// Key events.
    KeyEvent,
    /// Host and resource objects.
    Object,
    /// User-defined objects.
    CustomObject,
    /// Log lines.
    Logging,
    /// Spans.
    Tracing,
    /// Real user monitoring.
    Rum,
    /// Security findings.
    Security,
    /// Profiling metadata.
    Profiling,
}

impl Category {
    /// Every category, in canonical order.
    pub const ALL: [Category; 10] = [
        Category::Metric,
        Category::Network,
        Category::KeyEvent,
        Category::Object,
        Category::CustomObject,
        Category::Logging,
        Category::Tracing,
        Category::Rum,
        Category::Security,
        Category::Profiling,
    ];

    /// The upper-case tag used in sink configuration `categories`.
    pub fn short(self) -> &'static str {
        match self {
            Category::Metric => "M",
            Category::Network => "N",
            Category::KeyEvent => "K",
            Category::Object => "O",
            Category::CustomObject => "CO",
            Category::Logging => "L",
            Category::Tracing => "T",
            Category::Rum => "R",
            Category::Security => "S",
            Category::Profiling => "P",
        }
    }

    /// The pure lower-case name.
    pub fn name(self) -> &'static str {
        match self {
            Category::Metric => "metric",
            Category::Network => "network",
            Category::KeyEvent => "keyevent",
            Category::Object => "object",
            Category::CustomObject => "custom_object",
            Category::Logging => "logging",
            Category::Tracing => "tracing",
            Category::Rum => "rum",
            Category::Security => "security",
            Category::Profiling => "profiling",
        }
    }

    /// The upstream write path, e.g. `/v1/write/metric`.
    pub fn path(self) -> &'static str {
        match self {
            Category::Metric => "/v1/write/metric",
            Category::Network => "/v1/write/network",
            Category::KeyEvent => "/v1/write/keyevent",
            Category::Object => "/v1/write/object",
            Category::CustomObject => "/v1/write/custom_object",
            Category::Logging => "/v1/write/logging",
            Category::Tracing => "/v1/write/tracing",
            Category::Rum => "/v1/write/rum",
            Category::Security => "/v1/write/security",
            Category::Profiling => "/v1/write/profiling",
        }
    }

    /// Accepts a short tag, a pure name or a write path, case-insensitively.
    /// The deprecated `/v1/write/metrics` path is still metric.
    pub fn parse(s: &str) -> Option<Category> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("/v1/write/metrics") {
            return Some(Category::Metric);
        }
        Self::ALL.into_iter().find(|c| {
            s.eq_ignore_ascii_case(c.short())
                || s.eq_ignore_ascii_case(c.name())
                || s.eq_ignore_ascii_case(c.path())
        })
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::parse(s).ok_or_else(|| s.to_string())
    }
}

impl Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
