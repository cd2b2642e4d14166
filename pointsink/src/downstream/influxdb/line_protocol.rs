//! InfluxDB line protocol: `measurement,tag=v field=1i,other="s" 1700000000000000000`

use std::{fmt::Write, time::SystemTime};

use crate::types::{EpochTime, FieldValue, Point};

/// Timestamp resolution of written lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Precision {
    /// `ns` or `n`
    #[default]
    Nanosecond,
    /// `us` or `u`
    Microsecond,
    /// `ms`
    Millisecond,
    /// `s`
    Second,
    /// `m`
    Minute,
    /// `h`
    Hour,
}

impl Precision {
    /// Parse a precision config value
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "ns" | "n" => Precision::Nanosecond,
            "us" | "u" => Precision::Microsecond,
            "ms" => Precision::Millisecond,
            "s" => Precision::Second,
            "m" => Precision::Minute,
            "h" => Precision::Hour,
            _ => return None,
        })
    }

    /// The value of the `precision` query parameter on `/write`
    pub fn as_query(self) -> &'static str {
        match self {
            Precision::Nanosecond => "ns",
            Precision::Microsecond => "u",
            Precision::Millisecond => "ms",
            Precision::Second => "s",
            Precision::Minute => "m",
            Precision::Hour => "h",
        }
    }

    /// `time` truncated to this precision
    pub fn timestamp(self, time: SystemTime) -> u64 {
        let nanos = time.nanos_since_epoch();
        nanos
            / match self {
                Precision::Nanosecond => 1,
                Precision::Microsecond => 1_000,
                Precision::Millisecond => 1_000_000,
                Precision::Second => 1_000_000_000,
                Precision::Minute => 60 * 1_000_000_000,
                Precision::Hour => 3_600 * 1_000_000_000,
            }
    }
}

/// Encode every point, skipping points with nothing to write.
pub fn encode_points(points: &[Point], precision: Precision) -> Vec<String> {
    points
        .iter()
        .filter_map(|point| {
            let mut line = String::with_capacity(128);
            encode_point(point, precision, &mut line).then_some(line)
        })
        .collect()
}

/// Append one line for `point` to `out`, without a trailing newline. Returns false
/// and leaves `out` untouched when the point has no encodable field.
pub fn encode_point(point: &Point, precision: Precision, out: &mut String) -> bool {
    let start = out.len();
    escape_into(out, &point.name, &[',', ' ']);
    for (key, value) in &point.tags {
        if key.is_empty() || value.is_empty() {
            continue;
        }
        out.push(',');
        escape_into(out, key, &[',', '=', ' ']);
        out.push('=');
        escape_into(out, value, &[',', '=', ' ']);
    }

    let mut fields = 0;
    for (key, value) in &point.fields {
        let separator = if fields == 0 { ' ' } else { ',' };
        let before = out.len();
        out.push(separator);
        escape_into(out, key, &[',', '=', ' ']);
        out.push('=');
        if encode_field_value(value, out) {
            fields += 1;
        } else {
            log::debug!("skipping field {key} of {}: not a line protocol value", point.name);
            out.truncate(before);
        }
    }
    if fields == 0 {
        log::debug!("dropping point {}: no encodable fields", point.name);
        out.truncate(start);
        return false;
    }

    // writing to a String does not fail
    let _ = write!(out, " {}", precision.timestamp(point.time));
    true
}

/// Pack lines into newline-terminated datagrams of at most `payload_size` bytes.
/// A line longer than the payload goes out alone.
pub fn pack_datagrams(lines: &[String], payload_size: usize) -> Vec<Vec<u8>> {
    let mut datagrams = Vec::new();
    let mut current: Vec<u8> = Vec::with_capacity(payload_size);
    for line in lines {
        let needed = line.len() + 1;
        if !current.is_empty() && current.len() + needed > payload_size {
            datagrams.push(std::mem::replace(
                &mut current,
                Vec::with_capacity(payload_size),
            ));
        }
        current.extend_from_slice(line.as_bytes());
        current.push(b'\n');
        if payload_size <= current.len() {
            datagrams.push(std::mem::replace(
                &mut current,
                Vec::with_capacity(payload_size),
            ));
        }
    }
    if !current.is_empty() {
        datagrams.push(current);
    }
    datagrams
}

fn encode_field_value(value: &FieldValue, out: &mut String) -> bool {
    match value {
        FieldValue::Int(i) => {
            let _ = write!(out, "{i}i");
        }
        FieldValue::Uint(u) => {
            let _ = write!(out, "{u}u");
        }
        FieldValue::Float(f) if f.is_finite() => {
            let _ = write!(out, "{f}");
        }
        FieldValue::Bool(b) => {
            let _ = write!(out, "{b}");
        }
        FieldValue::String(s) => {
            out.push('"');
            escape_into(out, s, &['"', '\\']);
            out.push('"');
        }
        FieldValue::Float(_) | FieldValue::Map(_) | FieldValue::Slice(_) => return false,
    }
    true
}

fn escape_into(out: &mut String, s: &str, special: &[char]) {
    for c in s.chars() {
        if special.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
}
