//! Span export. Both tracing targets rebuild spans from points the same way and
//! differ only in transport.

use std::{
    collections::BTreeMap,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use url::Url;

use crate::{
    config::SinkConfig,
    error::ConfigError,
    types::{EpochTime, FieldValue, Point},
};

mod jaeger;
mod otel;
pub mod thrift;

pub use jaeger::JaegerSink;
pub use otel::{export_request, OtelSink};

/// Service name for spans that carry none
pub const UNKNOWN_SERVICE: &str = "unknown_service";

/// Tags that describe the span itself rather than becoming attributes
const SILENT_TAGS: [&str; 3] = ["source_type", "span_type", "version"];

/// Outcome of a span
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SpanStatus {
    /// Nothing was reported
    #[default]
    Unset,
    /// The operation failed
    Error,
    /// The operation succeeded
    Ok,
}

impl SpanStatus {
    /// `ok` and `info` are Ok, `error` and `warning` are Error, anything else is Unset
    pub fn from_tag(status: &str) -> Self {
        match status {
            "ok" | "info" => SpanStatus::Ok,
            "error" | "warning" => SpanStatus::Error,
            _ => SpanStatus::Unset,
        }
    }
}

/// A span rebuilt from one point
#[derive(Debug, Clone, PartialEq)]
pub struct SpanRecord {
    /// From the `operation` tag
    pub name: String,
    /// From the `service` tag, else the `resource` field
    pub service: Option<String>,
    /// All zero when absent or invalid
    pub trace_id: [u8; 16],
    /// All zero when absent or invalid
    pub span_id: [u8; 8],
    /// None for a root span
    pub parent_id: Option<[u8; 8]>,
    /// Span start
    pub start: SystemTime,
    /// Span length
    pub duration: Duration,
    /// From the `status` tag
    pub status: SpanStatus,
    /// Every other tag
    pub attributes: Vec<(String, String)>,
}

impl SpanRecord {
    /// `start + duration`
    pub fn end(&self) -> SystemTime {
        self.start + self.duration
    }

    /// The service this span exports under
    pub fn service_name(&self) -> &str {
        self.service.as_deref().unwrap_or(UNKNOWN_SERVICE)
    }
}

/// Rebuild a span from a point's tags and fields.
///
/// `duration` and `start` are integer microseconds; a missing `start` uses the point
/// time. Ids are hex, left-padded with zeros, and `"0"` means absent.
pub fn span_from_point(point: &Point) -> SpanRecord {
    let mut span = SpanRecord {
        name: String::new(),
        service: None,
        trace_id: [0; 16],
        span_id: [0; 8],
        parent_id: None,
        start: point.time,
        duration: Duration::ZERO,
        status: SpanStatus::Unset,
        attributes: Vec::new(),
    };

    for (key, value) in &point.tags {
        match key.as_str() {
            "operation" => span.name = value.clone(),
            "service" => {
                if !value.is_empty() {
                    span.service = Some(value.clone());
                }
            }
            "status" => span.status = SpanStatus::from_tag(value),
            "endpoint" if value == "null" => {}
            key if SILENT_TAGS.contains(&key) => {}
            _ => span.attributes.push((key.clone(), value.clone())),
        }
    }

    let mut resource = None;
    for (key, value) in &point.fields {
        match key.as_str() {
            "duration" => match micros(value) {
                Some(us) => span.duration = Duration::from_micros(us),
                None => log::debug!("span {}: duration `{value}` is not integer micros", span.name),
            },
            "start" => match micros(value) {
                Some(us) => span.start = UNIX_EPOCH + Duration::from_micros(us),
                None => log::debug!("span {}: start `{value}` is not integer micros", span.name),
            },
            "trace_id" => {
                if let Some(id) = value.as_str().and_then(parse_id::<16>) {
                    span.trace_id = id;
                }
            }
            "span_id" => {
                if let Some(id) = value.as_str().and_then(parse_id::<8>) {
                    span.span_id = id;
                }
            }
            "parent_id" => span.parent_id = value.as_str().and_then(parse_id::<8>),
            "resource" => resource = value.as_str().filter(|r| !r.is_empty()),
            _ => log::debug!("span {}: ignoring field {key}", span.name),
        }
    }
    if span.service.is_none() {
        span.service = resource.map(str::to_string);
    }
    span
}

/// Spans keyed by service name
pub fn group_by_service(points: &[Point]) -> BTreeMap<String, Vec<SpanRecord>> {
    let mut services: BTreeMap<String, Vec<SpanRecord>> = BTreeMap::new();
    for span in points.iter().map(span_from_point) {
        services
            .entry(span.service_name().to_string())
            .or_default()
            .push(span);
    }
    services
}

/// Parse a hex id of `N` bytes, left-padding short values with zeros.
/// `"0"`, an empty string, over-long and non-hex values are all absent.
pub fn parse_id<const N: usize>(hex_id: &str) -> Option<[u8; N]> {
    let hex_id = hex_id.trim();
    if hex_id.is_empty() || hex_id == "0" || N * 2 < hex_id.len() {
        return None;
    }
    let padded = format!("{hex_id:0>width$}", width = N * 2);
    let mut id = [0; N];
    match hex::decode_to_slice(&padded, &mut id) {
        Ok(()) => Some(id),
        Err(e) => {
            log::debug!("invalid hex id `{hex_id}`: {e}");
            None
        }
    }
}

fn micros(value: &FieldValue) -> Option<u64> {
    value.as_i64().and_then(|v| u64::try_from(v).ok())
}

pub(crate) fn micros_since_epoch(time: SystemTime) -> i64 {
    time.micros_since_epoch() as i64
}

/// Where a tracing sink sends spans
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// `http` or `grpc`
    pub scheme: String,
    /// Host name or address without port
    pub host: String,
    /// Port
    pub port: u16,
    /// Request path for http transports
    pub path: String,
}

impl Endpoint {
    /// Resolve `scheme`, `host`, `port` and `path` with per-target defaults.
    ///
    /// `default_port` returns None for schemes the target cannot use. A `host` holding
    /// a port is split when no explicit `port` is configured.
    pub fn from_config(
        target: &str,
        config: &SinkConfig,
        default_scheme: &str,
        default_port: fn(&str) -> Option<u16>,
        default_path: &str,
    ) -> Result<Self, ConfigError> {
        let scheme = match config.optional_str(target, "scheme")? {
            None | Some("") => default_scheme.to_string(),
            Some(s) => s.to_ascii_lowercase(),
        };
        let Some(scheme_port) = default_port(&scheme) else {
            return Err(ConfigError::InvalidScheme { scheme });
        };

        let host = config
            .optional_str(target, "host")?
            .filter(|h| !h.trim().is_empty())
            .unwrap_or("localhost");
        let authority = Url::parse(&format!("tracing://{host}")).map_err(|e| {
            ConfigError::invalid(target, "host", format!("`{host}` is not a host: {e}"))
        })?;
        let (host, host_port) = match authority.host_str() {
            Some(h) if !h.is_empty() => (h.to_string(), authority.port()),
            _ => {
                return Err(ConfigError::invalid(
                    target,
                    "host",
                    format!("`{host}` is not a host"),
                ))
            }
        };

        let port = match config.get_int(target, "port")? {
            Some(port) => u16::try_from(port).map_err(|_| {
                ConfigError::invalid(target, "port", format!("{port} is not a port"))
            })?,
            None => host_port.unwrap_or(scheme_port),
        };
        let path = match config.optional_str(target, "path")? {
            None | Some("") => default_path.to_string(),
            Some(p) if p.starts_with('/') => p.to_string(),
            Some(p) => format!("/{p}"),
        };
        Ok(Endpoint {
            scheme,
            host,
            port,
            path,
        })
    }

    /// `http://host:port/path`
    pub fn http_url(&self) -> String {
        format!("http://{}:{}{}", self.host, self.port, self.path)
    }

    /// `host:port`
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn span_point() -> Point {
        Point::new("span")
            .tag("operation", "GET /users")
            .tag("service", "api")
            .tag("status", "error")
            .tag("endpoint", "null")
            .tag("source_type", "web")
            .tag("span_type", "entry")
            .tag("version", "1.0")
            .tag("http.method", "GET")
            .field("trace_id", "abc")
            .field("span_id", "12")
            .field("parent_id", "0")
            .field("start", 1_700_000_000_000_000_i64)
            .field("duration", 1_500_i64)
            .field("resource", "ignored")
            .field("extra", 1_i64)
    }

    #[test_log::test]
    fn rebuilds_span() {
        let span = span_from_point(&span_point());
        assert_eq!("GET /users", span.name);
        assert_eq!(Some("api"), span.service.as_deref());
        assert_eq!(SpanStatus::Error, span.status);
        assert_eq!(
            vec![("http.method".to_string(), "GET".to_string())],
            span.attributes
        );

        let mut trace_id = [0; 16];
        trace_id[14] = 0x0a;
        trace_id[15] = 0xbc;
        assert_eq!(trace_id, span.trace_id);
        assert_eq!([0, 0, 0, 0, 0, 0, 0, 0x12], span.span_id);
        assert_eq!(None, span.parent_id);

        assert_eq!(
            UNIX_EPOCH + Duration::from_micros(1_700_000_000_000_000),
            span.start
        );
        assert_eq!(Duration::from_micros(1_500), span.end().duration_since(span.start).unwrap_or_default());
    }

    #[test_log::test]
    fn non_null_endpoint_is_kept() {
        let span = span_from_point(&Point::new("s").tag("endpoint", "/users"));
        assert_eq!(
            vec![("endpoint".to_string(), "/users".to_string())],
            span.attributes
        );
    }

    #[test_log::test]
    fn defaults_for_missing_and_invalid_ids() {
        let point = Point::new("s")
            .field("trace_id", "0")
            .field("span_id", "not hex")
            .field("parent_id", "ff");
        let span = span_from_point(&point);
        assert_eq!([0; 16], span.trace_id);
        assert_eq!([0; 8], span.span_id);
        assert_eq!(Some([0, 0, 0, 0, 0, 0, 0, 0xff]), span.parent_id);
        assert_eq!(UNKNOWN_SERVICE, span.service_name());
        assert_eq!(SpanStatus::Unset, span.status);
    }

    #[test_log::test]
    fn resource_names_the_service_when_the_tag_is_absent() {
        let span = span_from_point(&Point::new("s").tag("service", "").field("resource", "db"));
        assert_eq!(Some("db"), span.service.as_deref());
    }

    #[test_log::test]
    fn status_tags() {
        assert_eq!(SpanStatus::Ok, SpanStatus::from_tag("ok"));
        assert_eq!(SpanStatus::Ok, SpanStatus::from_tag("info"));
        assert_eq!(SpanStatus::Error, SpanStatus::from_tag("warning"));
        assert_eq!(SpanStatus::Unset, SpanStatus::from_tag("critical"));
    }

    #[test_log::test]
    fn id_padding() {
        assert_eq!(Some([0, 0, 0, 0, 0, 0, 0x0a, 0xbc]), parse_id::<8>("abc"));
        assert_eq!(Some([0xff; 8]), parse_id::<8>("ffffffffffffffff"));
        assert_eq!(None, parse_id::<8>("1ffffffffffffffff"));
        assert_eq!(None, parse_id::<8>("0"));
        assert_eq!(None, parse_id::<8>("xyz"));
        assert_eq!(None, parse_id::<16>(""));
    }

    #[test_log::test]
    fn grouping() {
        let points = [
            Point::new("a").tag("service", "api"),
            Point::new("b"),
            Point::new("c").tag("service", "api"),
        ];
        let services = group_by_service(&points);
        assert_eq!(2, services["api"].len());
        assert_eq!(1, services[UNKNOWN_SERVICE].len());
    }

    #[test_log::test]
    fn endpoint_defaults_and_overrides() {
        fn ports(scheme: &str) -> Option<u16> {
            match scheme {
                "http" => Some(4318),
                "grpc" => Some(4317),
                _ => None,
            }
        }
        let config = SinkConfig::new();
        let endpoint =
            Endpoint::from_config("otel", &config, "grpc", ports, "/v1/traces").expect("valid");
        assert_eq!("grpc", endpoint.scheme);
        assert_eq!("localhost:4317", endpoint.authority());

        let config = SinkConfig::new()
            .with("scheme", "http")
            .with("host", "collector:9999")
            .with("path", "traces");
        let endpoint =
            Endpoint::from_config("otel", &config, "grpc", ports, "/v1/traces").expect("valid");
        assert_eq!("http://collector:9999/traces", endpoint.http_url());

        let config = SinkConfig::new().with("host", "collector:9999").with("port", "1234");
        let endpoint =
            Endpoint::from_config("otel", &config, "grpc", ports, "/v1/traces").expect("valid");
        assert_eq!(1234, endpoint.port);

        let config = SinkConfig::new().with("scheme", "thrift");
        assert_eq!(
            Err(ConfigError::InvalidScheme {
                scheme: "thrift".to_string()
            }),
            Endpoint::from_config("otel", &config, "grpc", ports, "/v1/traces")
        );
    }
}
