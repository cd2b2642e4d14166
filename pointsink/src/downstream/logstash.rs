//! Log shipping over http PUT, as a json array or newline-joined plain text.

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use http_body_util::Full;
use hyper::{header, Request, StatusCode};
use serde::Serialize;
use url::Url;

use crate::{
    config::SinkConfig,
    error::{ConfigError, SinkError},
    sink::Sink,
    types::{Category, FieldValue, Point},
};

use super::channel_connection::{deliver, get_http_client, web_trust};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// How points are put on the wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteType {
    /// A json array of `{measurement, tags, fields, time}` objects
    #[default]
    Json,
    /// The string `message` field of every point, one per line
    Plain,
}

/// The json projection of one point
#[derive(Debug, Serialize)]
pub struct JsonPoint<'a> {
    /// Point name
    pub measurement: &'a str,
    /// Point tags
    pub tags: &'a BTreeMap<String, String>,
    /// Point fields, as plain json values
    pub fields: &'a BTreeMap<String, FieldValue>,
    /// RFC 3339 with nanoseconds
    pub time: String,
}

impl<'a> From<&'a Point> for JsonPoint<'a> {
    fn from(point: &'a Point) -> Self {
        JsonPoint {
            measurement: &point.name,
            tags: &point.tags,
            fields: &point.fields,
            time: DateTime::<Utc>::from(point.time).to_rfc3339_opts(SecondsFormat::Nanos, true),
        }
    }
}

/// Encode `points` as a json array
pub fn encode_json(points: &[Point]) -> Result<Vec<u8>, SinkError> {
    let points: Vec<JsonPoint> = points.iter().map(JsonPoint::from).collect();
    serde_json::to_vec(&points).map_err(|e| SinkError::Encode(e.to_string()))
}

/// Newline-join every point's `message`. Every point must carry a string `message`.
pub fn encode_plain(points: &[Point]) -> Result<Vec<u8>, SinkError> {
    let messages = points
        .iter()
        .map(|point| {
            point
                .fields
                .get("message")
                .and_then(FieldValue::as_str)
                .ok_or_else(|| SinkError::MissingMessage {
                    point: point.name.clone(),
                })
        })
        .collect::<Result<Vec<&str>, SinkError>>()?;
    Ok(messages.join("\n").into_bytes())
}

/// Logstash http input. Any status in `[200, 400)` is accepted.
///
/// Required keys: `host`, `protocol`, `request_path`, `write_type` (`json` or `plain`).
/// Optional: `timeout`.
#[derive(Debug, Default)]
pub struct LogstashSink {
    id: String,
    url: Option<Url>,
    write_type: WriteType,
    timeout: Duration,
}

impl LogstashSink {
    /// Registry name
    pub const TARGET: &'static str = "logstash";

    /// An unconfigured sink
    pub fn create() -> Box<dyn Sink> {
        Box::<LogstashSink>::default()
    }
}

fn accepted(status: &StatusCode) -> bool {
    (200..400).contains(&status.as_u16())
}

#[async_trait]
impl Sink for LogstashSink {
    fn target(&self) -> &'static str {
        Self::TARGET
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn load_config(&mut self, config: &SinkConfig) -> Result<(), ConfigError> {
        let target = Self::TARGET;
        let host = config.require_str(target, "host")?;
        let protocol = config.require_str(target, "protocol")?;
        let request_path = config.require_str(target, "request_path")?;
        let write_type = match config.require_str(target, "write_type")? {
            "json" => WriteType::Json,
            "plain" => WriteType::Plain,
            other => {
                return Err(ConfigError::invalid(
                    target,
                    "write_type",
                    format!("`{other}` is neither json nor plain"),
                ))
            }
        };
        let timeout = config.get_duration(target, "timeout", DEFAULT_TIMEOUT)?;

        let separator = if request_path.starts_with('/') { "" } else { "/" };
        let addr = format!("{protocol}://{host}{separator}{request_path}");
        let url = Url::parse(&addr).map_err(|_| ConfigError::InvalidAddr { addr: addr.clone() })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidAddr { addr });
        }

        *self = LogstashSink {
            id: config.id().trim().to_string(),
            url: Some(url),
            write_type,
            timeout,
        };
        Ok(())
    }

    async fn write(&self, _category: Category, points: &[Point]) -> Result<(), SinkError> {
        let Some(url) = &self.url else {
            return Err(SinkError::NotInitialized);
        };
        let request = Request::put(url.as_str());
        let (request, body) = match self.write_type {
            WriteType::Json => (
                request.header(header::CONTENT_TYPE, "application/json"),
                encode_json(points)?,
            ),
            WriteType::Plain => (request, encode_plain(points)?),
        };
        let request = request.body(Full::new(Bytes::from(body)))?;

        let client = get_http_client(web_trust, self.timeout)
            .map_err(|e| SinkError::Http(format!("could not build client: {e}")))?;
        let status = deliver(&client, request, self.timeout, accepted).await?;
        log::debug!("{}: wrote {} points, status {status}", self.id, points.len());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;

    fn config(write_type: &str) -> SinkConfig {
        SinkConfig::new()
            .with("target", "logstash")
            .with("id", "logs")
            .with("host", "127.0.0.1:8080")
            .with("protocol", "http")
            .with("request_path", "/ingest")
            .with("write_type", write_type)
    }

    #[test_log::test]
    fn json_projection() {
        let point = Point::new("nginx")
            .tag("a", "1")
            .field("message", "hi")
            .field("bytes", 10_i64)
            .at(UNIX_EPOCH + Duration::new(1_700_000_000, 5));
        let body = encode_json(&[point]).expect("encodes");
        let value: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(
            serde_json::json!([{
                "measurement": "nginx",
                "tags": {"a": "1"},
                "fields": {"bytes": 10, "message": "hi"},
                "time": "2023-11-14T22:13:20.000000005Z",
            }]),
            value
        );
    }

    #[test_log::test]
    fn plain_needs_string_messages() {
        let points = [
            Point::new("a").field("message", "first"),
            Point::new("b").field("message", "second"),
        ];
        assert_eq!(b"first\nsecond".to_vec(), encode_plain(&points).expect("encodes"));

        let err = encode_plain(&[Point::new("c").field("message", 3_i64)]).expect_err("not a string");
        assert!(matches!(err, SinkError::MissingMessage { point } if point == "c"));
        assert!(encode_plain(&[Point::new("d")]).is_err());
    }

    #[test_log::test]
    fn config_builds_url() {
        let mut sink = LogstashSink::default();
        sink.load_config(&config("plain")).expect("valid");
        assert_eq!(
            Some("http://127.0.0.1:8080/ingest"),
            sink.url.as_ref().map(Url::as_str)
        );
        assert_eq!(WriteType::Plain, sink.write_type);
        assert_eq!(DEFAULT_TIMEOUT, sink.timeout);

        sink.load_config(&config("json").with("request_path", "x").with("timeout", "2s"))
            .expect("valid");
        assert_eq!(
            Some("http://127.0.0.1:8080/x"),
            sink.url.as_ref().map(Url::as_str)
        );
        assert_eq!(Duration::from_secs(2), sink.timeout);
    }

    #[test_log::test]
    fn config_errors() {
        let mut sink = LogstashSink::default();
        assert_eq!(
            Err(ConfigError::missing("logstash", "write_type")),
            sink.load_config(&config(""))
        );
        assert!(sink.load_config(&config("xml")).is_err());
        assert!(sink
            .load_config(&config("json").with("protocol", "ftp"))
            .is_err());
    }

    #[test_log::test]
    fn success_band() {
        assert!(accepted(&StatusCode::OK));
        assert!(accepted(&StatusCode::CREATED));
        assert!(accepted(&StatusCode::PERMANENT_REDIRECT));
        assert!(!accepted(&StatusCode::BAD_REQUEST));
        assert!(!accepted(&StatusCode::NOT_FOUND));
        assert!(!accepted(&StatusCode::CONTINUE));
    }
}
