//! Prometheus remote write: protobuf `WriteRequest`, snappy block compressed,
//! POSTed to an m3db (or any remote-write) receiver.

use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, Request, StatusCode};
use prost::Message;
use url::Url;

use crate::{
    config::SinkConfig,
    error::{ConfigError, SinkError},
    proto::prometheus::{Label, Sample, TimeSeries, WriteRequest},
    sink::Sink,
    types::{Category, EpochTime, FieldValue, Point},
};

use super::channel_connection::{deliver, get_http_client, web_trust, HttpClient};

/// The reserved label carrying the metric name
pub const METRIC_NAME_LABEL: &str = "__name__";

const CLIENT_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = concat!("pointsink-remote-write/", env!("CARGO_PKG_VERSION"));
const REMOTE_WRITE_VERSION: &str = "0.1.0";

/// One flattened sample: labels sorted by name
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    /// Point tags plus `__name__`, sorted by name
    pub labels: Vec<Label>,
    /// Milliseconds since the unix epoch
    pub timestamp: i64,
    /// Sample value
    pub value: f64,
}

/// Flatten every field of `point` into samples.
///
/// Numbers become one sample named after their field. Maps recurse once per entry
/// under the entry's key. Slices recurse once per element under the same name, so
/// their elements share a label set. Strings and booleans produce nothing.
pub fn flatten_point(point: &Point) -> Vec<Series> {
    let timestamp = point.time.millis_since_epoch() as i64;
    let mut series = Vec::new();
    for (name, value) in &point.fields {
        flatten_value(name, value, &point.tags, timestamp, &mut series);
    }
    series
}

fn flatten_value(
    name: &str,
    value: &FieldValue,
    tags: &BTreeMap<String, String>,
    timestamp: i64,
    series: &mut Vec<Series>,
) {
    match value {
        FieldValue::Int(_) | FieldValue::Uint(_) | FieldValue::Float(_) => {
            let Some(value) = value.as_f64() else {
                return;
            };
            let mut labels: BTreeMap<&str, &str> = tags
                .iter()
                .map(|(k, v)| (k.as_str(), v.as_str()))
                .collect();
            labels.insert(METRIC_NAME_LABEL, name);
            series.push(Series {
                labels: labels
                    .into_iter()
                    .map(|(name, value)| Label {
                        name: name.to_string(),
                        value: value.to_string(),
                    })
                    .collect(),
                timestamp,
                value,
            });
        }
        FieldValue::Map(entries) => {
            for (key, entry) in entries {
                flatten_value(key, entry, tags, timestamp, series);
            }
        }
        FieldValue::Slice(elements) => {
            for element in elements {
                flatten_value(name, element, tags, timestamp, series);
            }
        }
        FieldValue::String(_) | FieldValue::Bool(_) => {
            log::debug!("field {name} is not numeric, no series");
        }
    }
}

/// Build the write request: one time series with one sample per flattened series
pub fn write_request(points: &[Point]) -> WriteRequest {
    WriteRequest {
        timeseries: points
            .iter()
            .flat_map(flatten_point)
            .map(|series| TimeSeries {
                labels: series.labels,
                samples: vec![Sample {
                    value: series.value,
                    timestamp: series.timestamp,
                }],
            })
            .collect(),
    }
}

/// Serialize and snappy-compress a write request
pub fn encode_write_request(request: &WriteRequest) -> Result<Vec<u8>, SinkError> {
    snap::raw::Encoder::new()
        .compress_vec(&request.encode_to_vec())
        .map_err(|e| SinkError::Encode(format!("snappy: {e}")))
}

/// Pushes metrics with the remote-write protocol.
///
/// Required keys: `id`, `addr` (the full receiver url).
#[derive(Default)]
pub struct RemoteWriteSink {
    id: String,
    addr: Option<Url>,
    client: Option<HttpClient>,
}

impl std::fmt::Debug for RemoteWriteSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteWriteSink")
            .field("id", &self.id)
            .field("addr", &self.addr.as_ref().map(Url::as_str))
            .finish()
    }
}

impl RemoteWriteSink {
    /// Registry name
    pub const TARGET: &'static str = "m3db";

    /// An unconfigured sink
    pub fn create() -> Box<dyn Sink> {
        Box::<RemoteWriteSink>::default()
    }
}

#[async_trait]
impl Sink for RemoteWriteSink {
    fn target(&self) -> &'static str {
        Self::TARGET
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn load_config(&mut self, config: &SinkConfig) -> Result<(), ConfigError> {
        let target = Self::TARGET;
        let id = config.require_str(target, "id")?.trim().to_string();
        let addr = config.require_str(target, "addr")?;
        let url = Url::parse(addr).map_err(|_| ConfigError::InvalidAddr {
            addr: addr.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidAddr {
                addr: addr.to_string(),
            });
        }
        let client = get_http_client(web_trust, CLIENT_TIMEOUT)
            .map_err(|e| ConfigError::exporter(target, e))?;

        *self = RemoteWriteSink {
            id,
            addr: Some(url),
            client: Some(client),
        };
        Ok(())
    }

    async fn write(&self, _category: Category, points: &[Point]) -> Result<(), SinkError> {
        let (Some(addr), Some(client)) = (&self.addr, &self.client) else {
            return Err(SinkError::NotInitialized);
        };
        let request = write_request(points);
        if request.timeseries.is_empty() {
            log::debug!("{}: no numeric series in {} points", self.id, points.len());
            return Ok(());
        }
        let body = encode_write_request(&request)?;

        let request = Request::post(addr.as_str())
            .header(header::CONTENT_TYPE, "application/x-protobuf")
            .header(header::CONTENT_ENCODING, "snappy")
            .header(header::USER_AGENT, USER_AGENT)
            .header("X-Prometheus-Remote-Write-Version", REMOTE_WRITE_VERSION)
            .body(Full::new(Bytes::from(body)))?;
        deliver(client, request, CLIENT_TIMEOUT, StatusCode::is_success).await?;
        Ok(())
    }
}
