//! Sink implementations, one per backend protocol

mod channel_connection;
mod influxdb;
mod logstash;
mod remote_write;
pub mod tracing;

pub use channel_connection::{
    deliver, get_client, get_http_client, send, send_datagrams, web_trust, ChannelType, HttpClient,
};
pub use influxdb::{encode_point, encode_points, pack_datagrams, InfluxdbSink, Precision};
pub use logstash::{encode_json, encode_plain, JsonPoint, LogstashSink, WriteType};
pub use remote_write::{
    encode_write_request, flatten_point, write_request, RemoteWriteSink, Series, METRIC_NAME_LABEL,
};
pub use tracing::{JaegerSink, OtelSink};

pub(crate) type StdError = Box<dyn std::error::Error + Send + Sync + 'static>;
