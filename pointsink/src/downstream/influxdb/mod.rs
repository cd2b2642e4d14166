//! Time series ingestion over InfluxDB line protocol, via http `/write` or udp.

use std::{io::Write, time::Duration};

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use flate2::{write::GzEncoder, Compression};
use http_body_util::Full;
use hyper::{header, Request, StatusCode};
use url::Url;

use crate::{
    config::SinkConfig,
    error::{ConfigError, SinkError},
    sink::Sink,
    types::{Category, Point},
};

use super::channel_connection::{deliver, get_http_client, send_datagrams, web_trust};

mod line_protocol;

pub use line_protocol::{encode_point, encode_points, pack_datagrams, Precision};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_PAYLOAD_SIZE: usize = 512;
const DEFAULT_USER_AGENT: &str = concat!("pointsink/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Eq)]
enum Transport {
    /// `http://host:port` or `https://host:port`, no trailing slash
    Http(String),
    /// `host:port`, with the `udp://` prefix stripped
    Udp(String),
}

/// Writes points as line protocol to an InfluxDB-compatible endpoint.
///
/// Required keys: `host`, `protocol` (`http` or `udp`), `database`.
/// Optional: `precision`, `username`, `password`, `user_agent`, `retention_policy`,
/// `write_consistency`, `payload_size` (udp), `write_encoding` (`gzip`), `timeout`.
#[derive(Debug, Default)]
pub struct InfluxdbSink {
    id: String,
    transport: Option<Transport>,
    database: String,
    precision: Precision,
    username: String,
    password: String,
    user_agent: String,
    retention_policy: String,
    write_consistency: String,
    payload_size: usize,
    gzip: bool,
    timeout: Duration,
}

impl InfluxdbSink {
    /// Registry name
    pub const TARGET: &'static str = "influxdb";

    /// An unconfigured sink
    pub fn create() -> Box<dyn Sink> {
        Box::<InfluxdbSink>::default()
    }

    /// The `/write` url for the configured database and options
    fn write_url(&self, addr: &str) -> Result<Url, SinkError> {
        let mut url = Url::parse(&format!("{addr}/write"))
            .map_err(|e| SinkError::Http(format!("bad write url for {addr}: {e}")))?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("db", &self.database);
            if !self.retention_policy.is_empty() {
                query.append_pair("rp", &self.retention_policy);
            }
            query.append_pair("precision", self.precision.as_query());
            if !self.write_consistency.is_empty() {
                query.append_pair("consistency", &self.write_consistency);
            }
        }
        Ok(url)
    }

    async fn write_http(&self, addr: &str, lines: Vec<String>) -> Result<(), SinkError> {
        let mut body = lines.join("\n").into_bytes();
        body.push(b'\n');
        if self.gzip {
            let mut encoder = GzEncoder::new(Vec::with_capacity(body.len() / 4), Compression::default());
            encoder.write_all(&body)?;
            body = encoder.finish()?;
        }

        let mut request = Request::post(self.write_url(addr)?.as_str())
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .header(header::USER_AGENT, &self.user_agent);
        if self.gzip {
            request = request.header(header::CONTENT_ENCODING, "gzip");
        }
        if !self.username.is_empty() {
            let credentials = base64::engine::general_purpose::STANDARD
                .encode(format!("{}:{}", self.username, self.password));
            request = request.header(header::AUTHORIZATION, format!("Basic {credentials}"));
        }
        let request = request.body(Full::new(Bytes::from(body)))?;

        // a fresh client per write
        let client = get_http_client(web_trust, self.timeout)
            .map_err(|e| SinkError::Http(format!("could not build client: {e}")))?;
        deliver(&client, request, self.timeout, StatusCode::is_success).await?;
        Ok(())
    }

    async fn write_udp(&self, addr: &str, lines: Vec<String>) -> Result<(), SinkError> {
        send_datagrams(addr, &pack_datagrams(&lines, self.payload_size), self.timeout).await
    }
}

#[async_trait]
impl Sink for InfluxdbSink {
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
        let database = config.require_str(target, "database")?;

        let addr = format!("{protocol}://{host}");
        let scheme = Url::parse(&addr)
            .map(|url| url.scheme().to_string())
            .map_err(|_| ConfigError::InvalidAddr { addr: addr.clone() })?;
        let transport = match scheme.as_str() {
            "http" | "https" => Transport::Http(addr.trim_end_matches('/').to_string()),
            "udp" => Transport::Udp(addr.trim_start_matches("udp://").to_string()),
            _ => return Err(ConfigError::InvalidAddr { addr }),
        };

        let precision = match config.optional_str(target, "precision")? {
            None | Some("") => Precision::default(),
            Some(p) => Precision::parse(p).ok_or_else(|| {
                ConfigError::invalid(target, "precision", format!("unknown precision `{p}`"))
            })?,
        };
        let payload_size = match config.get_int(target, "payload_size")? {
            None => DEFAULT_PAYLOAD_SIZE,
            Some(size) if 0 < size => size as usize,
            Some(size) => {
                return Err(ConfigError::invalid(
                    target,
                    "payload_size",
                    format!("must be positive, got {size}"),
                ))
            }
        };
        let gzip = match config.optional_str(target, "write_encoding")? {
            None | Some("") => false,
            Some("gzip") => true,
            Some(other) => {
                return Err(ConfigError::invalid(
                    target,
                    "write_encoding",
                    format!("unsupported encoding `{other}`, only gzip is supported"),
                ))
            }
        };
        let timeout = config.get_duration(target, "timeout", DEFAULT_TIMEOUT)?;

        let optional = |key: &str| -> Result<String, ConfigError> {
            Ok(config.optional_str(target, key)?.unwrap_or_default().to_string())
        };
        let user_agent = match optional("user_agent")? {
            ua if ua.is_empty() => DEFAULT_USER_AGENT.to_string(),
            ua => ua,
        };

        *self = InfluxdbSink {
            id: config.id().trim().to_string(),
            transport: Some(transport),
            database: database.to_string(),
            precision,
            username: optional("username")?,
            password: optional("password")?,
            user_agent,
            retention_policy: optional("retention_policy")?,
            write_consistency: optional("write_consistency")?,
            payload_size,
            gzip,
            timeout,
        };
        Ok(())
    }

    async fn write(&self, _category: Category, points: &[Point]) -> Result<(), SinkError> {
        let Some(transport) = &self.transport else {
            return Err(SinkError::NotInitialized);
        };
        let lines = encode_points(points, self.precision);
        if lines.is_empty() {
            log::debug!("{}: nothing to write from {} points", self.id, points.len());
            return Ok(());
        }
        match transport {
            Transport::Http(addr) => self.write_http(addr, lines).await,
            Transport::Udp(addr) => self.write_udp(addr, lines).await,
        }
    }
}
