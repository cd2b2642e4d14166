//! Jaeger trace export. A collector receives one binary thrift `Batch` per service over
//! http; an agent receives compact thrift `emitBatch` datagrams over udp.

use std::{
    sync::atomic::{AtomicI32, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, Request, StatusCode};

use crate::{
    config::SinkConfig,
    downstream::channel_connection::{deliver, get_http_client, send_datagrams, HttpClient},
    error::{ConfigError, SinkError},
    sink::Sink,
    types::{Category, Point},
};

use super::{
    group_by_service, micros_since_epoch,
    thrift::{self, Batch, Process, Tag, TagValue},
    Endpoint, SpanRecord, SpanStatus,
};

const TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Largest datagram the agent accepts
const MAX_PACKET_SIZE: usize = 65_000;
const SAMPLED: i32 = 1;

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        // collector http endpoint
        "http" => Some(14268),
        // agent compact thrift over udp
        "grpc" => Some(6831),
        _ => None,
    }
}

fn be_i64(bytes: &[u8]) -> i64 {
    bytes
        .iter()
        .fold(0_u64, |id, byte| (id << 8) | u64::from(*byte)) as i64
}

fn jaeger_span(span: SpanRecord) -> thrift::Span {
    let mut tags: Vec<Tag> = span
        .attributes
        .into_iter()
        .map(|(k, v)| Tag::string(k, v))
        .collect();
    match span.status {
        SpanStatus::Unset => {}
        SpanStatus::Ok => tags.push(Tag::string("otel.status_code", "OK")),
        SpanStatus::Error => {
            tags.push(Tag::string("otel.status_code", "ERROR"));
            tags.push(Tag {
                key: "error".to_string(),
                value: TagValue::Bool(true),
            });
        }
    }
    thrift::Span {
        trace_id_low: be_i64(&span.trace_id[8..]),
        trace_id_high: be_i64(&span.trace_id[..8]),
        span_id: be_i64(&span.span_id),
        parent_span_id: span.parent_id.map(|id| be_i64(&id)).unwrap_or_default(),
        operation_name: span.name,
        flags: SAMPLED,
        start_time: micros_since_epoch(span.start),
        duration: i64::try_from(span.duration.as_micros()).unwrap_or(i64::MAX),
        tags,
    }
}

/// One batch per service
pub fn batches(points: &[Point]) -> Vec<Batch> {
    group_by_service(points)
        .into_iter()
        .map(|(service, spans)| Batch {
            process: Process {
                service_name: service,
                tags: Vec::new(),
            },
            spans: spans.into_iter().map(jaeger_span).collect(),
        })
        .collect()
}

#[derive(Debug)]
enum Transport {
    Collector { url: String, client: HttpClient },
    Agent { addr: String },
}

/// Jaeger span export, to a collector over http (default, port 14268) or to an
/// agent over udp (scheme `grpc`, port 6831).
///
/// Keys: `scheme`, `host` (default `localhost`), `port`, `path` (default `/api/traces`).
#[derive(Default)]
pub struct JaegerSink {
    id: String,
    transport: Option<Transport>,
    sequence: AtomicI32,
}

impl std::fmt::Debug for JaegerSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let endpoint = match &self.transport {
            Some(Transport::Collector { url, .. }) => url.as_str(),
            Some(Transport::Agent { addr }) => addr.as_str(),
            None => "unconfigured",
        };
        f.debug_struct("JaegerSink")
            .field("id", &self.id)
            .field("endpoint", &endpoint)
            .finish()
    }
}

impl JaegerSink {
    /// Registry name
    pub const TARGET: &'static str = "jaeger";

    /// An unconfigured sink
    pub fn create() -> Box<dyn Sink> {
        Box::<JaegerSink>::default()
    }

    async fn post(&self, url: &str, client: &HttpClient, batch: &Batch) -> Result<(), SinkError> {
        let request = Request::post(url)
            .header(header::CONTENT_TYPE, "application/x-thrift")
            .body(Full::new(Bytes::from(batch.to_binary())))?;
        deliver(client, request, TIMEOUT, StatusCode::is_success).await?;
        Ok(())
    }

    /// Encode `batch` into datagrams, halving it until every datagram fits
    fn datagrams(&self, batch: Batch, out: &mut Vec<Vec<u8>>) -> Result<(), SinkError> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let datagram = batch.to_emit_batch(sequence);
        if datagram.len() <= MAX_PACKET_SIZE {
            out.push(datagram);
            return Ok(());
        }
        if batch.spans.len() < 2 {
            return Err(SinkError::Encode(format!(
                "span of {} bytes does not fit a {MAX_PACKET_SIZE} byte agent datagram",
                datagram.len()
            )));
        }
        let Batch { process, mut spans } = batch;
        let tail = spans.split_off(spans.len() / 2);
        self.datagrams(
            Batch {
                process: process.clone(),
                spans,
            },
            out,
        )?;
        self.datagrams(
            Batch {
                process,
                spans: tail,
            },
            out,
        )
    }

    async fn emit(&self, addr: &str, batches: Vec<Batch>) -> Result<(), SinkError> {
        let mut datagrams = Vec::new();
        for batch in batches {
            self.datagrams(batch, &mut datagrams)?;
        }
        send_datagrams(addr, &datagrams, TIMEOUT).await
    }
}

#[async_trait]
impl Sink for JaegerSink {
    fn target(&self) -> &'static str {
        Self::TARGET
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn load_config(&mut self, config: &SinkConfig) -> Result<(), ConfigError> {
        let target = Self::TARGET;
        let endpoint = Endpoint::from_config(target, config, "http", default_port, "/api/traces")?;
        let transport = match endpoint.scheme.as_str() {
            "http" => Transport::Collector {
                url: endpoint.http_url(),
                client: get_http_client(|| None, CONNECT_TIMEOUT)
                    .map_err(|e| ConfigError::exporter(target, e))?,
            },
            "grpc" => Transport::Agent {
                addr: endpoint.authority(),
            },
            _ => {
                return Err(ConfigError::InvalidScheme {
                    scheme: endpoint.scheme,
                })
            }
        };

        *self = JaegerSink {
            id: config.id().trim().to_string(),
            transport: Some(transport),
            sequence: AtomicI32::new(0),
        };
        Ok(())
    }

    async fn write(&self, _category: Category, points: &[Point]) -> Result<(), SinkError> {
        let Some(transport) = &self.transport else {
            return Err(SinkError::NotInitialized);
        };
        if points.is_empty() {
            return Ok(());
        }
        let batches = batches(points);
        match transport {
            Transport::Collector { url, client } => {
                let mut last_error = None;
                for batch in &batches {
                    if let Err(e) = self.post(url, client, batch).await {
                        log::debug!(
                            "{}: batch for {} failed: {e}",
                            self.id,
                            batch.process.service_name
                        );
                        last_error = Some(e);
                    }
                }
                last_error.map_or(Ok(()), Err)
            }
            Transport::Agent { addr } => self.emit(addr, batches).await,
        }
    }
}
