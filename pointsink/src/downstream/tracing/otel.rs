//! OTLP trace export. Spans reconstructed from points are grouped by service into
//! `ExportTraceServiceRequest`s and sent to a collector over grpc, or as protobuf over
//! http.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::Full;
use hyper::{header, Request};
use prost::Message;

use crate::{
    config::SinkConfig,
    downstream::channel_connection::{deliver, get_client, get_http_client, ChannelType, HttpClient},
    error::{ConfigError, SinkError},
    proto::opentelemetry::{
        collector::trace::v1::{
            trace_service_client::TraceServiceClient, ExportTraceServiceRequest,
        },
        common::v1::{any_value::Value, AnyValue, InstrumentationScope, KeyValue},
        resource::v1::Resource,
        trace::v1::{span::SpanKind, status::StatusCode, ResourceSpans, ScopeSpans, Span, Status},
    },
    sink::Sink,
    types::{Category, EpochTime, Point},
};

use super::{group_by_service, Endpoint, SpanRecord, SpanStatus};

const GRPC_TIMEOUT: Duration = Duration::from_secs(30);
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);
/// Bounds every connect and reconnect to the collector, for both transports
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const VERSION: Option<&str> = option_env!("CARGO_PKG_VERSION");

fn default_port(scheme: &str) -> Option<u16> {
    match scheme {
        "grpc" => Some(4317),
        "http" => Some(4318),
        _ => None,
    }
}

fn string_attribute(key: impl Into<String>, value: impl Into<String>) -> KeyValue {
    KeyValue {
        key: key.into(),
        value: Some(AnyValue {
            value: Some(Value::StringValue(value.into())),
        }),
    }
}

fn otlp_status(status: SpanStatus) -> StatusCode {
    match status {
        SpanStatus::Unset => StatusCode::Unset,
        SpanStatus::Ok => StatusCode::Ok,
        SpanStatus::Error => StatusCode::Error,
    }
}

fn otlp_span(span: SpanRecord) -> Span {
    Span {
        trace_id: span.trace_id.to_vec(),
        span_id: span.span_id.to_vec(),
        trace_state: String::new(),
        parent_span_id: span.parent_id.map(|id| id.to_vec()).unwrap_or_default(),
        name: span.name.clone(),
        kind: SpanKind::Unspecified as i32,
        start_time_unix_nano: span.start.nanos_since_epoch(),
        end_time_unix_nano: span.end().nanos_since_epoch(),
        attributes: span
            .attributes
            .into_iter()
            .map(|(k, v)| string_attribute(k, v))
            .collect(),
        dropped_attributes_count: 0,
        status: Some(Status {
            message: String::new(),
            code: otlp_status(span.status) as i32,
        }),
    }
}

/// Group spans by service into one `ResourceSpans` per service
pub fn export_request(points: &[Point]) -> ExportTraceServiceRequest {
    ExportTraceServiceRequest {
        resource_spans: group_by_service(points)
            .into_iter()
            .map(|(service, spans)| ResourceSpans {
                resource: Some(Resource {
                    attributes: vec![string_attribute("service.name", service)],
                    dropped_attributes_count: 0,
                }),
                scope_spans: vec![ScopeSpans {
                    scope: Some(InstrumentationScope {
                        name: "pointsink".to_string(),
                        version: VERSION.unwrap_or("unknown").to_string(),
                        attributes: Vec::new(),
                        dropped_attributes_count: 0,
                    }),
                    spans: spans.into_iter().map(otlp_span).collect(),
                    schema_url: String::new(),
                }],
                schema_url: String::new(),
            })
            .collect(),
    }
}

enum Exporter {
    Grpc(TraceServiceClient<ChannelType>),
    Http { url: String, client: HttpClient },
}

/// OTLP trace export over grpc (default, port 4317) or http protobuf (port 4318).
///
/// Keys: `scheme` (`grpc` or `http`), `host` (default `localhost`), `port`, `path`
/// (default `/v1/traces`, http only). Transport is plaintext.
#[derive(Default)]
pub struct OtelSink {
    id: String,
    exporter: Option<Exporter>,
}

impl std::fmt::Debug for OtelSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let transport = match &self.exporter {
            Some(Exporter::Grpc(_)) => "grpc",
            Some(Exporter::Http { .. }) => "http",
            None => "unconfigured",
        };
        f.debug_struct("OtelSink")
            .field("id", &self.id)
            .field("transport", &transport)
            .finish()
    }
}

impl OtelSink {
    /// Registry name
    pub const TARGET: &'static str = "otel";

    /// An unconfigured sink
    pub fn create() -> Box<dyn Sink> {
        Box::<OtelSink>::default()
    }
}

#[async_trait]
impl Sink for OtelSink {
    fn target(&self) -> &'static str {
        Self::TARGET
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn load_config(&mut self, config: &SinkConfig) -> Result<(), ConfigError> {
        let target = Self::TARGET;
        let endpoint = Endpoint::from_config(target, config, "grpc", default_port, "/v1/traces")?;
        let exporter = match endpoint.scheme.as_str() {
            "grpc" => Exporter::Grpc(
                get_client(
                    &format!("http://{}", endpoint.authority()),
                    || None,
                    CONNECT_TIMEOUT,
                    TraceServiceClient::with_origin,
                )
                .map_err(|e| ConfigError::exporter(target, e))?,
            ),
            "http" => Exporter::Http {
                url: endpoint.http_url(),
                client: get_http_client(|| None, CONNECT_TIMEOUT)
                    .map_err(|e| ConfigError::exporter(target, e))?,
            },
            _ => {
                return Err(ConfigError::InvalidScheme {
                    scheme: endpoint.scheme,
                })
            }
        };
        log::debug!("otel exporter for {} built", endpoint.authority());

        *self = OtelSink {
            id: config.id().trim().to_string(),
            exporter: Some(exporter),
        };
        Ok(())
    }

    async fn write(&self, _category: Category, points: &[Point]) -> Result<(), SinkError> {
        let Some(exporter) = &self.exporter else {
            return Err(SinkError::NotInitialized);
        };
        if points.is_empty() {
            return Ok(());
        }
        let request = export_request(points);
        match exporter {
            Exporter::Grpc(client) => {
                let mut client = client.clone();
                let mut request = tonic::Request::new(request);
                request.set_timeout(GRPC_TIMEOUT);
                let response = tokio::time::timeout(GRPC_TIMEOUT, client.export(request))
                    .await
                    .map_err(|_| SinkError::Timeout(GRPC_TIMEOUT))??;
                if let Some(partial) = &response.get_ref().partial_success {
                    if 0 < partial.rejected_spans {
                        log::warn!(
                            "{}: collector rejected {} spans: {}",
                            self.id,
                            partial.rejected_spans,
                            partial.error_message
                        );
                    }
                }
                Ok(())
            }
            Exporter::Http { url, client } => {
                let request = Request::post(url.as_str())
                    .header(header::CONTENT_TYPE, "application/x-protobuf")
                    .body(Full::new(Bytes::from(request.encode_to_vec())))?;
                deliver(client, request, HTTP_TIMEOUT, hyper::StatusCode::is_success).await?;
                Ok(())
            }
        }
    }
}
