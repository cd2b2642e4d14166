//! Sinks against local receivers: in-process http/1 and h2c grpc servers that record
//! every request, and plain udp sockets.

use std::{
    convert::Infallible,
    io::Read,
    net::SocketAddr,
    sync::{Arc, Mutex},
    time::{Duration, UNIX_EPOCH},
};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{
    body::Incoming,
    header::{self, HeaderValue},
    server::conn::{http1, http2},
    service::service_fn,
    HeaderMap, Method, Request, Response, StatusCode,
};
use hyper_util::rt::{TokioExecutor, TokioIo};
use pointsink::{
    config::parse_descriptors,
    downstream::{InfluxdbSink, JaegerSink, LogstashSink, OtelSink, RemoteWriteSink},
    proto::{
        opentelemetry::collector::trace::v1::{
            ExportTracePartialSuccess, ExportTraceServiceRequest, ExportTraceServiceResponse,
        },
        prometheus::WriteRequest,
    },
    Category, Point, Sink, SinkConfig, SinkError, SinkManager, SinkRegistry, SinkState,
};
use prost::Message;
use tokio::net::{TcpListener, UdpSocket};

#[derive(Debug, Clone)]
struct Recorded {
    method: Method,
    uri: String,
    headers: HeaderMap,
    body: Bytes,
}

#[derive(Clone)]
struct Receiver {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl Receiver {
    /// Answers every request with `status` after recording it
    async fn start(status: StatusCode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("can bind a local port");
        let addr = listener.local_addr().expect("bound socket has an address");
        let requests: Arc<Mutex<Vec<Recorded>>> = Default::default();

        let recorded = requests.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |request: Request<Incoming>| {
                        let recorded = recorded.clone();
                        async move {
                            let (parts, body) = request.into_parts();
                            let body = body.collect().await?.to_bytes();
                            recorded.lock().expect("not poisoned").push(Recorded {
                                method: parts.method,
                                uri: parts.uri.to_string(),
                                headers: parts.headers,
                                body,
                            });
                            Ok::<_, hyper::Error>(
                                Response::builder()
                                    .status(status)
                                    .body(Full::new(Bytes::from_static(b"recorded")))
                                    .expect("static response is valid"),
                            )
                        }
                    });
                    if let Err(e) = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        log::debug!("receiver connection ended: {e}");
                    }
                });
            }
        });

        Self { addr, requests }
    }

    /// A grpc server over h2c. `Code::Ok` answers with `response` and a `grpc-status: 0`
    /// trailer; any other code is a trailers-only answer carrying that code.
    async fn start_grpc(code: tonic::Code, response: ExportTraceServiceResponse) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("can bind a local port");
        let addr = listener.local_addr().expect("bound socket has an address");
        let requests: Arc<Mutex<Vec<Recorded>>> = Default::default();

        let mut frame = vec![0];
        frame.extend_from_slice(&(response.encoded_len() as u32).to_be_bytes());
        response.encode(&mut frame).expect("vec grows");
        let frame = Bytes::from(frame);

        let recorded = requests.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let recorded = recorded.clone();
                let frame = frame.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |request: Request<Incoming>| {
                        let recorded = recorded.clone();
                        let frame = frame.clone();
                        async move {
                            let (parts, body) = request.into_parts();
                            let body = body.collect().await?.to_bytes();
                            recorded.lock().expect("not poisoned").push(Recorded {
                                method: parts.method,
                                uri: parts.uri.path().to_string(),
                                headers: parts.headers,
                                body,
                            });

                            let grpc_status = HeaderValue::from(code as i32);
                            let (body, trailers) = if code == tonic::Code::Ok {
                                let mut trailers = HeaderMap::new();
                                trailers.insert("grpc-status", grpc_status.clone());
                                (frame, Some(trailers))
                            } else {
                                (Bytes::new(), None)
                            };
                            let mut response = Response::builder()
                                .status(StatusCode::OK)
                                .header(header::CONTENT_TYPE, "application/grpc");
                            if code != tonic::Code::Ok {
                                response = response.header("grpc-status", grpc_status);
                            }
                            let body = Full::new(body).with_trailers(async move {
                                trailers.map(Ok::<_, Infallible>)
                            });
                            Ok::<_, hyper::Error>(
                                response.body(body).expect("static response is valid"),
                            )
                        }
                    });
                    if let Err(e) = http2::Builder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        log::debug!("grpc receiver connection ended: {e}");
                    }
                });
            }
        });

        Self { addr, requests }
    }

    fn host(&self) -> String {
        self.addr.to_string()
    }

    fn take(&self) -> Vec<Recorded> {
        std::mem::take(&mut *self.requests.lock().expect("not poisoned"))
    }
}

async fn udp_receiver() -> (UdpSocket, String) {
    let socket = UdpSocket::bind("127.0.0.1:0")
        .await
        .expect("can bind a local udp port");
    let addr = socket.local_addr().expect("bound socket has an address");
    (socket, addr.to_string())
}

async fn receive(socket: &UdpSocket) -> Vec<u8> {
    let mut buffer = vec![0; 70_000];
    let (len, _) = tokio::time::timeout(Duration::from_secs(5), socket.recv_from(&mut buffer))
        .await
        .expect("a datagram arrives")
        .expect("receive works");
    buffer.truncate(len);
    buffer
}

fn configured(mut sink: Box<dyn Sink>, config: SinkConfig) -> Box<dyn Sink> {
    sink.load_config(&config).expect("config is valid");
    sink
}

fn cpu(seconds: u64) -> Point {
    Point::new("cpu")
        .tag("host", "a")
        .field("usage", 0.5_f64)
        .field("cores", 4_i64)
        .at(UNIX_EPOCH + Duration::from_secs(seconds))
}

#[test_log::test(tokio::test)]
async fn logstash_json_accepts_the_redirect_band() {
    for status in [StatusCode::OK, StatusCode::CREATED, StatusCode::FOUND] {
        let receiver = Receiver::start(status).await;
        let sink = configured(
            LogstashSink::create(),
            SinkConfig::new()
                .with("id", "ls")
                .with("host", receiver.host())
                .with("protocol", "http")
                .with("request_path", "ingest")
                .with("write_type", "json"),
        );
        let point = Point::new("app")
            .tag("level", "info")
            .field("message", "started")
            .at(UNIX_EPOCH + Duration::from_secs(1));
        sink.write(Category::Logging, &[point])
            .await
            .expect("status is accepted");

        let requests = receiver.take();
        assert_eq!(1, requests.len());
        let request = &requests[0];
        assert_eq!(Method::PUT, request.method);
        assert_eq!("/ingest", request.uri);
        assert_eq!(
            Some("application/json"),
            request
                .headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
        );
        let body: serde_json::Value =
            serde_json::from_slice(&request.body).expect("body is json");
        assert_eq!("app", body[0]["measurement"]);
        assert_eq!("info", body[0]["tags"]["level"]);
        assert_eq!("started", body[0]["fields"]["message"]);
    }
}

#[test_log::test(tokio::test)]
async fn logstash_rejects_client_errors() {
    let receiver = Receiver::start(StatusCode::NOT_FOUND).await;
    let sink = configured(
        LogstashSink::create(),
        SinkConfig::new()
            .with("id", "ls")
            .with("host", receiver.host())
            .with("protocol", "http")
            .with("request_path", "/ingest")
            .with("write_type", "json"),
    );
    let result = sink
        .write(Category::Logging, &[Point::new("app").field("message", "x")])
        .await;
    assert!(matches!(result, Err(SinkError::Status { code: 404, .. })));
}

#[test_log::test(tokio::test)]
async fn logstash_plain_sends_messages() {
    let receiver = Receiver::start(StatusCode::OK).await;
    let sink = configured(
        LogstashSink::create(),
        SinkConfig::new()
            .with("id", "ls")
            .with("host", receiver.host())
            .with("protocol", "http")
            .with("request_path", "/")
            .with("write_type", "plain"),
    );
    sink.write(
        Category::Logging,
        &[
            Point::new("app").field("message", "one"),
            Point::new("app").field("message", "two"),
        ],
    )
    .await
    .expect("plain write succeeds");

    let requests = receiver.take();
    assert_eq!(None, requests[0].headers.get(header::CONTENT_TYPE));
    assert_eq!(&b"one\ntwo"[..], &requests[0].body[..]);
}

#[test_log::test(tokio::test)]
async fn influxdb_http_writes_line_protocol() {
    let receiver = Receiver::start(StatusCode::NO_CONTENT).await;
    let sink = configured(
        InfluxdbSink::create(),
        SinkConfig::new()
            .with("id", "influx")
            .with("host", receiver.host())
            .with("protocol", "http")
            .with("database", "db0")
            .with("precision", "s")
            .with("username", "user")
            .with("password", "pass"),
    );
    sink.write(Category::Metric, &[cpu(10), cpu(20)])
        .await
        .expect("204 is success");

    let requests = receiver.take();
    let request = &requests[0];
    assert_eq!(Method::POST, request.method);
    assert_eq!("/write?db=db0&precision=s", request.uri);
    assert_eq!(
        Some("Basic dXNlcjpwYXNz"),
        request
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
    );
    assert_eq!(
        "cpu,host=a cores=4i,usage=0.5 10\ncpu,host=a cores=4i,usage=0.5 20\n",
        String::from_utf8_lossy(&request.body)
    );
}

#[test_log::test(tokio::test)]
async fn influxdb_http_gzip() {
    let receiver = Receiver::start(StatusCode::NO_CONTENT).await;
    let sink = configured(
        InfluxdbSink::create(),
        SinkConfig::new()
            .with("id", "influx")
            .with("host", receiver.host())
            .with("protocol", "http")
            .with("database", "db0")
            .with("write_encoding", "gzip"),
    );
    sink.write(Category::Metric, &[cpu(1)])
        .await
        .expect("write succeeds");

    let requests = receiver.take();
    assert_eq!(
        Some("gzip"),
        requests[0]
            .headers
            .get(header::CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
    );
    let mut body = String::new();
    flate2::read::GzDecoder::new(&requests[0].body[..])
        .read_to_string(&mut body)
        .expect("body is gzip");
    assert_eq!("cpu,host=a cores=4i,usage=0.5 1000000000\n", body);
}

#[test_log::test(tokio::test)]
async fn influxdb_http_error_status_fails() {
    let receiver = Receiver::start(StatusCode::BAD_REQUEST).await;
    let sink = configured(
        InfluxdbSink::create(),
        SinkConfig::new()
            .with("id", "influx")
            .with("host", receiver.host())
            .with("protocol", "http")
            .with("database", "db0"),
    );
    let result = sink.write(Category::Metric, &[cpu(1)]).await;
    assert!(matches!(result, Err(SinkError::Status { code: 400, .. })));
}

#[test_log::test(tokio::test)]
async fn influxdb_udp_packs_datagrams() {
    let (socket, addr) = udp_receiver().await;
    let sink = configured(
        InfluxdbSink::create(),
        SinkConfig::new()
            .with("id", "influx")
            .with("host", addr)
            .with("protocol", "udp")
            .with("database", "db0")
            .with("precision", "s"),
    );
    sink.write(Category::Metric, &[cpu(1), cpu(2)])
        .await
        .expect("udp write succeeds");
    assert_eq!(
        "cpu,host=a cores=4i,usage=0.5 1\ncpu,host=a cores=4i,usage=0.5 2\n",
        String::from_utf8_lossy(&receive(&socket).await)
    );
}

#[test_log::test(tokio::test)]
async fn remote_write_posts_snappy_protobuf() {
    let receiver = Receiver::start(StatusCode::OK).await;
    let sink = configured(
        RemoteWriteSink::create(),
        SinkConfig::new()
            .with("id", "m3")
            .with("addr", format!("http://{}/api/v1/prom/remote/write", receiver.host())),
    );
    sink.write(Category::Metric, &[cpu(3)])
        .await
        .expect("write succeeds");

    let requests = receiver.take();
    let request = &requests[0];
    assert_eq!("/api/v1/prom/remote/write", request.uri);
    let header = |name: &str| request.headers.get(name).and_then(|v| v.to_str().ok());
    assert_eq!(Some("application/x-protobuf"), header("content-type"));
    assert_eq!(Some("snappy"), header("content-encoding"));
    assert_eq!(Some("0.1.0"), header("x-prometheus-remote-write-version"));

    let body = snap::raw::Decoder::new()
        .decompress_vec(&request.body)
        .expect("body is snappy");
    let write = WriteRequest::decode(&body[..]).expect("body is a WriteRequest");
    assert_eq!(2, write.timeseries.len());
    let names: Vec<&str> = write
        .timeseries
        .iter()
        .filter_map(|series| series.labels.iter().find(|l| l.name == "__name__"))
        .map(|l| l.value.as_str())
        .collect();
    assert_eq!(vec!["cores", "usage"], names);
    assert_eq!(3_000, write.timeseries[0].samples[0].timestamp);
}

fn span(service: &str) -> Point {
    Point::new("span")
        .tag("operation", "GET /")
        .tag("service", service)
        .field("trace_id", "1")
        .field("span_id", "2")
        .field("start", 1_000_i64)
        .field("duration", 10_i64)
}

#[test_log::test(tokio::test)]
async fn otel_http_posts_protobuf() {
    let receiver = Receiver::start(StatusCode::OK).await;
    let (host, port) = (receiver.addr.ip().to_string(), receiver.addr.port());
    let sink = configured(
        OtelSink::create(),
        SinkConfig::new()
            .with("id", "otel")
            .with("scheme", "http")
            .with("host", host)
            .with("port", port.to_string()),
    );
    sink.write(Category::Tracing, &[span("api"), span("db")])
        .await
        .expect("export succeeds");

    let requests = receiver.take();
    let request = &requests[0];
    assert_eq!(Method::POST, request.method);
    assert_eq!("/v1/traces", request.uri);
    let export =
        ExportTraceServiceRequest::decode(&request.body[..]).expect("body is an export request");
    assert_eq!(2, export.resource_spans.len());
}

fn grpc_sink(receiver: &Receiver) -> Box<dyn Sink> {
    configured(
        OtelSink::create(),
        SinkConfig::new()
            .with("id", "otel")
            .with("scheme", "grpc")
            .with("host", receiver.addr.ip().to_string())
            .with("port", receiver.addr.port().to_string()),
    )
}

#[test_log::test(tokio::test)]
async fn otel_grpc_exports_to_the_trace_service() {
    let receiver = Receiver::start_grpc(
        tonic::Code::Ok,
        ExportTraceServiceResponse {
            partial_success: Some(ExportTracePartialSuccess {
                rejected_spans: 1,
                error_message: "one span was too old".to_string(),
            }),
        },
    )
    .await;
    let sink = grpc_sink(&receiver);
    // a partial success is still a success
    sink.write(Category::Tracing, &[span("api"), span("db"), span("api")])
        .await
        .expect("export succeeds");

    let requests = receiver.take();
    assert_eq!(1, requests.len());
    let request = &requests[0];
    assert_eq!(Method::POST, request.method);
    assert_eq!(
        "/opentelemetry.proto.collector.trace.v1.TraceService/Export",
        request.uri
    );
    assert_eq!(
        Some("application/grpc"),
        request
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
    );
    // uncompressed, then a u32 length
    assert_eq!(0, request.body[0]);
    let length = u32::from_be_bytes(request.body[1..5].try_into().expect("4 bytes")) as usize;
    assert_eq!(request.body.len() - 5, length);
    let export =
        ExportTraceServiceRequest::decode(&request.body[5..]).expect("body is an export request");
    assert_eq!(2, export.resource_spans.len());
}

#[test_log::test(tokio::test)]
async fn otel_grpc_error_status_surfaces() {
    let receiver =
        Receiver::start_grpc(tonic::Code::Unavailable, ExportTraceServiceResponse::default())
            .await;
    let sink = grpc_sink(&receiver);
    let result = sink.write(Category::Tracing, &[span("api")]).await;
    match result {
        Err(SinkError::Grpc(status)) => assert_eq!(tonic::Code::Unavailable, status.code()),
        other => panic!("expected a grpc status, got {other:?}"),
    }
    assert_eq!(1, receiver.take().len());
}

#[test_log::test(tokio::test)]
async fn jaeger_collector_posts_one_batch_per_service() {
    let receiver = Receiver::start(StatusCode::ACCEPTED).await;
    let sink = configured(
        JaegerSink::create(),
        SinkConfig::new()
            .with("id", "jaeger")
            .with("host", receiver.host()),
    );
    sink.write(Category::Tracing, &[span("api"), span("db"), span("api")])
        .await
        .expect("export succeeds");

    let requests = receiver.take();
    assert_eq!(2, requests.len());
    for request in &requests {
        assert_eq!("/api/traces", request.uri);
        assert_eq!(
            Some("application/x-thrift"),
            request
                .headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
        );
    }
}

#[test_log::test(tokio::test)]
async fn jaeger_agent_emits_compact_datagrams() {
    let (socket, addr) = udp_receiver().await;
    let sink = configured(
        JaegerSink::create(),
        SinkConfig::new()
            .with("id", "jaeger")
            .with("scheme", "grpc")
            .with("host", addr),
    );
    sink.write(Category::Tracing, &[span("api")])
        .await
        .expect("emit succeeds");

    let datagram = receive(&socket).await;
    // compact protocol id, then version 1 with the oneway message type
    assert_eq!(&[0x82, 0x81], &datagram[..2]);
    assert!(datagram.windows(9).any(|w| w == b"emitBatch"));
}

#[test_log::test(tokio::test)]
async fn manager_routes_descriptors_end_to_end() {
    let metrics = Receiver::start(StatusCode::NO_CONTENT).await;
    let logs = Receiver::start(StatusCode::OK).await;

    let configs = parse_descriptors(
        &["M", "L", "T"],
        &[
            format!("influxdb://{}?protocol=http&database=db0", metrics.host()),
            format!(
                "logstash://{}?protocol=http&request_path=/&write_type=json",
                logs.host()
            ),
            String::new(),
        ],
    )
    .expect("descriptors parse");

    let manager = SinkManager::new(SinkRegistry::with_default_targets());
    assert_eq!(SinkState::Uninitialized, manager.state());
    assert!(matches!(
        manager.write(Category::Metric, &[cpu(1)]).await,
        Err(SinkError::NotInitialized)
    ));

    manager.initialize(configs).expect("sinks come up");
    assert_eq!(SinkState::Ready, manager.state());

    manager
        .write(Category::Metric, &[cpu(1)])
        .await
        .expect("metric write");
    manager
        .write_category("/v1/write/logging", &[Point::new("app").field("message", "m")])
        .await
        .expect("logging write");
    manager
        .write(Category::Tracing, &[span("api")])
        .await
        .expect("nothing subscribes to tracing");

    assert_eq!(1, metrics.take().len());
    assert_eq!(1, logs.take().len());
    assert!(matches!(
        manager.write_category("bogus", &[]).await,
        Err(SinkError::UnsupportedCategory(_))
    ));
}
