use std::{
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, StatusCode, Uri};
use hyper_util::{client::legacy::connect::HttpConnector, rt::TokioExecutor};
use tokio::net::UdpSocket;
use tokio_rustls::rustls::{
    client::danger::ServerCertVerifier, crypto::aws_lc_rs, ClientConfig, RootCertStore,
};

use crate::error::SinkError;

use super::StdError;

/// Type alias for internal channel type
pub type ChannelType = hyper_util::client::legacy::Client<
    hyper_rustls::HttpsConnector<HttpConnector>,
    tonic::body::BoxBody,
>;

/// Plain request/response client used by the http sinks
pub type HttpClient =
    hyper_util::client::legacy::Client<hyper_rustls::HttpsConnector<HttpConnector>, Full<Bytes>>;

/// The public web pki roots. Pass this as `tls_trust` for verified connections.
pub fn web_trust() -> Option<RootCertStore> {
    Some(RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    })
}

/// You can make an insecure connection by passing `|| { None }` to tls_trust.
/// If you want to make a safer connection you can add your trust roots,
/// for example [`web_trust`].
///
/// `connect_timeout` bounds every (re)connect of the underlying channel.
pub fn get_client<TrustFunction, WithOrigin, U>(
    endpoint: &str,
    tls_trust: TrustFunction,
    connect_timeout: Duration,
    with_origin: WithOrigin,
) -> Result<U, StdError>
where
    TrustFunction: FnOnce() -> Option<RootCertStore>,
    WithOrigin: Fn(ChannelType, Uri) -> U,
{
    let tls = tls_config(tls_trust)?;

    let mut http_connector = HttpConnector::new();
    http_connector.enforce_http(false);
    http_connector.set_connect_timeout(Some(connect_timeout));
    let https_connector = tower::ServiceBuilder::new()
        .layer_fn(move |http_connector| {
            let tls = tls.clone();

            hyper_rustls::HttpsConnectorBuilder::new()
                .with_tls_config(tls)
                .https_or_http()
                .enable_http2()
                .wrap_connector(http_connector)
        })
        .service(http_connector);

    let https_client = hyper_util::client::legacy::Client::builder(TokioExecutor::new())
        .http2_only(true)
        .build(https_connector);
    let uri = Uri::from_str(endpoint)?;

    // Using `with_origin` will let the codegenerated client set the `scheme` and
    // `authority` from the provided `Uri`. You need to pass "https://example.com"

    Ok(with_origin(https_client, uri))
}

/// An http/1.1 client for either `http://` or `https://` urls
pub fn get_http_client<TrustFunction>(
    tls_trust: TrustFunction,
    connect_timeout: Duration,
) -> Result<HttpClient, StdError>
where
    TrustFunction: FnOnce() -> Option<RootCertStore>,
{
    let tls = tls_config(tls_trust)?;

    let mut http_connector = HttpConnector::new();
    http_connector.enforce_http(false);
    http_connector.set_connect_timeout(Some(connect_timeout));
    let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
        .with_tls_config(tls)
        .https_or_http()
        .enable_http1()
        .wrap_connector(http_connector);

    Ok(hyper_util::client::legacy::Client::builder(TokioExecutor::new()).build(https_connector))
}

/// Send a request and read the whole response, bounded by `timeout`.
pub async fn send(
    client: &HttpClient,
    request: Request<Full<Bytes>>,
    timeout: Duration,
) -> Result<(StatusCode, Bytes), SinkError> {
    let exchange = async {
        let response = client.request(request).await?;
        let status = response.status();
        // an unreadable body is reported as empty
        let body = match response.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                log::debug!("could not read response body: {e}");
                Bytes::new()
            }
        };
        Ok::<_, SinkError>((status, body))
    };
    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| SinkError::Timeout(timeout))?
}

/// [`send`], then require `accepted(status)`. Any other status becomes
/// [`SinkError::Status`] carrying the response body.
pub async fn deliver(
    client: &HttpClient,
    request: Request<Full<Bytes>>,
    timeout: Duration,
    accepted: impl Fn(&StatusCode) -> bool,
) -> Result<StatusCode, SinkError> {
    let (status, body) = send(client, request, timeout).await?;
    if accepted(&status) {
        Ok(status)
    } else {
        Err(SinkError::Status {
            code: status.as_u16(),
            body: String::from_utf8_lossy(&body).into_owned(),
        })
    }
}

/// Resolve `addr` and send each datagram to it from an ephemeral socket of the same
/// address family, bounded by `timeout`.
pub async fn send_datagrams(
    addr: &str,
    datagrams: &[Vec<u8>],
    timeout: Duration,
) -> Result<(), SinkError> {
    let exchange = async {
        let target = tokio::net::lookup_host(addr).await?.next().ok_or_else(|| {
            SinkError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{addr} did not resolve"),
            ))
        })?;
        let local: SocketAddr = if target.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await?;
        for datagram in datagrams {
            socket.send_to(datagram, target).await?;
        }
        Ok::<_, SinkError>(())
    };
    tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| SinkError::Timeout(timeout))?
}

fn tls_config<TrustFunction>(tls_trust: TrustFunction) -> Result<ClientConfig, StdError>
where
    TrustFunction: FnOnce() -> Option<RootCertStore>,
{
    let tls = ClientConfig::builder_with_provider(Arc::new(aws_lc_rs::default_provider()))
        .with_safe_default_protocol_versions()?;
    Ok(match tls_trust() {
        Some(trust) => tls.with_root_certificates(trust).with_no_client_auth(),
        None => {
            let mut config = tls
                .with_root_certificates(RootCertStore::empty())
                .with_no_client_auth();
            config
                .dangerous()
                .set_certificate_verifier(Arc::new(StupidVerifier {}));
            config
        }
    })
}

#[derive(Debug)]
struct StupidVerifier {}

impl ServerCertVerifier for StupidVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &tonic::transport::CertificateDer<'_>,
        _intermediates: &[tonic::transport::CertificateDer<'_>],
        _server_name: &tokio_rustls::rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: tokio_rustls::rustls::pki_types::UnixTime,
    ) -> Result<tokio_rustls::rustls::client::danger::ServerCertVerified, tokio_rustls::rustls::Error>
    {
        // insecure transport was asked for
        Ok(tokio_rustls::rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &tonic::transport::CertificateDer<'_>,
        _dss: &tokio_rustls::rustls::DigitallySignedStruct,
    ) -> Result<
        tokio_rustls::rustls::client::danger::HandshakeSignatureValid,
        tokio_rustls::rustls::Error,
    > {
        Ok(tokio_rustls::rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &tonic::transport::CertificateDer<'_>,
        _dss: &tokio_rustls::rustls::DigitallySignedStruct,
    ) -> Result<
        tokio_rustls::rustls::client::danger::HandshakeSignatureValid,
        tokio_rustls::rustls::Error,
    > {
        Ok(tokio_rustls::rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<tokio_rustls::rustls::SignatureScheme> {
        aws_lc_rs::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;

    #[test_log::test(tokio::test)]
    async fn clients_build_with_and_without_trust() {
        get_http_client(web_trust, Duration::from_secs(1)).expect("verified client");
        get_http_client(|| None, Duration::from_secs(1)).expect("insecure client");
        get_client(
            "http://localhost:4317",
            || None,
            Duration::from_secs(1),
            |_, uri| uri,
        )
        .expect("grpc channel");
    }

    #[test_log::test(tokio::test)]
    async fn unreachable_server_fails_within_timeout() {
        let client = get_http_client(|| None, Duration::from_millis(200)).expect("client");
        let request = Request::post("http://127.0.0.1:1/nothing")
            .body(Full::new(Bytes::new()))
            .expect("request");
        let result = send(&client, request, Duration::from_secs(2)).await;
        assert!(result.is_err());
    }

    #[test_log::test(tokio::test)]
    async fn deliver_passes_transport_failures_through() {
        let client = get_http_client(|| None, Duration::from_millis(200)).expect("client");
        let request = Request::post("http://127.0.0.1:1/nothing")
            .body(Full::new(Bytes::new()))
            .expect("request");
        // transport failures are not status errors
        let result = deliver(&client, request, Duration::from_secs(2), StatusCode::is_success).await;
        assert!(matches!(result, Err(SinkError::Http(_) | SinkError::Timeout(_))));
    }

    #[test_log::test(tokio::test)]
    async fn datagrams_arrive_in_order() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.expect("bind");
        let addr = receiver.local_addr().expect("address").to_string();
        send_datagrams(&addr, &[b"one".to_vec(), b"two".to_vec()], Duration::from_secs(2))
            .await
            .expect("sent");

        let mut buffer = [0; 16];
        for expected in [&b"one"[..], &b"two"[..]] {
            let (len, _) = tokio::time::timeout(Duration::from_secs(2), receiver.recv_from(&mut buffer))
                .await
                .expect("arrives")
                .expect("received");
            assert_eq!(expected, &buffer[..len]);
        }
    }

    #[test_log::test(tokio::test)]
    async fn unresolvable_datagram_target_fails() {
        let result = send_datagrams("no-such-host.invalid:9", &[b"x".to_vec()], Duration::from_secs(5)).await;
        assert!(result.is_err());
    }
}
