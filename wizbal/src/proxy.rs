//! Routes inbound HTTP requests to a backend chosen by the [`Registry`].
//!
//! The service of a request is derived from its `Host` header: the configured
//! host suffix is stripped and the discovery domain appended.

use crate::{Error, Registry, Service};
use bytes::Bytes;
use futures::{Stream, StreamExt};
use http::header::{HeaderName, HeaderValue, CONNECTION, HOST};
use http::{HeaderMap, Request, Response, StatusCode, Uri};
use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Incoming;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::service::TowerToHyperService;
use std::convert::Infallible;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tower_service::Service as TowerService;

pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Headers that only describe the connection they arrived on.
const HOP_BY_HOP: [&str; 9] = [
    "connection",
    "proxy-connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Map a `Host` header onto the name of the service to discover.
///
/// Hosts are compared case-insensitively. IP literals in brackets have no
/// service and map to `None`.
///
/// ```
/// let name = wizbal::service_name_for_host(
///     "foo.app.example.com:8080",
///     ".app.example.com",
///     "srv.example.com",
/// );
/// assert_eq!(name.as_deref(), Some("foo.srv.example.com"));
///
/// assert_eq!(wizbal::service_name_for_host("[::1]:8080", ".app.example.com", "srv.example.com"), None);
/// ```
pub fn service_name_for_host(host: &str, host_strip: &str, domain: &str) -> Option<String> {
    if host.starts_with('[') {
        return None;
    }
    let host = match host.split_once(':') {
        Some((_, port)) if port.contains(':') => return None,
        Some((host, _)) => host,
        None => host,
    };

    let host = host.to_ascii_lowercase();
    let host_strip = host_strip.to_ascii_lowercase();
    let name = host.strip_suffix(host_strip.as_str()).unwrap_or(&host);
    Some(format!("{name}.{domain}"))
}

/// A reverse proxy in front of the backends known to a [`Registry`].
///
/// Implements [`tower_service::Service`] so it can be served by hyper or
/// composed with tower middleware.
#[derive(Clone)]
pub struct Proxy {
    inner: Arc<ProxyInner>,
    peer: Option<IpAddr>,
}

struct ProxyInner {
    registry: Registry,
    host_strip: String,
    domain: String,
    client: Client<HttpConnector, Incoming>,
}

impl Proxy {
    pub fn new<S: Into<String>, D: Into<String>>(registry: Registry, host_strip: S, domain: D) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Self {
            inner: Arc::new(ProxyInner {
                registry,
                host_strip: host_strip.into(),
                domain: domain.into(),
                client,
            }),
            peer: None,
        }
    }

    /// A handle that appends `peer` to `X-Forwarded-For` on every request.
    pub fn for_peer(&self, peer: IpAddr) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            peer: Some(peer),
        }
    }

    /// Accept connections on `listener` and proxy every request on them.
    ///
    /// A failed `accept` is logged and retried. Only fails if the listener
    /// has no local address.
    pub async fn serve(self, listener: TcpListener) -> Result<(), io::Error> {
        tracing::info!("proxy listening on {}", listener.local_addr()?);

        let incoming = futures::stream::unfold(listener, |listener| async move {
            let accepted = listener.accept().await;
            Some((accepted, listener))
        });
        self.serve_incoming(incoming).await;
        Ok(())
    }

    /// Serve every connection yielded by `incoming` until it ends.
    async fn serve_incoming<S>(self, incoming: S)
    where
        S: Stream<Item = io::Result<(TcpStream, SocketAddr)>>,
    {
        futures::pin_mut!(incoming);

        while let Some(accepted) = incoming.next().await {
            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(err) => {
                    tracing::warn!("failed to accept connection: {}", err);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                    continue;
                }
            };
            let service = TowerToHyperService::new(self.for_peer(peer.ip()));

            tokio::spawn(async move {
                if let Err(err) = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await
                {
                    tracing::debug!("connection from {} ended: {}", peer, err);
                }
            });
        }
    }

    /// Forward `request` to a backend of its service.
    pub async fn handle(&self, request: Request<Incoming>) -> Response<ProxyBody> {
        let Some(host) = request_host(&request) else {
            return text_response(StatusCode::BAD_REQUEST, "missing host");
        };

        let Some(name) = service_name_for_host(&host, &self.inner.host_strip, &self.inner.domain)
        else {
            tracing::debug!("no service for host {}", host);
            return text_response(StatusCode::BAD_REQUEST, "invalid host");
        };
        let service = match Service::from_name(&name) {
            Ok(service) => service,
            Err(err) => {
                tracing::debug!("invalid service name {}: {:#}", name, err);
                return text_response(StatusCode::BAD_REQUEST, "invalid host");
            }
        };

        let backend = match self.inner.registry.get_backend(&service).await {
            Ok(backend) => backend,
            Err(err) => {
                match &err {
                    Error::NoBackend(_) => tracing::debug!("{}", err),
                    _ => tracing::warn!("{}", err),
                }
                return text_response(StatusCode::SERVICE_UNAVAILABLE, "no backend available");
            }
        };

        let (mut parts, body) = request.into_parts();
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        parts.uri = match format!("http://{}{}", backend, path_and_query).parse::<Uri>() {
            Ok(uri) => uri,
            Err(err) => {
                tracing::warn!("cannot route to {}: {}", backend, err);
                return text_response(StatusCode::BAD_GATEWAY, "bad backend address");
            }
        };
        // The outbound connection is always HTTP/1.1.
        parts.version = http::Version::HTTP_11;
        remove_hop_by_hop(&mut parts.headers);
        if let Some(peer) = self.peer {
            append_forwarded_for(&mut parts.headers, peer);
        }

        tracing::debug!("{} {} -> {}", parts.method, host, backend);

        match self
            .inner
            .client
            .request(Request::from_parts(parts, body))
            .await
        {
            Ok(response) => {
                let mut response = response.map(|body| body.boxed());
                remove_hop_by_hop(response.headers_mut());
                response
            }
            Err(err) => {
                tracing::warn!("forwarding to {} failed: {}", backend, err);
                text_response(StatusCode::BAD_GATEWAY, "backend request failed")
            }
        }
    }
}

impl TowerService<Request<Incoming>> for Proxy {
    type Response = Response<ProxyBody>;
    type Error = Infallible;
    type Future = futures::future::BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Incoming>) -> Self::Future {
        let proxy = self.clone();
        Box::pin(async move { Ok(proxy.handle(request).await) })
    }
}

fn request_host<B>(request: &Request<B>) -> Option<String> {
    request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|a| a.to_string()))
}

/// Drop the hop-by-hop headers, including any named by `Connection`.
fn remove_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, peer: IpAddr) {
    let mut chain: Vec<String> = headers
        .get_all(X_FORWARDED_FOR)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(str::to_string)
        .collect();
    chain.push(peer.to_string());

    if let Ok(value) = HeaderValue::from_str(&chain.join(", ")) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

fn text_response(status: StatusCode, message: &'static str) -> Response<ProxyBody> {
    let body = Full::new(Bytes::from_static(message.as_bytes()))
        .map_err(|never| match never {})
        .boxed();

    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
}
