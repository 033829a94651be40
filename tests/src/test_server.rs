use bytes::Bytes;
use http::{header, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::{
    convert::Infallible,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::net::{TcpListener, TcpStream};
use wizbal::Backend;

/// Manages construction and destruction of an HTTP backend for testing.
///
/// Every request is answered with the same status. The body is the server
/// name followed by the request path, and `x-served-by` carries the name.
pub struct TestServer {
    shutdown_handle: Option<tokio::sync::oneshot::Sender<()>>,
    server_addr: SocketAddr,
    hits: Arc<AtomicUsize>,
    server_future: Option<tokio::task::JoinHandle<()>>,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        // Stop accepting connections.
        if let Some(sender) = self.shutdown_handle.take() {
            let _res = sender.send(());
        }
    }
}

impl TestServer {
    /// Bootstrap a `TestServer` answering `status` on `127.0.0.1` and a random port.
    ///
    /// This function will run the server asynchronously, and
    /// tear it down when `Self` is dropped.
    pub async fn start<T: Into<String>>(name: T, status: StatusCode) -> Self {
        let name: Arc<str> = name.into().into();
        let (shutdown_handle, mut shutdown) = tokio::sync::oneshot::channel::<()>();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind tcplistener");
        let server_addr = listener
            .local_addr()
            .expect("failed to retrieve sockeaddr from tokio listener");
        tracing::info!("server address: {}", server_addr);

        let hits = Arc::new(AtomicUsize::new(0));
        let server_hits = Arc::clone(&hits);

        let server_future = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { continue };
                        let name = Arc::clone(&name);
                        let hits = Arc::clone(&server_hits);
                        tokio::spawn(async move {
                            let service = service_fn(move |request: Request<Incoming>| {
                                hits.fetch_add(1, Ordering::SeqCst);
                                let response = respond(&name, status, &request);
                                async move { Ok::<_, Infallible>(response) }
                            });
                            let _res = http1::Builder::new()
                                .serve_connection(TokioIo::new(stream), service)
                                .await;
                        });
                    }
                }
            }
        });

        // await connectivity
        let wait_start = Instant::now();
        while let Err(e) = TcpStream::connect(server_addr).await {
            if wait_start.elapsed() > Duration::from_secs(10) {
                panic!("Cannot connect to {server_addr}: {e}");
            }
            tokio::task::yield_now().await;
        }

        TestServer {
            shutdown_handle: Some(shutdown_handle),
            server_addr,
            hits,
            server_future: Some(server_future),
        }
    }

    /// Get the address `TestServer` is listening on.
    pub fn address(&self) -> SocketAddr {
        self.server_addr
    }

    /// The `TestServer` as a discovery result.
    pub fn backend(&self) -> Backend {
        Backend::new(self.server_addr.ip().to_string(), self.server_addr.port())
    }

    /// How many requests, probes included, the server has answered.
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// Shut the server down and wait until the listener is closed.
    pub async fn shutdown_sync(mut self) {
        if let Some(sender) = self.shutdown_handle.take() {
            let _res = sender.send(());
        }

        if let Some(server_future) = self.server_future.take() {
            server_future.await.expect("server did not exit gracefully");
        }
    }
}

/// A backend address nothing listens on.
pub fn refusing_backend() -> Backend {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("failed to bind");
    let port = listener.local_addr().expect("no local addr").port();
    drop(listener);
    Backend::new("127.0.0.1", port)
}

fn respond(name: &str, status: StatusCode, request: &Request<Incoming>) -> Response<Full<Bytes>> {
    let path = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let mut builder = Response::builder()
        .status(status)
        .header("x-served-by", name);
    if status.is_redirection() {
        builder = builder.header(header::LOCATION, "/elsewhere");
    }

    builder
        .body(Full::new(Bytes::from(format!("{name} {path}"))))
        .expect("failed to build response")
}
