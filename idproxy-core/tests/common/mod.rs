#![allow(dead_code)]

use std::{convert::Infallible, net::SocketAddr, sync::Arc, time::Duration};

use futures::future::BoxFuture;
use http::{HeaderMap, Method, Request, Response, Uri};
use http_body_util::BodyExt as _;
use hyper::{
    body::{Bytes, Incoming},
    server::conn::http1,
    service::service_fn,
};
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::{TokioExecutor, TokioIo},
};
use idproxy_core::{
    client::{ProxyBody, build_http_client, full_body},
    error::TokenError,
    forwarder::Forwarder,
    server::Server,
    service::ProxyService,
    token::{Credential, TokenProvider},
    upstream::Upstream,
};
use tokio::{net::TcpListener, sync::mpsc};

/// What a fake upstream saw.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Serves every connection on a loopback port with `handler`.
pub async fn spawn_upstream<F, Fut>(handler: F) -> SocketAddr
where
    F: Fn(Request<Incoming>) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response<ProxyBody>> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let handler = handler.clone();
            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let response = handler(req);
                    async move { Ok::<_, Infallible>(response.await) }
                });
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });
    addr
}

/// An upstream that records each request and answers `200 upstream-ok`.
pub async fn recording_upstream() -> (SocketAddr, mpsc::UnboundedReceiver<Recorded>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let addr = spawn_upstream(move |req: Request<Incoming>| {
        let tx = tx.clone();
        async move {
            let (parts, body) = req.into_parts();
            let body = body.collect().await.unwrap().to_bytes();
            let _ = tx.send(Recorded {
                method: parts.method,
                uri: parts.uri,
                headers: parts.headers,
                body,
            });
            Response::new(full_body("upstream-ok"))
        }
    })
    .await;
    (addr, rx)
}

/// Starts a proxy in front of `upstream` and returns its address.
pub async fn spawn_proxy(
    upstream: &str,
    tokens: Arc<dyn TokenProvider>,
    request_timeout: Option<Duration>,
) -> SocketAddr {
    let upstream = Upstream::parse(upstream).unwrap();
    let forwarder = Forwarder::new(upstream, tokens, build_http_client());
    let service = ProxyService::new(Arc::new(forwarder)).with_request_timeout(request_timeout);

    let server = Server::new("127.0.0.1:0".parse().unwrap(), service)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run_until(std::future::pending()));
    addr
}

pub fn test_client() -> Client<HttpConnector, ProxyBody> {
    Client::builder(TokioExecutor::new()).build_http()
}

/// Collects a response body into a string.
pub async fn body_string<B>(response: Response<B>) -> String
where
    B: hyper::body::Body,
    B::Error: std::fmt::Debug,
{
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// A token provider that always fails.
pub struct FailingTokenProvider;

impl TokenProvider for FailingTokenProvider {
    fn fetch(&self) -> BoxFuture<'_, Result<Credential, TokenError>> {
        Box::pin(async { Err(TokenError::Malformed("identity service unavailable".into())) })
    }
}

/// Waits for a value on `rx`, failing the test after five seconds.
pub async fn recv_within<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for upstream")
        .expect("upstream channel closed")
}
