//! The hyper service driving one inbound request through the proxy.
//!
//! Each request walks `received → destination-resolved → credential-acquired
//! → dispatched → relaying → complete`. Failures before relaying become a
//! short plain-text error response; failures while relaying are only logged.

use std::{convert::Infallible, pin::Pin, sync::Arc, time::Duration};

use http::{HeaderValue, Request, Response, header};
use hyper::{
    body::{Body, Bytes, Incoming},
    service::Service as HyperService,
};
use tracing::{Instrument as _, debug, info_span, warn};

use crate::{
    client::{ProxyBody, full_body},
    error::ForwardError,
    forwarder::Forwarder,
    relay::relay,
};

/// Per-connection handle onto the shared [`Forwarder`].
///
/// Cloning is cheap; every connection gets its own copy.
#[derive(Clone)]
pub struct ProxyService {
    forwarder: Arc<Forwarder>,
    request_timeout: Option<Duration>,
}

impl ProxyService {
    pub fn new(forwarder: Arc<Forwarder>) -> Self {
        Self {
            forwarder,
            request_timeout: None,
        }
    }

    /// Bounds the time until upstream response headers arrive. `None` waits
    /// as long as the transport does.
    pub fn with_request_timeout(mut self, request_timeout: Option<Duration>) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Proxies one request and always produces a response for the caller.
    pub async fn handle<B>(&self, request: Request<B>) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes, Error = hyper::Error> + Send + Sync + 'static,
    {
        let span = info_span!(
            "proxy_request",
            method = %request.method(),
            uri = %request.uri()
        );

        async move {
            let forwarded = match self.request_timeout {
                Some(limit) => {
                    match tokio::time::timeout(limit, self.forwarder.forward(request)).await {
                        Ok(result) => result,
                        Err(_) => {
                            warn!("Upstream did not answer within {:?}", limit);
                            Err(ForwardError::Timeout(limit))
                        }
                    }
                }
                None => self.forwarder.forward(request).await,
            };

            match forwarded {
                Ok(forwarded) => {
                    debug!("Relaying response from {}", forwarded.destination);
                    relay(forwarded.response, &forwarded.destination)
                }
                Err(err) => error_response(&err),
            }
        }
        .instrument(span)
        .await
    }
}

/// Short plain-text response for a request that could not be forwarded.
pub fn error_response(err: &ForwardError) -> Response<ProxyBody> {
    let mut response = Response::new(full_body(err.public_message()));
    *response.status_mut() = err.status();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response.headers_mut().insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    response
}

impl HyperService<Request<Incoming>> for ProxyService {
    type Response = Response<ProxyBody>;

    type Error = Infallible;

    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        Box::pin(async move { Ok(service.handle(req).await) })
    }
}
