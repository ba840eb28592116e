//! Request forwarding.
//!
//! Turns an inbound request into exactly one outbound request to the upstream:
//! the destination is resolved against the upstream base URL, headers are
//! copied, a bearer credential is injected and the body is streamed through
//! untouched.

use std::sync::Arc;

use http::{
    HeaderMap, HeaderValue, Request, Response, Uri,
    header::{ACCEPT_ENCODING, AUTHORIZATION, HOST},
};
use http_body_util::BodyExt as _;
use hyper::body::{Body, Bytes, Incoming};
use tracing::{debug, error, info, warn};

use crate::{
    client::HttpClient,
    error::{ForwardError, TokenError},
    token::{Credential, TokenProvider},
    upstream::Upstream,
};

/// An upstream response together with the URI it was fetched from.
#[derive(Debug)]
pub struct Forwarded {
    pub destination: Uri,
    pub response: Response<Incoming>,
}

/// Immutable forwarding context shared by every request.
///
/// Holds the upstream target, the credential source and the pooled client.
/// Several forwarders can live in one process side by side.
pub struct Forwarder {
    upstream: Upstream,
    tokens: Arc<dyn TokenProvider>,
    client: HttpClient,
}

impl Forwarder {
    pub fn new(upstream: Upstream, tokens: Arc<dyn TokenProvider>, client: HttpClient) -> Self {
        Self {
            upstream,
            tokens,
            client,
        }
    }

    /// Forwards `request` to the upstream and returns its response head.
    ///
    /// Nothing is sent upstream when the destination cannot be resolved or no
    /// credential can be obtained. Dropping the returned future abandons the
    /// outbound request.
    pub async fn forward<B>(&self, request: Request<B>) -> Result<Forwarded, ForwardError>
    where
        B: Body<Data = Bytes, Error = hyper::Error> + Send + Sync + 'static,
    {
        let (parts, body) = request.into_parts();

        let destination = self.upstream.resolve(&parts.uri).map_err(|e| {
            warn!("Cannot resolve {} {} against upstream: {}", parts.method, parts.uri, e);
            ForwardError::BadRequest(e.to_string())
        })?;
        info!("Forwarding request to: {}", destination);

        let credential = self.tokens.fetch().await.map_err(|e| {
            error!("Error getting ID token for {} {}: {}", parts.method, destination, e);
            ForwardError::from(e)
        })?;
        let headers = outbound_headers(&parts.headers, self.upstream.host_header(), &credential)?;

        let upload_target = destination.to_string();
        let body = body
            .map_err(move |e| {
                warn!("Error reading request body for {}: {}", upload_target, e);
                e
            })
            .boxed();

        let mut outbound = Request::new(body);
        *outbound.method_mut() = parts.method.clone();
        *outbound.uri_mut() = destination.clone();
        *outbound.headers_mut() = headers;

        let response = self.client.request(outbound).await.map_err(|e| {
            error!("Error forwarding {} {}: {}", parts.method, destination, e);
            ForwardError::from(e)
        })?;
        debug!("Upstream answered {} for {}", response.status(), destination);

        Ok(Forwarded {
            destination,
            response,
        })
    }
}

/// Builds the outbound header set.
///
/// Every inbound header is copied verbatim, then `Authorization` and `Host`
/// are overlaid. The overlays replace all inbound values of those headers.
///
/// `Accept-Encoding` is the one header not copied: the relay drops the
/// upstream's `Content-Encoding`, so the upstream must answer uncompressed.
pub fn outbound_headers(
    inbound: &HeaderMap,
    host: &HeaderValue,
    credential: &Credential,
) -> Result<HeaderMap, ForwardError> {
    let mut bearer = HeaderValue::try_from(format!("Bearer {}", credential.token())).map_err(|_| {
        ForwardError::Authentication(TokenError::Malformed(
            "credential is not a valid header value".into(),
        ))
    })?;
    bearer.set_sensitive(true);

    let mut headers = inbound.clone();
    headers.remove(ACCEPT_ENCODING);
    headers.insert(AUTHORIZATION, bearer);
    headers.insert(HOST, host.clone());
    Ok(headers)
}
