//! Response relay.
//!
//! Copies an upstream response back to the caller: same status, same headers
//! minus the framing ones, body streamed as it arrives.

use http::{
    HeaderMap, HeaderName, Response, Uri,
    header::{CONNECTION, CONTENT_ENCODING, CONTENT_LENGTH, TRANSFER_ENCODING},
};
use http_body_util::BodyExt as _;
use hyper::body::{Body, Bytes};
use tracing::error;

use crate::client::ProxyBody;

/// Upstream headers that are never copied.
///
/// The serving side frames the relayed body itself, so the upstream's framing
/// headers would be wrong or duplicated.
pub const EXCLUDED_RESPONSE_HEADERS: [HeaderName; 4] =
    [CONTENT_ENCODING, CONTENT_LENGTH, TRANSFER_ENCODING, CONNECTION];

#[inline]
pub fn is_excluded(name: &HeaderName) -> bool {
    EXCLUDED_RESPONSE_HEADERS.contains(name)
}

/// Copies every upstream header except the excluded ones, keeping all values
/// of multi-valued headers in their original order.
pub fn relay_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if is_excluded(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

/// Rebuilds `response` for the caller.
///
/// The body is not buffered. A failure while streaming it is logged against
/// `destination`; by then the status line has been sent, so the caller only
/// sees a truncated body.
pub fn relay<B>(response: Response<B>, destination: &Uri) -> Response<ProxyBody>
where
    B: Body<Data = Bytes, Error = hyper::Error> + Send + Sync + 'static,
{
    let (parts, body) = response.into_parts();

    let source = destination.to_string();
    let body = body
        .map_err(move |e| {
            error!("Error copying response body from {}: {}", source, e);
            e
        })
        .boxed();

    let mut relayed = Response::new(body);
    *relayed.status_mut() = parts.status;
    *relayed.headers_mut() = relay_headers(&parts.headers);
    relayed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::full_body;
    use http::StatusCode;

    #[test]
    fn test_excluded_headers_are_dropped() {
        let mut upstream = HeaderMap::new();
        upstream.insert("Content-Length", "42".parse().unwrap());
        upstream.insert("content-encoding", "gzip".parse().unwrap());
        upstream.insert("Transfer-Encoding", "chunked".parse().unwrap());
        upstream.insert("CONNECTION", "keep-alive".parse().unwrap());
        upstream.insert("X-Custom", "foo".parse().unwrap());

        let headers = relay_headers(&upstream);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers["x-custom"], "foo");
    }

    #[test]
    fn test_multi_valued_headers_keep_order() {
        let mut upstream = HeaderMap::new();
        upstream.append("set-cookie", "a=1".parse().unwrap());
        upstream.append("set-cookie", "b=2".parse().unwrap());
        upstream.append("set-cookie", "c=3".parse().unwrap());
        upstream.append("vary", "accept".parse().unwrap());

        let headers = relay_headers(&upstream);
        let cookies: Vec<_> = headers.get_all("set-cookie").iter().collect();
        assert_eq!(cookies, vec!["a=1", "b=2", "c=3"]);
        assert_eq!(headers["vary"], "accept");
    }

    #[tokio::test]
    async fn test_relay_copies_status_and_body() {
        let upstream = Response::builder()
            .status(StatusCode::IM_A_TEAPOT)
            .header("content-length", "5")
            .header("x-custom", "foo")
            .body(full_body("hello"))
            .unwrap();
        let destination = "http://upstream/x".parse::<Uri>().unwrap();

        let relayed = relay(upstream, &destination);
        assert_eq!(relayed.status(), StatusCode::IM_A_TEAPOT);
        assert!(relayed.headers().get("content-length").is_none());
        assert_eq!(relayed.headers()["x-custom"], "foo");

        let body = relayed.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"hello");
    }

    #[test]
    fn test_non_standard_status_is_copied() {
        let status = StatusCode::from_u16(599).unwrap();
        let upstream = Response::builder()
            .status(status)
            .body(full_body(""))
            .unwrap();
        let destination = "http://upstream/".parse::<Uri>().unwrap();
        assert_eq!(relay(upstream, &destination).status().as_u16(), 599);
    }
}
