//! Shared outbound transport.
//!
//! A single pooled client is built at startup and cloned into every component
//! that talks to the network: the forwarder and the token providers.

use std::time::Duration;

use http_body_util::{BodyExt as _, Full, combinators::BoxBody};
use hyper::body::Bytes;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tracing::{debug, warn};

/// Body type flowing through the proxy in both directions.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Pooled HTTP/1.1 + HTTP/2 client over plain TCP or rustls.
pub type HttpClient = Client<HttpsConnector<HttpConnector>, ProxyBody>;

/// Builds the shared client, trusting the platform's native root certificates.
///
/// When no native roots can be loaded the client is still built, but every
/// `https` connection will fail certificate verification.
pub fn build_http_client() -> HttpClient {
    let builder = match HttpsConnectorBuilder::new().with_native_roots() {
        Ok(builder) => {
            debug!("Loaded native root certificates");
            builder
        }
        Err(e) => {
            warn!("Failed to load native root certificates: {}", e);
            let tls = ClientConfig::builder()
                .with_root_certificates(RootCertStore::empty())
                .with_no_client_auth();
            HttpsConnectorBuilder::new().with_tls_config(tls)
        }
    };
    let connector = builder
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .build();

    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(90))
        .build(connector)
}

/// Wraps an in-memory payload as a [`ProxyBody`].
pub fn full_body(data: impl Into<Bytes>) -> ProxyBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed()
}
