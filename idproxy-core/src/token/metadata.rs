//! Identity tokens from the compute metadata server.

use futures::future::BoxFuture;
use http::{Method, Request, Uri, header::HeaderName};
use http_body_util::BodyExt as _;
use hyper::body::Bytes;
use tracing::{debug, warn};

use super::{Credential, TokenProvider};
use crate::{
    client::{HttpClient, full_body},
    error::TokenError,
};

/// Environment variable overriding the metadata server address.
pub const METADATA_HOST_ENV: &str = "GCE_METADATA_HOST";

/// Metadata server address used when [`METADATA_HOST_ENV`] is not set.
pub const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";

const IDENTITY_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/identity";

/// Fetches identity tokens for the instance's attached service account.
pub struct MetadataTokenProvider {
    client: HttpClient,
    identity_uri: Uri,
}

impl MetadataTokenProvider {
    /// # Arguments
    ///
    /// * `client` - The shared outbound client
    /// * `host` - Metadata server address as `host[:port]`
    /// * `audience` - Audience the tokens are minted for
    pub fn new(client: HttpClient, host: &str, audience: &str) -> Result<Self, TokenError> {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("audience", audience)
            .append_pair("format", "full")
            .finish();
        let identity_uri = format!("http://{host}{IDENTITY_PATH}?{query}")
            .parse::<Uri>()
            .map_err(http::Error::from)?;

        debug!("Using metadata identity endpoint {}", identity_uri);
        Ok(Self {
            client,
            identity_uri,
        })
    }

    /// Like [`MetadataTokenProvider::new`], reading the host from the environment.
    pub fn from_env(client: HttpClient, audience: &str) -> Result<Self, TokenError> {
        let host = std::env::var(METADATA_HOST_ENV)
            .ok()
            .filter(|host| !host.is_empty())
            .unwrap_or_else(|| DEFAULT_METADATA_HOST.to_owned());
        Self::new(client, &host, audience)
    }

    async fn fetch_identity(&self) -> Result<Credential, TokenError> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(self.identity_uri.clone())
            .header(HeaderName::from_static("metadata-flavor"), "Google")
            .body(full_body(Bytes::new()))?;

        let response = self.client.request(request).await?;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();

        if !status.is_success() {
            let body = String::from_utf8_lossy(&body).trim().to_owned();
            warn!("Metadata server returned {} for identity token", status);
            return Err(TokenError::Status { status, body });
        }

        let token = std::str::from_utf8(&body)
            .map_err(|e| TokenError::Malformed(e.to_string()))?
            .trim();
        if token.is_empty() {
            return Err(TokenError::Malformed("empty identity token".into()));
        }
        Ok(Credential::from_jwt(token))
    }
}

impl TokenProvider for MetadataTokenProvider {
    fn fetch(&self) -> BoxFuture<'_, Result<Credential, TokenError>> {
        Box::pin(self.fetch_identity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::build_http_client;

    #[tokio::test]
    async fn test_identity_uri_encodes_audience() {
        let provider = MetadataTokenProvider::new(
            build_http_client(),
            "127.0.0.1:8099",
            "https://api.internal.example/base?x=1",
        )
        .unwrap();
        assert_eq!(
            provider.identity_uri.to_string(),
            "http://127.0.0.1:8099/computeMetadata/v1/instance/service-accounts/default/identity\
             ?audience=https%3A%2F%2Fapi.internal.example%2Fbase%3Fx%3D1&format=full"
        );
    }

    #[tokio::test]
    async fn test_rejects_invalid_host() {
        assert!(MetadataTokenProvider::new(build_http_client(), "bad host", "aud").is_err());
    }
}
