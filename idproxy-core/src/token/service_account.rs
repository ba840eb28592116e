//! Identity tokens minted from a service-account key file.
//!
//! A signed JWT assertion carrying `target_audience` is exchanged at the key's
//! token endpoint for an identity token.

use std::{
    path::Path,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use futures::future::BoxFuture;
use http::{Method, Request, Uri, header};
use http_body_util::BodyExt as _;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Credential, TokenProvider};
use crate::{
    client::{HttpClient, full_body},
    error::TokenError,
};

/// Environment variable pointing at the key file.
pub const CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

/// Token endpoint used when the key file does not name one.
pub const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME: Duration = Duration::from_secs(3600);

#[derive(Deserialize)]
struct ServiceAccountKey {
    #[serde(rename = "type")]
    kind: String,
    client_email: String,
    private_key: String,
    private_key_id: Option<String>,
    token_uri: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct AssertionClaims {
    iss: String,
    sub: String,
    aud: String,
    iat: u64,
    exp: u64,
    target_audience: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    id_token: Option<String>,
}

/// Exchanges signed assertions for identity tokens.
pub struct ServiceAccountTokenProvider {
    client: HttpClient,
    audience: String,
    client_email: String,
    key: EncodingKey,
    key_id: Option<String>,
    token_uri: Uri,
}

impl ServiceAccountTokenProvider {
    /// Loads the key file at `path`.
    pub fn from_file(client: HttpClient, path: &Path, audience: &str) -> Result<Self, TokenError> {
        let origin = path.display().to_string();
        let json = std::fs::read_to_string(path).map_err(|e| TokenError::Credentials {
            path: origin.clone(),
            reason: e.to_string(),
        })?;
        Self::from_json(client, &json, audience, &origin)
    }

    /// Parses a key file's contents. `origin` names the source in errors.
    pub fn from_json(
        client: HttpClient,
        json: &str,
        audience: &str,
        origin: &str,
    ) -> Result<Self, TokenError> {
        let invalid = |reason: String| TokenError::Credentials {
            path: origin.to_owned(),
            reason,
        };

        let key: ServiceAccountKey = serde_json::from_str(json).map_err(|e| invalid(e.to_string()))?;
        if key.kind != "service_account" {
            return Err(invalid(format!("unsupported credential type `{}`", key.kind)));
        }

        let encoding_key =
            EncodingKey::from_rsa_pem(key.private_key.as_bytes()).map_err(|e| invalid(e.to_string()))?;
        let token_uri = key
            .token_uri
            .as_deref()
            .unwrap_or(DEFAULT_TOKEN_URI)
            .parse::<Uri>()
            .map_err(|e| invalid(format!("invalid token_uri: {e}")))?;

        debug!(
            "Loaded service account {} from {}",
            key.client_email, origin
        );
        Ok(Self {
            client,
            audience: audience.to_owned(),
            client_email: key.client_email,
            key: encoding_key,
            key_id: key.private_key_id,
            token_uri,
        })
    }

    fn claims(&self, now: SystemTime) -> AssertionClaims {
        let iat = now
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        AssertionClaims {
            iss: self.client_email.clone(),
            sub: self.client_email.clone(),
            aud: self.token_uri.to_string(),
            iat,
            exp: iat + ASSERTION_LIFETIME.as_secs(),
            target_audience: self.audience.clone(),
        }
    }

    /// Signs the RS256 assertion presented to the token endpoint.
    fn assertion(&self, now: SystemTime) -> Result<String, TokenError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key_id.clone();
        Ok(jsonwebtoken::encode(&header, &self.claims(now), &self.key)?)
    }

    async fn exchange(&self) -> Result<Credential, TokenError> {
        let form = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", JWT_BEARER_GRANT)
            .append_pair("assertion", &self.assertion(SystemTime::now())?)
            .finish();

        let request = Request::builder()
            .method(Method::POST)
            .uri(self.token_uri.clone())
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(full_body(form))?;

        let response = self.client.request(request).await?;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();

        if !status.is_success() {
            warn!("Token endpoint {} returned {}", self.token_uri, status);
            return Err(TokenError::Status {
                status,
                body: String::from_utf8_lossy(&body).trim().to_owned(),
            });
        }

        let parsed: TokenResponse =
            serde_json::from_slice(&body).map_err(|e| TokenError::Malformed(e.to_string()))?;
        match parsed.id_token {
            Some(token) if !token.is_empty() => Ok(Credential::from_jwt(token)),
            _ => Err(TokenError::Malformed(
                "token response has no id_token".into(),
            )),
        }
    }
}

impl TokenProvider for ServiceAccountTokenProvider {
    fn fetch(&self) -> BoxFuture<'_, Result<Credential, TokenError>> {
        Box::pin(self.exchange())
    }
}
