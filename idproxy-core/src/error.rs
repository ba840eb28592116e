//! Error types for the proxy core.

use http::StatusCode;
use thiserror::Error;

/// Errors raised while turning an inbound request into an upstream response.
///
/// Every variant is recoverable: it ends the one request it belongs to and
/// is reported to that caller only.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// The inbound request could not be translated into an outbound request.
    #[error("invalid destination: {0}")]
    BadRequest(String),

    /// The token provider could not supply a credential.
    #[error("authentication failed: {0}")]
    Authentication(#[from] TokenError),

    /// The upstream could not be reached or the exchange failed.
    #[error("upstream request failed: {0}")]
    BadGateway(#[from] hyper_util::client::legacy::Error),

    /// The per-request deadline expired before the upstream answered.
    #[error("upstream did not respond within {0:?}")]
    Timeout(std::time::Duration),
}

impl ForwardError {
    /// Status code reported to the caller.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Authentication(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::BadGateway(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Short message reported to the caller. Never carries internal details.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "Bad Request",
            Self::Authentication(_) => "Could not generate authentication token.",
            Self::BadGateway(_) => "Bad Gateway",
            Self::Timeout(_) => "Gateway Timeout",
        }
    }
}

/// Errors raised by token providers.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token request failed: {0}")]
    Transport(#[from] hyper_util::client::legacy::Error),

    #[error("failed to read token response: {0}")]
    Body(#[from] hyper::Error),

    #[error("token endpoint returned {status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("malformed token response: {0}")]
    Malformed(String),

    #[error("failed to sign token assertion: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    #[error("invalid credentials file {path}: {reason}")]
    Credentials { path: String, reason: String },

    #[error("invalid token request: {0}")]
    Request(#[from] http::Error),

    #[error("identity service did not answer within {0:?}")]
    Timeout(std::time::Duration),
}

/// Errors raised while validating the upstream base URL.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream URL is empty")]
    Empty,

    #[error("upstream URL is not a valid URI: {0}")]
    Invalid(#[from] http::uri::InvalidUri),

    #[error("upstream URL must be absolute with an http or https scheme: {0}")]
    NotAbsolute(String),

    #[error("upstream URL has an invalid host: {0}")]
    InvalidHost(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ForwardError::BadRequest("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ForwardError::Authentication(TokenError::Malformed("x".into())).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ForwardError::Timeout(std::time::Duration::from_secs(1)).status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_public_message_hides_details() {
        let err = ForwardError::Authentication(TokenError::Malformed("secret detail".into()));
        assert!(!err.public_message().contains("secret detail"));
        assert!(err.to_string().contains("secret detail"));
    }
}
