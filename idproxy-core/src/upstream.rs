use std::{fmt, str::FromStr};

use http::{HeaderValue, Uri, uri::Scheme};

use crate::{error::UpstreamError, utils::resolve_reference};

/// The single upstream every request is forwarded to.
///
/// Built once at startup from the configured base URL and never mutated.
#[derive(Debug, Clone)]
pub struct Upstream {
    base: Uri,
    host: HeaderValue,
}

impl Upstream {
    /// Validates `url` and builds the upstream target.
    ///
    /// The URL must be absolute, use `http` or `https` and name a host.
    pub fn parse(url: &str) -> Result<Self, UpstreamError> {
        if url.trim().is_empty() {
            return Err(UpstreamError::Empty);
        }
        let base = url.parse::<Uri>()?;

        let scheme_ok = matches!(base.scheme(), Some(s) if *s == Scheme::HTTP || *s == Scheme::HTTPS);
        let authority = match base.authority() {
            Some(authority) if scheme_ok && !authority.host().is_empty() => authority,
            _ => return Err(UpstreamError::NotAbsolute(url.to_owned())),
        };

        let host = match authority.port() {
            Some(port) => format!("{}:{}", authority.host(), port.as_str()),
            None => authority.host().to_owned(),
        };
        let host = HeaderValue::from_str(&host).map_err(|_| UpstreamError::InvalidHost(host))?;

        Ok(Self { base, host })
    }

    /// Value sent as `Host` on every outbound request.
    pub fn host_header(&self) -> &HeaderValue {
        &self.host
    }

    /// Resolves an inbound request target against the base URL.
    ///
    /// Only the path and query of `inbound` are used, so an absolute-form
    /// target never redirects the request to another origin.
    pub fn resolve(&self, inbound: &Uri) -> Result<Uri, http::Error> {
        let target = inbound.path_and_query().map_or("", |pq| pq.as_str());
        resolve_reference(&self.base, target)
    }
}

impl FromStr for Upstream {
    type Err = UpstreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_https_upstream() {
        let upstream = Upstream::parse("https://api.internal.example").unwrap();
        assert_eq!(upstream.host_header(), "api.internal.example");
        assert!(upstream.to_string().starts_with("https://api.internal.example"));
    }

    #[test]
    fn test_host_header_keeps_explicit_port_and_drops_userinfo() {
        let upstream = Upstream::parse("http://user:pw@127.0.0.1:9000/base").unwrap();
        assert_eq!(upstream.host_header(), "127.0.0.1:9000");
    }

    #[test]
    fn test_ipv6_host_header() {
        let upstream = Upstream::parse("http://[::1]:8081").unwrap();
        assert_eq!(upstream.host_header(), "[::1]:8081");
    }

    #[test]
    fn test_rejects_invalid_upstreams() {
        assert!(matches!(Upstream::parse(""), Err(UpstreamError::Empty)));
        assert!(matches!(Upstream::parse("   "), Err(UpstreamError::Empty)));
        assert!(matches!(
            Upstream::parse("/relative/path"),
            Err(UpstreamError::NotAbsolute(_))
        ));
        assert!(matches!(
            Upstream::parse("ftp://files.example"),
            Err(UpstreamError::NotAbsolute(_))
        ));
        assert!(matches!(
            Upstream::parse("http://bad host"),
            Err(UpstreamError::Invalid(_))
        ));
    }

    #[test]
    fn test_resolve_scenario() {
        let upstream: Upstream = "https://api.internal.example".parse().unwrap();
        let inbound = "/v1/items?id=5".parse::<Uri>().unwrap();
        assert_eq!(
            upstream.resolve(&inbound).unwrap().to_string(),
            "https://api.internal.example/v1/items?id=5"
        );
    }

    #[test]
    fn test_resolve_ignores_inbound_authority() {
        let upstream: Upstream = "https://upstream.example".parse().unwrap();
        let inbound = "http://other.example/x?y=1".parse::<Uri>().unwrap();
        assert_eq!(
            upstream.resolve(&inbound).unwrap().to_string(),
            "https://upstream.example/x?y=1"
        );
    }
}
