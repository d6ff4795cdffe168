use std::fmt;

use http::Uri;
use url::Url;

use crate::error::{Result, RotatorError};

/// Suffix marking gateways that `shutdown` must never delete
pub const MANUAL_DELETION_SUFFIX: &str = " (Manual Deletion Required)";

/// The origin every gateway of a pool relays to: scheme, host and optional port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Site {
    origin: String,
    scheme: String,
    host: String,
    port: u16,
}

impl Site {
    /// Parse and normalize a site URL. A single trailing slash is accepted,
    /// any other path, a query or a fragment is rejected.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let url = Url::parse(raw)
            .map_err(|e| RotatorError::InvalidConfig(format!("site must be a valid URL: {}", e)))?;

        let scheme = url.scheme().to_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(RotatorError::InvalidConfig(format!(
                "site has unsupported scheme: {}",
                scheme
            )));
        }
        if url.fragment().is_some() || url.query().is_some() {
            return Err(RotatorError::InvalidConfig(
                "site must not include query/fragment".into(),
            ));
        }
        if !(url.path().is_empty() || url.path() == "/") {
            return Err(RotatorError::InvalidConfig(
                "site must not include a path".into(),
            ));
        }

        let host = url
            .host_str()
            .ok_or_else(|| RotatorError::InvalidConfig("site must include a host".into()))?
            .to_lowercase();
        let port = url
            .port_or_known_default()
            .ok_or_else(|| RotatorError::InvalidConfig("site has no usable port".into()))?;

        Ok(Self {
            origin: url.origin().ascii_serialization(),
            scheme,
            host,
            port,
        })
    }

    /// Origin without trailing slash, e.g. `https://example.com`
    pub fn as_str(&self) -> &str {
        &self.origin
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether an absolute request URI targets this site
    pub fn matches(&self, uri: &Uri) -> bool {
        let Some(scheme) = uri.scheme_str() else {
            return false;
        };
        let Some(host) = uri.host() else {
            return false;
        };
        let scheme = scheme.to_lowercase();
        let port = uri.port_u16().unwrap_or(match scheme.as_str() {
            "https" => 443,
            _ => 80,
        });

        scheme == self.scheme && host.eq_ignore_ascii_case(&self.host) && port == self.port
    }

    /// Name every gateway relaying to this site is created under
    pub fn gateway_name(&self) -> String {
        format!("{} - IP Rotate API", self.origin)
    }

    /// Name for gateways that must survive `shutdown`
    pub fn manual_gateway_name(&self) -> String {
        format!("{}{}", self.gateway_name(), MANUAL_DELETION_SUFFIX)
    }
}

impl fmt::Display for Site {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_parse_strips_trailing_slash() {
        let site = Site::parse("https://Example.com/").unwrap();
        assert_eq!(site.as_str(), "https://example.com");
        assert_eq!(site.host(), "example.com");
        assert_eq!(site.port(), 443);
        assert_eq!(site.gateway_name(), "https://example.com - IP Rotate API");
        assert_eq!(
            site.manual_gateway_name(),
            "https://example.com - IP Rotate API (Manual Deletion Required)"
        );
    }

    #[test]
    fn test_site_parse_keeps_explicit_port() {
        let site = Site::parse("http://localhost:8080").unwrap();
        assert_eq!(site.as_str(), "http://localhost:8080");
        assert_eq!(site.port(), 8080);
    }

    #[test]
    fn test_site_parse_rejects_path_and_query() {
        assert!(matches!(
            Site::parse("https://example.com/api"),
            Err(RotatorError::InvalidConfig(_))
        ));
        assert!(matches!(
            Site::parse("https://example.com?q=1"),
            Err(RotatorError::InvalidConfig(_))
        ));
        assert!(matches!(
            Site::parse("ftp://example.com"),
            Err(RotatorError::InvalidConfig(_))
        ));
        assert!(matches!(
            Site::parse("not a url"),
            Err(RotatorError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_site_matches_uri() {
        let site = Site::parse("https://example.com").unwrap();

        assert!(site.matches(&"https://example.com/path?q=1".parse().unwrap()));
        assert!(site.matches(&"https://EXAMPLE.com:443/".parse().unwrap()));
        assert!(!site.matches(&"http://example.com/path".parse().unwrap()));
        assert!(!site.matches(&"https://example.org/path".parse().unwrap()));
        assert!(!site.matches(&"https://example.com:8443/path".parse().unwrap()));
        assert!(!site.matches(&"/path".parse().unwrap()));
    }
}
