use std::net::IpAddr;
use thiserror::Error;
use url::{Host, Url};

/// Why a feed URL was refused admission to the feed list.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),

    #[error("URL has no host")]
    MissingHost,

    /// Credentials belong in the credential source, not in subscription files.
    #[error("Embedded credentials not allowed")]
    EmbeddedCredentials,

    #[error("Localhost not allowed")]
    Localhost,

    #[error("Private IP address not allowed: {0}")]
    PrivateIp(IpAddr),
}

/// Validates a subscription URL before it enters the feed list.
///
/// SSRF guard for feeds imported from OPML: only `http`/`https`, a host is
/// required, no `user:pass@` part, and no loopback, private, link-local,
/// unique-local or unspecified addresses.
///
/// ```
/// use feedvoice::util::validate_url;
///
/// let url = validate_url("https://example.com/feed.xml").unwrap();
/// assert_eq!(url.host_str(), Some("example.com"));
///
/// assert!(validate_url("http://localhost/feed").is_err());
/// assert!(validate_url("http://192.168.1.1/feed").is_err());
/// assert!(validate_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_url(url_str: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str.trim())?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(UrlValidationError::UnsupportedScheme(url.scheme().to_owned()));
    }
    if !url.username().is_empty() || url.password().is_some() {
        return Err(UrlValidationError::EmbeddedCredentials);
    }

    let ip = match url.host() {
        None => return Err(UrlValidationError::MissingHost),
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.');
            if domain.eq_ignore_ascii_case("localhost") || domain.ends_with(".localhost") {
                return Err(UrlValidationError::Localhost);
            }
            return Ok(url);
        }
        Some(Host::Ipv4(ip)) => IpAddr::V4(ip),
        Some(Host::Ipv6(ip)) => match ip.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(ip),
        },
    };

    if ip.is_loopback() {
        return Err(UrlValidationError::Localhost);
    }
    if is_private_ip(&ip) {
        return Err(UrlValidationError::PrivateIp(ip));
    }
    Ok(url)
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_link_local() || v4.is_unspecified(),
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            // fc00::/7 unique local, fe80::/10 link local
            v6.is_unspecified() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
    }
}
