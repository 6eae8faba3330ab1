//! SSRF-safe destination URL validation (spec.md section 4.9), applied at
//! enqueue time so a malicious or misconfigured `webhook_url` never
//! reaches an outbound HTTP client.

use std::net::IpAddr;

use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum UrlValidationError {
    #[error("destination url is not a valid url: {0}")]
    Malformed(String),
    #[error("destination url scheme must be https")]
    SchemeNotAllowed,
    #[error("destination host {0:?} is not permitted")]
    HostDenied(String),
}

const DENYLISTED_HOSTS: &[&str] = &[
    "localhost",
    "127.0.0.1",
    "0.0.0.0",
    "::1",
    // cloud metadata endpoints
    "169.254.169.254",
    "metadata.google.internal",
];

/// Validates `raw` against spec.md 4.9's rules, returning the parsed
/// [`Url`] on success. `allow_http` is set only in development
/// configuration (spec.md 4.9: "in development `http` is also accepted").
pub fn validate(raw: &str, allow_http: bool) -> Result<Url, UrlValidationError> {
    let url = Url::parse(raw).map_err(|e| UrlValidationError::Malformed(e.to_string()))?;

    match url.scheme() {
        "https" => {}
        "http" if allow_http => {}
        _ => return Err(UrlValidationError::SchemeNotAllowed),
    }

    let host = url
        .host_str()
        .ok_or_else(|| UrlValidationError::Malformed("url has no host".to_string()))?
        .to_lowercase();

    if DENYLISTED_HOSTS.contains(&host.as_str()) {
        return Err(UrlValidationError::HostDenied(host));
    }
    if host.ends_with(".internal") || host.ends_with(".local") {
        return Err(UrlValidationError::HostDenied(host));
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_denied_ip(ip) {
            return Err(UrlValidationError::HostDenied(host));
        }
    }

    Ok(url)
}

/// Private/link-local/loopback ranges from spec.md 4.9: IPv4 `10/8`,
/// `172.16/12`, `192.168/16`, `169.254/16`; IPv6 `fc00::/7` (unique local)
/// and `fe80::/10` (link-local).
fn is_denied_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local() || v4.is_unspecified(),
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xfe00) == 0xfc00
                || (v6.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_https_public_host() {
        assert!(validate("https://merchant.example.com/hook", false).is_ok());
    }

    #[test]
    fn rejects_http_unless_dev() {
        assert!(validate("http://merchant.example.com/hook", false).is_err());
        assert!(validate("http://merchant.example.com/hook", true).is_ok());
    }

    #[test]
    fn rejects_denylisted_hosts() {
        assert!(validate("https://localhost/hook", true).is_err());
        assert!(validate("https://127.0.0.1/hook", true).is_err());
        assert!(validate("https://169.254.169.254/hook", true).is_err());
    }

    #[test]
    fn rejects_internal_and_local_suffixes() {
        assert!(validate("https://service.internal/hook", false).is_err());
        assert!(validate("https://printer.local/hook", false).is_err());
    }

    #[test]
    fn rejects_private_ipv4_ranges() {
        for ip in ["10.0.0.5", "172.16.0.5", "192.168.1.5"] {
            assert!(validate(&format!("https://{ip}/hook"), false).is_err());
        }
    }

    #[test]
    fn rejects_malformed_url() {
        assert!(validate("not a url", false).is_err());
    }
}
