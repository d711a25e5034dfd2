//! Webhook URL registration hygiene: rejects URLs that
//! could be used to make the dispatcher fetch an internal address on the
//! caller's behalf.

use std::net::IpAddr;

use reqwest::Url;

/// Whether `localhost` (and its literal loopback addresses) may be
/// registered despite the scheme/private-range checks below. Only ever
/// `true` in a development deployment.
pub struct UrlHygienePolicy {
    pub allow_localhost: bool,
}

impl Default for UrlHygienePolicy {
    fn default() -> Self {
        Self { allow_localhost: false }
    }
}

/// Validates a candidate webhook URL against the denylist below:
/// `https` only (unless `localhost` is explicitly permitted), and the host
/// must not be a loopback, private, or link-local address.
pub fn validate_webhook_url(candidate: &str, policy: &UrlHygienePolicy) -> Result<(), String> {
    let url = Url::parse(candidate).map_err(|e| format!("not a valid URL: {e}"))?;

    let host = url.host_str().ok_or_else(|| "URL has no host".to_string())?;
    let is_localhost = host.eq_ignore_ascii_case("localhost");

    if url.scheme() != "https" && !(is_localhost && policy.allow_localhost) {
        return Err("webhook URL must use https (localhost is only permitted outside production)".to_string());
    }

    if is_localhost {
        if !policy.allow_localhost {
            return Err("localhost webhooks are not permitted in this deployment".to_string());
        }
        return Ok(());
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_denylisted(ip) {
            return Err(format!("webhook host {ip} resolves to a private or loopback address"));
        }
    }

    Ok(())
}

/// The explicit denylist: `127/8`, `10/8`, `172.16/12`,
/// `192.168/16`, `169.254/16`, and IPv6 loopback/link-local/unique-local.
fn is_denylisted(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.octets()[0] == 127
        }
        IpAddr::V6(v6) => {
            v6.is_loopback() || is_unique_local_v6(&v6) || is_link_local_v6(&v6)
        }
    }
}

fn is_unique_local_v6(v6: &std::net::Ipv6Addr) -> bool {
    (v6.segments()[0] & 0xfe00) == 0xfc00
}

fn is_link_local_v6(v6: &std::net::Ipv6Addr) -> bool {
    (v6.segments()[0] & 0xffc0) == 0xfe80
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_https() {
        let err = validate_webhook_url("http://example.com/hook", &UrlHygienePolicy::default()).unwrap_err();
        assert!(err.contains("https"));
    }

    #[test]
    fn accepts_https_public_host() {
        assert!(validate_webhook_url("https://example.com/hook", &UrlHygienePolicy::default()).is_ok());
    }

    #[test]
    fn rejects_loopback_ip_literal() {
        let err = validate_webhook_url("https://127.0.0.1/hook", &UrlHygienePolicy::default()).unwrap_err();
        assert!(err.contains("private or loopback"));
    }

    #[test]
    fn rejects_private_range_ip_literal() {
        assert!(validate_webhook_url("https://10.0.0.5/hook", &UrlHygienePolicy::default()).is_err());
        assert!(validate_webhook_url("https://172.16.0.5/hook", &UrlHygienePolicy::default()).is_err());
        assert!(validate_webhook_url("https://192.168.1.5/hook", &UrlHygienePolicy::default()).is_err());
        assert!(validate_webhook_url("https://169.254.1.5/hook", &UrlHygienePolicy::default()).is_err());
    }

    #[test]
    fn localhost_rejected_unless_policy_allows_it() {
        assert!(validate_webhook_url("https://localhost/hook", &UrlHygienePolicy::default()).is_err());
        assert!(validate_webhook_url("https://localhost/hook", &UrlHygienePolicy { allow_localhost: true }).is_ok());
    }
}
