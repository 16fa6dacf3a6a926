//! Client identity extraction for quota bucketing.
//!
//! The rest of the crate treats an identity as an opaque string; nothing past
//! this module assumes it is an IP address.

use axum::http::HeaderMap;
use std::net::SocketAddr;

/// Loopback forms that bypass metering entirely.
const EXEMPT_IDENTITIES: [&str; 3] = ["127.0.0.1", "::1", "::ffff:127.0.0.1"];

/// Whether an identity belongs to the fixed exempt set.
pub fn is_exempt(identity: &str) -> bool {
    EXEMPT_IDENTITIES.contains(&identity)
}

/// Derive the quota identity for a request.
///
/// Proxy headers win over the peer address so deployments behind a reverse
/// proxy bucket by the real client: `x-forwarded-for` (first entry), then
/// `x-real-ip`, then the connection's peer IP.
pub fn extract_identity(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded.to_str() {
            if let Some(first_ip) = forwarded_str.split(',').next() {
                let first_ip = first_ip.trim();
                if !first_ip.is_empty() {
                    return first_ip.to_string();
                }
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            return ip_str.to_string();
        }
    }

    match peer {
        Some(addr) => addr.ip().to_string(),
        None => "unknown".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_forwarded_header_takes_first_entry() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("192.168.1.1, 10.0.0.1"),
        );

        assert_eq!(extract_identity(&headers, None), "192.168.1.1");
    }

    #[test]
    fn test_real_ip_header_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("203.0.113.1"));

        assert_eq!(extract_identity(&headers, None), "203.0.113.1");
    }

    #[test]
    fn test_peer_address_fallback() {
        let headers = HeaderMap::new();
        let peer: SocketAddr = "198.51.100.7:55123".parse().unwrap();

        assert_eq!(extract_identity(&headers, Some(peer)), "198.51.100.7");
    }

    #[test]
    fn test_unknown_when_nothing_available() {
        assert_eq!(extract_identity(&HeaderMap::new(), None), "unknown");
    }

    #[test]
    fn test_exempt_set() {
        assert!(is_exempt("127.0.0.1"));
        assert!(is_exempt("::1"));
        assert!(is_exempt("::ffff:127.0.0.1"));
        assert!(!is_exempt("192.168.1.1"));
        assert!(!is_exempt("unknown"));
    }
}
