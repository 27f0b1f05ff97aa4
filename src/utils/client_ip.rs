// Client IP resolution with optional proxy-header trust

use axum::http::HeaderMap;
use std::net::{IpAddr, SocketAddr};

/// Resolve the client IP for auditing and throttling.
///
/// When `trust_proxy` is set, the first valid address in `X-Forwarded-For`
/// wins, then `X-Real-IP`; otherwise the socket peer address is used.
pub fn resolve_client_ip(headers: &HeaderMap, remote: SocketAddr, trust_proxy: bool) -> String {
    if trust_proxy {
        if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            for candidate in forwarded.split(',') {
                if let Ok(ip) = candidate.trim().parse::<IpAddr>() {
                    return ip.to_string();
                }
            }
        }

        if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
            if let Ok(ip) = real_ip.trim().parse::<IpAddr>() {
                return ip.to_string();
            }
        }
    }

    remote.ip().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn remote() -> SocketAddr {
        "10.0.0.9:40312".parse().unwrap()
    }

    #[test]
    fn test_untrusted_proxy_uses_socket_addr() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("203.0.113.7"));

        assert_eq!(resolve_client_ip(&headers, remote(), false), "10.0.0.9");
    }

    #[test]
    fn test_trusted_proxy_takes_first_valid_forwarded() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("garbage, 203.0.113.7, 198.51.100.2"),
        );

        assert_eq!(resolve_client_ip(&headers, remote(), true), "203.0.113.7");
    }

    #[test]
    fn test_trusted_proxy_falls_back_to_real_ip() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.2"));

        assert_eq!(resolve_client_ip(&headers, remote(), true), "198.51.100.2");
    }

    #[test]
    fn test_no_headers_uses_socket_addr() {
        let headers = HeaderMap::new();
        assert_eq!(resolve_client_ip(&headers, remote(), true), "10.0.0.9");
    }
}
