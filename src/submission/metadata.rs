use std::net::IpAddr;

use axum::http::HeaderMap;
use ipnet::IpNet;

/// Client metadata forwarded to the spam check.
#[derive(Debug, Clone, Default)]
pub struct RequestMetadata {
    pub ip: String,
    pub user_agent: String,
}

pub fn extract(
    headers: &HeaderMap,
    peer_addr: Option<IpAddr>,
    trusted_proxies: &[IpNet],
) -> RequestMetadata {
    let user_agent = headers
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    RequestMetadata {
        ip: extract_ip(headers, peer_addr, trusted_proxies),
        user_agent,
    }
}

fn extract_ip(
    headers: &HeaderMap,
    peer_addr: Option<IpAddr>,
    trusted_proxies: &[IpNet],
) -> String {
    let peer = peer_addr.unwrap_or(IpAddr::from([127, 0, 0, 1]));

    // Only trust X-Forwarded-For if the direct connection is from a trusted proxy
    if !trusted_proxies.is_empty() && trusted_proxies.iter().any(|net| net.contains(&peer)) {
        if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            // Take the first (leftmost) IP that isn't a trusted proxy
            for ip_str in xff.split(',').map(|s| s.trim()) {
                if let Ok(ip) = ip_str.parse::<IpAddr>() {
                    if !trusted_proxies.iter().any(|net| net.contains(&ip)) {
                        return ip.to_string();
                    }
                }
            }
        }
    }

    peer.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarded_header_ignored_without_trusted_proxy() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7".parse().unwrap());

        let meta = extract(&headers, Some(IpAddr::from([198, 51, 100, 1])), &[]);
        assert_eq!(meta.ip, "198.51.100.1");
    }

    #[test]
    fn forwarded_header_honored_behind_trusted_proxy() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        let proxies = vec!["10.0.0.0/8".parse().unwrap()];

        let meta = extract(&headers, Some(IpAddr::from([10, 0, 0, 1])), &proxies);
        assert_eq!(meta.ip, "203.0.113.7");
    }
}
