//! Network address helpers.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::UdpSocket;

use beskar_common::{BeskarError, Result};

/// Split `host:port`, `[ipv6]:port` or `:port` into host and port.
pub fn split_host_port(addr: &str) -> Result<(String, String)> {
    let invalid = |reason: &str| BeskarError::Decode(format!("address {addr}: {reason}"));

    let (host, port) = if let Some(rest) = addr.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(|| invalid("missing ']'"))?;
        let port = tail.strip_prefix(':').ok_or_else(|| invalid("missing port"))?;
        (host, port)
    } else {
        let (host, port) = addr.rsplit_once(':').ok_or_else(|| invalid("missing port"))?;
        if host.contains(':') {
            return Err(invalid("too many colons"));
        }
        (host, port)
    };

    if port.contains([':', '[', ']']) {
        return Err(invalid("invalid port"));
    }

    Ok((host.to_string(), port.to_string()))
}

/// Join host and port, bracketing IPv6 hosts.
pub fn join_host_port(host: &str, port: &str) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// Source address the kernel would use to reach `target`.
///
/// Connecting a UDP socket only selects a route, no packet is sent.
pub async fn route_source_address(target: &str) -> Result<String> {
    let dest: SocketAddr = match target.parse::<IpAddr>() {
        Ok(ip) => SocketAddr::new(ip, 443),
        Err(_) => tokio::net::lookup_host((target, 443))
            .await
            .map_err(|e| BeskarError::Discovery(format!("while resolving {target}: {e}")))?
            .next()
            .ok_or_else(|| BeskarError::Discovery(format!("no address found for {target}")))?,
    };

    let bind: SocketAddr = if dest.is_ipv4() {
        (Ipv4Addr::UNSPECIFIED, 0).into()
    } else {
        (Ipv6Addr::UNSPECIFIED, 0).into()
    };

    let socket = UdpSocket::bind(bind).await?;
    socket.connect(dest).await?;
    Ok(socket.local_addr()?.ip().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_host_port() {
        let split = |a: &str| split_host_port(a).unwrap();
        assert_eq!(split("127.0.0.1:6000"), ("127.0.0.1".into(), "6000".into()));
        assert_eq!(split(":5102"), ("".into(), "5102".into()));
        assert_eq!(split("[::1]:5102"), ("::1".into(), "5102".into()));
        assert_eq!(split("beskar.svc:80"), ("beskar.svc".into(), "80".into()));

        assert!(split_host_port("127.0.0.1").is_err());
        assert!(split_host_port("::1:80").is_err());
        assert!(split_host_port("[::1]").is_err());
        assert!(split_host_port("[::1:80").is_err());
    }

    #[test]
    fn test_join_host_port() {
        assert_eq!(join_host_port("10.0.0.2", "5102"), "10.0.0.2:5102");
        assert_eq!(join_host_port("fd00::2", "5102"), "[fd00::2]:5102");
    }

    #[tokio::test]
    async fn test_route_source_address_loopback() {
        assert_eq!(route_source_address("127.0.0.1").await.unwrap(), "127.0.0.1");
    }

    #[tokio::test]
    async fn test_route_source_address_unresolvable_host() {
        let err = route_source_address("beskar.invalid").await.unwrap_err();
        assert!(matches!(err, BeskarError::Discovery(_)));
        assert!(err.to_string().contains("beskar.invalid"));
    }
}
