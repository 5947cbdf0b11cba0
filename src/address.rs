//! Address string parsing.
//!
//! Accepted grammar is `host-or-ip[:port]`. The port defaults to
//! [`DEFAULT_PORT`]. IPv6 literals may be given bare (`::1`) or
//! bracketed with a port (`[::1]:9000`).

use std::net::Ipv6Addr;

use crate::error::{EpoxyError, Result};

/// Default Epoxy port.
pub const DEFAULT_PORT: u16 = 25188;

/// Parse an address string into a host and port.
///
/// # Errors
///
/// Fails with `InvalidArgument` on an empty host, an empty or
/// non-numeric port, or unbalanced brackets.
pub fn parse_address(address: &str) -> Result<(String, u16)> {
    let address = address.trim();
    if address.is_empty() {
        return Err(EpoxyError::InvalidArgument(
            "address must not be empty".to_string(),
        ));
    }

    // Bare IPv6 literal, no port.
    if address.parse::<Ipv6Addr>().is_ok() {
        return Ok((address.to_string(), DEFAULT_PORT));
    }

    // Bracketed IPv6, optionally with a port.
    if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(|| {
            EpoxyError::InvalidArgument(format!("unbalanced brackets in address: {address}"))
        })?;
        if host.parse::<Ipv6Addr>().is_err() {
            return Err(EpoxyError::InvalidArgument(format!(
                "not an IPv6 literal: {host}"
            )));
        }
        return match tail.strip_prefix(':') {
            None if tail.is_empty() => Ok((host.to_string(), DEFAULT_PORT)),
            Some(port) => Ok((host.to_string(), parse_port(address, port)?)),
            None => Err(EpoxyError::InvalidArgument(format!(
                "malformed address: {address}"
            ))),
        };
    }

    match address.split_once(':') {
        None => Ok((address.to_string(), DEFAULT_PORT)),
        Some((host, _)) if host.is_empty() => Err(EpoxyError::InvalidArgument(format!(
            "address has no host: {address}"
        ))),
        Some((host, port)) => Ok((host.to_string(), parse_port(address, port)?)),
    }
}

fn parse_port(address: &str, port: &str) -> Result<u16> {
    port.parse::<u16>().map_err(|_| {
        EpoxyError::InvalidArgument(format!("invalid port {port:?} in address: {address}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_only_gets_default_port() {
        assert_eq!(
            parse_address("localhost").unwrap(),
            ("localhost".to_string(), DEFAULT_PORT)
        );
        assert_eq!(
            parse_address("10.1.2.3").unwrap(),
            ("10.1.2.3".to_string(), DEFAULT_PORT)
        );
    }

    #[test]
    fn test_host_with_port() {
        assert_eq!(
            parse_address("127.0.0.1:8080").unwrap(),
            ("127.0.0.1".to_string(), 8080)
        );
        assert_eq!(
            parse_address("example.com:25188").unwrap(),
            ("example.com".to_string(), 25188)
        );
    }

    #[test]
    fn test_ipv6_forms() {
        assert_eq!(parse_address("::1").unwrap(), ("::1".to_string(), DEFAULT_PORT));
        assert_eq!(parse_address("[::1]").unwrap(), ("::1".to_string(), DEFAULT_PORT));
        assert_eq!(parse_address("[::1]:9000").unwrap(), ("::1".to_string(), 9000));
    }

    #[test]
    fn test_malformed_addresses_fail() {
        for bad in ["", "  ", ":25188", "host:", "host:notaport", "host:99999", "[::1", "[nope]:1"] {
            let result = parse_address(bad);
            assert!(
                matches!(result, Err(EpoxyError::InvalidArgument(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_surrounding_whitespace_is_trimmed() {
        assert_eq!(
            parse_address("  myhost:42  ").unwrap(),
            ("myhost".to_string(), 42)
        );
    }
}
