//! Address and port decoding shared by the descriptor parser and the
//! SQLite loader.

use std::net::{IpAddr, ToSocketAddrs};

use crate::error::{Error, Result};

/// Split `host:port` the way descriptors write it. IPv6 hosts must be
/// bracketed (`[2001:db8::1]:443`).
pub fn split_host_port(hostport: &str) -> Result<(&str, &str)> {
    if let Some(rest) = hostport.strip_prefix('[') {
        let (host, after) = rest
            .split_once(']')
            .ok_or_else(|| Error::InvalidAddress(format!("{}: missing ']' in address", hostport)))?;
        let port = after
            .strip_prefix(':')
            .ok_or_else(|| Error::InvalidAddress(format!("{}: missing port in address", hostport)))?;
        return Ok((host, port));
    }

    let (host, port) = hostport
        .rsplit_once(':')
        .ok_or_else(|| Error::InvalidAddress(format!("{}: missing port in address", hostport)))?;
    if host.contains(':') {
        return Err(Error::InvalidAddress(format!(
            "{}: too many colons in address",
            hostport
        )));
    }
    Ok((host, port))
}

/// Turn a host into an IP address. IP literals are used as is; anything else
/// goes through the system resolver and the first result wins.
pub fn resolve_host(host: &str) -> Result<IpAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }
    if host.is_empty() {
        return Err(Error::InvalidAddress("empty host".to_string()));
    }

    let mut addrs = (host, 0u16)
        .to_socket_addrs()
        .map_err(|e| Error::InvalidAddress(format!("{}: {}", host, e)))?;
    addrs
        .next()
        .map(|a| a.ip())
        .ok_or_else(|| Error::InvalidAddress(format!("{}: no addresses found", host)))
}

/// Decimal port in 0-65535.
pub fn parse_port(port: &str) -> Result<u16> {
    port.trim()
        .parse::<u16>()
        .map_err(|e| Error::InvalidPort(format!("{:?}: {}", port, e)))
}
