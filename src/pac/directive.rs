use std::fmt;

use crate::error::{ProxyError, ProxyResult};

/// Address of an upstream proxy, as named by a PAC directive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyAddr {
    pub host: String,
    pub port: u16,
}

impl ProxyAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ProxyAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Structured routing outcome derived from a raw PAC directive.
///
/// This is a closed set: anything the directive grammar does not cover is a
/// parse error, which resolution treats the same as an evaluation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Connect to the target directly
    Direct,
    /// Tunnel through an upstream HTTP proxy via CONNECT
    HttpProxy(ProxyAddr),
    /// Tunnel through an upstream SOCKS5 proxy
    Socks5Proxy(ProxyAddr),
}

impl Decision {
    /// Parse a raw directive string as emitted by `FindProxyForURL`.
    ///
    /// The grammar is whitespace-delimited tokens with a case-insensitive
    /// keyword first: `DIRECT`, `PROXY host:port`, `SOCKS host:port` or
    /// `SOCKS5 host:port`. When the script returns multiple `;`-separated
    /// candidates, only the first one is considered.
    pub fn parse(raw: &str) -> ProxyResult<Self> {
        let candidate = raw.split(';').next().unwrap_or("");
        let mut fields = candidate.split_whitespace();

        let keyword = fields
            .next()
            .ok_or_else(|| ProxyError::unsupported_directive(raw.trim()))?;

        match keyword.to_ascii_uppercase().as_str() {
            "DIRECT" => Ok(Decision::Direct),
            "PROXY" => Ok(Decision::HttpProxy(parse_addr(raw, fields.next())?)),
            "SOCKS" | "SOCKS5" => Ok(Decision::Socks5Proxy(parse_addr(raw, fields.next())?)),
            _ => Err(ProxyError::unsupported_directive(raw.trim())),
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Direct => write!(f, "DIRECT"),
            Decision::HttpProxy(addr) => write!(f, "PROXY {}", addr),
            Decision::Socks5Proxy(addr) => write!(f, "SOCKS5 {}", addr),
        }
    }
}

fn parse_addr(raw: &str, token: Option<&str>) -> ProxyResult<ProxyAddr> {
    let token = token.ok_or_else(|| ProxyError::unsupported_directive(raw.trim()))?;

    let (host, port) = token
        .rsplit_once(':')
        .ok_or_else(|| ProxyError::unsupported_directive(raw.trim()))?;

    let port: u16 = port
        .parse()
        .map_err(|_| ProxyError::unsupported_directive(raw.trim()))?;

    if host.is_empty() {
        return Err(ProxyError::unsupported_directive(raw.trim()));
    }

    Ok(ProxyAddr::new(host, port))
}
