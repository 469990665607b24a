//! Minimal HTTP/1.1 head parsing and writing for the front door.
//!
//! The proxy only ever needs the request line and header block; everything
//! after that is relayed as opaque bytes, so a full HTTP stack buys nothing
//! here.

use std::io;
use std::net::Ipv6Addr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProxyError, ProxyResult};

const MAX_LINE_BYTES: usize = 8192;
const MAX_HEADERS: usize = 128;

/// Parsed request line plus header block.
#[derive(Debug)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Case-insensitive header lookup, first match wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn host(&self) -> Option<&str> {
        self.header("host")
    }
}

/// Read one CRLF-terminated line, without the terminator. Bounded so a
/// misbehaving peer cannot grow the buffer without limit.
pub async fn read_crlf_line<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<String> {
    let mut line = Vec::new();
    loop {
        let byte = reader.read_u8().await?;
        if byte == b'\n' {
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            return Ok(String::from_utf8_lossy(&line).into_owned());
        }
        line.push(byte);
        if line.len() > MAX_LINE_BYTES {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "header line too long",
            ));
        }
    }
}

/// Read header lines up to and including the blank-line terminator,
/// discarding them. Used after a CONNECT response status line.
pub async fn drain_headers<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<()> {
    loop {
        let line = read_crlf_line(reader).await?;
        if line.is_empty() {
            return Ok(());
        }
    }
}

/// Read and parse a request head: request line, then headers until the blank
/// line.
pub async fn read_request_head<R: AsyncRead + Unpin>(reader: &mut R) -> ProxyResult<RequestHead> {
    let request_line = read_crlf_line(reader).await?;
    let mut parts = request_line.split_whitespace();

    let (method, target, version) = match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(v)) => (m.to_string(), t.to_string(), v.to_string()),
        _ => {
            return Err(ProxyError::protocol(format!(
                "malformed request line: {request_line:?}"
            )))
        }
    };

    let mut headers = Vec::new();
    loop {
        let line = read_crlf_line(reader).await?;
        if line.is_empty() {
            break;
        }
        if headers.len() >= MAX_HEADERS {
            return Err(ProxyError::protocol("too many headers"));
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| ProxyError::protocol(format!("malformed header: {line:?}")))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok(RequestHead {
        method,
        target,
        version,
        headers,
    })
}

/// Extract the numeric status code from an HTTP status line.
pub fn status_code(line: &str) -> Option<u16> {
    line.split_whitespace().nth(1)?.parse().ok()
}

/// Write a complete plain-text response and nothing more; the connection is
/// closed by the caller.
pub async fn write_response<W: AsyncWrite + Unpin>(
    writer: &mut W,
    status: u16,
    reason: &str,
    content_type: &str,
    body: &str,
) -> io::Result<()> {
    let head = format!(
        "HTTP/1.1 {status} {reason}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    writer.write_all(head.as_bytes()).await?;
    writer.write_all(body.as_bytes()).await?;
    writer.flush().await
}

/// Plain-text error response, original `writeHTTPError` shape.
pub async fn write_error<W: AsyncWrite + Unpin>(
    writer: &mut W,
    status: u16,
    reason: &str,
) -> io::Result<()> {
    let body = format!("{status} {reason}");
    write_response(writer, status, reason, "text/plain", &body).await
}

/// Split `host:port`, tolerating bracketed IPv6 literals. A missing port maps
/// to `default_port`.
pub fn split_host_port(target: &str, default_port: u16) -> ProxyResult<(String, u16)> {
    if let Some(rest) = target.strip_prefix('[') {
        // [v6]:port or bare [v6]
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| ProxyError::protocol(format!("malformed address: {target:?}")))?;
        let port = match tail.strip_prefix(':') {
            Some(p) => p
                .parse()
                .map_err(|_| ProxyError::protocol(format!("malformed port in {target:?}")))?,
            None => default_port,
        };
        return Ok((host.to_string(), port));
    }

    match target.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            let port = port
                .parse()
                .map_err(|_| ProxyError::protocol(format!("malformed port in {target:?}")))?;
            Ok((host.to_string(), port))
        }
        // Multiple colons without brackets: an IPv6 literal. Prefer reading
        // the whole string as one address; otherwise require address:port to
        // parse cleanly rather than guess at the split.
        Some((host, port)) => {
            if target.parse::<Ipv6Addr>().is_ok() {
                return Ok((target.to_string(), default_port));
            }
            if host.parse::<Ipv6Addr>().is_ok() {
                let port = port
                    .parse()
                    .map_err(|_| ProxyError::protocol(format!("malformed port in {target:?}")))?;
                return Ok((host.to_string(), port));
            }
            Err(ProxyError::protocol(format!("ambiguous address: {target:?}")))
        }
        None => Ok((target.to_string(), default_port)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt as _;

    async fn head_of(raw: &str) -> ProxyResult<RequestHead> {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client.write_all(raw.as_bytes()).await.unwrap();
        read_request_head(&mut server).await
    }

    #[tokio::test]
    async fn test_read_connect_head() {
        let head = head_of("CONNECT example.com:443 HTTP/1.1\r\nHost: example.com:443\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(head.method, "CONNECT");
        assert_eq!(head.target, "example.com:443");
        assert_eq!(head.version, "HTTP/1.1");
        assert_eq!(head.host(), Some("example.com:443"));
    }

    #[tokio::test]
    async fn test_read_absolute_form_head() {
        let head = head_of(
            "GET http://example.com/path HTTP/1.1\r\nHost: example.com\r\nAccept: */*\r\n\r\n",
        )
        .await
        .unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.target, "http://example.com/path");
        assert_eq!(head.header("ACCEPT"), Some("*/*"));
    }

    #[tokio::test]
    async fn test_malformed_request_line() {
        assert!(head_of("BROKEN\r\n\r\n").await.is_err());
    }

    #[tokio::test]
    async fn test_drain_headers_stops_at_blank_line() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        client
            .write_all(b"X-One: 1\r\nX-Two: 2\r\n\r\npayload")
            .await
            .unwrap();
        drain_headers(&mut server).await.unwrap();

        let mut rest = [0u8; 7];
        server.read_exact(&mut rest).await.unwrap();
        assert_eq!(&rest, b"payload");
    }

    #[test]
    fn test_status_code() {
        assert_eq!(status_code("HTTP/1.1 200 Connection Established"), Some(200));
        assert_eq!(
            status_code("HTTP/1.1 407 Proxy Authentication Required"),
            Some(407)
        );
        assert_eq!(status_code("garbage"), None);
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(
            split_host_port("example.com:443", 80).unwrap(),
            ("example.com".to_string(), 443)
        );
        assert_eq!(
            split_host_port("example.com", 80).unwrap(),
            ("example.com".to_string(), 80)
        );
        assert_eq!(
            split_host_port("[::1]:8443", 80).unwrap(),
            ("::1".to_string(), 8443)
        );
        assert_eq!(
            split_host_port("[2001:db8::2]", 443).unwrap(),
            ("2001:db8::2".to_string(), 443)
        );
        assert!(split_host_port("example.com:notaport", 80).is_err());
    }

    #[test]
    fn test_split_host_port_unbracketed_ipv6() {
        // A string that is itself a complete IPv6 address is a portless host,
        // even though its tail looks like a port.
        assert_eq!(
            split_host_port("::1", 443).unwrap(),
            ("::1".to_string(), 443)
        );
        assert_eq!(
            split_host_port("::1:8443", 443).unwrap(),
            ("::1:8443".to_string(), 443)
        );
        // Full-length address plus port: only one valid split exists.
        assert_eq!(
            split_host_port("1:2:3:4:5:6:7:8:443", 80).unwrap(),
            ("1:2:3:4:5:6:7:8".to_string(), 443)
        );
        // Multi-colon strings with no IPv6 reading are rejected, not guessed.
        assert!(split_host_port("host:1:2", 80).is_err());
    }

    use tokio::io::AsyncReadExt as _;

    #[tokio::test]
    async fn test_write_error_shape() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        write_error(&mut client, 502, "Bad Gateway").await.unwrap();
        drop(client);

        let mut out = String::new();
        server.read_to_string(&mut out).await.unwrap();
        assert!(out.starts_with("HTTP/1.1 502 Bad Gateway\r\n"));
        assert!(out.contains("Content-Length: 15"));
        assert!(out.ends_with("502 Bad Gateway"));
    }
}
