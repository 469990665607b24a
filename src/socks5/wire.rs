//! SOCKS5 protocol constants and wire helpers (RFC 1928).
//!
//! Shared between the client side (tunneling toward an upstream SOCKS5 proxy
//! named by a PAC directive) and the server side (the SOCKS5 front end).

use std::net::IpAddr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::error::{ProxyError, ProxyResult};

/// SOCKS5 protocol version
pub const SOCKS5_VERSION: u8 = 0x05;

/// No authentication required
pub const AUTH_METHOD_NONE: u8 = 0x00;
/// No acceptable methods; server rejects all offered methods
pub const AUTH_METHOD_NO_ACCEPTABLE: u8 = 0xFF;

/// CONNECT command
pub const CMD_CONNECT: u8 = 0x01;

/// IPv4 address (4 bytes)
pub const ATYP_IPV4: u8 = 0x01;
/// Domain name (1 length byte + N bytes)
pub const ATYP_DOMAIN: u8 = 0x03;
/// IPv6 address (16 bytes)
pub const ATYP_IPV6: u8 = 0x04;

/// Succeeded
pub const REPLY_SUCCEEDED: u8 = 0x00;
/// General SOCKS server failure
pub const REPLY_GENERAL_FAILURE: u8 = 0x01;
/// Host unreachable
pub const REPLY_HOST_UNREACHABLE: u8 = 0x04;
/// Command not supported
pub const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
/// Address type not supported
pub const REPLY_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Human-readable text for a reply code.
pub fn reply_message(code: u8) -> &'static str {
    match code {
        0x00 => "succeeded",
        0x01 => "general SOCKS server failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown reply code",
    }
}

/// Build a CONNECT request for a `host:port` destination, using the binary
/// address form for IP literals and the domain form otherwise.
pub fn build_connect_request(host: &str, port: u16) -> ProxyResult<Vec<u8>> {
    let mut request = Vec::with_capacity(22);
    request.push(SOCKS5_VERSION);
    request.push(CMD_CONNECT);
    request.push(0x00); // reserved

    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            request.push(ATYP_IPV4);
            request.extend_from_slice(&v4.octets());
        }
        Ok(IpAddr::V6(v6)) => {
            request.push(ATYP_IPV6);
            request.extend_from_slice(&v6.octets());
        }
        Err(_) => {
            if host.len() > 255 {
                return Err(ProxyError::protocol(format!(
                    "domain name too long for SOCKS5: {host}"
                )));
            }
            request.push(ATYP_DOMAIN);
            request.push(host.len() as u8);
            request.extend_from_slice(host.as_bytes());
        }
    }

    request.extend_from_slice(&port.to_be_bytes());
    Ok(request)
}

/// Run the client half of the SOCKS5 handshake on a freshly dialed stream:
/// no-auth greeting, CONNECT request, reply validation. The bound address in
/// the reply is consumed and discarded. On success the stream is a
/// transparent byte tunnel to the destination.
pub async fn client_handshake(
    stream: &mut TcpStream,
    proxy: &str,
    host: &str,
    port: u16,
) -> ProxyResult<()> {
    stream
        .write_all(&[SOCKS5_VERSION, 1, AUTH_METHOD_NONE])
        .await?;

    let mut method = [0u8; 2];
    stream.read_exact(&mut method).await?;
    if method[0] != SOCKS5_VERSION {
        return Err(ProxyError::proxy_rejected(
            proxy,
            format!("unexpected SOCKS version {}", method[0]),
        ));
    }
    if method[1] != AUTH_METHOD_NONE {
        return Err(ProxyError::proxy_rejected(
            proxy,
            "no acceptable authentication method",
        ));
    }

    let request = build_connect_request(host, port)?;
    stream.write_all(&request).await?;

    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    if header[0] != SOCKS5_VERSION {
        return Err(ProxyError::proxy_rejected(
            proxy,
            format!("unexpected SOCKS version {}", header[0]),
        ));
    }
    if header[1] != REPLY_SUCCEEDED {
        return Err(ProxyError::proxy_rejected(proxy, reply_message(header[1])));
    }

    skip_bound_address(stream, header[3]).await?;
    Ok(())
}

/// Consume the BND.ADDR/BND.PORT tail of a SOCKS5 reply.
async fn skip_bound_address<R: AsyncRead + Unpin>(reader: &mut R, atyp: u8) -> ProxyResult<()> {
    let addr_len = match atyp {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => usize::from(reader.read_u8().await?),
        other => {
            return Err(ProxyError::protocol(format!(
                "unknown SOCKS5 address type {other}"
            )))
        }
    };

    let mut scratch = vec![0u8; addr_len + 2]; // address + port
    reader.read_exact(&mut scratch).await?;
    Ok(())
}

/// Read the destination of a client's CONNECT request (server side), already
/// past the fixed VER/CMD/RSV/ATYP header. Returns `host:port` text.
pub async fn read_request_address<R: AsyncRead + Unpin>(
    reader: &mut R,
    atyp: u8,
) -> ProxyResult<String> {
    let host = match atyp {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            reader.read_exact(&mut octets).await?;
            std::net::Ipv4Addr::from(octets).to_string()
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            reader.read_exact(&mut octets).await?;
            format!("[{}]", std::net::Ipv6Addr::from(octets))
        }
        ATYP_DOMAIN => {
            let len = usize::from(reader.read_u8().await?);
            let mut name = vec![0u8; len];
            reader.read_exact(&mut name).await?;
            String::from_utf8(name)
                .map_err(|_| ProxyError::protocol("domain name is not valid UTF-8"))?
        }
        other => {
            return Err(ProxyError::protocol(format!(
                "unsupported SOCKS5 address type {other}"
            )))
        }
    };

    let port = {
        let mut bytes = [0u8; 2];
        reader.read_exact(&mut bytes).await?;
        u16::from_be_bytes(bytes)
    };

    Ok(format!("{host}:{port}"))
}

/// Write a server reply with the given code and a zeroed IPv4 bound address.
pub async fn write_reply<W: AsyncWrite + Unpin>(writer: &mut W, code: u8) -> std::io::Result<()> {
    writer
        .write_all(&[
            SOCKS5_VERSION,
            code,
            0x00,
            ATYP_IPV4,
            0,
            0,
            0,
            0,
            0,
            0,
        ])
        .await
}
