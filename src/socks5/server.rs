//! SOCKS5 listener that funnels CONNECT requests through the HTTP front door.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use crate::error::{ProxyError, ProxyResult};
use crate::proxy::relay::splice;
use crate::socks5::bridge::HttpConnectBridge;
use crate::socks5::wire::{
    read_request_address, write_reply, ATYP_DOMAIN, ATYP_IPV4, ATYP_IPV6, AUTH_METHOD_NONE,
    AUTH_METHOD_NO_ACCEPTABLE, CMD_CONNECT, REPLY_ADDRESS_TYPE_NOT_SUPPORTED,
    REPLY_COMMAND_NOT_SUPPORTED, REPLY_GENERAL_FAILURE, REPLY_HOST_UNREACHABLE, REPLY_SUCCEEDED,
    SOCKS5_VERSION,
};

/// Minimal SOCKS5 server: anonymous auth only, CONNECT only. Every accepted
/// request is re-issued as an HTTP CONNECT against our own front door, so the
/// SOCKS side inherits the same PAC routing and fallback behavior.
pub struct Socks5Server {
    listener: TcpListener,
    bridge: Arc<HttpConnectBridge>,
    handshake_deadline: Option<Duration>,
}

impl Socks5Server {
    pub async fn bind(addr: &str, bridge: HttpConnectBridge) -> ProxyResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ProxyError::config(format!("failed to bind SOCKS5 listener {addr}: {e}")))?;
        Ok(Self {
            listener,
            bridge: Arc::new(bridge),
            handshake_deadline: None,
        })
    }

    /// Bound the whole bridge handshake (dial plus CONNECT exchange) for each
    /// client session.
    pub fn with_handshake_deadline(mut self, deadline: Duration) -> Self {
        self.handshake_deadline = Some(deadline);
        self
    }

    pub fn local_addr(&self) -> ProxyResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> ProxyResult<()> {
        info!(addr = %self.listener.local_addr()?, "SOCKS5 listener started");
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let bridge = Arc::clone(&self.bridge);
            let deadline = self.handshake_deadline;
            tokio::spawn(async move {
                if let Err(e) = handle_client(stream, bridge, deadline).await {
                    debug!(%peer, error = %e, "SOCKS5 session ended with error");
                }
            });
        }
    }
}

async fn handle_client(
    mut client: TcpStream,
    bridge: Arc<HttpConnectBridge>,
    deadline: Option<Duration>,
) -> ProxyResult<()> {
    negotiate_auth(&mut client).await?;

    let mut header = [0u8; 4];
    client.read_exact(&mut header).await?;
    if header[0] != SOCKS5_VERSION {
        return Err(ProxyError::protocol(format!(
            "unexpected SOCKS version {:#04x} in request",
            header[0]
        )));
    }
    if header[1] != CMD_CONNECT {
        write_reply(&mut client, REPLY_COMMAND_NOT_SUPPORTED).await?;
        return Err(ProxyError::protocol(format!(
            "unsupported SOCKS command {:#04x}",
            header[1]
        )));
    }

    if !matches!(header[3], ATYP_IPV4 | ATYP_IPV6 | ATYP_DOMAIN) {
        write_reply(&mut client, REPLY_ADDRESS_TYPE_NOT_SUPPORTED).await?;
        return Err(ProxyError::protocol(format!(
            "unsupported SOCKS5 address type {:#04x}",
            header[3]
        )));
    }
    let target = match read_request_address(&mut client, header[3]).await {
        Ok(target) => target,
        Err(e) => {
            write_reply(&mut client, REPLY_GENERAL_FAILURE).await?;
            return Err(e);
        }
    };

    let upstream = match bridge.dial(&target, deadline).await {
        Ok(upstream) => upstream,
        Err(e) => {
            write_reply(&mut client, REPLY_HOST_UNREACHABLE).await?;
            return Err(e);
        }
    };
    write_reply(&mut client, REPLY_SUCCEEDED).await?;

    debug!(target, "SOCKS5 tunnel established");
    splice(client, upstream).await?;
    Ok(())
}

/// Method negotiation: we only offer anonymous access.
async fn negotiate_auth(client: &mut TcpStream) -> ProxyResult<()> {
    let version = client.read_u8().await?;
    if version != SOCKS5_VERSION {
        return Err(ProxyError::protocol(format!(
            "unexpected SOCKS version {version:#04x} in greeting"
        )));
    }
    let method_count = client.read_u8().await? as usize;
    let mut methods = vec![0u8; method_count];
    client.read_exact(&mut methods).await?;

    if !methods.contains(&AUTH_METHOD_NONE) {
        client
            .write_all(&[SOCKS5_VERSION, AUTH_METHOD_NO_ACCEPTABLE])
            .await?;
        return Err(ProxyError::protocol(
            "client offered no acceptable auth method",
        ));
    }
    client.write_all(&[SOCKS5_VERSION, AUTH_METHOD_NONE]).await?;
    Ok(())
}
