//! Opening the upstream path implied by a routing decision.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::http::{drain_headers, read_crlf_line, split_host_port, status_code};
use crate::error::{ProxyError, ProxyResult};
use crate::pac::{Decision, ProxyAddr};
use crate::socks5::wire;

/// Opens upstream connections according to a [`Decision`], with a single
/// degrade-to-direct fallback when the chosen proxy refuses to cooperate.
///
/// The fallback keeps the session alive when the PAC script names a dead or
/// misconfigured proxy, at the cost of silently bypassing the intended
/// routing; every downgrade is logged and counted so the condition stays
/// observable.
pub struct TunnelEstablisher {
    dial_timeout: Duration,
    fallbacks: AtomicU64,
}

impl TunnelEstablisher {
    pub fn new(dial_timeout: Duration) -> Self {
        Self {
            dial_timeout,
            fallbacks: AtomicU64::new(0),
        }
    }

    /// Number of sessions that were downgraded to a direct dial.
    pub fn fallback_count(&self) -> u64 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    /// Open the upstream connection for `target` (a `host:port` string) along
    /// the path the decision names.
    pub async fn open(&self, decision: &Decision, target: &str) -> ProxyResult<TcpStream> {
        match decision {
            Decision::Direct => self.dial(target).await,
            Decision::HttpProxy(proxy) => match self.open_via_http(proxy, target).await {
                Ok(stream) => Ok(stream),
                Err(cause) => self.fall_back_direct(proxy, target, cause).await,
            },
            Decision::Socks5Proxy(proxy) => match self.open_via_socks5(proxy, target).await {
                Ok(stream) => Ok(stream),
                Err(cause) => self.fall_back_direct(proxy, target, cause).await,
            },
        }
    }

    /// Dial an address directly under the configured timeout.
    pub(crate) async fn dial(&self, addr: &str) -> ProxyResult<TcpStream> {
        match timeout(self.dial_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(ProxyError::dial(addr, e.to_string())),
            Err(_) => Err(ProxyError::dial(addr, "connect timed out")),
        }
    }

    /// CONNECT through an upstream HTTP proxy. On a 2xx status the remaining
    /// response headers are drained up to the blank line and the stream is a
    /// transparent byte tunnel.
    async fn open_via_http(&self, proxy: &ProxyAddr, target: &str) -> ProxyResult<TcpStream> {
        let mut stream = self.dial(&proxy.to_string()).await?;

        let request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n\r\n");
        stream.write_all(request.as_bytes()).await?;

        let status_line = read_crlf_line(&mut stream).await?;
        match status_code(&status_line) {
            Some(code) if (200..300).contains(&code) => {
                drain_headers(&mut stream).await?;
                debug!(proxy = %proxy, target, "CONNECT tunnel established");
                Ok(stream)
            }
            _ => Err(ProxyError::proxy_rejected(
                proxy.to_string(),
                status_line.trim().to_string(),
            )),
        }
    }

    /// CONNECT through an upstream SOCKS5 proxy.
    async fn open_via_socks5(&self, proxy: &ProxyAddr, target: &str) -> ProxyResult<TcpStream> {
        let (host, port) = split_host_port(target, 443)?;
        let mut stream = self.dial(&proxy.to_string()).await?;

        wire::client_handshake(&mut stream, &proxy.to_string(), &host, port).await?;
        debug!(proxy = %proxy, target, "SOCKS5 tunnel established");
        Ok(stream)
    }

    /// One-shot recovery: the proxied path failed, so dial the target
    /// directly instead. If this works the PAC script most likely names a
    /// proxy that is down or misconfigured.
    async fn fall_back_direct(
        &self,
        proxy: &ProxyAddr,
        target: &str,
        cause: ProxyError,
    ) -> ProxyResult<TcpStream> {
        warn!(
            proxy = %proxy,
            target,
            error = %cause,
            "upstream proxy unusable, retrying with a direct connection"
        );
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
        self.dial(target).await
    }
}
