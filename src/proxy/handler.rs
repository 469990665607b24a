//! Per-connection request handling for the HTTP listener.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::adblock::AdBlocker;
use crate::error::ProxyResult;
use crate::pac::PacEngine;
use crate::proxy::diagnostics::handle_diagnostic;
use crate::proxy::forward::forward_request;
use crate::proxy::http::{read_request_head, split_host_port, write_error};
use crate::proxy::relay::splice;
use crate::proxy::tunnel::TunnelEstablisher;

/// Routes one accepted connection: CONNECT requests become PAC-routed
/// tunnels, absolute-form requests are forwarded as plain HTTP, and
/// origin-form requests are served by the diagnostic surface.
pub struct ConnectionHandler {
    engine: Arc<PacEngine>,
    tunnels: Arc<TunnelEstablisher>,
    adblock: Option<Arc<AdBlocker>>,
}

impl ConnectionHandler {
    pub fn new(
        engine: Arc<PacEngine>,
        tunnels: Arc<TunnelEstablisher>,
        adblock: Option<Arc<AdBlocker>>,
    ) -> Self {
        Self {
            engine,
            tunnels,
            adblock,
        }
    }

    pub fn engine(&self) -> &PacEngine {
        &self.engine
    }

    pub fn tunnels(&self) -> &TunnelEstablisher {
        &self.tunnels
    }

    pub async fn handle<C>(&self, mut client: C) -> ProxyResult<()>
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        let head = match read_request_head(&mut client).await {
            Ok(head) => head,
            Err(e) => {
                let _ = write_error(&mut client, 400, "Bad Request").await;
                return Err(e);
            }
        };

        if head.method.eq_ignore_ascii_case("CONNECT") {
            return self.handle_connect(client, &head.target).await;
        }
        if head.target.starts_with('/') {
            return handle_diagnostic(
                &mut client,
                &head,
                &self.engine,
                &self.tunnels,
                self.adblock.as_deref(),
            )
            .await;
        }
        if let Some(host) = url::Url::parse(&head.target)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
        {
            if self.is_blocked(&host) {
                write_error(&mut client, 403, "Forbidden").await?;
                return Ok(());
            }
        }
        forward_request(&mut client, &head, &self.engine, &self.tunnels).await
    }

    async fn handle_connect<C>(&self, mut client: C, target: &str) -> ProxyResult<()>
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        let (host, port) = split_host_port(target, 443)?;
        // IPv6 literals need their brackets back in authority position, both
        // for the resolve URL and for the upstream CONNECT line.
        let target = if host.contains(':') {
            format!("[{host}]:{port}")
        } else {
            format!("{host}:{port}")
        };

        if self.is_blocked(&host) {
            info!(%target, "blocked CONNECT to listed host");
            write_error(&mut client, 403, "Forbidden").await?;
            return Ok(());
        }

        let decision = self.engine.resolve(&format!("https://{target}")).await;
        debug!(%target, %decision, "establishing tunnel");

        // Open failure (after any fallback ran its course) drops the session.
        let upstream = match self.tunnels.open(&decision, &target).await {
            Ok(upstream) => upstream,
            Err(e) => {
                debug!(%target, error = %e, "tunnel establishment failed");
                return Err(e);
            }
        };

        client
            .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
            .await?;
        splice(client, upstream).await?;
        Ok(())
    }

    fn is_blocked(&self, host: &str) -> bool {
        self.adblock
            .as_ref()
            .map(|blocker| blocker.is_blocked(host))
            .unwrap_or(false)
    }
}
