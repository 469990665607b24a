//! HTTP listener: accept loop feeding [`ConnectionHandler`].

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{debug, info};

use crate::error::{ProxyError, ProxyResult};
use crate::proxy::handler::ConnectionHandler;

pub struct ProxyServer {
    listener: TcpListener,
    handler: Arc<ConnectionHandler>,
}

impl ProxyServer {
    pub async fn bind(addr: &str, handler: ConnectionHandler) -> ProxyResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ProxyError::config(format!("failed to bind HTTP listener {addr}: {e}")))?;
        Ok(Self {
            listener,
            handler: Arc::new(handler),
        })
    }

    pub fn local_addr(&self) -> ProxyResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub async fn run(self) -> ProxyResult<()> {
        info!(addr = %self.listener.local_addr()?, "HTTP listener started");
        loop {
            let (stream, peer) = self.listener.accept().await?;
            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                if let Err(e) = handler.handle(stream).await {
                    debug!(%peer, error = %e, "session ended with error");
                }
            });
        }
    }
}
