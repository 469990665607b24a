//! Adapter from the SOCKS5 front end onto the proxy's own HTTP CONNECT
//! entry point.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{ProxyError, ProxyResult};
use crate::proxy::http::{drain_headers, read_crlf_line, status_code};

/// Dials the proxy's own HTTP front door and negotiates a CONNECT tunnel for
/// a SOCKS5 client's destination.
///
/// No fallback happens at this layer: a rejected CONNECT fails the dial, and
/// the SOCKS5 server surfaces that failure to its own client. (The front door
/// itself already applied PAC routing and its own fallback policy.)
pub struct HttpConnectBridge {
    front_door: SocketAddr,
    dial_timeout: Duration,
}

impl HttpConnectBridge {
    pub fn new(front_door: SocketAddr, dial_timeout: Duration) -> Self {
        Self {
            front_door,
            dial_timeout,
        }
    }

    /// Open a tunnel to `target` (a `host:port` string) through the front
    /// door. A caller-supplied deadline bounds the whole handshake (dial,
    /// CONNECT write, response-header read); without one, only the initial
    /// dial is time-bounded.
    pub async fn dial(&self, target: &str, deadline: Option<Duration>) -> ProxyResult<TcpStream> {
        match deadline {
            Some(limit) => timeout(limit, self.handshake(target, false))
                .await
                .map_err(|_| ProxyError::dial(target, "bridge handshake deadline exceeded"))?,
            None => self.handshake(target, true).await,
        }
    }

    async fn handshake(&self, target: &str, bound_dial: bool) -> ProxyResult<TcpStream> {
        let front_door = self.front_door.to_string();

        let mut stream = if bound_dial {
            match timeout(self.dial_timeout, TcpStream::connect(self.front_door)).await {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => return Err(ProxyError::dial(&front_door, e.to_string())),
                Err(_) => return Err(ProxyError::dial(&front_door, "connect timed out")),
            }
        } else {
            TcpStream::connect(self.front_door)
                .await
                .map_err(|e| ProxyError::dial(&front_door, e.to_string()))?
        };

        let request = format!(
            "CONNECT {target} HTTP/1.1\r\nHost: {target}\r\nProxy-Connection: Keep-Alive\r\n\r\n"
        );
        stream.write_all(request.as_bytes()).await?;

        let status_line = read_crlf_line(&mut stream).await?;
        if status_code(&status_line) != Some(200) {
            return Err(ProxyError::proxy_rejected(
                front_door,
                status_line.trim().to_string(),
            ));
        }
        drain_headers(&mut stream).await?;

        debug!(target, "bridged SOCKS5 request through the HTTP front door");
        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt as _};
    use tokio::net::TcpListener;

    /// Front-door stand-in answering a single CONNECT.
    async fn fake_front_door(status_line: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let head = crate::proxy::http::read_request_head(&mut stream).await.unwrap();
            assert_eq!(head.method, "CONNECT");
            assert_eq!(head.header("proxy-connection"), Some("Keep-Alive"));

            let response = format!("{status_line}\r\n\r\n");
            stream.write_all(response.as_bytes()).await.unwrap();

            let mut buf = vec![0u8; 1024];
            while let Ok(n) = stream.read(&mut buf).await {
                if n == 0 || stream.write_all(&buf[..n]).await.is_err() {
                    break;
                }
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_bridge_dial_success() {
        let front = fake_front_door("HTTP/1.1 200 Connection Established").await;
        let bridge = HttpConnectBridge::new(front, Duration::from_secs(5));

        let mut stream = bridge.dial("example.com:443", None).await.unwrap();
        stream.write_all(b"ping").await.unwrap();
        let mut reply = [0u8; 4];
        stream.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"ping");
    }

    #[tokio::test]
    async fn test_bridge_non_200_is_rejection() {
        let front = fake_front_door("HTTP/1.1 502 Bad Gateway").await;
        let bridge = HttpConnectBridge::new(front, Duration::from_secs(5));

        let result = bridge.dial("example.com:443", None).await;
        assert!(matches!(result, Err(ProxyError::ProxyRejected { .. })));
    }

    #[tokio::test]
    async fn test_bridge_honors_handshake_deadline() {
        // Front door that accepts but never answers the CONNECT.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let front = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
            drop(stream);
        });

        let bridge = HttpConnectBridge::new(front, Duration::from_secs(5));
        let start = std::time::Instant::now();
        let result = bridge
            .dial("example.com:443", Some(Duration::from_millis(100)))
            .await;
        assert!(matches!(result, Err(ProxyError::Dial { .. })));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
