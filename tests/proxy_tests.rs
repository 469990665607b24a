//! Full-stack tests: HTTP and SOCKS5 front ends wired the way `main` wires
//! them, exercised over real sockets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use pacgate::pac::PacEngine;
use pacgate::proxy::{ConnectionHandler, ProxyServer, TunnelEstablisher};
use pacgate::socks5::{HttpConnectBridge, Socks5Server};
use pacgate::AdBlocker;

async fn echo_listener() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                while let Ok(n) = stream.read(&mut buf).await {
                    if n == 0 || stream.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    addr
}

struct Stack {
    http_addr: SocketAddr,
    engine: Arc<PacEngine>,
    tunnels: Arc<TunnelEstablisher>,
}

async fn spawn_stack(pac: &str, adblock: Option<AdBlocker>) -> Stack {
    let engine = Arc::new(PacEngine::new(pac, Duration::from_secs(60)).await.unwrap());
    let tunnels = Arc::new(TunnelEstablisher::new(Duration::from_secs(5)));
    let handler = ConnectionHandler::new(
        Arc::clone(&engine),
        Arc::clone(&tunnels),
        adblock.map(Arc::new),
    );
    let server = ProxyServer::bind("127.0.0.1:0", handler).await.unwrap();
    let http_addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    Stack {
        http_addr,
        engine,
        tunnels,
    }
}

async fn connect_through(proxy: SocketAddr, target: &str) -> TcpStream {
    let mut stream = TcpStream::connect(proxy).await.unwrap();
    let request = format!("CONNECT {target} HTTP/1.1\r\nHost: {target}\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut buf = [0u8; 39];
    stream.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf[..], b"HTTP/1.1 200 Connection Established\r\n\r\n");
    stream
}

const DIRECT_PAC: &str = r#"function FindProxyForURL(url, host) { return "DIRECT"; }"#;

#[tokio::test]
async fn test_connect_tunnel_end_to_end() {
    let origin = echo_listener().await;
    let stack = spawn_stack(DIRECT_PAC, None).await;

    let mut tunnel = connect_through(stack.http_addr, &origin.to_string()).await;
    tunnel.write_all(b"through the tunnel").await.unwrap();
    let mut echoed = [0u8; 18];
    tunnel.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"through the tunnel");
}

#[tokio::test]
async fn test_dead_upstream_falls_back_to_direct() {
    let origin = echo_listener().await;

    // PAC steers everything at a proxy that is not listening.
    let throwaway = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = throwaway.local_addr().unwrap();
    drop(throwaway);
    let pac = format!(
        r#"function FindProxyForURL(url, host) {{ return "PROXY {dead}"; }}"#
    );

    let stack = spawn_stack(&pac, None).await;
    let mut tunnel = connect_through(stack.http_addr, &origin.to_string()).await;

    // The tunnel works because the establisher degraded to a direct dial.
    tunnel.write_all(b"fallback").await.unwrap();
    let mut echoed = [0u8; 8];
    tunnel.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"fallback");
    assert_eq!(stack.tunnels.fallback_count(), 1);
}

#[tokio::test]
async fn test_rejecting_upstream_falls_back_to_direct() {
    let origin = echo_listener().await;

    // Upstream proxy that refuses every CONNECT.
    let refusing = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let refusing_addr = refusing.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = refusing.accept().await.unwrap();
            tokio::spawn(async move {
                let mut buf = [0u8; 2048];
                let _ = stream.read(&mut buf).await;
                let _ = stream
                    .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                    .await;
            });
        }
    });

    let pac = format!(
        r#"function FindProxyForURL(url, host) {{ return "PROXY {refusing_addr}"; }}"#
    );
    let stack = spawn_stack(&pac, None).await;

    let mut tunnel = connect_through(stack.http_addr, &origin.to_string()).await;
    tunnel.write_all(b"still works").await.unwrap();
    let mut echoed = [0u8; 11];
    tunnel.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"still works");
    assert_eq!(stack.tunnels.fallback_count(), 1);
}

#[tokio::test]
async fn test_connect_via_live_upstream_proxy() {
    let origin = echo_listener().await;

    // Genuine CONNECT-speaking upstream.
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let (mut stream, _) = upstream.accept().await.unwrap();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 2048];
                let n = stream.read(&mut buf).await.unwrap();
                let head = String::from_utf8_lossy(&buf[..n]).to_string();
                let target = head.split_whitespace().nth(1).unwrap().to_string();
                let mut server = TcpStream::connect(&target).await.unwrap();
                stream
                    .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
                    .await
                    .unwrap();
                let _ = tokio::io::copy_bidirectional(&mut stream, &mut server).await;
            });
        }
    });

    let pac = format!(
        r#"function FindProxyForURL(url, host) {{ return "PROXY {upstream_addr}"; }}"#
    );
    let stack = spawn_stack(&pac, None).await;

    let mut tunnel = connect_through(stack.http_addr, &origin.to_string()).await;
    tunnel.write_all(b"proxied").await.unwrap();
    let mut echoed = [0u8; 7];
    tunnel.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"proxied");
    assert_eq!(stack.tunnels.fallback_count(), 0);
}

#[tokio::test]
async fn test_diagnostics_over_tcp() {
    let stack = spawn_stack(DIRECT_PAC, None).await;

    let mut client = TcpStream::connect(stack.http_addr).await.unwrap();
    client
        .write_all(b"GET /settings HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    client.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200 OK"));
    assert!(response.contains("\"fallback_count\": 0"));
    assert!(response.contains("\"cache_ttl_secs\": 60"));

    // Cache dump reflects resolutions made through the engine.
    stack.engine.resolve("https://example.com/").await;
    let mut client = TcpStream::connect(stack.http_addr).await.unwrap();
    client
        .write_all(b"GET /cache HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    client.read_to_string(&mut response).await.unwrap();
    assert!(response.contains("\"example.com\": \"DIRECT\""));
}

#[tokio::test]
async fn test_blocked_host_rejected_before_resolution() {
    let blocker = AdBlocker::from_hosts_file("0.0.0.0 ads.example.com\n", "inline");
    let stack = spawn_stack(DIRECT_PAC, Some(blocker)).await;

    let mut client = TcpStream::connect(stack.http_addr).await.unwrap();
    client
        .write_all(b"CONNECT ads.example.com:443 HTTP/1.1\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    client.read_to_string(&mut response).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 403 Forbidden"));

    // The blocked host never reached the resolution cache.
    assert!(stack.engine.cache_report().await.entries.is_empty());
}

#[tokio::test]
async fn test_socks5_front_end_end_to_end() {
    let origin = echo_listener().await;
    let stack = spawn_stack(DIRECT_PAC, None).await;

    let bridge = HttpConnectBridge::new(stack.http_addr, Duration::from_secs(5));
    let socks = Socks5Server::bind("127.0.0.1:0", bridge)
        .await
        .unwrap()
        .with_handshake_deadline(Duration::from_secs(10));
    let socks_addr = socks.local_addr().unwrap();
    tokio::spawn(socks.run());

    let mut client = TcpStream::connect(socks_addr).await.unwrap();
    client.write_all(&[0x05, 0x01, 0x00]).await.unwrap();
    let mut choice = [0u8; 2];
    client.read_exact(&mut choice).await.unwrap();
    assert_eq!(choice, [0x05, 0x00]);

    // CONNECT to the echo origin by IPv4 literal.
    let octets = match origin.ip() {
        std::net::IpAddr::V4(ip) => ip.octets(),
        _ => unreachable!(),
    };
    let mut request = vec![0x05, 0x01, 0x00, 0x01];
    request.extend_from_slice(&octets);
    request.extend_from_slice(&origin.port().to_be_bytes());
    client.write_all(&request).await.unwrap();

    let mut reply = [0u8; 10];
    client.read_exact(&mut reply).await.unwrap();
    assert_eq!(reply[1], 0x00);

    client.write_all(b"socks round trip").await.unwrap();
    let mut echoed = [0u8; 16];
    client.read_exact(&mut echoed).await.unwrap();
    assert_eq!(&echoed, b"socks round trip");
}
