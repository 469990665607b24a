//! Plain (non-CONNECT) HTTP forwarding.
//!
//! Absolute-form requests are re-routed per the PAC decision: origin-form
//! toward the destination or a SOCKS upstream, absolute-form toward an
//! upstream HTTP proxy. The rewritten head forces `Connection: close` so the
//! session ends when the exchange does.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;
use url::Url;

use crate::error::{ProxyError, ProxyResult};
use crate::pac::{Decision, PacEngine};
use crate::proxy::http::{write_error, RequestHead};
use crate::proxy::relay::splice;
use crate::proxy::tunnel::TunnelEstablisher;

/// Headers that belong to the client<->proxy hop and must not be forwarded.
const HOP_HEADERS: &[&str] = &["connection", "proxy-connection", "proxy-authorization"];

/// Forward one absolute-form HTTP request and relay the response until either
/// side closes. Failure to reach an upstream answers `502 Bad Gateway`.
pub async fn forward_request<C>(
    client: &mut C,
    head: &RequestHead,
    engine: &PacEngine,
    tunnels: &TunnelEstablisher,
) -> ProxyResult<()>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    let url = match Url::parse(&head.target) {
        Ok(url) if url.scheme() == "http" => url,
        _ => {
            write_error(client, 400, "Bad Request").await?;
            return Err(ProxyError::protocol(format!(
                "unsupported request target {:?}",
                head.target
            )));
        }
    };
    let host = url
        .host_str()
        .ok_or_else(|| ProxyError::protocol("request URL has no host"))?
        .to_string();
    let port = url.port_or_known_default().unwrap_or(80);
    let origin = format!("{host}:{port}");

    let decision = engine.resolve(&head.target).await;
    debug!(target = %origin, %decision, "forwarding plain HTTP request");

    let (mut upstream, proxied) = match dial_for(&decision, &origin, tunnels).await {
        Ok(pair) => pair,
        Err(e) => {
            write_error(client, 502, "Bad Gateway").await?;
            return Err(e);
        }
    };

    let auth = if proxied { engine.auth_header().await } else { None };
    let rewritten = rewrite_head(head, &url, &host, port, proxied, auth.as_deref());
    upstream.write_all(rewritten.as_bytes()).await?;

    splice(client, upstream).await?;
    Ok(())
}

/// Dial per decision. The boolean reports whether the peer is an upstream
/// HTTP proxy (and therefore expects absolute-form).
async fn dial_for(
    decision: &Decision,
    origin: &str,
    tunnels: &TunnelEstablisher,
) -> ProxyResult<(TcpStream, bool)> {
    match decision {
        Decision::HttpProxy(addr) => {
            let stream = tunnels.dial(&addr.to_string()).await?;
            Ok((stream, true))
        }
        // Direct and SOCKS paths both end at the origin server.
        _ => Ok((tunnels.open(decision, origin).await?, false)),
    }
}

fn rewrite_head(
    head: &RequestHead,
    url: &Url,
    host: &str,
    port: u16,
    proxied: bool,
    auth: Option<&str>,
) -> String {
    let target = if proxied {
        head.target.clone()
    } else {
        let mut origin_form = url.path().to_string();
        if let Some(query) = url.query() {
            origin_form.push('?');
            origin_form.push_str(query);
        }
        origin_form
    };

    let mut out = format!("{} {} HTTP/1.1\r\n", head.method, target);
    if head.host().is_none() {
        let host_value = if port == 80 {
            host.to_string()
        } else {
            format!("{host}:{port}")
        };
        out.push_str(&format!("Host: {host_value}\r\n"));
    }
    for (name, value) in &head.headers {
        if HOP_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
            continue;
        }
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    if proxied {
        if let Some(auth) = auth {
            out.push_str(&format!("Proxy-Authorization: {auth}\r\n"));
        }
    }
    out.push_str("Connection: close\r\n\r\n");
    out
}
