//! In-band diagnostic surface.
//!
//! Origin-form requests hitting the proxy listener are treated as operator
//! diagnostics and dispatched on the final path segment, so the endpoints work
//! under any prefix an operator points at the proxy.

use serde_json::json;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::info;

use crate::adblock::AdBlocker;
use crate::error::ProxyResult;
use crate::pac::PacEngine;
use crate::proxy::http::{write_error, write_response, RequestHead};
use crate::proxy::tunnel::TunnelEstablisher;

const HELP_TEXT: &str = "\
pacgate diagnostic endpoints (matched on the last path segment):
  settings  current PAC source, cache TTL, auth state, fallback count
  reload    re-fetch and re-install the PAC script
  cache     resolution cache counters and contents
  adblock   block list status
  help      this text
";

/// Answer one diagnostic request and return; the caller closes the session.
pub async fn handle_diagnostic<C>(
    client: &mut C,
    head: &RequestHead,
    engine: &PacEngine,
    tunnels: &TunnelEstablisher,
    adblock: Option<&AdBlocker>,
) -> ProxyResult<()>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    match last_segment(&head.target) {
        "settings" => {
            let summary = engine.summary().await;
            let body = json!({
                "engine": summary,
                "fallback_count": tunnels.fallback_count(),
            });
            write_json(client, &body).await
        }
        "reload" => match engine.reload().await {
            Ok(()) => {
                let generation = engine.summary().await.generation;
                info!(generation, "PAC script reloaded via diagnostics");
                write_response(
                    client,
                    200,
                    "OK",
                    "text/plain",
                    &format!("PAC reloaded, generation {generation}\n"),
                )
                .await?;
                Ok(())
            }
            Err(e) => {
                write_response(
                    client,
                    500,
                    "Internal Server Error",
                    "text/plain",
                    &format!("PAC reload failed: {e}\n"),
                )
                .await?;
                Ok(())
            }
        },
        "cache" => {
            let report = engine.cache_report().await;
            let entries: serde_json::Map<String, serde_json::Value> = report
                .entries
                .into_iter()
                .map(|(k, v)| (k, serde_json::Value::String(v)))
                .collect();
            let body = json!({
                "hits": report.hits,
                "misses": report.misses,
                "entries": entries,
            });
            write_json(client, &body).await
        }
        "adblock" => {
            let body = match adblock {
                Some(blocker) => json!({
                    "enabled": true,
                    "source": blocker.source(),
                    "hosts": blocker.len(),
                }),
                None => json!({ "enabled": false }),
            };
            write_json(client, &body).await
        }
        "help" => {
            write_response(client, 200, "OK", "text/plain", HELP_TEXT).await?;
            Ok(())
        }
        _ => {
            write_error(client, 404, "Not Found").await?;
            Ok(())
        }
    }
}

async fn write_json<C>(client: &mut C, body: &serde_json::Value) -> ProxyResult<()>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    let text = format!("{body:#}\n");
    write_response(client, 200, "OK", "application/json", &text).await?;
    Ok(())
}

/// Last non-empty path segment of an origin-form target, query stripped.
fn last_segment(target: &str) -> &str {
    let path = target.split(['?', '#']).next().unwrap_or("");
    path.rsplit('/').find(|s| !s.is_empty()).unwrap_or("")
}
