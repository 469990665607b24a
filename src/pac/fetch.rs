use std::time::Duration;

use tracing::info;

use crate::error::{ProxyError, ProxyResult};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Download the PAC script from the operator-supplied URL.
///
/// A transport error or a non-200 status is an error: fatal at startup, and a
/// failed reload keeps the previous engine generation current.
pub async fn download_pac(pac_url: &str) -> ProxyResult<String> {
    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(|e| ProxyError::pac_fetch(e.to_string()))?;

    let response = client
        .get(pac_url)
        .send()
        .await
        .map_err(|e| ProxyError::pac_fetch(format!("failed to download PAC from {pac_url}: {e}")))?;

    if !response.status().is_success() {
        return Err(ProxyError::pac_fetch(format!(
            "unexpected status from PAC URL {pac_url}: {}",
            response.status()
        )));
    }

    let script = response
        .text()
        .await
        .map_err(|e| ProxyError::pac_fetch(format!("failed to read PAC body: {e}")))?;

    info!(url = pac_url, bytes = script.len(), "fetched PAC script");
    Ok(script)
}
