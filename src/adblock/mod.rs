//! Optional host-based ad blocking.
//!
//! Loads a hosts-file style block list (StevenBlack format by default) and
//! answers membership queries for destination hosts. Loading is best-effort:
//! the proxy runs without a blocker when the download fails.

use std::collections::HashSet;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::{ProxyError, ProxyResult};

/// Consolidated hosts list used when no explicit source is configured.
pub const DEFAULT_HOSTS_URL: &str =
    "https://raw.githubusercontent.com/StevenBlack/hosts/master/hosts";

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Hosts-file entries that are list plumbing, not blocked domains.
const IGNORED_HOSTS: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "local",
    "broadcasthost",
    "0.0.0.0",
    "ip6-localhost",
    "ip6-loopback",
];

pub struct AdBlocker {
    hosts: HashSet<String>,
    source: String,
}

impl AdBlocker {
    /// Download and parse a hosts-format block list.
    pub async fn from_url(url: &str) -> ProxyResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()
            .map_err(|e| ProxyError::config(format!("failed to build HTTP client: {e}")))?;
        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| ProxyError::config(format!("failed to fetch block list {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(ProxyError::config(format!(
                "block list {url} returned status {}",
                response.status()
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| ProxyError::config(format!("failed to read block list body: {e}")))?;
        Ok(Self::from_hosts_file(&body, url))
    }

    /// Like [`from_url`](Self::from_url) but never fatal: a failed load is
    /// logged and the proxy runs unfiltered.
    pub async fn try_from_url(url: &str) -> Option<Self> {
        match Self::from_url(url).await {
            Ok(blocker) => {
                info!(source = url, hosts = blocker.len(), "block list loaded");
                Some(blocker)
            }
            Err(e) => {
                warn!(source = url, error = %e, "block list unavailable, continuing without it");
                None
            }
        }
    }

    pub fn from_hosts_file(text: &str, source: impl Into<String>) -> Self {
        Self {
            hosts: parse_host_list(text),
            source: source.into(),
        }
    }

    /// Membership check. The caller passes a bare hostname (no port).
    pub fn is_blocked(&self, host: &str) -> bool {
        self.hosts.contains(&host.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Parse hosts-file syntax: `0.0.0.0 domain` per line, `#` comments, blank
/// lines and loopback plumbing ignored.
fn parse_host_list(text: &str) -> HashSet<String> {
    let mut hosts = HashSet::new();
    for line in text.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(first), Some(second)) = (fields.next(), fields.next()) else {
            continue;
        };
        if first != "0.0.0.0" && first != "127.0.0.1" {
            continue;
        }
        let host = second.to_ascii_lowercase();
        if IGNORED_HOSTS.contains(&host.as_str()) {
            continue;
        }
        hosts.insert(host);
    }
    hosts
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# Title: sample hosts list
127.0.0.1 localhost
::1 ip6-localhost
0.0.0.0 0.0.0.0

# Ad servers
0.0.0.0 ads.example.com
0.0.0.0 Tracker.Example.NET # inline comment
127.0.0.1 metrics.example.org
";

    #[test]
    fn test_parse_skips_comments_and_plumbing() {
        let blocker = AdBlocker::from_hosts_file(SAMPLE, "test");
        assert_eq!(blocker.len(), 3);
        assert!(blocker.is_blocked("ads.example.com"));
        assert!(blocker.is_blocked("metrics.example.org"));
        assert!(!blocker.is_blocked("localhost"));
        assert!(!blocker.is_blocked("example.com"));
    }

    #[test]
    fn test_membership_is_case_insensitive() {
        let blocker = AdBlocker::from_hosts_file(SAMPLE, "test");
        assert!(blocker.is_blocked("tracker.example.net"));
        assert!(blocker.is_blocked("TRACKER.example.NET"));
    }

    #[tokio::test]
    async fn test_try_from_url_is_not_fatal() {
        // Nothing listens on this port.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let blocker = AdBlocker::try_from_url(&format!("http://{addr}/hosts")).await;
        assert!(blocker.is_none());
    }
}
