use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use super::cache::{ResolutionCache, DEFAULT_CAPACITY};
use super::directive::Decision;
use super::evaluator::EvaluatorPool;
use super::fetch;
use crate::error::{ProxyError, ProxyResult};

/// Upstream Basic-Auth credentials. Username and password are always both set.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    username: String,
    password: String,
}

impl BasicAuth {
    /// Render the `Proxy-Authorization` header value.
    pub fn header_value(&self) -> String {
        let token = BASE64.encode(format!("{}:{}", self.username, self.password));
        format!("Basic {token}")
    }
}

/// One engine generation: script, evaluator pool, cache, TTL and credentials.
/// Never mutated once built; `reload` and `set_auth` swap in a replacement.
struct EngineState {
    script: Arc<str>,
    pool: Arc<EvaluatorPool>,
    cache: Arc<ResolutionCache>,
    ttl: Duration,
    auth: Option<BasicAuth>,
}

impl EngineState {
    async fn build(script: Arc<str>, ttl: Duration, auth: Option<BasicAuth>) -> ProxyResult<Self> {
        let pool = Arc::new(EvaluatorPool::new(Arc::clone(&script)).await?);
        let cache = Arc::new(ResolutionCache::new(DEFAULT_CAPACITY, ttl));
        Ok(Self {
            script,
            pool,
            cache,
            ttl,
            auth,
        })
    }
}

/// Engine summary for the `settings` diagnostic command.
#[derive(Debug, Serialize)]
pub struct EngineSummary {
    pub pac_source: String,
    pub cache_ttl_secs: u64,
    pub auth_configured: bool,
    pub generation: u64,
    pub evaluators: usize,
}

/// Hit/miss counters plus a key-sorted dump, for the `cache` diagnostic command.
#[derive(Debug)]
pub struct CacheReport {
    pub hits: u64,
    pub misses: u64,
    pub entries: Vec<(String, String)>,
}

/// PAC resolution engine.
///
/// `resolve` never fails: script and grammar failures degrade to
/// [`Decision::Direct`] so a broken PAC script turns the proxy into a direct
/// relay instead of denying service. The current [`EngineState`] sits behind a
/// single swappable indirection; each `resolve` captures its own snapshot at
/// entry and no lock is held across evaluator execution.
pub struct PacEngine {
    state: RwLock<Arc<EngineState>>,
    source_url: Option<String>,
    generation: AtomicU64,
}

impl PacEngine {
    /// Build an engine from inline script text.
    pub async fn new(script: impl Into<Arc<str>>, ttl: Duration) -> ProxyResult<Self> {
        let state = EngineState::build(script.into(), ttl, None).await?;
        Ok(Self {
            state: RwLock::new(Arc::new(state)),
            source_url: None,
            generation: AtomicU64::new(1),
        })
    }

    /// Fetch the script from `pac_url` and build an engine that remembers the
    /// URL, so `reload` refetches it.
    pub async fn from_url(pac_url: &str, ttl: Duration) -> ProxyResult<Self> {
        let script = fetch::download_pac(pac_url).await?;
        let state = EngineState::build(Arc::from(script), ttl, None).await?;
        Ok(Self {
            state: RwLock::new(Arc::new(state)),
            source_url: Some(pac_url.to_string()),
            generation: AtomicU64::new(1),
        })
    }

    /// Resolve a routing decision for a target URL. Always returns a usable
    /// decision; malformed input and any resolution-path failure yield
    /// [`Decision::Direct`].
    pub async fn resolve(&self, raw_url: &str) -> Decision {
        let state = Arc::clone(&*self.state.read().await);

        let key = cache_key(raw_url);
        if key.is_empty() {
            // Unresolvable input never occupies a cache slot.
            return Decision::Direct;
        }

        if let Some(raw) = state.cache.get(&key) {
            return parse_or_direct(&raw, &key);
        }

        let raw = match state.pool.acquire().await {
            Ok(evaluator) => {
                let result = evaluator.find_proxy(raw_url, &key).await;
                state.pool.release(evaluator);
                match result {
                    Ok(directive) => directive,
                    Err(e) => {
                        warn!(host = %key, error = %e, "PAC evaluation failed, using DIRECT");
                        "DIRECT".to_string()
                    }
                }
            }
            Err(e) => {
                warn!(host = %key, error = %e, "no evaluator available, using DIRECT");
                "DIRECT".to_string()
            }
        };

        state.cache.put(key.clone(), raw.clone());
        debug!(host = %key, directive = %raw, "resolved");
        parse_or_direct(&raw, &key)
    }

    /// Build a brand-new generation (fresh evaluator pool, empty cache) and
    /// swap it in. When the engine was built from a URL the script is
    /// refetched; a fetch or parse failure leaves the old generation current.
    /// Resolutions in flight keep their captured snapshot and finish
    /// unaffected.
    pub async fn reload(&self) -> ProxyResult<()> {
        let current = Arc::clone(&*self.state.read().await);

        let script: Arc<str> = match &self.source_url {
            Some(url) => Arc::from(fetch::download_pac(url).await?),
            None => Arc::clone(&current.script),
        };

        let state = EngineState::build(script, current.ttl, current.auth.clone()).await?;

        *self.state.write().await = Arc::new(state);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        info!(generation, "PAC engine reloaded");
        Ok(())
    }

    /// Store Basic-Auth credentials for upstream HTTP proxies. Username and
    /// password must be set together; passing both empty clears them. The
    /// swapped-in state shares the live cache and pool, so this is not a
    /// reload.
    pub async fn set_auth(&self, username: &str, password: &str) -> ProxyResult<()> {
        let auth = match (username.is_empty(), password.is_empty()) {
            (true, true) => None,
            (false, false) => Some(BasicAuth {
                username: username.to_string(),
                password: password.to_string(),
            }),
            _ => {
                return Err(ProxyError::config(
                    "username and password must be set together",
                ))
            }
        };

        let mut state = self.state.write().await;
        *state = Arc::new(EngineState {
            script: Arc::clone(&state.script),
            pool: Arc::clone(&state.pool),
            cache: Arc::clone(&state.cache),
            ttl: state.ttl,
            auth,
        });
        Ok(())
    }

    /// Current `Proxy-Authorization` header value, if credentials are set.
    pub async fn auth_header(&self) -> Option<String> {
        self.state.read().await.auth.as_ref().map(BasicAuth::header_value)
    }

    pub async fn cache_report(&self) -> CacheReport {
        let state = self.state.read().await;
        CacheReport {
            hits: state.cache.hits(),
            misses: state.cache.misses(),
            entries: state.cache.snapshot(),
        }
    }

    pub async fn summary(&self) -> EngineSummary {
        let state = self.state.read().await;
        EngineSummary {
            pac_source: self
                .source_url
                .clone()
                .unwrap_or_else(|| "<inline>".to_string()),
            cache_ttl_secs: state.ttl.as_secs(),
            auth_configured: state.auth.is_some(),
            generation: self.generation.load(Ordering::Relaxed),
            evaluators: state.pool.spawned(),
        }
    }
}

fn parse_or_direct(raw: &str, host: &str) -> Decision {
    Decision::parse(raw).unwrap_or_else(|e| {
        debug!(host = %host, error = %e, "directive outside grammar, using DIRECT");
        Decision::Direct
    })
}

/// Normalize a raw target URL into a cache key: the host with port stripped.
/// Anything without a parseable host maps to the empty-string sentinel.
fn cache_key(raw_url: &str) -> String {
    match Url::parse(raw_url) {
        Ok(url) => url.host_str().unwrap_or("").trim().to_string(),
        Err(_) => String::new(),
    }
}
