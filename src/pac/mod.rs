//! PAC resolution engine: pooled script evaluation, a time-bounded resolution
//! cache, and the directive-to-decision parser.

pub mod cache;
pub mod directive;
pub mod engine;
pub mod evaluator;
pub mod fetch;

pub use cache::ResolutionCache;
pub use directive::{Decision, ProxyAddr};
pub use engine::{BasicAuth, CacheReport, EngineSummary, PacEngine};
pub use evaluator::{EvaluatorPool, ScriptEvaluator};
pub use fetch::download_pac;
