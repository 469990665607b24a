//! pacgate: a PAC-routed forward proxy.
//!
//! Outbound connections (HTTPS CONNECT tunnels, plain HTTP requests, and
//! SOCKS5 sessions) are routed per decisions computed by evaluating a
//! Proxy-Auto-Configuration script against the destination. Decisions are
//! cached with a bounded TTL, and a proxied path that fails to come up falls
//! back to a direct connection once per session.

pub mod adblock;
pub mod config;
pub mod error;
pub mod pac;
pub mod proxy;
pub mod socks5;

pub use adblock::AdBlocker;
pub use config::Config;
pub use error::{ProxyError, ProxyResult};
pub use pac::{Decision, PacEngine, ProxyAddr};
pub use proxy::{ConnectionHandler, ProxyServer, TunnelEstablisher};
pub use socks5::{HttpConnectBridge, Socks5Server};
