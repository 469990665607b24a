//! SOCKS5 front end.
//!
//! The listener speaks plain RFC 1928 toward clients but owns no routing
//! logic of its own: every CONNECT is re-issued as an HTTP CONNECT against
//! this proxy's HTTP listener, which applies PAC resolution, authentication,
//! and fallback exactly as it would for a native HTTP client.

pub mod bridge;
pub mod server;
pub mod wire;

pub use bridge::HttpConnectBridge;
pub use server::Socks5Server;
