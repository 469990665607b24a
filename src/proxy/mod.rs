//! HTTP front end: listener, per-connection routing, CONNECT tunnels, plain
//! HTTP forwarding, byte relay, and the in-band diagnostic endpoints.

pub mod diagnostics;
pub mod forward;
pub mod handler;
pub mod http;
pub mod relay;
pub mod server;
pub mod tunnel;

pub use handler::ConnectionHandler;
pub use server::ProxyServer;
pub use tunnel::TunnelEstablisher;
