//! Listener-facing gateway.
//!
//! Hosts the `ws/broadcast` fan-out, the `ws/ptt` control socket and the
//! HTTP surfaces listeners use: media-server join tokens, submissions, the
//! interaction queue and proxies to the Director.

pub mod connection;
pub mod hub;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod peers;
pub mod ptt;
pub mod server;
pub mod state;

pub use hub::Hub;
pub use server::{router, start_gateway};
pub use state::GatewayState;
