//! # exocall
//!
//! Bidirectional RPC between two endpoints joined by an opaque message
//! channel. Either side calls the other's exported functions by name, and
//! function values may be passed as arguments (or returned) and invoked later
//! from the far side.
//!
//! ```text
//! caller ──▶ Dispatcher ──codec──▶ Packet ──▶ Transport ──▶ Router ──▶ LocalApi
//!              │                                             │
//!              └──────────── Registry ◀── response / throwError / unbind
//! ```
//!
//! Each endpoint owns one pending registry. It holds two kinds of entries:
//! return-value waiters for outstanding calls, and callbacks exposed to the
//! peer. The registry is size bounded; least recently used entries are
//! evicted and later calls addressed to them report "callback unavailable".

pub mod api;
pub mod callback;
pub mod channel;
pub mod codec;
pub mod config;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod json;
pub mod packet;
pub mod registry;
pub mod router;
pub mod transport;
pub mod value;

pub use api::LocalApi;
pub use callback::Callback;
pub use callback::Context;
pub use channel::DuplexChannelTransport;
pub use config::Config;
pub use dispatch::Dispatcher;
pub use dispatch::NoWait;
pub use dispatch::RemoteFn;
pub use endpoint::Endpoint;
pub use error::Error;
pub use error::RemoteError;
pub use error::Result;
pub use packet::ApiFunc;
pub use packet::ArgsTransform;
pub use packet::CallId;
pub use packet::Mirror;
pub use packet::Packet;
pub use registry::Registry;
pub use router::Router;
pub use transport::Transport;
pub use transport::TransportError;
pub use value::Map;
pub use value::Value;

/// Creates an endpoint and starts routing everything the transport receives.
///
/// Must be called from within a tokio runtime.
pub fn pair(transport: impl Transport, local: LocalApi, config: Config) -> Endpoint {
    let endpoint = Endpoint::new(transport, local, config);
    // The pump finishes on its own when the channel closes.
    drop(endpoint.serve());
    endpoint
}
