//! HTTP `CONNECT` tunnel negotiation.
//!
//! - [`negotiation`]: the non-blocking write/read state machine
//! - [`reactor`]: watcher registration contract and the Tokio-side reactor
//! - [`completion`]: single-assignment outcome and the caller's handle
//! - [`tunneler`]: [`HttpTunneler`], which drives negotiations on Tokio

pub mod completion;
pub mod config;
pub mod negotiation;
pub mod reactor;
pub mod tunneler;

#[cfg(test)]
pub(crate) mod testing;

pub use completion::{Completion, TunnelHandle};
pub use config::{TunnelConfig, DEFAULT_TIMEOUT, READ_CHUNK_SIZE};
pub use negotiation::{connect_request, Negotiation, TunnelState};
pub use reactor::{Interest, Reactor, TokioReactor, WatcherId};
pub use tunneler::HttpTunneler;
