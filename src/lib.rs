//! # proxytunnel
//!
//! Non-blocking HTTP `CONNECT` tunnel negotiation for HTTP clients that route
//! connections through a proxy.
//!
//! A tunnel is negotiated as a small state machine: write
//! `CONNECT host:port HTTP/1.1\r\n\r\n` across however many non-blocking
//! writes it takes, then read and parse the proxy's response head. The
//! outcome arrives exactly once through a completion handle: the same socket,
//! now flagged as tunneled, or a typed [`TunnelError`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use proxytunnel::socket::connectjob::ConnectJob;
//! use proxytunnel::socket::proxy::ProxySettings;
//! use proxytunnel::tunnel::HttpTunneler;
//!
//! #[tokio::main]
//! async fn main() {
//!     let proxy = ProxySettings::new("http://proxy.internal:3128").unwrap();
//!     let target = url::Url::parse("https://example.com/").unwrap();
//!     let socket = ConnectJob::connect(&proxy, &target, &HttpTunneler::default())
//!         .await
//!         .unwrap();
//!     // run the TLS handshake for example.com over `socket`
//! }
//! ```
//!
//! ## Modules
//!
//! - [`base`] - Error types
//! - [`http`] - Proxy response parsing
//! - [`socket`] - Proxy sockets, settings and the connect job
//! - [`tunnel`] - The negotiation state machine and its Tokio driver
//!
//! The state machine itself does no waiting. [`tunnel::Negotiation`] can be
//! driven by any event loop that implements [`tunnel::Reactor`];
//! [`tunnel::HttpTunneler`] drives it on Tokio.

pub mod base;
pub mod http;
pub mod socket;
pub mod tunnel;

pub use base::neterror::{TunnelError, TunnelPhase};
pub use socket::stream::{ProxySocket, TunnelSocket};
pub use tunnel::{HttpTunneler, TunnelConfig, TunnelHandle};
