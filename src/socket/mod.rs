//! Proxy sockets and connection setup.
//!
//! - [`stream`]: the non-blocking socket surface a negotiation drives
//! - [`proxy`]: HTTP proxy settings and tunnel authorities
//! - [`connectjob`]: DNS → TCP → CONNECT connection flow

pub mod connectjob;
pub mod proxy;
pub mod stream;
