//! Base types and error handling.
//!
//! - [`TunnelError`](neterror::TunnelError): failures surfaced through a tunnel's completion handle,
//!   with Chromium-compatible net error codes
//! - [`context`]: `io::Result` extensions that attach proxy context

pub mod context;
pub mod neterror;
