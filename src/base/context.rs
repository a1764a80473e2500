//! Ergonomic error context helpers.
//!
//! Provides extension traits for adding context to `Result` types,
//! converting IO errors into context-rich `TunnelError` variants.

use crate::base::neterror::TunnelError;
use std::io;

/// Extension trait for adding context to IO Results.
pub trait IoResultExt<T> {
    /// Attach the proxy address to a failed TCP connect.
    ///
    /// # Example
    /// ```ignore
    /// use proxytunnel::base::context::IoResultExt;
    ///
    /// let stream = TcpStream::connect(addr).await
    ///     .connect_context("proxy.internal:3128")?;
    /// // Error: "connection to proxy proxy.internal:3128 failed"
    /// ```
    fn connect_context(self, addr: &str) -> Result<T, TunnelError>;

    /// Attach the proxy host name to a failed lookup.
    fn resolve_context(self, host: &str) -> Result<T, TunnelError>;
}

impl<T> IoResultExt<T> for Result<T, io::Error> {
    fn connect_context(self, addr: &str) -> Result<T, TunnelError> {
        self.map_err(|source| TunnelError::Connect {
            addr: addr.to_string(),
            source,
        })
    }

    fn resolve_context(self, host: &str) -> Result<T, TunnelError> {
        self.map_err(|source| TunnelError::NameNotResolved {
            host: host.to_string(),
            source,
        })
    }
}
