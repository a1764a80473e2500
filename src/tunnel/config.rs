use crate::http::DEFAULT_MAX_HEADER_BYTES;
use std::time::Duration;

/// Bytes requested per read while awaiting the proxy response.
pub const READ_CHUNK_SIZE: usize = 32768;

/// Default bound on a whole negotiation.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Tunnel negotiation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    /// Upper bound on the time from `tunnel()` to resolution. `None` lets a
    /// stalled proxy hold the negotiation open indefinitely.
    pub timeout: Option<Duration>,
    pub read_chunk_size: usize,
    /// Cap on the proxy's response head.
    pub max_header_bytes: usize,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_TIMEOUT),
            read_chunk_size: READ_CHUNK_SIZE,
            max_header_bytes: DEFAULT_MAX_HEADER_BYTES,
        }
    }
}

impl TunnelConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn without_timeout(mut self) -> Self {
        self.timeout = None;
        self
    }

    /// Zero is treated as 1.
    pub fn with_read_chunk_size(mut self, size: usize) -> Self {
        self.read_chunk_size = size.max(1);
        self
    }

    pub fn with_max_header_bytes(mut self, limit: usize) -> Self {
        self.max_header_bytes = limit;
        self
    }
}
