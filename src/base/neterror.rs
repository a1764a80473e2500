use crate::http::ParseError;
use http::StatusCode;
use std::fmt;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Which half of the negotiation was running when the peer went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelPhase {
    /// Flushing the `CONNECT` request.
    Writing,
    /// Waiting for the proxy's response head.
    Reading,
}

impl fmt::Display for TunnelPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelPhase::Writing => f.write_str("writing tunnel request"),
            TunnelPhase::Reading => f.write_str("awaiting tunnel response"),
        }
    }
}

#[derive(Debug, Error)]
pub enum TunnelError {
    /// Transport-level peer loss while writing or reading.
    #[error("peer gone while {phase}")]
    Socket {
        phase: TunnelPhase,
        #[source]
        source: Option<io::Error>,
    },

    /// The proxy answered but declined the tunnel.
    #[error("unexpected proxy response status: {}", .status.as_u16())]
    Proxy { status: StatusCode },

    /// The proxy's response could not be parsed.
    #[error("invalid response while establishing tunnel")]
    Protocol {
        #[source]
        source: ParseError,
    },

    #[error("tunnel negotiation timed out after {0:?}")]
    TimedOut(Duration),

    /// The negotiation was dropped before it resolved.
    #[error("tunnel negotiation canceled")]
    Canceled,

    #[error("invalid tunnel authority: {0:?}")]
    InvalidAuthority(String),

    #[error("invalid proxy configuration: {0}")]
    InvalidProxy(String),

    #[error("proxy host {host} could not be resolved")]
    NameNotResolved {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("connection to proxy {addr} failed")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },
}

impl TunnelError {
    /// Chromium net error code for this failure (`net_error_list.h`).
    pub fn as_i32(&self) -> i32 {
        match self {
            TunnelError::Socket { .. } => -100,
            TunnelError::Proxy { .. } => -111,
            TunnelError::Protocol { .. } => -370,
            TunnelError::TimedOut(_) => -118,
            TunnelError::Canceled => -3,
            TunnelError::InvalidAuthority(_) | TunnelError::InvalidProxy(_) => -300,
            TunnelError::NameNotResolved { .. } => -105,
            TunnelError::Connect { .. } => -130,
        }
    }

    /// The status the proxy rejected the tunnel with, if that is what happened.
    pub fn proxy_status(&self) -> Option<StatusCode> {
        match self {
            TunnelError::Proxy { status } => Some(*status),
            _ => None,
        }
    }

    /// True when the peer went away mid-negotiation.
    pub fn is_socket_error(&self) -> bool {
        matches!(self, TunnelError::Socket { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, TunnelError::TimedOut(_))
    }
}
