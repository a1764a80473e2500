//! HTTP message handling for the tunnel handshake.

pub mod response;

pub use response::{
    ConnectResponseParser, ParseError, ParseOutcome, ProxyResponse, ResponseParser,
    DEFAULT_MAX_HEADER_BYTES, MAX_HEADERS,
};
