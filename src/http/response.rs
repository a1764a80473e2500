//! Incremental parsing of a proxy's reply to `CONNECT`.

use bytes::{Bytes, BytesMut};
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode, Version};
use thiserror::Error;

/// Maximum number of header lines accepted in a proxy response.
pub const MAX_HEADERS: usize = 64;

/// Default cap on the size of the response head.
pub const DEFAULT_MAX_HEADER_BYTES: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed response head: {0}")]
    Malformed(#[from] httparse::Error),
    #[error("response head exceeds {limit} bytes")]
    HeadersTooLarge { limit: usize },
    #[error("invalid header {0:?}")]
    InvalidHeader(String),
    #[error("invalid status code {0}")]
    InvalidStatus(u16),
}

/// Status line and headers of a proxy response.
#[derive(Debug, Clone)]
pub struct ProxyResponse {
    status: StatusCode,
    version: Version,
    reason: Option<String>,
    headers: HeaderMap,
}

impl ProxyResponse {
    pub fn new(status: StatusCode, version: Version, headers: HeaderMap) -> Self {
        Self {
            status,
            version,
            reason: None,
            headers,
        }
    }

    /// Get the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Get the HTTP version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Reason phrase as sent by the proxy, if any.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    /// Get a reference to the headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

/// Result of one parse attempt.
#[derive(Debug)]
pub enum ParseOutcome {
    /// More bytes are needed.
    Incomplete,
    Parsed(ProxyResponse),
    Failed(ParseError),
}

/// Buffer/parse contract the tunnel negotiation drives.
pub trait ResponseParser {
    /// Create a parser expecting the response to a `CONNECT` request, which
    /// never carries body framing.
    fn for_connect(max_header_bytes: usize) -> Self
    where
        Self: Sized;

    /// Append bytes read from the socket.
    fn buffer(&mut self, data: &[u8]);

    fn parse(&mut self) -> ParseOutcome;

    /// Bytes received after the response head. After a successful `CONNECT`
    /// these already belong to the tunnel.
    fn take_remaining(&mut self) -> Bytes {
        Bytes::new()
    }
}

/// [`ResponseParser`] backed by `httparse`.
#[derive(Debug)]
pub struct ConnectResponseParser {
    buf: BytesMut,
    max_header_bytes: usize,
}

impl Default for ConnectResponseParser {
    fn default() -> Self {
        Self::for_connect(DEFAULT_MAX_HEADER_BYTES)
    }
}

impl ConnectResponseParser {
    /// Number of bytes buffered and not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

impl ResponseParser for ConnectResponseParser {
    fn for_connect(max_header_bytes: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_header_bytes,
        }
    }

    fn buffer(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    fn parse(&mut self) -> ParseOutcome {
        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut response = httparse::Response::new(&mut headers);

        let head_len = match response.parse(&self.buf) {
            Ok(httparse::Status::Complete(len)) => len,
            Ok(httparse::Status::Partial) => {
                if self.buf.len() > self.max_header_bytes {
                    return ParseOutcome::Failed(ParseError::HeadersTooLarge {
                        limit: self.max_header_bytes,
                    });
                }
                return ParseOutcome::Incomplete;
            }
            Err(e) => return ParseOutcome::Failed(e.into()),
        };

        if head_len > self.max_header_bytes {
            return ParseOutcome::Failed(ParseError::HeadersTooLarge {
                limit: self.max_header_bytes,
            });
        }

        match to_proxy_response(&response) {
            Ok(parsed) => {
                let _ = self.buf.split_to(head_len);
                ParseOutcome::Parsed(parsed)
            }
            Err(e) => ParseOutcome::Failed(e),
        }
    }

    fn take_remaining(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

fn to_proxy_response(response: &httparse::Response<'_, '_>) -> Result<ProxyResponse, ParseError> {
    let code = response.code.unwrap_or(0);
    let status = StatusCode::from_u16(code).map_err(|_| ParseError::InvalidStatus(code))?;
    let version = match response.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };

    let mut headers = HeaderMap::with_capacity(response.headers.len());
    for header in response.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|_| ParseError::InvalidHeader(header.name.to_string()))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|_| ParseError::InvalidHeader(header.name.to_string()))?;
        headers.append(name, value);
    }

    Ok(ProxyResponse {
        status,
        version,
        reason: response.reason.map(str::to_owned),
        headers,
    })
}
