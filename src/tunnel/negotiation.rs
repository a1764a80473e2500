//! The `CONNECT` negotiation state machine.
//!
//! A [`Negotiation`] owns the socket from initiation until it resolves. It
//! first flushes `CONNECT {authority} HTTP/1.1\r\n\r\n` across as many
//! non-blocking writes as it takes, then reads and parses the proxy's
//! response head. Each step either finishes, or arms exactly one watcher and
//! returns to the event loop. At most one watcher is armed at any time, and it
//! is always cancelled before the completion resolves.

use super::completion::{Completion, TunnelHandle};
use super::config::TunnelConfig;
use super::reactor::{Reactor, WatcherId};
use crate::base::neterror::{TunnelError, TunnelPhase};
use crate::http::{ConnectResponseParser, ParseOutcome, ResponseParser};
use crate::socket::stream::TunnelSocket;
use bytes::{Buf, Bytes};
use http::StatusCode;
use std::io::{self, ErrorKind};
use tracing::{debug, trace, warn};

/// Where a negotiation currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    /// The request has not been fully written yet.
    SendingRequest,
    /// The request is out; waiting for the proxy's response head.
    AwaitingResponse,
    /// The completion has been resolved.
    Finished,
}

/// Build the exact request bytes for `authority`.
pub fn connect_request(authority: &str) -> Bytes {
    Bytes::from(format!("CONNECT {} HTTP/1.1\r\n\r\n", authority))
}

/// Authorities go onto the request line verbatim, so anything that could
/// break out of it is rejected.
fn validate_authority(authority: &str) -> Result<(), TunnelError> {
    if authority.is_empty()
        || authority
            .bytes()
            .any(|b| b.is_ascii_control() || b.is_ascii_whitespace())
    {
        return Err(TunnelError::InvalidAuthority(authority.to_string()));
    }
    Ok(())
}

/// Liveness predicate shared by both drivers: a hard I/O error, or the socket
/// itself reporting an invalid handle or end-of-stream.
fn is_socket_dead<S: TunnelSocket>(socket: &S, error: Option<&io::Error>) -> bool {
    error.is_some() || !socket.is_connected()
}

/// Split an I/O attempt into bytes transferred and a hard error, if any.
/// Would-block counts as zero bytes without an error.
fn transferred(result: io::Result<usize>) -> (usize, Option<io::Error>) {
    match result {
        Ok(n) => (n, None),
        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => (0, None),
        Err(e) => (0, Some(e)),
    }
}

/// State of one `CONNECT` attempt.
pub struct Negotiation<S, P = ConnectResponseParser> {
    socket: Option<S>,
    authority: String,
    write_buffer: Bytes,
    parser: Option<P>,
    read_buf: Vec<u8>,
    read_chunk_size: usize,
    max_header_bytes: usize,
    read_watcher: Option<WatcherId>,
    write_watcher: Option<WatcherId>,
    completion: Completion<S>,
}

impl<S: TunnelSocket> Negotiation<S> {
    /// Begin negotiating a tunnel to `authority` over `socket`.
    ///
    /// The first write is attempted before returning, so a writable socket
    /// never waits on an event loop turn. The returned handle resolves once,
    /// after the reactor has delivered enough readiness events.
    pub fn start<R: Reactor<S>>(
        socket: S,
        authority: &str,
        config: &TunnelConfig,
        reactor: &mut R,
    ) -> (Self, TunnelHandle<S>) {
        Negotiation::start_with_parser(socket, authority, config, reactor)
    }
}

impl<S: TunnelSocket, P: ResponseParser> Negotiation<S, P> {
    /// Like [`Negotiation::start`] with a caller-chosen response parser.
    pub fn start_with_parser<R: Reactor<S>>(
        socket: S,
        authority: &str,
        config: &TunnelConfig,
        reactor: &mut R,
    ) -> (Self, TunnelHandle<S>) {
        let (completion, handle) = Completion::new();
        let mut negotiation = Self {
            socket: Some(socket),
            authority: authority.to_string(),
            write_buffer: connect_request(authority),
            parser: None,
            read_buf: Vec::new(),
            read_chunk_size: config.read_chunk_size.max(1),
            max_header_bytes: config.max_header_bytes,
            read_watcher: None,
            write_watcher: None,
            completion,
        };

        match validate_authority(authority) {
            Ok(()) => {
                debug!(authority = %authority, "starting CONNECT negotiation");
                negotiation.do_write(reactor);
            }
            Err(e) => {
                negotiation.write_buffer.clear();
                negotiation.finish(Err(e));
            }
        }

        (negotiation, handle)
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn state(&self) -> TunnelState {
        if self.completion.is_resolved() {
            TunnelState::Finished
        } else if self.parser.is_some() {
            TunnelState::AwaitingResponse
        } else {
            TunnelState::SendingRequest
        }
    }

    pub fn is_finished(&self) -> bool {
        self.completion.is_resolved()
    }

    /// Bytes of the request not yet written.
    pub fn pending_request(&self) -> &[u8] {
        &self.write_buffer
    }

    pub fn read_watcher(&self) -> Option<WatcherId> {
        self.read_watcher
    }

    pub fn write_watcher(&self) -> Option<WatcherId> {
        self.write_watcher
    }

    /// The socket, while the negotiation still holds it. After a successful
    /// tunnel it has moved into the completion.
    pub fn socket(&self) -> Option<&S> {
        self.socket.as_ref()
    }

    /// Reclaim the socket, e.g. to close it after a failure.
    pub fn into_socket(self) -> Option<S> {
        self.socket
    }

    /// Writable notification.
    pub fn on_writable<R: Reactor<S>>(&mut self, reactor: &mut R) {
        self.do_write(reactor);
    }

    /// Readable notification.
    pub fn on_readable<R: Reactor<S>>(&mut self, reactor: &mut R) {
        self.do_read(reactor);
    }

    /// Route a fired watcher to its driver. Stale watchers are ignored.
    pub fn dispatch<R: Reactor<S>>(&mut self, watcher: WatcherId, reactor: &mut R) {
        if self.write_watcher == Some(watcher) {
            self.do_write(reactor);
        } else if self.read_watcher == Some(watcher) {
            self.do_read(reactor);
        } else {
            trace!(watcher = watcher.as_u64(), "ignoring stale watcher");
        }
    }

    /// Cancel the armed watcher and fail with `error`. Returns false if the
    /// negotiation had already finished.
    pub fn abort<R: Reactor<S>>(&mut self, error: TunnelError, reactor: &mut R) -> bool {
        if self.is_finished() {
            return false;
        }
        self.cancel_write_watcher(reactor);
        self.cancel_read_watcher(reactor);
        self.finish(Err(error));
        true
    }

    fn do_write<R: Reactor<S>>(&mut self, reactor: &mut R) {
        if self.is_finished() || self.parser.is_some() {
            return;
        }
        let Some(socket) = self.socket.as_mut() else {
            return;
        };

        let remaining = self.write_buffer.len();
        let (written, error) = transferred(socket.try_write(&self.write_buffer));
        let dead = written == 0 && is_socket_dead(socket, error.as_ref());

        if written >= remaining {
            self.write_buffer.clear();
            self.cancel_write_watcher(reactor);
            self.parser = Some(P::for_connect(self.max_header_bytes));
            self.read_buf = vec![0; self.read_chunk_size];
            if let Some(socket) = self.socket.as_ref() {
                self.read_watcher = Some(reactor.on_readable(socket));
            }
            debug!(authority = %self.authority, "CONNECT request sent, awaiting proxy response");
        } else if written > 0 {
            self.write_buffer.advance(written);
            trace!(written, remaining = self.write_buffer.len(), "partial CONNECT write");
            self.enable_write_watcher(reactor);
        } else if dead {
            self.cancel_write_watcher(reactor);
            self.finish(Err(TunnelError::Socket {
                phase: TunnelPhase::Writing,
                source: error,
            }));
        } else {
            self.enable_write_watcher(reactor);
        }
    }

    fn do_read<R: Reactor<S>>(&mut self, reactor: &mut R) {
        if self.is_finished() || self.parser.is_none() {
            return;
        }
        let Some(socket) = self.socket.as_mut() else {
            return;
        };

        let (read, error) = transferred(socket.try_read(&mut self.read_buf));
        let dead = read == 0 && is_socket_dead(socket, error.as_ref());

        if read > 0 {
            trace!(read, "proxy response bytes");
            self.parse_socket_data(read, reactor);
        } else if dead {
            self.cancel_read_watcher(reactor);
            self.finish(Err(TunnelError::Socket {
                phase: TunnelPhase::Reading,
                source: error,
            }));
        }
    }

    fn parse_socket_data<R: Reactor<S>>(&mut self, len: usize, reactor: &mut R) {
        let Some(parser) = self.parser.as_mut() else {
            return;
        };
        parser.buffer(&self.read_buf[..len]);

        match parser.parse() {
            ParseOutcome::Incomplete => {}
            ParseOutcome::Parsed(response) if response.status() == StatusCode::OK => {
                let early_data = parser.take_remaining();
                self.cancel_read_watcher(reactor);
                match self.socket.take() {
                    Some(mut socket) => {
                        socket.mark_tunneled(early_data);
                        debug!(authority = %self.authority, "proxy tunnel established");
                        self.finish(Ok(socket));
                    }
                    None => self.finish(Err(TunnelError::Canceled)),
                }
            }
            ParseOutcome::Parsed(response) => {
                self.cancel_read_watcher(reactor);
                warn!(
                    authority = %self.authority,
                    status = response.status().as_u16(),
                    "proxy refused CONNECT"
                );
                self.finish(Err(TunnelError::Proxy {
                    status: response.status(),
                }));
            }
            ParseOutcome::Failed(source) => {
                self.cancel_read_watcher(reactor);
                debug!(authority = %self.authority, error = %source, "malformed proxy response");
                self.finish(Err(TunnelError::Protocol { source }));
            }
        }
    }

    fn enable_write_watcher<R: Reactor<S>>(&mut self, reactor: &mut R) {
        if self.write_watcher.is_some() {
            return;
        }
        if let Some(socket) = self.socket.as_ref() {
            self.write_watcher = Some(reactor.on_writable(socket));
        }
    }

    fn cancel_write_watcher<R: Reactor<S>>(&mut self, reactor: &mut R) {
        if let Some(watcher) = self.write_watcher.take() {
            reactor.cancel(watcher);
        }
    }

    fn cancel_read_watcher<R: Reactor<S>>(&mut self, reactor: &mut R) {
        if let Some(watcher) = self.read_watcher.take() {
            reactor.cancel(watcher);
        }
    }

    /// Resolve the completion. Watchers must already be cancelled.
    fn finish(&mut self, result: Result<S, TunnelError>) {
        debug_assert!(self.read_watcher.is_none() && self.write_watcher.is_none());
        if let Err(e) = &result {
            debug!(authority = %self.authority, error = %e, "CONNECT negotiation failed");
        }
        self.read_buf = Vec::new();
        match result {
            Ok(socket) => self.completion.succeed(socket),
            Err(e) => self.completion.fail(e),
        };
    }
}

impl<S, P> std::fmt::Debug for Negotiation<S, P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Negotiation")
            .field("authority", &self.authority)
            .field("pending_request", &self.write_buffer.len())
            .field("read_watcher", &self.read_watcher)
            .field("write_watcher", &self.write_watcher)
            .field("completion", &self.completion)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tunnel::testing::{ReactorEvent, RecordingReactor, ScriptedSocket, Step};
    use crate::tunnel::Interest;
    use std::error::Error;

    const REQUEST: &[u8] = b"CONNECT example.com:443 HTTP/1.1\r\n\r\n";

    fn start(
        socket: ScriptedSocket,
        reactor: &mut RecordingReactor,
    ) -> (Negotiation<ScriptedSocket>, TunnelHandle<ScriptedSocket>) {
        Negotiation::start(socket, "example.com:443", &TunnelConfig::default(), reactor)
    }

    #[test]
    fn test_request_bytes_are_exact() {
        for authority in ["example.com:443", "10.0.0.1:8443", "[::1]:443"] {
            let mut reactor = RecordingReactor::default();
            let (negotiation, _handle) = Negotiation::start(
                ScriptedSocket::new(),
                authority,
                &TunnelConfig::default(),
                &mut reactor,
            );
            let expected = format!("CONNECT {} HTTP/1.1\r\n\r\n", authority);
            assert_eq!(negotiation.socket().unwrap().written, expected.as_bytes());
        }
    }

    #[test]
    fn test_full_write_arms_read_watcher() {
        let mut reactor = RecordingReactor::default();
        let (negotiation, mut handle) = start(ScriptedSocket::new(), &mut reactor);

        assert_eq!(negotiation.state(), TunnelState::AwaitingResponse);
        assert!(negotiation.pending_request().is_empty());
        assert!(negotiation.write_watcher().is_none());
        assert!(negotiation.read_watcher().is_some());
        assert_eq!(reactor.registrations(Interest::Writable), 0);
        assert_eq!(
            reactor.registered(Interest::Readable),
            vec![negotiation.read_watcher().unwrap()]
        );
        assert!(handle.try_result().is_none());
    }

    #[test]
    fn test_partial_write_resumes_with_remaining_bytes() {
        let socket = ScriptedSocket::new().on_write([Step::Accept(10), Step::Block]);
        let mut reactor = RecordingReactor::default();
        let (mut negotiation, _handle) = start(socket, &mut reactor);

        assert_eq!(negotiation.state(), TunnelState::SendingRequest);
        assert_eq!(negotiation.pending_request(), &REQUEST[10..]);
        assert!(negotiation.write_watcher().is_some());
        assert_eq!(reactor.registrations(Interest::Readable), 0);

        // would block
        negotiation.on_writable(&mut reactor);
        assert_eq!(reactor.registrations(Interest::Readable), 0);

        negotiation.on_writable(&mut reactor);
        let socket = negotiation.socket().unwrap();
        assert_eq!(socket.write_attempts, vec![REQUEST.len(), REQUEST.len() - 10, REQUEST.len() - 10]);
        assert_eq!(socket.written, REQUEST);

        assert_eq!(reactor.registrations(Interest::Writable), 1);
        assert_eq!(reactor.cancels(), 1);
        assert_eq!(reactor.registrations(Interest::Readable), 1);
        assert_eq!(negotiation.state(), TunnelState::AwaitingResponse);
    }

    #[test]
    fn test_repeated_would_block_registers_one_write_watcher() {
        let socket = ScriptedSocket::new().on_write([Step::Block, Step::Block, Step::Block]);
        let mut reactor = RecordingReactor::default();
        let (mut negotiation, _handle) = start(socket, &mut reactor);

        negotiation.on_writable(&mut reactor);
        negotiation.on_writable(&mut reactor);

        assert_eq!(reactor.registrations(Interest::Writable), 1);
        assert_eq!(reactor.cancels(), 0);
        assert_eq!(negotiation.pending_request(), REQUEST);
    }

    #[test]
    fn test_dead_on_first_write() {
        let socket = ScriptedSocket::new().disconnected();
        let mut reactor = RecordingReactor::default();
        let (negotiation, mut handle) = start(socket, &mut reactor);

        match handle.try_result() {
            Some(Err(TunnelError::Socket { phase, .. })) => assert_eq!(phase, TunnelPhase::Writing),
            other => panic!("Expected Socket error, got {:?}", other),
        }
        assert_eq!(negotiation.state(), TunnelState::Finished);
        assert_eq!(reactor.registrations(Interest::Readable), 0);
        assert!(reactor.events.is_empty());
        assert!(negotiation.into_socket().is_some());
    }

    #[test]
    fn test_peer_gone_after_partial_write() {
        let socket = ScriptedSocket::new().on_write([Step::Accept(4), Step::Hangup]);
        let mut reactor = RecordingReactor::default();
        let (mut negotiation, mut handle) = start(socket, &mut reactor);
        let watcher = negotiation.write_watcher().unwrap();

        negotiation.dispatch(watcher, &mut reactor);

        assert!(matches!(
            handle.try_result(),
            Some(Err(TunnelError::Socket { phase: TunnelPhase::Writing, .. }))
        ));
        assert_eq!(reactor.cancelled(watcher), 1);
        assert_eq!(reactor.registrations(Interest::Readable), 0);
    }

    #[test]
    fn test_write_error_is_kept_as_cause() {
        let socket = ScriptedSocket::new().on_write([Step::Fail(ErrorKind::BrokenPipe)]);
        let mut reactor = RecordingReactor::default();
        let (_negotiation, mut handle) = start(socket, &mut reactor);

        let err = handle.try_result().unwrap().unwrap_err();
        assert!(err.is_socket_error());
        let cause = err.source().and_then(|e| e.downcast_ref::<io::Error>()).unwrap();
        assert_eq!(cause.kind(), ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_status_200_resolves_with_tunneled_socket() {
        let socket = ScriptedSocket::new()
            .on_read([Step::Data(b"HTTP/1.1 200 Connection established\r\n\r\n".to_vec())]);
        let mut reactor = RecordingReactor::default();
        let (mut negotiation, mut handle) = start(socket, &mut reactor);
        let watcher = negotiation.read_watcher().unwrap();

        negotiation.dispatch(watcher, &mut reactor);

        let socket = handle.try_result().unwrap().unwrap();
        assert!(socket.is_tunneled());
        assert_eq!(socket.written, REQUEST);
        assert!(socket.early_data.is_empty());
        assert_eq!(reactor.cancelled(watcher), 1);
        assert_eq!(negotiation.state(), TunnelState::Finished);
        assert!(negotiation.socket().is_none());
    }

    #[test]
    fn test_response_split_across_reads() {
        let socket = ScriptedSocket::new().on_read([
            Step::Data(b"HTTP/1.1 200 OK\r\n".to_vec()),
            Step::Block,
            Step::Data(b"Proxy-Agent: squid\r\n\r\n\x16\x03".to_vec()),
        ]);
        let mut reactor = RecordingReactor::default();
        let (mut negotiation, mut handle) = start(socket, &mut reactor);

        negotiation.on_readable(&mut reactor);
        assert!(handle.try_result().is_none());
        negotiation.on_readable(&mut reactor);
        assert!(handle.try_result().is_none());
        assert_eq!(negotiation.state(), TunnelState::AwaitingResponse);
        negotiation.on_readable(&mut reactor);

        let socket = handle.try_result().unwrap().unwrap();
        assert!(socket.is_tunneled());
        assert_eq!(socket.early_data, Bytes::from_static(b"\x16\x03"));
    }

    #[test]
    fn test_non_200_is_proxy_error() {
        let socket = ScriptedSocket::new()
            .on_read([Step::Data(b"HTTP/1.1 403 Forbidden\r\nContent-Length: 0\r\n\r\n".to_vec())]);
        let mut reactor = RecordingReactor::default();
        let (mut negotiation, mut handle) = start(socket, &mut reactor);

        negotiation.on_readable(&mut reactor);

        let err = handle.try_result().unwrap().unwrap_err();
        assert_eq!(err.proxy_status(), Some(StatusCode::FORBIDDEN));
        assert_eq!(err.to_string(), "unexpected proxy response status: 403");
        assert!(!negotiation.socket().unwrap().is_tunneled());
        assert_eq!(reactor.cancels(), 1);
    }

    #[test]
    fn test_malformed_response_cancels_once() {
        let socket = ScriptedSocket::new().on_read([
            Step::Data(b"garbage\r\n\r\n".to_vec()),
            Step::Data(b"more garbage".to_vec()),
        ]);
        let mut reactor = RecordingReactor::default();
        let (mut negotiation, mut handle) = start(socket, &mut reactor);
        let watcher = negotiation.read_watcher().unwrap();

        negotiation.on_readable(&mut reactor);
        negotiation.on_readable(&mut reactor);
        negotiation.dispatch(watcher, &mut reactor);

        let err = handle.try_result().unwrap().unwrap_err();
        assert!(matches!(err, TunnelError::Protocol { .. }));
        assert!(err.source().is_some());
        assert_eq!(reactor.cancelled(watcher), 1);
        assert_eq!(negotiation.socket().unwrap().read_attempts, 1);
    }

    #[test]
    fn test_would_block_read_stays_registered() {
        let socket = ScriptedSocket::new().on_read([Step::Block, Step::Block]);
        let mut reactor = RecordingReactor::default();
        let (mut negotiation, mut handle) = start(socket, &mut reactor);

        negotiation.on_readable(&mut reactor);
        negotiation.on_readable(&mut reactor);

        assert!(handle.try_result().is_none());
        assert!(negotiation.read_watcher().is_some());
        assert_eq!(reactor.cancels(), 0);
    }

    #[test]
    fn test_eof_while_awaiting_response() {
        let socket = ScriptedSocket::new()
            .on_read([Step::Data(b"HTTP/1.1 200".to_vec()), Step::Hangup]);
        let mut reactor = RecordingReactor::default();
        let (mut negotiation, mut handle) = start(socket, &mut reactor);

        negotiation.on_readable(&mut reactor);
        negotiation.on_readable(&mut reactor);

        match handle.try_result() {
            Some(Err(e @ TunnelError::Socket { .. })) => {
                assert_eq!(e.to_string(), "peer gone while awaiting tunnel response");
            }
            other => panic!("Expected Socket error, got {:?}", other),
        }
        assert_eq!(reactor.cancels(), 1);
    }

    #[test]
    fn test_readable_before_flush_is_ignored() {
        let socket = ScriptedSocket::new()
            .on_write([Step::Block])
            .on_read([Step::Data(b"HTTP/1.1 200 OK\r\n\r\n".to_vec())]);
        let mut reactor = RecordingReactor::default();
        let (mut negotiation, mut handle) = start(socket, &mut reactor);

        negotiation.on_readable(&mut reactor);

        assert!(handle.try_result().is_none());
        assert_eq!(negotiation.socket().unwrap().read_attempts, 0);
        assert_eq!(negotiation.state(), TunnelState::SendingRequest);
    }

    #[test]
    fn test_abort_cancels_armed_watcher() {
        let socket = ScriptedSocket::new().on_read([Step::Block]);
        let mut reactor = RecordingReactor::default();
        let (mut negotiation, mut handle) = start(socket, &mut reactor);
        let watcher = negotiation.read_watcher().unwrap();

        assert!(negotiation.abort(TunnelError::TimedOut(std::time::Duration::from_secs(1)), &mut reactor));
        assert!(!negotiation.abort(TunnelError::Canceled, &mut reactor));

        assert!(matches!(handle.try_result(), Some(Err(TunnelError::TimedOut(_)))));
        assert_eq!(reactor.cancelled(watcher), 1);
        assert!(negotiation.read_watcher().is_none());
    }

    #[test]
    fn test_invalid_authority_is_rejected_before_writing() {
        let mut reactor = RecordingReactor::default();
        let (negotiation, mut handle) = Negotiation::start(
            ScriptedSocket::new(),
            "example.com:443 HTTP/1.1\r\nX-Injected: 1\r\n",
            &TunnelConfig::default(),
            &mut reactor,
        );

        assert!(matches!(handle.try_result(), Some(Err(TunnelError::InvalidAuthority(_)))));
        assert!(negotiation.socket().unwrap().written.is_empty());
        assert!(reactor.events.is_empty());
    }

    #[test]
    fn test_read_chunk_size_bounds_reads() {
        let socket = ScriptedSocket::new()
            .on_read([Step::Data(b"HTTP/1.1 200 OK\r\n\r\n".to_vec())]);
        let mut reactor = RecordingReactor::default();
        let config = TunnelConfig::default().with_read_chunk_size(4);
        let (mut negotiation, mut handle) =
            Negotiation::start(socket, "example.com:443", &config, &mut reactor);

        for _ in 0..4 {
            negotiation.on_readable(&mut reactor);
        }
        assert!(handle.try_result().is_none());
        negotiation.on_readable(&mut reactor);

        assert!(handle.try_result().unwrap().unwrap().is_tunneled());
        assert!(matches!(reactor.events.last(), Some(ReactorEvent::Cancel(_))));
    }
}
