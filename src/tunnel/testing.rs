//! In-memory socket and reactor doubles for driving negotiations step by step.

use super::reactor::{Interest, Reactor, WatcherId};
use crate::socket::stream::TunnelSocket;
use bytes::Bytes;
use std::collections::VecDeque;
use std::io::{self, ErrorKind};

/// One scripted I/O result.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    /// Write: accept up to this many bytes.
    Accept(usize),
    /// Read: hand out these bytes, possibly across several reads.
    Data(Vec<u8>),
    /// Would block.
    Block,
    /// Peer closed: zero bytes and the socket reports disconnected.
    Hangup,
    Fail(ErrorKind),
}

/// Socket whose writes and reads follow a script. An exhausted write script
/// accepts everything; an exhausted read script blocks.
#[derive(Debug)]
pub(crate) struct ScriptedSocket {
    pub written: Vec<u8>,
    pub write_attempts: Vec<usize>,
    pub read_attempts: usize,
    pub early_data: Bytes,
    writes: VecDeque<Step>,
    reads: VecDeque<Step>,
    connected: bool,
    tunneled: bool,
}

impl ScriptedSocket {
    pub fn new() -> Self {
        Self {
            written: Vec::new(),
            write_attempts: Vec::new(),
            read_attempts: 0,
            early_data: Bytes::new(),
            writes: VecDeque::new(),
            reads: VecDeque::new(),
            connected: true,
            tunneled: false,
        }
    }

    pub fn on_write(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.writes.extend(steps);
        self
    }

    pub fn on_read(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.reads.extend(steps);
        self
    }

    /// Already closed: every attempt transfers nothing.
    pub fn disconnected(mut self) -> Self {
        self.connected = false;
        self.writes.push_back(Step::Hangup);
        self
    }
}

impl TunnelSocket for ScriptedSocket {
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_attempts.push(buf.len());
        let step = self.writes.pop_front().unwrap_or(Step::Accept(usize::MAX));
        match step {
            Step::Accept(n) => {
                let n = n.min(buf.len());
                self.written.extend_from_slice(&buf[..n]);
                Ok(n)
            }
            Step::Block => Err(ErrorKind::WouldBlock.into()),
            Step::Hangup => {
                self.connected = false;
                Ok(0)
            }
            Step::Fail(kind) => Err(kind.into()),
            Step::Data(_) => panic!("Data is a read step"),
        }
    }

    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.read_attempts += 1;
        match self.reads.pop_front().unwrap_or(Step::Block) {
            Step::Data(mut data) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    self.reads.push_front(Step::Data(data.split_off(n)));
                }
                Ok(n)
            }
            Step::Block => Err(ErrorKind::WouldBlock.into()),
            Step::Hangup => {
                self.connected = false;
                Ok(0)
            }
            Step::Fail(kind) => Err(kind.into()),
            Step::Accept(_) => panic!("Accept is a write step"),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn mark_tunneled(&mut self, early_data: Bytes) {
        self.tunneled = true;
        self.early_data = early_data;
    }

    fn is_tunneled(&self) -> bool {
        self.tunneled
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReactorEvent {
    Readable(WatcherId),
    Writable(WatcherId),
    Cancel(WatcherId),
}

/// Reactor that records every registration and cancellation.
#[derive(Debug, Default)]
pub(crate) struct RecordingReactor {
    next_id: u64,
    pub events: Vec<ReactorEvent>,
}

impl RecordingReactor {
    pub fn registered(&self, interest: Interest) -> Vec<WatcherId> {
        self.events
            .iter()
            .filter_map(|e| match (e, interest) {
                (ReactorEvent::Readable(id), Interest::Readable)
                | (ReactorEvent::Writable(id), Interest::Writable) => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn registrations(&self, interest: Interest) -> usize {
        self.registered(interest).len()
    }

    pub fn cancels(&self) -> usize {
        self.events
            .iter()
            .filter(|e| matches!(e, ReactorEvent::Cancel(_)))
            .count()
    }

    pub fn cancelled(&self, watcher: WatcherId) -> usize {
        self.events
            .iter()
            .filter(|e| **e == ReactorEvent::Cancel(watcher))
            .count()
    }

    fn next(&mut self) -> WatcherId {
        self.next_id += 1;
        WatcherId::new(self.next_id)
    }
}

impl<S: ?Sized> Reactor<S> for RecordingReactor {
    fn on_readable(&mut self, _socket: &S) -> WatcherId {
        let id = self.next();
        self.events.push(ReactorEvent::Readable(id));
        id
    }

    fn on_writable(&mut self, _socket: &S) -> WatcherId {
        let id = self.next();
        self.events.push(ReactorEvent::Writable(id));
        id
    }

    fn cancel(&mut self, watcher: WatcherId) {
        self.events.push(ReactorEvent::Cancel(watcher));
    }
}
