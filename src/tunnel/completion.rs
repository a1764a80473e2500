//! Single-assignment completion for a tunnel negotiation.

use crate::base::neterror::TunnelError;
use futures::ready;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

/// Write side: resolved at most once.
pub struct Completion<S> {
    tx: Option<oneshot::Sender<Result<S, TunnelError>>>,
}

impl<S> Completion<S> {
    pub fn new() -> (Self, TunnelHandle<S>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx: Some(tx) }, TunnelHandle { rx })
    }

    /// Returns false if the completion was already resolved.
    pub fn succeed(&mut self, value: S) -> bool {
        self.resolve(Ok(value))
    }

    /// Returns false if the completion was already resolved.
    pub fn fail(&mut self, error: TunnelError) -> bool {
        self.resolve(Err(error))
    }

    pub fn is_resolved(&self) -> bool {
        self.tx.is_none()
    }

    fn resolve(&mut self, result: Result<S, TunnelError>) -> bool {
        match self.tx.take() {
            Some(tx) => {
                // The caller may have dropped its handle.
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }
}

impl<S> fmt::Debug for Completion<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("resolved", &self.is_resolved())
            .finish()
    }
}

/// Caller side of a negotiation: resolves to the tunneled socket or the
/// failure.
///
/// Resolves to [`TunnelError::Canceled`] if the negotiation is dropped first.
pub struct TunnelHandle<S> {
    rx: oneshot::Receiver<Result<S, TunnelError>>,
}

impl<S> TunnelHandle<S> {
    /// Take the outcome without waiting, if there is one.
    pub fn try_result(&mut self) -> Option<Result<S, TunnelError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(TunnelError::Canceled)),
        }
    }
}

impl<S> Future for TunnelHandle<S> {
    type Output = Result<S, TunnelError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match ready!(Pin::new(&mut self.rx).poll(cx)) {
            Ok(result) => Poll::Ready(result),
            Err(_) => Poll::Ready(Err(TunnelError::Canceled)),
        }
    }
}

impl<S> fmt::Debug for TunnelHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelHandle").finish_non_exhaustive()
    }
}
