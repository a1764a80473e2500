use super::completion::TunnelHandle;
use super::config::TunnelConfig;
use super::negotiation::Negotiation;
use super::reactor::{Interest, TokioReactor};
use crate::base::neterror::TunnelError;
use crate::socket::stream::ProxySocket;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{trace, warn};

/// Establishes HTTP `CONNECT` tunnels over Tokio TCP streams.
///
/// Each call runs its own [`Negotiation`]. The first write happens inline; if
/// the negotiation cannot finish right away, a task is spawned that waits for
/// the armed watcher's readiness and feeds it back in.
#[derive(Debug, Clone, Default)]
pub struct HttpTunneler {
    config: TunnelConfig,
}

impl HttpTunneler {
    pub fn new(config: TunnelConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TunnelConfig {
        &self.config
    }

    /// Start negotiating a tunnel to `authority` ("host:port") over `stream`,
    /// which must already be connected to the proxy.
    ///
    /// Returns immediately. Must be called within a Tokio runtime.
    pub fn tunnel(&self, stream: TcpStream, authority: &str) -> TunnelHandle<ProxySocket> {
        let mut reactor = TokioReactor::new();
        let (negotiation, handle) =
            Negotiation::start(ProxySocket::new(stream), authority, &self.config, &mut reactor);

        if !negotiation.is_finished() {
            tokio::spawn(drive(negotiation, reactor, self.config.timeout));
        }
        handle
    }

    /// Negotiate a tunnel and wait for the outcome.
    pub async fn establish(
        &self,
        stream: TcpStream,
        authority: &str,
    ) -> Result<ProxySocket, TunnelError> {
        self.tunnel(stream, authority).await
    }
}

async fn drive(
    mut negotiation: Negotiation<ProxySocket>,
    mut reactor: TokioReactor,
    timeout: Option<Duration>,
) {
    match timeout {
        Some(limit) => {
            let finished =
                tokio::time::timeout(limit, run(&mut negotiation, &mut reactor)).await.is_ok();
            if !finished {
                warn!(authority = %negotiation.authority(), ?limit, "CONNECT negotiation timed out");
                negotiation.abort(TunnelError::TimedOut(limit), &mut reactor);
            }
        }
        None => run(&mut negotiation, &mut reactor).await,
    }
}

/// Wait on whichever watcher is armed and hand its readiness to the
/// negotiation, until nothing is armed.
async fn run(negotiation: &mut Negotiation<ProxySocket>, reactor: &mut TokioReactor) {
    while let Some((watcher, interest)) = reactor.armed() {
        let Some(socket) = negotiation.socket() else {
            break;
        };
        let ready = match interest {
            Interest::Writable => socket.get_ref().writable().await,
            Interest::Readable => socket.get_ref().readable().await,
        };
        if let Err(e) = ready {
            // The following try_* call surfaces the failure.
            trace!(error = %e, ?interest, "readiness wait failed");
        }
        negotiation.dispatch(watcher, reactor);
    }
}
