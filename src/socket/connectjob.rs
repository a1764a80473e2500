use crate::base::context::IoResultExt;
use crate::base::neterror::TunnelError;
use crate::socket::proxy::{authority_for, ProxySettings};
use crate::socket::stream::ProxySocket;
use crate::tunnel::HttpTunneler;
use tokio::net::TcpStream;
use url::Url;

/// Manages the connection process: DNS -> TCP -> CONNECT.
/// Roughly equivalent to net::HttpProxyConnectJob.
pub struct ConnectJob;

impl ConnectJob {
    /// Open a tunnel to `target` through `proxy`.
    ///
    /// The returned socket is tunneled but not encrypted; a TLS handshake for
    /// `target` is the caller's next step.
    pub async fn connect(
        proxy: &ProxySettings,
        target: &Url,
        tunneler: &HttpTunneler,
    ) -> Result<ProxySocket, TunnelError> {
        let authority = authority_for(target)?;
        let (host, port) = proxy
            .host_port()
            .ok_or_else(|| TunnelError::InvalidProxy(proxy.url.to_string()))?;
        let proxy_addr = format!("{}:{}", host, port);

        // 1. DNS Resolution
        let addrs: Vec<_> = tokio::net::lookup_host((host, port))
            .await
            .resolve_context(host)?
            .collect();

        // 2. TCP Connect to the proxy
        let mut last_err = None;
        let mut stream = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => {
                    tracing::debug!(%addr, error = %e, "proxy address unreachable");
                    last_err = Some(e);
                }
            }
        }

        let stream = match (stream, last_err) {
            (Some(s), _) => s,
            (None, Some(e)) => return Err(e).connect_context(&proxy_addr),
            (None, None) => {
                return Err(TunnelError::NameNotResolved {
                    host: host.to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        "no addresses returned",
                    ),
                })
            }
        };
        // Best effort; the handshake is a single small request.
        let _ = stream.set_nodelay(true);

        // 3. CONNECT handshake
        tracing::debug!(proxy = %proxy_addr, %authority, "connected to proxy, negotiating tunnel");
        tunneler.establish(stream, &authority).await
    }
}
