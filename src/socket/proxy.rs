use crate::base::neterror::TunnelError;
use url::{Host, Url};

/// Default port for `http://` proxies without an explicit one.
pub const DEFAULT_PROXY_PORT: u16 = 80;

/// An HTTP proxy that accepts `CONNECT`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxySettings {
    /// Proxy URL (e.g., `http://proxy.com:8080`)
    pub url: Url,
}

impl ProxySettings {
    /// Create proxy settings from URL string.
    ///
    /// Only `http://` proxies are supported; the tunnel itself carries TLS.
    pub fn new(url_str: &str) -> Result<Self, TunnelError> {
        let url = Url::parse(url_str)
            .map_err(|e| TunnelError::InvalidProxy(format!("{}: {}", url_str, e)))?;
        if url.scheme() != "http" {
            return Err(TunnelError::InvalidProxy(format!(
                "unsupported proxy scheme {:?}",
                url.scheme()
            )));
        }
        if url.host_str().is_none() {
            return Err(TunnelError::InvalidProxy(format!("{} has no host", url_str)));
        }
        Ok(Self { url })
    }

    /// Create proxy from environment variables.
    ///
    /// Checks `HTTPS_PROXY`/`https_proxy` and `HTTP_PROXY`/`http_proxy`.
    pub fn from_env() -> Option<Self> {
        let url_str = std::env::var("HTTPS_PROXY")
            .or_else(|_| std::env::var("https_proxy"))
            .or_else(|_| std::env::var("HTTP_PROXY"))
            .or_else(|_| std::env::var("http_proxy"))
            .ok()?;

        Self::new(&url_str).ok()
    }

    /// Get proxy host and port.
    pub fn host_port(&self) -> Option<(&str, u16)> {
        let host = self.url.host_str()?;
        let port = self.url.port().unwrap_or(DEFAULT_PROXY_PORT);
        // Url keeps IPv6 hosts bracketed
        let host = host.trim_start_matches('[').trim_end_matches(']');
        Some((host, port))
    }
}

/// Build the `host:port` authority to tunnel to for `target`.
pub fn authority_for(target: &Url) -> Result<String, TunnelError> {
    let port = target
        .port_or_known_default()
        .ok_or_else(|| TunnelError::InvalidAuthority(target.to_string()))?;
    match target.host() {
        Some(Host::Domain(domain)) => Ok(format!("{}:{}", domain, port)),
        Some(Host::Ipv4(addr)) => Ok(format!("{}:{}", addr, port)),
        Some(Host::Ipv6(addr)) => Ok(format!("[{}]:{}", addr, port)),
        None => Err(TunnelError::InvalidAuthority(target.to_string())),
    }
}
