//! Tunnel through an HTTP proxy and print what the target sends back.
//!
//! Usage: `cargo run --example tunnel_fetch -- http://proxy:3128 http://example.com/`
//!
//! The target is spoken to in plain HTTP/1.1 over the tunnel; for an
//! `https://` target a TLS handshake would run over the returned socket first.

use proxytunnel::socket::connectjob::ConnectJob;
use proxytunnel::socket::proxy::ProxySettings;
use proxytunnel::{HttpTunneler, TunnelConfig};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use url::Url;

#[tokio::main]
async fn main() {
    let mut args = std::env::args().skip(1);
    let proxy = match args.next() {
        Some(p) => ProxySettings::new(&p).expect("Invalid proxy URL"),
        None => ProxySettings::from_env().expect("No proxy given and none in environment"),
    };
    let target = Url::parse(&args.next().unwrap_or_else(|| "http://example.com/".to_string()))
        .expect("Invalid target URL");

    let tunneler = HttpTunneler::new(TunnelConfig::new().with_timeout(Duration::from_secs(10)));
    let mut socket = match ConnectJob::connect(&proxy, &target, &tunneler).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Tunnel failed ({}): {}", e.as_i32(), e);
            return;
        }
    };
    println!("Tunnel established via {}", proxy.url);

    let host = target.host_str().unwrap_or_default();
    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        target.path(),
        host
    );
    socket.write_all(request.as_bytes()).await.expect("write failed");

    let mut response = Vec::new();
    socket.read_to_end(&mut response).await.expect("read failed");
    println!("{}", String::from_utf8_lossy(&response));
}
