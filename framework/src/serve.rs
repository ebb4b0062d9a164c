use std::net::{IpAddr, SocketAddr};

use axum::Router;
use if_addrs::get_if_addrs;
use tokio::net::{TcpListener, ToSocketAddrs};

pub async fn serve<A: ToSocketAddrs>(addr: A, router: Router) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;

    tracing::info!("Listening on port {}", local.port());
    for url in listener_urls(local) {
        tracing::info!("➜  {url}");
    }

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

/// One URL per local interface when bound to the unspecified address.
fn listener_urls(addr: SocketAddr) -> Vec<String> {
    let ips = if addr.ip().is_unspecified() {
        get_if_addrs()
            .into_iter()
            .flatten()
            .map(|i| i.ip())
            .filter(|ip| ip.is_ipv6() == addr.is_ipv6())
            .collect()
    } else {
        vec![addr.ip()]
    };

    ips.into_iter().map(|ip| url_for(ip, addr.port())).collect()
}

fn url_for(ip: IpAddr, port: u16) -> String {
    match ip {
        _ if ip.is_loopback() => format!("http://localhost:{port}"),
        IpAddr::V4(_) => format!("http://{ip}:{port}"),
        IpAddr::V6(_) => format!("http://[{ip}]:{port}"),
    }
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl+C: {err}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!("failed to install SIGTERM handler: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutting down");
}
