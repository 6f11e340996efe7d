//! Active checks: HTTP GET probes and local port occupancy.

use std::io::ErrorKind;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener};
use std::time::Duration;

use tracing::debug;

use crate::Result;

/// HTTP GET prober; only a `200 OK` counts as serving.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    /// Build a prober whose requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Http` if the HTTP client cannot be constructed.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }

    /// Whether `url` answered `200 OK`.
    pub async fn is_serving(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(resp) => {
                let status = resp.status();
                debug!(url, %status, "probe answered");
                status == reqwest::StatusCode::OK
            }
            Err(err) => {
                debug!(url, %err, "probe failed");
                false
            }
        }
    }
}

/// Whether some process already listens on `port` on the loopback interface.
///
/// Decided by trying to bind it ourselves; only `AddrInUse` counts, so
/// privileged or otherwise unbindable ports read as free.
#[must_use]
pub fn port_in_use(port: u16) -> bool {
    let candidates = [
        SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
        SocketAddr::from((Ipv6Addr::LOCALHOST, port)),
    ];
    candidates.iter().any(|addr| {
        matches!(
            TcpListener::bind(addr),
            Err(err) if err.kind() == ErrorKind::AddrInUse
        )
    })
}

/// `hint` first, then `ports`, without duplicates.
#[must_use]
pub fn scan_order(hint: Option<u16>, ports: &[u16]) -> Vec<u16> {
    let mut order = Vec::with_capacity(ports.len() + 1);
    for port in hint.into_iter().chain(ports.iter().copied()) {
        if !order.contains(&port) {
            order.push(port);
        }
    }
    order
}

/// First port in `order` that is occupied.
#[must_use]
pub fn find_listening_port(order: &[u16]) -> Option<u16> {
    order.iter().copied().find(|port| port_in_use(*port))
}
