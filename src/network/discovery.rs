//! Bonjour lookup of an AUNetSend instance
//!
//! Browses `_apple-ausend._tcp.local.` until the named instance resolves,
//! then picks its lowest address. Instances that advertise no port fall
//! back to the default AUNetSend port.

use mdns_sd::{ServiceDaemon, ServiceEvent};
use std::net::IpAddr;
use std::time::{Duration, Instant};

use crate::constants::{BONJOUR_SERVICE_TYPE, DEFAULT_PORT};
use crate::error::NetworkError;

/// Address a Bonjour name resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedService {
    pub fullname: String,
    pub host: IpAddr,
    pub port: u16,
    /// `false` when the default port was substituted
    pub port_advertised: bool,
}

/// Fully qualified service name for a Bonjour instance name
pub fn instance_fullname(name: &str) -> String {
    format!("{}.{}", name, BONJOUR_SERVICE_TYPE)
}

/// Pick the endpoint to connect to from a resolved record.
pub fn select_endpoint<'a, I>(fullname: &str, addresses: I, port: u16) -> Option<ResolvedService>
where
    I: IntoIterator<Item = &'a IpAddr>,
{
    let host = addresses.into_iter().min().copied()?;
    let port_advertised = port != 0;
    Some(ResolvedService {
        fullname: fullname.to_string(),
        host,
        port: if port_advertised { port } else { DEFAULT_PORT },
        port_advertised,
    })
}

/// Resolve the Bonjour instance `name` within `limit`.
pub async fn resolve(name: &str, limit: Duration) -> Result<ResolvedService, NetworkError> {
    let fullname = instance_fullname(name);
    tokio::task::spawn_blocking(move || resolve_blocking(&fullname, limit))
        .await
        .map_err(|e| NetworkError::Discovery(e.to_string()))?
}

fn resolve_blocking(fullname: &str, limit: Duration) -> Result<ResolvedService, NetworkError> {
    let daemon = ServiceDaemon::new().map_err(|e| NetworkError::Discovery(e.to_string()))?;
    let events = daemon
        .browse(BONJOUR_SERVICE_TYPE)
        .map_err(|e| NetworkError::Discovery(e.to_string()))?;

    let deadline = Instant::now() + limit;
    let mut resolved = None;

    while resolved.is_none() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        match events.recv_timeout(remaining) {
            Ok(ServiceEvent::ServiceResolved(info)) if info.get_fullname() == fullname => {
                resolved = select_endpoint(fullname, info.get_addresses(), info.get_port());
            }
            Ok(event) => tracing::trace!(?event, "ignoring mDNS event"),
            Err(_) => break,
        }
    }

    if let Err(e) = daemon.shutdown() {
        tracing::debug!("mDNS daemon shutdown failed: {}", e);
    }

    let service = resolved.ok_or_else(|| {
        NetworkError::Discovery(format!("couldn't resolve {}, is the server running?", fullname))
    })?;

    if service.port_advertised {
        tracing::info!("{} is {}:{}", service.fullname, service.host, service.port);
    } else {
        tracing::info!("{} is {}:<unknown port>", service.fullname, service.host);
        tracing::info!("using default port {}", DEFAULT_PORT);
    }
    Ok(service)
}
