//! mDNS-SD browser backed by the `mdns-sd` service daemon.
//!
//! The protocol's service type (`_metrosync._tcp.`) is qualified with the
//! `local.` domain before it is handed to the daemon.  Daemon events are
//! translated into [`Advertisement`]s on a Tokio task; `SearchStarted`,
//! `ServiceFound` and `SearchStopped` carry no address and are skipped.

use std::net::IpAddr;

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use metrosync_core::{mdns_service_type, Advertisement};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::{DiscoveryError, ServiceBrowser};

/// [`ServiceBrowser`] over a shared [`ServiceDaemon`].
pub struct MdnsBrowser {
    daemon: ServiceDaemon,
}

impl MdnsBrowser {
    /// Starts the mDNS daemon.
    pub fn new() -> Result<Self, DiscoveryError> {
        Ok(Self {
            daemon: ServiceDaemon::new()?,
        })
    }
}

impl ServiceBrowser for MdnsBrowser {
    fn browse(&self, service_type: &str) -> Result<mpsc::Receiver<Advertisement>, DiscoveryError> {
        let mdns_type = mdns_service_type(service_type);
        let events = self.daemon.browse(&mdns_type)?;
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            while let Ok(event) = events.recv_async().await {
                let Some(advert) = to_advertisement(event, &mdns_type) else {
                    continue;
                };
                if tx.send(advert).await.is_err() {
                    break;
                }
            }
            debug!("mDNS browse for {mdns_type} ended");
        });

        Ok(rx)
    }

    fn stop_browse(&self, service_type: &str) -> Result<(), DiscoveryError> {
        self.daemon.stop_browse(&mdns_service_type(service_type))?;
        Ok(())
    }
}

impl Drop for MdnsBrowser {
    fn drop(&mut self) {
        if let Err(e) = self.daemon.shutdown() {
            warn!("mDNS daemon shutdown failed: {e}");
        }
    }
}

/// Translates one daemon event.  Returns `None` for events with nothing to
/// resolve.
pub(crate) fn to_advertisement(event: ServiceEvent, mdns_type: &str) -> Option<Advertisement> {
    match event {
        ServiceEvent::ServiceResolved(info) => Some(resolved(&info, mdns_type)),
        ServiceEvent::ServiceRemoved(_, fullname) => Some(Advertisement::Lost { fullname }),
        other => {
            trace!("mDNS event: {other:?}");
            None
        }
    }
}

fn resolved(info: &ServiceInfo, mdns_type: &str) -> Advertisement {
    let fullname = info.get_fullname().to_string();
    let instance_name = fullname
        .strip_suffix(mdns_type)
        .map(|s| s.trim_end_matches('.'))
        .unwrap_or(&fullname)
        .to_string();

    Advertisement::Resolved {
        instance_name,
        host: preferred_address(info).map(|ip| ip.to_string()),
        port: info.get_port(),
        fullname,
    }
}

/// Lowest IPv4 address if there is one, else the lowest address overall.
fn preferred_address(info: &ServiceInfo) -> Option<IpAddr> {
    let addresses = info.get_addresses();
    addresses
        .iter()
        .filter(|ip| ip.is_ipv4())
        .min()
        .or_else(|| addresses.iter().min())
        .copied()
}
