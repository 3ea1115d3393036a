//! mDNS advertisement of the MetroSync service.
//!
//! The server registers one instance of `_metrosync._tcp.local.` on the
//! listening port.  When no explicit address is configured the daemon
//! publishes every interface address and follows interface changes.

use std::collections::HashMap;

use mdns_sd::{ServiceDaemon, ServiceInfo};
use metrosync_core::mdns_service_type;
use thiserror::Error;
use tracing::{info, warn};

/// Error type for advertisement operations.
#[derive(Debug, Error)]
pub enum AdvertiseError {
    #[error("mDNS daemon error: {0}")]
    Mdns(#[from] mdns_sd::Error),

    #[error("service name must not be empty")]
    EmptyName,
}

/// What to advertise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    /// Wire service type, e.g. `_metrosync._tcp.`.
    pub service_type: String,
    /// Instance name shown to companions.
    pub service_name: String,
    pub port: u16,
    /// Fixed address to publish; `None` publishes all interfaces.
    pub ip: Option<String>,
}

/// A live registration.  Unregisters on [`ServiceAdvertiser::stop`] or drop.
pub struct ServiceAdvertiser {
    daemon: ServiceDaemon,
    fullname: String,
    stopped: bool,
}

impl ServiceAdvertiser {
    /// Starts an mDNS daemon and registers `ad`.
    pub fn start(ad: &Advertisement) -> Result<Self, AdvertiseError> {
        let info = build_service_info(ad)?;
        let fullname = info.get_fullname().to_string();

        let daemon = ServiceDaemon::new()?;
        daemon.register(info)?;
        info!("advertising {fullname} on port {}", ad.port);

        Ok(Self {
            daemon,
            fullname,
            stopped: false,
        })
    }

    /// Fully qualified instance name, e.g. `Phone._metrosync._tcp.local.`.
    pub fn fullname(&self) -> &str {
        &self.fullname
    }

    /// Withdraws the advertisement and stops the daemon.
    pub fn stop(mut self) -> Result<(), AdvertiseError> {
        self.withdraw()
    }

    fn withdraw(&mut self) -> Result<(), AdvertiseError> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        self.daemon.unregister(&self.fullname)?;
        self.daemon.shutdown()?;
        info!("stopped advertising {}", self.fullname);
        Ok(())
    }
}

impl Drop for ServiceAdvertiser {
    fn drop(&mut self) {
        if let Err(e) = self.withdraw() {
            warn!("failed to withdraw {}: {e}", self.fullname);
        }
    }
}

/// Host label derived from the instance name: `Living Room` → `Living-Room.local.`.
pub fn host_name(service_name: &str) -> String {
    let label: String = service_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .collect();
    format!("{label}.local.")
}

/// Builds the `ServiceInfo` to register.
pub fn build_service_info(ad: &Advertisement) -> Result<ServiceInfo, AdvertiseError> {
    if ad.service_name.trim().is_empty() {
        return Err(AdvertiseError::EmptyName);
    }

    let ip = ad.ip.as_deref().unwrap_or("");
    let info = ServiceInfo::new(
        &mdns_service_type(&ad.service_type),
        &ad.service_name,
        &host_name(&ad.service_name),
        ip,
        ad.port,
        HashMap::<String, String>::new(),
    )?;

    Ok(if ad.ip.is_none() {
        info.enable_addr_auto()
    } else {
        info
    })
}
