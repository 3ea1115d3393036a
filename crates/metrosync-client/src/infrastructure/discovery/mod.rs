//! Peer discovery: browse the local network for phones running MetroSync.
//!
//! The [`DiscoveryService`] owns the deduplicated set of known devices.  It is
//! the only writer of that set; observers get whole snapshots through a
//! `watch` channel and a stream of [`DiscoveryEvent`]s through the receiver
//! returned by [`DiscoveryService::start_discovery`].  Events are delivered
//! with `try_send`: a receiver that is not drained loses events but never
//! stalls the device set.
//!
//! The multicast side sits behind the [`ServiceBrowser`] trait so the device
//! set logic can be exercised without a network.  [`mdns::MdnsBrowser`] is
//! the production implementation.
//!
//! Resolution failures (an advertisement with no address, an empty name, or
//! port 0) are logged and dropped; they never stop the browse.

pub mod mdns;

use std::sync::{Arc, Mutex, PoisonError};

use metrosync_core::{Advertisement, DeviceChange, DeviceRecord, DeviceRegistry};
use thiserror::Error;
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        watch,
    },
    task::JoinHandle,
};
use tracing::{debug, info, warn};

pub use mdns::MdnsBrowser;

/// Capacity of the event channel handed to callers.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Browse start/stop failures.  Never fatal to an existing connection.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The mDNS daemon refused the request.
    #[error("mDNS daemon error: {0}")]
    Mdns(#[from] mdns_sd::Error),

    /// The browser could not start for another reason.
    #[error("browse for {service_type} failed: {reason}")]
    Browse {
        service_type: String,
        reason: String,
    },
}

/// A change to the discovered-device set, as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    DeviceFound(DeviceRecord),
    DeviceLost(DeviceRecord),
}

impl From<DeviceChange> for DiscoveryEvent {
    fn from(change: DeviceChange) -> Self {
        match change {
            DeviceChange::Found(record) => DiscoveryEvent::DeviceFound(record),
            DeviceChange::Lost(record) => DiscoveryEvent::DeviceLost(record),
        }
    }
}

/// Source of raw service advertisements.
pub trait ServiceBrowser: Send + Sync {
    /// Starts browsing for `service_type`.  Advertisements arrive on the
    /// returned channel until [`ServiceBrowser::stop_browse`] is called.
    fn browse(&self, service_type: &str) -> Result<mpsc::Receiver<Advertisement>, DiscoveryError>;

    /// Stops a browse started with [`ServiceBrowser::browse`].
    fn stop_browse(&self, service_type: &str) -> Result<(), DiscoveryError>;
}

/// Restartable browse session over a [`ServiceBrowser`].
pub struct DiscoveryService {
    browser: Arc<dyn ServiceBrowser>,
    service_type: String,
    devices_tx: Arc<watch::Sender<Vec<DeviceRecord>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl DiscoveryService {
    pub fn new(browser: Arc<dyn ServiceBrowser>, service_type: impl Into<String>) -> Self {
        let (devices_tx, _) = watch::channel(Vec::new());
        Self {
            browser,
            service_type: service_type.into(),
            devices_tx: Arc::new(devices_tx),
            task: Mutex::new(None),
        }
    }

    /// Begins a fresh browse.
    ///
    /// Any previous browse is stopped first and the device set starts empty.
    /// The returned receiver yields `DeviceFound` / `DeviceLost` events for
    /// as long as the browse runs; dropping it does not stop the browse.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] if the browser cannot start.
    pub async fn start_discovery(&self) -> Result<mpsc::Receiver<DiscoveryEvent>, DiscoveryError> {
        self.stop_discovery().await;

        let adverts = self.browser.browse(&self.service_type)?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let devices_tx = Arc::clone(&self.devices_tx);
        let handle = tokio::spawn(discovery_loop(adverts, events_tx, devices_tx));

        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        info!("discovery started for {}", self.service_type);
        Ok(events_rx)
    }

    /// Ends the browse (if any) and clears the device set.
    pub async fn stop_discovery(&self) {
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };

        handle.abort();
        // Wait for the loop to finish so it cannot republish after the clear.
        let _ = handle.await;

        if let Err(e) = self.browser.stop_browse(&self.service_type) {
            warn!("failed to stop browsing {}: {e}", self.service_type);
        }
        self.devices_tx.send_replace(Vec::new());
        info!("discovery stopped for {}", self.service_type);
    }

    /// Subscribes to device-set snapshots.
    pub fn devices(&self) -> watch::Receiver<Vec<DeviceRecord>> {
        self.devices_tx.subscribe()
    }

    /// Current device set.
    pub fn snapshot(&self) -> Vec<DeviceRecord> {
        self.devices_tx.borrow().clone()
    }

    /// Returns `true` while a browse is active.
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

/// Single writer of the device set for one browse.
async fn discovery_loop(
    mut adverts: mpsc::Receiver<Advertisement>,
    events_tx: mpsc::Sender<DiscoveryEvent>,
    devices_tx: Arc<watch::Sender<Vec<DeviceRecord>>>,
) {
    let mut registry = DeviceRegistry::new();
    devices_tx.send_replace(Vec::new());
    let mut listening = true;

    while let Some(advert) = adverts.recv().await {
        let changes = match registry.apply(advert) {
            Ok(changes) => changes,
            Err(e) => {
                warn!("dropping advertisement: {e}");
                continue;
            }
        };
        if changes.is_empty() {
            continue;
        }

        devices_tx.send_replace(registry.records());
        for change in changes {
            match &change {
                DeviceChange::Found(r) => info!("device found: {} at {}:{}", r.device_name, r.host, r.port),
                DeviceChange::Lost(r) => info!("device lost: {}", r.device_id),
            }
            if !listening {
                continue;
            }
            match events_tx.try_send(change.into()) {
                Ok(()) => {}
                Err(TrySendError::Full(event)) => {
                    warn!("discovery event receiver is full; dropping {event:?}");
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("discovery event receiver dropped; keeping device set only");
                    listening = false;
                }
            }
        }
    }

    debug!("advertisement stream closed");
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Browser whose advertisements are pushed by the test.
    #[derive(Default)]
    struct FakeBrowser {
        sender: Mutex<Option<mpsc::Sender<Advertisement>>>,
        browses: Mutex<u32>,
        stops: Mutex<u32>,
        fail: bool,
    }

    impl FakeBrowser {
        fn sender(&self) -> mpsc::Sender<Advertisement> {
            self.sender.lock().unwrap().clone().expect("browse not started")
        }
    }

    impl ServiceBrowser for FakeBrowser {
        fn browse(&self, service_type: &str) -> Result<mpsc::Receiver<Advertisement>, DiscoveryError> {
            if self.fail {
                return Err(DiscoveryError::Browse {
                    service_type: service_type.to_string(),
                    reason: "no multicast".to_string(),
                });
            }
            let (tx, rx) = mpsc::channel(16);
            *self.sender.lock().unwrap() = Some(tx);
            *self.browses.lock().unwrap() += 1;
            Ok(rx)
        }

        fn stop_browse(&self, _service_type: &str) -> Result<(), DiscoveryError> {
            *self.stops.lock().unwrap() += 1;
            Ok(())
        }
    }

    fn resolved(name: &str, host: &str, port: u16) -> Advertisement {
        Advertisement::Resolved {
            fullname: format!("{name}._metrosync._tcp.local."),
            instance_name: name.to_string(),
            host: Some(host.to_string()),
            port,
        }
    }

    async fn next_event(rx: &mut mpsc::Receiver<DiscoveryEvent>) -> DiscoveryEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for discovery event")
            .expect("event channel closed")
    }

    fn service(browser: &Arc<FakeBrowser>) -> DiscoveryService {
        DiscoveryService::new(browser.clone(), "_metrosync._tcp.")
    }

    #[tokio::test]
    async fn test_resolved_advertisement_emits_device_found() {
        // Arrange
        let browser = Arc::new(FakeBrowser::default());
        let discovery = service(&browser);
        let mut events = discovery.start_discovery().await.unwrap();

        // Act
        browser.sender().send(resolved("Pixel", "192.168.1.20", 45678)).await.unwrap();

        // Assert
        let event = next_event(&mut events).await;
        assert_eq!(
            event,
            DiscoveryEvent::DeviceFound(DeviceRecord::new("Pixel", "192.168.1.20", 45678))
        );
        assert_eq!(discovery.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_resolution_yields_one_record_and_one_event() {
        let browser = Arc::new(FakeBrowser::default());
        let discovery = service(&browser);
        let mut events = discovery.start_discovery().await.unwrap();
        let tx = browser.sender();

        tx.send(resolved("Pixel", "10.0.0.2", 45678)).await.unwrap();
        tx.send(resolved("Pixel", "10.0.0.2", 45678)).await.unwrap();
        tx.send(resolved("Tablet", "10.0.0.3", 45678)).await.unwrap();

        assert!(matches!(next_event(&mut events).await, DiscoveryEvent::DeviceFound(r) if r.device_name == "Pixel"));
        // The duplicate produced nothing; the next event is the tablet.
        assert!(matches!(next_event(&mut events).await, DiscoveryEvent::DeviceFound(r) if r.device_name == "Tablet"));
        assert_eq!(discovery.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_lost_advertisement_removes_record() {
        let browser = Arc::new(FakeBrowser::default());
        let discovery = service(&browser);
        let mut events = discovery.start_discovery().await.unwrap();
        let tx = browser.sender();

        tx.send(resolved("Pixel", "10.0.0.2", 45678)).await.unwrap();
        let _ = next_event(&mut events).await;
        tx.send(Advertisement::Lost {
            fullname: "Pixel._metrosync._tcp.local.".to_string(),
        })
        .await
        .unwrap();

        assert!(matches!(next_event(&mut events).await, DiscoveryEvent::DeviceLost(_)));
        assert!(discovery.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_unresolvable_advertisement_is_dropped_and_browse_continues() {
        let browser = Arc::new(FakeBrowser::default());
        let discovery = service(&browser);
        let mut events = discovery.start_discovery().await.unwrap();
        let tx = browser.sender();

        tx.send(Advertisement::Resolved {
            fullname: "Broken._metrosync._tcp.local.".to_string(),
            instance_name: "Broken".to_string(),
            host: None,
            port: 45678,
        })
        .await
        .unwrap();
        tx.send(resolved("Pixel", "10.0.0.2", 45678)).await.unwrap();

        assert!(matches!(next_event(&mut events).await, DiscoveryEvent::DeviceFound(r) if r.device_name == "Pixel"));
        assert_eq!(discovery.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_restart_yields_fresh_empty_set() {
        // Arrange: one device found in the first browse
        let browser = Arc::new(FakeBrowser::default());
        let discovery = service(&browser);
        let mut events = discovery.start_discovery().await.unwrap();
        browser.sender().send(resolved("Pixel", "10.0.0.2", 45678)).await.unwrap();
        let _ = next_event(&mut events).await;

        // Act
        discovery.stop_discovery().await;
        assert!(discovery.snapshot().is_empty());
        assert!(!discovery.is_running());
        let mut events = discovery.start_discovery().await.unwrap();

        // Assert: same advertisement is "new" again in the fresh session
        assert!(discovery.snapshot().is_empty());
        browser.sender().send(resolved("Pixel", "10.0.0.2", 45678)).await.unwrap();
        assert!(matches!(next_event(&mut events).await, DiscoveryEvent::DeviceFound(_)));
        assert_eq!(*browser.browses.lock().unwrap(), 2);
        assert_eq!(*browser.stops.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_browse_failure_is_reported() {
        let browser = Arc::new(FakeBrowser {
            fail: true,
            ..Default::default()
        });
        let discovery = service(&browser);

        let result = discovery.start_discovery().await;

        assert!(matches!(result, Err(DiscoveryError::Browse { .. })));
        assert!(!discovery.is_running());
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let browser = Arc::new(FakeBrowser::default());
        let discovery = service(&browser);

        discovery.stop_discovery().await;

        assert_eq!(*browser.stops.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_undrained_event_receiver_does_not_stall_device_set() {
        // Arrange: the caller holds the receiver but only watches devices()
        let browser = Arc::new(FakeBrowser::default());
        let discovery = service(&browser);
        let mut devices = discovery.devices();
        let _events = discovery.start_discovery().await.unwrap();
        let tx = browser.sender();
        let total = EVENT_CHANNEL_CAPACITY + 6;

        // Act: more distinct devices than the event channel holds, then a loss
        for i in 0..total {
            tx.send(resolved(&format!("Phone{i}"), "10.0.0.2", 45678))
                .await
                .unwrap();
        }
        tx.send(Advertisement::Lost {
            fullname: "Phone0._metrosync._tcp.local.".to_string(),
        })
        .await
        .unwrap();

        // Assert: the set still follows the browse
        let snapshot = tokio::time::timeout(
            Duration::from_secs(2),
            devices.wait_for(|d| d.len() == total - 1),
        )
        .await
        .expect("device set stalled")
        .unwrap()
        .clone();
        assert!(snapshot.iter().all(|r| r.device_name != "Phone0"));
    }

    #[tokio::test]
    async fn test_devices_watch_sees_snapshot() {
        let browser = Arc::new(FakeBrowser::default());
        let discovery = service(&browser);
        let mut devices = discovery.devices();
        let _events = discovery.start_discovery().await.unwrap();

        browser.sender().send(resolved("Pixel", "10.0.0.2", 45678)).await.unwrap();

        let snapshot = tokio::time::timeout(
            Duration::from_secs(2),
            devices.wait_for(|d| !d.is_empty()),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert_eq!(snapshot[0].device_id, "Pixel@10.0.0.2:45678");
    }
}
