//! Discovered devices and the deduplicating registry that tracks them.
//!
//! The discovery layer turns raw service advertisements into
//! [`Advertisement`] events; [`DeviceRegistry::apply`] folds each event into
//! the known-device set and reports what changed.
//!
//! # Identity
//!
//! A device id is derived from the advertised instance name, host, and port
//! (`"{name}@{host}:{port}"`).  Resolving the same advertisement twice yields
//! the same id, so the second resolution is a no-op rather than a duplicate.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A peer found on the local network, ready to be connected to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Unique id derived from name, host, and port.
    pub device_id: String,
    /// Advertised instance name (e.g. `"MetroSync"`).
    pub device_name: String,
    /// Resolved host address.
    pub host: String,
    /// Resolved TCP port.
    pub port: u16,
}

impl DeviceRecord {
    /// Builds a record, deriving `device_id` from the other fields.
    pub fn new(device_name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        let device_name = device_name.into();
        let host = host.into();
        Self {
            device_id: derive_device_id(&device_name, &host, port),
            device_name,
            host,
            port,
        }
    }
}

/// Derives the stable device id for an advertisement.
pub fn derive_device_id(name: &str, host: &str, port: u16) -> String {
    format!("{name}@{host}:{port}")
}

/// A discovery-layer notification about one service advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advertisement {
    /// An advertisement was resolved to an address.
    Resolved {
        /// Fully qualified service name; the key used by later `Lost` events.
        fullname: String,
        /// Human-readable instance name.
        instance_name: String,
        /// First resolved address, if any.
        host: Option<String>,
        port: u16,
    },
    /// The advertisement with this fully qualified name went away.
    Lost { fullname: String },
}

/// A change to the known-device set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceChange {
    Found(DeviceRecord),
    Lost(DeviceRecord),
}

/// Why a resolved advertisement could not become a [`DeviceRecord`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("advertisement {fullname:?} has an empty instance name")]
    MissingName { fullname: String },
    #[error("advertisement {fullname:?} resolved without an address")]
    MissingHost { fullname: String },
    #[error("advertisement {fullname:?} resolved to port 0")]
    InvalidPort { fullname: String },
}

/// Deduplicated set of discovered devices, keyed by `device_id`.
///
/// Single writer: only the discovery task owns and mutates a registry.
/// Observers receive [`DeviceRegistry::records`] snapshots.
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    records: BTreeMap<String, DeviceRecord>,
    // fullname -> device_id currently resolved for that advertisement
    by_fullname: HashMap<String, String>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one advertisement event into the set.
    ///
    /// Returns the resulting changes, which are empty when the event did not
    /// alter the set (a repeated resolution, or a loss of an unknown
    /// advertisement).  When a known advertisement resolves to a new address,
    /// the old record is reported lost and the new one found.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError`] for a resolution with no name, no host, or
    /// port 0.  The set is left untouched in that case.
    pub fn apply(&mut self, event: Advertisement) -> Result<Vec<DeviceChange>, ResolveError> {
        match event {
            Advertisement::Resolved {
                fullname,
                instance_name,
                host,
                port,
            } => {
                let record = resolve_record(&fullname, instance_name, host, port)?;
                Ok(self.insert(fullname, record))
            }
            Advertisement::Lost { fullname } => Ok(self.remove_fullname(&fullname)),
        }
    }

    /// Returns the current set, ordered by `device_id`.
    pub fn records(&self) -> Vec<DeviceRecord> {
        self.records.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn insert(&mut self, fullname: String, record: DeviceRecord) -> Vec<DeviceChange> {
        if self.records.contains_key(&record.device_id) {
            return Vec::new();
        }

        let mut changes = Vec::with_capacity(2);
        if let Some(previous_id) = self.by_fullname.insert(fullname, record.device_id.clone()) {
            if let Some(previous) = self.records.remove(&previous_id) {
                changes.push(DeviceChange::Lost(previous));
            }
        }
        self.records.insert(record.device_id.clone(), record.clone());
        changes.push(DeviceChange::Found(record));
        changes
    }

    fn remove_fullname(&mut self, fullname: &str) -> Vec<DeviceChange> {
        self.by_fullname
            .remove(fullname)
            .and_then(|id| self.records.remove(&id))
            .map(DeviceChange::Lost)
            .into_iter()
            .collect()
    }
}

fn resolve_record(
    fullname: &str,
    instance_name: String,
    host: Option<String>,
    port: u16,
) -> Result<DeviceRecord, ResolveError> {
    if instance_name.trim().is_empty() {
        return Err(ResolveError::MissingName {
            fullname: fullname.to_string(),
        });
    }
    let host = host
        .filter(|h| !h.trim().is_empty())
        .ok_or_else(|| ResolveError::MissingHost {
            fullname: fullname.to_string(),
        })?;
    if port == 0 {
        return Err(ResolveError::InvalidPort {
            fullname: fullname.to_string(),
        });
    }
    Ok(DeviceRecord::new(instance_name, host, port))
}

// ── Tests ─────────────────────────────────────────────────────────────────────
