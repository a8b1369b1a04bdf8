use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;

use crate::status::StatusLevel;

/// Last state the monitor observed for one device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceState {
    pub online: bool,
    /// `None` while the device has no readings at all.
    pub overall: Option<StatusLevel>,
}

/// In-memory store of the last observed `DeviceState` per device id.
///
/// Wrapped in `Arc` so it can be cheaply cloned and shared across tasks.
/// Uses `tokio::sync::RwLock` so concurrent readers never block each other.
#[derive(Clone, Default)]
pub struct StatusCache {
    inner: Arc<RwLock<HashMap<String, DeviceState>>>,
}

impl StatusCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the new state for `device_id`, returning the previous one.
    pub async fn swap(&self, device_id: &str, state: DeviceState) -> Option<DeviceState> {
        self.inner.write().await.insert(device_id.to_owned(), state)
    }

    pub async fn get(&self, device_id: &str) -> Option<DeviceState> {
        self.inner.read().await.get(device_id).copied()
    }

    /// Drop cached states for devices not in `known_ids` (deleted devices).
    pub async fn retain_known(&self, known_ids: &[&str]) {
        self.inner
            .write()
            .await
            .retain(|id, _| known_ids.contains(&id.as_str()));
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}
