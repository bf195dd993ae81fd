//! The registry of open channels of a test harness.
//!
//! This is the only shared state of the engine. It is an explicit value the
//! harness owns and passes around, not a module-level global, so that
//! independent harness instances never interfere.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use super::ChannelId;
use crate::{device::Device, receiver::Receiver};

/// One registered endpoint: either a device (direct or through-receiver) or
/// a receiver.
#[derive(Clone)]
pub enum Endpoint {
    Device(Arc<Device>),
    Receiver(Arc<Receiver>),
}

impl Endpoint {
    /// Extracts the device, if the endpoint is one.
    pub fn device(&self) -> Option<&Arc<Device>> {
        match self {
            Endpoint::Device(device) => Some(device),
            Endpoint::Receiver(_) => None,
        }
    }

    /// Extracts the receiver, if the endpoint is one.
    pub fn receiver(&self) -> Option<&Arc<Receiver>> {
        match self {
            Endpoint::Device(_) => None,
            Endpoint::Receiver(receiver) => Some(receiver),
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    endpoints: HashMap<ChannelId, Endpoint>,
    current: Option<ChannelId>,
}

/// Holds the open channels of a harness, keyed by their identity, plus the
/// notion of the one "current" channel the test currently exercises.
///
/// Lookups are short; everything is guarded by a single lock.
#[derive(Default)]
pub struct ChannelRegistry {
    inner: Mutex<RegistryInner>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an endpoint under its channel identity, replacing a
    /// previous entry.
    pub fn register(&self, id: ChannelId, endpoint: Endpoint) {
        self.inner.lock().unwrap().endpoints.insert(id, endpoint);
    }

    /// Removes an endpoint. If it was the current one, there is no current
    /// channel afterwards.
    pub fn remove(&self, id: ChannelId) -> Option<Endpoint> {
        let mut inner = self.inner.lock().unwrap();
        if inner.current == Some(id) {
            inner.current = None;
        }
        inner.endpoints.remove(&id)
    }

    /// Looks up an endpoint by its channel identity.
    pub fn get(&self, id: ChannelId) -> Option<Endpoint> {
        self.inner.lock().unwrap().endpoints.get(&id).cloned()
    }

    /// Lists the identities of all registered endpoints.
    pub fn ids(&self) -> Vec<ChannelId> {
        self.inner.lock().unwrap().endpoints.keys().copied().collect()
    }

    /// Marks a registered endpoint as the current one.
    ///
    /// Returns whether the identity was known. For devices, raw HID reports
    /// of the channel are attributed to the current device from now on.
    pub fn set_current(&self, id: ChannelId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let Some(endpoint) = inner.endpoints.get(&id) else {
            return false;
        };

        if let Endpoint::Device(device) = endpoint {
            device
                .channel()
                .dispatcher()
                .set_hid_report_device(device.device_index);
        }

        inner.current = Some(id);
        true
    }

    /// The endpoint the test currently exercises, if any.
    pub fn current(&self) -> Option<Endpoint> {
        let inner = self.inner.lock().unwrap();
        let id = inner.current?;
        inner.endpoints.get(&id).cloned()
    }
}
