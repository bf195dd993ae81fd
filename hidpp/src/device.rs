//! Implements peripheral devices connected to HID++ channels.

use std::{
    any::TypeId,
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use thiserror::Error;

use crate::{
    channel::{ChannelError, HidppChannel, SEND_TIMEOUT},
    feature::{
        self,
        CreatableFeature,
        Feature,
        feature_set::v0::{FeatureInformation, FeatureSetFeatureV0},
        root::RootFeature,
    },
    protocol::{self, ProtocolVersion},
};

/// The resolved slot of a feature on one device, cached per feature ID.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FeatureSlot {
    /// The index of the feature in the device's feature table.
    pub index: u8,

    /// The feature version the device reported.
    pub version: u8,
}

/// Represents a single HID++ device connected to a [`HidppChannel`].
///
/// This is used only for peripheral devices and not receivers.
///
/// The device owns the feature mapping learned through the root feature.
/// The mapping is invalidated by [`Self::invalidate_features`] on reset,
/// reconnect or a DFU transition between main application and bootloader.
pub struct Device {
    /// The underlying HID++ channel.
    chan: Arc<HidppChannel>,

    /// The initialized implementations of features the device supports.
    features: Mutex<HashMap<TypeId, Arc<dyn Feature>>>,

    /// The feature slots resolved through the root feature, cached so that
    /// every feature ID causes at most one lookup round-trip.
    slots: Mutex<HashMap<u16, FeatureSlot>>,

    /// The index of the device on the HID++ channel.
    pub device_index: u8,

    /// The supported protocol version reported by the device.
    pub protocol_version: ProtocolVersion,
}

impl Device {
    /// Tries to initialize a device on a HID++ channel.
    ///
    /// This will automatically ping the device to determine the protocol
    /// version it supports via [`protocol::determine_version`].
    ///
    /// Returns [`DeviceError::DeviceNotFound`] if there is no device with
    /// the specified index answering on the channel.
    ///
    /// Returns [`DeviceError::UnsupportedProtocolVersion`] if the device
    /// only supports [`ProtocolVersion::V10`].
    pub async fn new(chan: Arc<HidppChannel>, device_index: u8) -> Result<Self, DeviceError> {
        Self::with_timeout(chan, device_index, SEND_TIMEOUT).await
    }

    /// Like [`Self::new`], but with a caller-supplied deadline for the
    /// protocol version handshake. Useful while a device is still booting.
    pub async fn with_timeout(
        chan: Arc<HidppChannel>,
        device_index: u8,
        timeout: Duration,
    ) -> Result<Self, DeviceError> {
        let protocol_version = protocol::determine_version(&chan, device_index, timeout).await?;

        let Some(version) = protocol_version else {
            return Err(DeviceError::DeviceNotFound);
        };

        if version == ProtocolVersion::V10 {
            return Err(DeviceError::UnsupportedProtocolVersion);
        }

        let device = Self {
            chan,
            features: Mutex::new(HashMap::new()),
            slots: Mutex::new(HashMap::new()),
            device_index,
            protocol_version: version,
        };

        // Every HID++2.0 device supports the root feature.
        // We implicitly verified that using [`protocol::determine_version`].
        device.add_feature::<RootFeature>(0);
        device
            .chan
            .dispatcher()
            .add_feature_entry(device_index, 0, RootFeature::ID, 0);

        Ok(device)
    }

    /// The channel the device communicates over.
    pub fn channel(&self) -> &Arc<HidppChannel> {
        &self.chan
    }

    /// A convenience wrapper around [`Self::get_feature`] to obtain the
    /// root feature.
    pub fn root(&self) -> Arc<RootFeature> {
        self.get_feature::<RootFeature>().unwrap()
    }

    /// Pings the device with a random payload byte and verifies the echo.
    pub async fn ping(&self, timeout: Duration) -> Result<(), ChannelError> {
        let salt: u8 = rand::random();
        let echo = self.root().ping_with_timeout(salt, timeout).await?;

        if echo == salt {
            Ok(())
        } else {
            Err(ChannelError::UnsupportedResponse)
        }
    }

    /// Adds a new feature implementation to the list of available features.
    /// This will override an existing implementation of the same type.
    /// The caller is responsible for making sure the device actually
    /// supports the feature.
    pub fn add_feature_instance<F: Feature>(&self, feature: F) -> Arc<F> {
        let feat_rc: Arc<dyn Feature> = Arc::new(feature);

        self.features
            .lock()
            .unwrap()
            .insert(TypeId::of::<F>(), Arc::clone(&feat_rc));

        Arc::downcast::<F>(feat_rc).unwrap()
    }

    /// Adds a new feature implementation to the list of available features
    /// using [`CreatableFeature`] to construct it.
    pub fn add_feature<F: CreatableFeature>(&self, feature_index: u8) -> Arc<F> {
        self.add_feature_instance(F::new(
            Arc::clone(&self.chan),
            self.device_index,
            feature_index,
        ))
    }

    /// Checks whether a specific feature implementation is provided by the
    /// device.
    pub fn provides_feature<F: Feature>(&self) -> bool {
        self.features
            .lock()
            .unwrap()
            .contains_key(&TypeId::of::<F>())
    }

    /// Tries to retrieve an already initialized feature implementation from
    /// the device.
    ///
    /// Returns [`None`] if the requested feature implementation is not
    /// provided. Use [`Self::feature`] to resolve and initialize it on
    /// demand.
    pub fn get_feature<F: Feature>(&self) -> Option<Arc<F>> {
        self.features
            .lock()
            .unwrap()
            .get(&TypeId::of::<F>())
            .cloned()
            .and_then(|feat| Arc::downcast::<F>(feat).ok())
    }

    /// Resolves the feature slot of a feature ID through the root feature,
    /// using the cached mapping where available.
    ///
    /// After a cache miss the resolved slot is also announced to the
    /// channel's dispatcher so that unsolicited messages of the feature can
    /// be classified.
    ///
    /// Returns [`ChannelError::FeatureNotSupported`] if the device does not
    /// support the feature.
    pub async fn feature_slot(&self, feature_id: u16) -> Result<FeatureSlot, ChannelError> {
        if let Some(slot) = self.slots.lock().unwrap().get(&feature_id) {
            return Ok(*slot);
        }

        let info = self
            .root()
            .get_feature(feature_id)
            .await?
            .ok_or(ChannelError::FeatureNotSupported(feature_id))?;

        // A device reporting a feature version newer than anything this
        // crate was written against still works: the newest known
        // implementation is used, as feature versions are backwards
        // compatible.
        if let Some(max_known) = feature::registry::max_known_version(feature_id) {
            if info.version > max_known {
                tracing::warn!(
                    feature_id = format_args!("{feature_id:#06x}"),
                    reported = info.version,
                    known = max_known,
                    "device reports a feature version newer than any known one"
                );
            }
        }

        let slot = FeatureSlot {
            index: info.index,
            version: info.version,
        };

        self.slots.lock().unwrap().insert(feature_id, slot);
        self.chan.dispatcher().add_feature_entry(
            self.device_index,
            info.index,
            feature_id,
            info.version,
        );

        Ok(slot)
    }

    /// Resolves and initializes a feature implementation on demand.
    ///
    /// The feature slot is looked up through the root feature (one
    /// round-trip, cached afterwards) and the implementation is
    /// instantiated and cached.
    pub async fn feature<F: CreatableFeature>(&self) -> Result<Arc<F>, ChannelError> {
        if let Some(feat) = self.get_feature::<F>() {
            return Ok(feat);
        }

        let slot = self.feature_slot(F::ID).await?;
        if slot.version < F::STARTING_VERSION {
            return Err(ChannelError::FeatureNotSupported(F::ID));
        }

        Ok(self.add_feature::<F>(slot.index))
    }

    /// Tries to detect all features supported by the device and add
    /// implementations for them using
    /// [`feature::registry::lookup_version`].
    ///
    /// Returns a vector containing all feature information supported by the
    /// device.
    ///
    /// Returns `Ok(None)` if the [`FeatureSetFeatureV0`] feature, which is
    /// required for feature enumeration, is not supported by the device.
    pub async fn enumerate_features(
        &self,
    ) -> Result<Option<Vec<FeatureInformation>>, ChannelError> {
        let feature_set_slot = match self.feature_slot(FeatureSetFeatureV0::ID).await {
            Ok(slot) => slot,
            Err(ChannelError::FeatureNotSupported(_)) => return Ok(None),
            Err(err) => return Err(err),
        };

        let feature_set_feature = self.add_feature::<FeatureSetFeatureV0>(feature_set_slot.index);

        let count = feature_set_feature.count().await?;
        let mut features = Vec::with_capacity(count as usize);
        for index in 1..=count {
            let info = feature_set_feature.get_feature(index).await?;
            features.push(info);

            self.slots.lock().unwrap().insert(info.id, FeatureSlot {
                index,
                version: info.version,
            });
            self.chan
                .dispatcher()
                .add_feature_entry(self.device_index, index, info.id, info.version);

            if index == feature_set_slot.index {
                continue;
            }

            let Some(impls) = feature::registry::lookup_version(info.id, info.version) else {
                continue;
            };

            for feat_impl in impls {
                let (type_id, instance) =
                    (feat_impl.producer)(Arc::clone(&self.chan), self.device_index, index);

                self.features.lock().unwrap().insert(type_id, instance);
            }
        }

        Ok(Some(features))
    }

    /// Drops every cached feature implementation and the learned feature
    /// mapping.
    ///
    /// Required after anything that renumbers the feature table: a device
    /// reset, a reconnect or a DFU transition between main application and
    /// bootloader.
    pub fn invalidate_features(&self) {
        self.features.lock().unwrap().clear();
        self.slots.lock().unwrap().clear();
        self.chan
            .dispatcher()
            .clear_feature_entries(self.device_index);

        // The root feature survives at index 0 by definition.
        self.add_feature::<RootFeature>(0);
        self.chan
            .dispatcher()
            .add_feature_entry(self.device_index, 0, RootFeature::ID, 0);
    }

    /// Detaches the device from its channel: fails its in-flight requests
    /// and forgets its feature mapping, leaving sibling devices on the same
    /// channel untouched.
    pub fn detach(&self) {
        self.chan.detach_device(self.device_index);
        self.features.lock().unwrap().clear();
        self.slots.lock().unwrap().clear();
    }
}

/// Represents a device-specific error.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Indicates that the underlying [`HidppChannel`] returned an error.
    #[error("the HID++ channel returned an error")]
    Channel(#[from] ChannelError),

    /// Indicates that the specified device index points to no device.
    #[error("there is no device with the specified device index")]
    DeviceNotFound,

    /// Indicates that the addressed device does only support HID++1.0.
    #[error("the device does not support HID++2.0 or newer")]
    UnsupportedProtocolVersion,
}
