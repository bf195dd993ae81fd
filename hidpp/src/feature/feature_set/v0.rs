//! Implements the feature starting with version 0.

use std::sync::Arc;

use super::{
    GET_COUNT_RESPONSE,
    GET_FEATURE_ID_REQUEST,
    GET_FEATURE_ID_RESPONSE,
};
use crate::{
    channel::{ChannelError, HidppChannel, SEND_TIMEOUT},
    codec::Message,
    feature::{CreatableFeature, Feature, FeatureType},
    nibble::U4,
    protocol::v20,
};

/// Implements the `FeatureSet` / `0x0001` feature.
///
/// The first version supported by this feature is v0.
///
/// This feature is primarily used to collect all features supported by the
/// device. To achieve this, call [`Self::count`] to retrieve the amount of
/// supported features (excluding the root feature). Then call
/// [`Self::get_feature`] for every `i in 1..=count` (1-based, as accessing
/// the root feature is not allowed).
#[derive(Clone)]
pub struct FeatureSetFeatureV0 {
    /// The underlying HID++ channel.
    chan: Arc<HidppChannel>,

    /// The index of the device to implement the feature for.
    device_index: u8,

    /// The index of the feature in the feature table.
    feature_index: u8,
}

impl CreatableFeature for FeatureSetFeatureV0 {
    const ID: u16 = 0x0001;
    const STARTING_VERSION: u8 = 0;

    fn new(chan: Arc<HidppChannel>, device_index: u8, feature_index: u8) -> Self {
        Self {
            chan,
            device_index,
            feature_index,
        }
    }
}

impl Feature for FeatureSetFeatureV0 {
}

impl FeatureSetFeatureV0 {
    fn header(&self, function_id: u8) -> v20::MessageHeader {
        v20::MessageHeader {
            device_index: self.device_index,
            feature_index: self.feature_index,
            function_id: U4::from_lo(function_id),
            software_id: self.chan.sw_id(),
        }
    }

    /// Retrieves the amount of features supported by the device, not
    /// including the root feature.
    pub async fn count(&self) -> Result<u8, ChannelError> {
        let response = self
            .chan
            .send_v20(
                v20::Message::Short(self.header(0), [0x00, 0x00, 0x00]),
                SEND_TIMEOUT,
            )
            .await?;

        let decoded =
            Message::decode_payload(&GET_COUNT_RESPONSE, &response.extend_payload()[..16])?;
        decoded
            .uint("count")
            .map(|value| value as u8)
            .ok_or(ChannelError::UnsupportedResponse)
    }

    /// Retrieves the information about a specific feature based on its
    /// index in the feature table.
    ///
    /// Feature index `0` for the root feature is not allowed.
    pub async fn get_feature(&self, index: u8) -> Result<FeatureInformation, ChannelError> {
        let mut request = Message::new(&GET_FEATURE_ID_REQUEST);
        request.set_uint("feature_index", index as u64)?;
        let payload = request.encode_payload()?;

        let response = self
            .chan
            .send_v20(
                v20::Message::Short(self.header(1), payload.try_into().unwrap()),
                SEND_TIMEOUT,
            )
            .await?;

        let raw = response.extend_payload();
        let decoded = Message::decode_payload(&GET_FEATURE_ID_RESPONSE, &raw[..16])?;

        Ok(FeatureInformation {
            id: decoded.uint("feature_id").unwrap_or(0) as u16,
            typ: FeatureType::from(raw[2]),
            version: decoded.uint("feature_version").unwrap_or(0) as u8,
        })
    }
}

/// Represents information about a specific feature as returned by the
/// [`FeatureSetFeatureV0::get_feature`] function.
#[derive(Clone, Copy, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct FeatureInformation {
    /// The protocol ID of the feature.
    pub id: u16,

    /// The type of the feature.
    pub typ: FeatureType,

    /// The latest supported version of the feature.
    ///
    /// Multi-version features are always backwards compatible as long as
    /// the feature ID does not change, meaning functions implemented for an
    /// older version of the same feature will behave as expected for every
    /// later version.
    ///
    /// This field was added in feature version 1 and will be `0` for all
    /// older versions.
    pub version: u8,
}
