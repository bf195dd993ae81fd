//! Implements the feature starting with version 2.

use std::sync::Arc;

use super::{
    GET_NUMBER_OF_DPI_LEVELS_RESPONSE,
    SET_SENSOR_DPI_RESPONSE_V2,
    v1::AdjustableDpiFeatureV1,
};
use crate::{
    channel::{ChannelError, HidppChannel, SEND_TIMEOUT},
    codec::Message,
    feature::{CreatableFeature, Feature},
    protocol::v20,
};

/// Implements the `AdjustableDpi` / `0x2201` feature starting with
/// version 2.
///
/// Version 2 adds DPI levels: predefined resolution slots cycled through by
/// a dedicated button.
#[derive(Clone)]
pub struct AdjustableDpiFeatureV2 {
    inner: AdjustableDpiFeatureV1,
}

impl CreatableFeature for AdjustableDpiFeatureV2 {
    const ID: u16 = 0x2201;
    const STARTING_VERSION: u8 = 2;

    fn new(chan: Arc<HidppChannel>, device_index: u8, feature_index: u8) -> Self {
        Self {
            inner: AdjustableDpiFeatureV1::new(chan, device_index, feature_index),
        }
    }
}

impl Feature for AdjustableDpiFeatureV2 {
}

impl std::ops::Deref for AdjustableDpiFeatureV2 {
    type Target = AdjustableDpiFeatureV1;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl AdjustableDpiFeatureV2 {
    /// Retrieves the amount of DPI levels the device supports.
    pub async fn get_number_of_dpi_levels(&self) -> Result<u8, ChannelError> {
        let response = self
            .inner
            .channel()
            .send_v20(
                v20::Message::Short(self.inner.header(4), [0x00, 0x00, 0x00]),
                SEND_TIMEOUT,
            )
            .await?;

        let decoded = Message::decode_payload(
            &GET_NUMBER_OF_DPI_LEVELS_RESPONSE,
            &response.extend_payload()[..16],
        )?;
        decoded
            .uint("dpi_levels")
            .map(|value| value as u8)
            .ok_or(ChannelError::UnsupportedResponse)
    }

    /// Sets the DPI of a sensor and reports which DPI level, if any, the
    /// new value corresponds to.
    pub async fn set_sensor_dpi_with_level(
        &self,
        sensor_index: u8,
        dpi: u16,
    ) -> Result<u8, ChannelError> {
        let response = self.inner.send_set_sensor_dpi(sensor_index, dpi).await?;

        let decoded = Message::decode_payload(
            &SET_SENSOR_DPI_RESPONSE_V2,
            &response.extend_payload()[..16],
        )?;
        decoded
            .uint("dpi_level")
            .map(|value| value as u8)
            .ok_or(ChannelError::UnsupportedResponse)
    }
}
