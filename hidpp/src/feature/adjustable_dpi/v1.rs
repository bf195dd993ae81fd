//! Implements the feature starting with version 1.

use std::sync::Arc;

use super::{GET_SENSOR_DPI_RESPONSE_V1, v0::AdjustableDpiFeatureV0};
use crate::{
    channel::{ChannelError, HidppChannel},
    codec::Message,
    feature::{CreatableFeature, Feature},
};

/// Implements the `AdjustableDpi` / `0x2201` feature starting with
/// version 1.
///
/// Version 1 extends the DPI readout with the sensor's default DPI.
#[derive(Clone)]
pub struct AdjustableDpiFeatureV1 {
    inner: AdjustableDpiFeatureV0,
}

impl CreatableFeature for AdjustableDpiFeatureV1 {
    const ID: u16 = 0x2201;
    const STARTING_VERSION: u8 = 1;

    fn new(chan: Arc<HidppChannel>, device_index: u8, feature_index: u8) -> Self {
        Self {
            inner: AdjustableDpiFeatureV0::new(chan, device_index, feature_index),
        }
    }
}

impl Feature for AdjustableDpiFeatureV1 {
}

impl std::ops::Deref for AdjustableDpiFeatureV1 {
    type Target = AdjustableDpiFeatureV0;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl AdjustableDpiFeatureV1 {
    /// Retrieves the current and the factory-default DPI of a sensor.
    pub async fn get_sensor_dpi_with_default(
        &self,
        sensor_index: u8,
    ) -> Result<(u16, u16), ChannelError> {
        let response = self.inner.send_get_sensor_dpi(sensor_index).await?;

        let decoded = Message::decode_payload(
            &GET_SENSOR_DPI_RESPONSE_V1,
            &response.extend_payload()[..16],
        )?;

        let dpi = decoded
            .uint("dpi")
            .ok_or(ChannelError::UnsupportedResponse)?;
        let default_dpi = decoded
            .uint("default_dpi")
            .ok_or(ChannelError::UnsupportedResponse)?;
        Ok((dpi as u16, default_dpi as u16))
    }
}
