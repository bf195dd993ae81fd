//! Implements the feature starting with version 0.

use std::sync::Arc;

use super::{
    DpiListEntry,
    GET_SENSOR_COUNT_RESPONSE,
    GET_SENSOR_DPI_LIST_REQUEST,
    GET_SENSOR_DPI_LIST_RESPONSE,
    GET_SENSOR_DPI_REQUEST,
    GET_SENSOR_DPI_RESPONSE_V0,
    SET_SENSOR_DPI_REQUEST,
    parse_dpi_list,
};
use crate::{
    channel::{ChannelError, HidppChannel, SEND_TIMEOUT},
    codec::Message,
    feature::{CreatableFeature, Feature},
    nibble::U4,
    protocol::v20,
};

/// Implements the `AdjustableDpi` / `0x2201` feature.
///
/// The first version supported by this feature is v0.
#[derive(Clone)]
pub struct AdjustableDpiFeatureV0 {
    /// The underlying HID++ channel.
    chan: Arc<HidppChannel>,

    /// The index of the device to implement the feature for.
    device_index: u8,

    /// The index of the feature in the feature table.
    feature_index: u8,
}

impl CreatableFeature for AdjustableDpiFeatureV0 {
    const ID: u16 = 0x2201;
    const STARTING_VERSION: u8 = 0;

    fn new(chan: Arc<HidppChannel>, device_index: u8, feature_index: u8) -> Self {
        Self {
            chan,
            device_index,
            feature_index,
        }
    }
}

impl Feature for AdjustableDpiFeatureV0 {
}

impl AdjustableDpiFeatureV0 {
    pub(super) fn header(&self, function_id: u8) -> v20::MessageHeader {
        v20::MessageHeader {
            device_index: self.device_index,
            feature_index: self.feature_index,
            function_id: U4::from_lo(function_id),
            software_id: self.chan.sw_id(),
        }
    }

    pub(super) fn channel(&self) -> &Arc<HidppChannel> {
        &self.chan
    }

    /// Retrieves the amount of optical sensors the device carries.
    pub async fn get_sensor_count(&self) -> Result<u8, ChannelError> {
        let response = self
            .chan
            .send_v20(
                v20::Message::Short(self.header(0), [0x00, 0x00, 0x00]),
                SEND_TIMEOUT,
            )
            .await?;

        let decoded = Message::decode_payload(
            &GET_SENSOR_COUNT_RESPONSE,
            &response.extend_payload()[..16],
        )?;
        decoded
            .uint("sensor_count")
            .map(|value| value as u8)
            .ok_or(ChannelError::UnsupportedResponse)
    }

    /// Retrieves the DPI values and ranges a sensor supports.
    pub async fn get_sensor_dpi_list(
        &self,
        sensor_index: u8,
    ) -> Result<Vec<DpiListEntry>, ChannelError> {
        let mut request = Message::new(&GET_SENSOR_DPI_LIST_REQUEST);
        request.set_uint("sensor_index", sensor_index as u64)?;
        let payload = request.encode_payload()?;

        let response = self
            .chan
            .send_v20(
                v20::Message::Short(self.header(1), payload.try_into().unwrap()),
                SEND_TIMEOUT,
            )
            .await?;

        let decoded = Message::decode_payload(
            &GET_SENSOR_DPI_LIST_RESPONSE,
            &response.extend_payload()[..16],
        )?;
        decoded
            .bytes("dpi_list")
            .map(parse_dpi_list)
            .ok_or(ChannelError::UnsupportedResponse)
    }

    /// Retrieves the current DPI of a sensor.
    pub async fn get_sensor_dpi(&self, sensor_index: u8) -> Result<u16, ChannelError> {
        let response = self.send_get_sensor_dpi(sensor_index).await?;

        let decoded = Message::decode_payload(
            &GET_SENSOR_DPI_RESPONSE_V0,
            &response.extend_payload()[..16],
        )?;
        decoded
            .uint("dpi")
            .map(|value| value as u16)
            .ok_or(ChannelError::UnsupportedResponse)
    }

    pub(super) async fn send_get_sensor_dpi(
        &self,
        sensor_index: u8,
    ) -> Result<v20::Message, ChannelError> {
        let mut request = Message::new(&GET_SENSOR_DPI_REQUEST);
        request.set_uint("sensor_index", sensor_index as u64)?;
        let payload = request.encode_payload()?;

        self.chan
            .send_v20(
                v20::Message::Short(self.header(2), payload.try_into().unwrap()),
                SEND_TIMEOUT,
            )
            .await
    }

    /// Sets the DPI of a sensor.
    ///
    /// The value has to lie between [`super::MIN_DPI_VALUE`] and
    /// [`super::MAX_DPI_VALUE`] and is validated before it goes out; the
    /// device additionally rounds to the nearest value its DPI list allows.
    pub async fn set_sensor_dpi(&self, sensor_index: u8, dpi: u16) -> Result<(), ChannelError> {
        self.send_set_sensor_dpi(sensor_index, dpi).await?;
        Ok(())
    }

    pub(super) async fn send_set_sensor_dpi(
        &self,
        sensor_index: u8,
        dpi: u16,
    ) -> Result<v20::Message, ChannelError> {
        let mut request = Message::new(&SET_SENSOR_DPI_REQUEST);
        request.set_uint("sensor_index", sensor_index as u64)?;
        request.set_uint("dpi", dpi as u64)?;
        let payload = request.encode_payload()?;

        self.chan
            .send_v20(
                v20::Message::Short(self.header(3), payload.try_into().unwrap()),
                SEND_TIMEOUT,
            )
            .await
    }
}
