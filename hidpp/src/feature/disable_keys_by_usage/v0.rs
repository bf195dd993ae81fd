//! Implements the feature starting with version 0.

use std::sync::Arc;

use super::{
    DISABLE_KEYS_REQUEST,
    ENABLE_KEYS_REQUEST,
    GET_CAPABILITIES_RESPONSE,
    USAGES_PER_REQUEST,
};
use crate::{
    channel::{ChannelError, HidppChannel, SEND_TIMEOUT},
    codec::Message,
    feature::{CreatableFeature, Feature},
    nibble::U4,
    protocol::v20,
};

/// Implements the `DisableKeysByUsage` / `0x4522` feature.
///
/// The first version supported by this feature is v0.
///
/// Disabled keys stop producing HID reports entirely until they are enabled
/// again or the device resets.
#[derive(Clone)]
pub struct DisableKeysByUsageFeatureV0 {
    /// The underlying HID++ channel.
    chan: Arc<HidppChannel>,

    /// The index of the device to implement the feature for.
    device_index: u8,

    /// The index of the feature in the feature table.
    feature_index: u8,
}

impl CreatableFeature for DisableKeysByUsageFeatureV0 {
    const ID: u16 = 0x4522;
    const STARTING_VERSION: u8 = 0;

    fn new(chan: Arc<HidppChannel>, device_index: u8, feature_index: u8) -> Self {
        Self {
            chan,
            device_index,
            feature_index,
        }
    }
}

impl Feature for DisableKeysByUsageFeatureV0 {
}

impl DisableKeysByUsageFeatureV0 {
    fn header(&self, function_id: u8) -> v20::MessageHeader {
        v20::MessageHeader {
            device_index: self.device_index,
            feature_index: self.feature_index,
            function_id: U4::from_lo(function_id),
            software_id: self.chan.sw_id(),
        }
    }

    /// Retrieves the maximum amount of simultaneously disabled keys.
    pub async fn get_capabilities(&self) -> Result<u8, ChannelError> {
        let response = self
            .chan
            .send_v20(
                v20::Message::Short(self.header(0), [0x00, 0x00, 0x00]),
                SEND_TIMEOUT,
            )
            .await?;

        let decoded = Message::decode_payload(
            &GET_CAPABILITIES_RESPONSE,
            &response.extend_payload()[..16],
        )?;
        decoded
            .uint("max_disabled_usages")
            .map(|value| value as u8)
            .ok_or(ChannelError::UnsupportedResponse)
    }

    /// Disables the keys with the given keyboard usages.
    ///
    /// At most [`USAGES_PER_REQUEST`] usages fit one request; longer slices
    /// are sent in multiple requests. A usage of `0x00` is not a valid key
    /// and terminates the block on the device side.
    pub async fn disable_keys(&self, usages: &[u8]) -> Result<(), ChannelError> {
        self.send_key_block(1, &DISABLE_KEYS_REQUEST, "keys_to_disable", usages)
            .await
    }

    /// Re-enables the keys with the given keyboard usages.
    pub async fn enable_keys(&self, usages: &[u8]) -> Result<(), ChannelError> {
        self.send_key_block(2, &ENABLE_KEYS_REQUEST, "keys_to_enable", usages)
            .await
    }

    /// Re-enables every disabled key.
    pub async fn enable_all_keys(&self) -> Result<(), ChannelError> {
        self.chan
            .send_v20(
                v20::Message::Short(self.header(3), [0x00, 0x00, 0x00]),
                SEND_TIMEOUT,
            )
            .await?;

        Ok(())
    }

    async fn send_key_block(
        &self,
        function_id: u8,
        schema: &'static crate::codec::Schema,
        field: &str,
        usages: &[u8],
    ) -> Result<(), ChannelError> {
        for chunk in usages.chunks(USAGES_PER_REQUEST) {
            let mut block = [0u8; USAGES_PER_REQUEST];
            block[..chunk.len()].copy_from_slice(chunk);

            let mut request = Message::new(schema);
            request.set_bytes(field, block.to_vec())?;
            let payload = request.encode_payload()?;

            self.chan
                .send_v20(
                    v20::Message::Long(self.header(function_id), payload.try_into().unwrap()),
                    SEND_TIMEOUT,
                )
                .await?;
        }

        Ok(())
    }
}
