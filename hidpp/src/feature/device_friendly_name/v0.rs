//! Implements the feature starting with version 0.

use std::sync::Arc;

use super::{
    GET_FRIENDLY_NAME_LEN_RESPONSE,
    GET_FRIENDLY_NAME_REQUEST,
    NAME_CHUNK_RESPONSE,
    NAME_LEN_RESPONSE,
    SET_FRIENDLY_NAME_REQUEST,
};
use crate::{
    channel::{ChannelError, HidppChannel, SEND_TIMEOUT},
    codec::Message,
    feature::{CreatableFeature, Feature},
    nibble::U4,
    protocol::v20,
};

/// Implements the `DeviceFriendlyName` / `0x0007` feature.
///
/// The first version supported by this feature is v0.
///
/// Names longer than one frame payload are read and written in chunks
/// addressed by a byte index; the whole-name convenience functions handle
/// the chunking.
#[derive(Clone)]
pub struct DeviceFriendlyNameFeatureV0 {
    /// The underlying HID++ channel.
    chan: Arc<HidppChannel>,

    /// The index of the device to implement the feature for.
    device_index: u8,

    /// The index of the feature in the feature table.
    feature_index: u8,
}

impl CreatableFeature for DeviceFriendlyNameFeatureV0 {
    const ID: u16 = 0x0007;
    const STARTING_VERSION: u8 = 0;

    fn new(chan: Arc<HidppChannel>, device_index: u8, feature_index: u8) -> Self {
        Self {
            chan,
            device_index,
            feature_index,
        }
    }
}

impl Feature for DeviceFriendlyNameFeatureV0 {
}

/// The length information of the friendly name as reported by
/// [`DeviceFriendlyNameFeatureV0::get_friendly_name_len`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct FriendlyNameLen {
    /// The current length of the friendly name.
    pub name_len: u8,

    /// The maximum length the device can store.
    pub name_max_len: u8,

    /// The length of the factory-default friendly name.
    pub default_name_len: u8,
}

impl DeviceFriendlyNameFeatureV0 {
    fn header(&self, function_id: u8) -> v20::MessageHeader {
        v20::MessageHeader {
            device_index: self.device_index,
            feature_index: self.feature_index,
            function_id: U4::from_lo(function_id),
            software_id: self.chan.sw_id(),
        }
    }

    /// Retrieves the length information of the friendly name.
    pub async fn get_friendly_name_len(&self) -> Result<FriendlyNameLen, ChannelError> {
        let response = self
            .chan
            .send_v20(
                v20::Message::Short(self.header(0), [0x00, 0x00, 0x00]),
                SEND_TIMEOUT,
            )
            .await?;

        let decoded = Message::decode_payload(
            &GET_FRIENDLY_NAME_LEN_RESPONSE,
            &response.extend_payload()[..16],
        )?;

        Ok(FriendlyNameLen {
            name_len: decoded.uint("name_len").unwrap_or(0) as u8,
            name_max_len: decoded.uint("name_max_len").unwrap_or(0) as u8,
            default_name_len: decoded.uint("default_name_len").unwrap_or(0) as u8,
        })
    }

    /// Retrieves one chunk of the friendly name, starting at `byte_index`.
    pub async fn get_friendly_name(&self, byte_index: u8) -> Result<Vec<u8>, ChannelError> {
        self.read_name_chunk(1, byte_index).await
    }

    /// Retrieves one chunk of the factory-default friendly name, starting
    /// at `byte_index`.
    pub async fn get_default_friendly_name(
        &self,
        byte_index: u8,
    ) -> Result<Vec<u8>, ChannelError> {
        self.read_name_chunk(2, byte_index).await
    }

    /// Retrieves the whole friendly name, chunk by chunk.
    pub async fn get_whole_friendly_name(&self) -> Result<String, ChannelError> {
        self.read_whole_name(1).await
    }

    /// Retrieves the whole factory-default friendly name, chunk by chunk.
    pub async fn get_whole_default_friendly_name(&self) -> Result<String, ChannelError> {
        self.read_whole_name(2).await
    }

    /// Overwrites the friendly name, chunk by chunk.
    ///
    /// Returns the resulting name length reported by the device.
    pub async fn set_friendly_name(&self, name: &str) -> Result<u8, ChannelError> {
        let bytes = name.as_bytes();
        let mut result = 0;

        for (chunk_index, chunk) in bytes.chunks(15).enumerate() {
            let mut block = [0u8; 15];
            block[..chunk.len()].copy_from_slice(chunk);

            let mut request = Message::new(&SET_FRIENDLY_NAME_REQUEST);
            request.set_uint("byte_index", (chunk_index * 15) as u64)?;
            request.set_bytes("name_chunk", block.to_vec())?;
            let payload = request.encode_payload()?;

            let response = self
                .chan
                .send_v20(
                    v20::Message::Long(self.header(3), payload.try_into().unwrap()),
                    SEND_TIMEOUT,
                )
                .await?;

            let decoded = Message::decode_payload(
                &NAME_LEN_RESPONSE,
                &response.extend_payload()[..16],
            )?;
            result = decoded.uint("name_len").unwrap_or(0) as u8;
        }

        Ok(result)
    }

    /// Resets the friendly name to its factory default.
    ///
    /// Returns the resulting name length reported by the device.
    pub async fn reset_friendly_name(&self) -> Result<u8, ChannelError> {
        let response = self
            .chan
            .send_v20(
                v20::Message::Short(self.header(4), [0x00, 0x00, 0x00]),
                SEND_TIMEOUT,
            )
            .await?;

        let decoded =
            Message::decode_payload(&NAME_LEN_RESPONSE, &response.extend_payload()[..16])?;
        decoded
            .uint("name_len")
            .map(|value| value as u8)
            .ok_or(ChannelError::UnsupportedResponse)
    }

    async fn read_name_chunk(
        &self,
        function_id: u8,
        byte_index: u8,
    ) -> Result<Vec<u8>, ChannelError> {
        let mut request = Message::new(&GET_FRIENDLY_NAME_REQUEST);
        request.set_uint("byte_index", byte_index as u64)?;
        let payload = request.encode_payload()?;

        let response = self
            .chan
            .send_v20(
                v20::Message::Short(self.header(function_id), payload.try_into().unwrap()),
                SEND_TIMEOUT,
            )
            .await?;

        let decoded = Message::decode_payload(
            &NAME_CHUNK_RESPONSE,
            &response.extend_payload()[..16],
        )?;
        decoded
            .bytes("name_chunk")
            .map(|data| data.to_vec())
            .ok_or(ChannelError::UnsupportedResponse)
    }

    async fn read_whole_name(&self, function_id: u8) -> Result<String, ChannelError> {
        let len = match function_id {
            1 => self.get_friendly_name_len().await?.name_len,
            _ => self.get_friendly_name_len().await?.default_name_len,
        } as usize;

        let mut name = Vec::with_capacity(len);
        while name.len() < len {
            let chunk = self.read_name_chunk(function_id, name.len() as u8).await?;
            let remaining = len - name.len();
            let take = remaining.min(chunk.len());
            if take == 0 {
                break;
            }
            name.extend_from_slice(&chunk[..take]);
        }

        String::from_utf8(name).map_err(|_| ChannelError::UnsupportedResponse)
    }
}
