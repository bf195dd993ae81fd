//! Implements the feature starting with version 0.

use std::sync::Arc;

use super::{
    GET_COOKIES_RESPONSE,
    GET_HOST_INFO_RESPONSE_V0,
    HostInfo,
    SET_COOKIE_REQUEST,
    SET_CURRENT_HOST_REQUEST,
};
use crate::{
    channel::{ChannelError, HidppChannel, SEND_TIMEOUT, SEND_TIMEOUT_RESET},
    codec::Message,
    feature::{CreatableFeature, Feature},
    nibble::U4,
    protocol::v20,
};

/// Implements the `ChangeHost` / `0x1814` feature.
///
/// The first version supported by this feature is v0.
#[derive(Clone)]
pub struct ChangeHostFeatureV0 {
    /// The underlying HID++ channel.
    chan: Arc<HidppChannel>,

    /// The index of the device to implement the feature for.
    device_index: u8,

    /// The index of the feature in the feature table.
    feature_index: u8,
}

impl CreatableFeature for ChangeHostFeatureV0 {
    const ID: u16 = 0x1814;
    const STARTING_VERSION: u8 = 0;

    fn new(chan: Arc<HidppChannel>, device_index: u8, feature_index: u8) -> Self {
        Self {
            chan,
            device_index,
            feature_index,
        }
    }
}

impl Feature for ChangeHostFeatureV0 {
}

impl ChangeHostFeatureV0 {
    fn header(&self, function_id: u8) -> v20::MessageHeader {
        v20::MessageHeader {
            device_index: self.device_index,
            feature_index: self.feature_index,
            function_id: U4::from_lo(function_id),
            software_id: self.chan.sw_id(),
        }
    }

    /// Sends the raw host information request. Newer versions decode the
    /// response against their richer layout.
    pub(super) async fn send_get_host_info(
        &self,
        timeout: std::time::Duration,
    ) -> Result<v20::Message, ChannelError> {
        self.chan
            .send_v20(
                v20::Message::Short(self.header(0), [0x00, 0x00, 0x00]),
                timeout,
            )
            .await
    }

    /// Retrieves the amount of pairable hosts and the currently active one.
    pub async fn get_host_info(&self) -> Result<HostInfo, ChannelError> {
        let response = self.send_get_host_info(SEND_TIMEOUT).await?;

        let decoded = Message::decode_payload(
            &GET_HOST_INFO_RESPONSE_V0,
            &response.extend_payload()[..16],
        )?;

        Ok(HostInfo {
            num_hosts: decoded.uint("num_hosts").unwrap_or(0) as u8,
            current_host: decoded.uint("current_host").unwrap_or(0) as u8,
            enhanced_host_switch: false,
        })
    }

    /// Switches the device to another paired host.
    ///
    /// A successful host switch disconnects the device from the current
    /// host, so the response frame often never arrives. Both a regular
    /// response and a deadline expiry therefore count as success; every
    /// other failure, most importantly an out-of-range host index, is
    /// surfaced.
    pub async fn set_current_host(&self, host_index: u8) -> Result<(), ChannelError> {
        let mut request = Message::new(&SET_CURRENT_HOST_REQUEST);
        request.set_uint("host_index", host_index as u64)?;
        let payload = request.encode_payload()?;

        let result = self
            .chan
            .send_v20(
                v20::Message::Short(self.header(1), payload.try_into().unwrap()),
                SEND_TIMEOUT_RESET,
            )
            .await;

        match result {
            Ok(_) | Err(ChannelError::Timeout) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Retrieves the cookie byte stored for every host slot.
    pub async fn get_cookies(&self) -> Result<[u8; 16], ChannelError> {
        let response = self
            .chan
            .send_v20(
                v20::Message::Short(self.header(2), [0x00, 0x00, 0x00]),
                SEND_TIMEOUT,
            )
            .await?;

        let decoded =
            Message::decode_payload(&GET_COOKIES_RESPONSE, &response.extend_payload()[..16])?;
        decoded
            .bytes("cookies")
            .and_then(|data| data.try_into().ok())
            .ok_or(ChannelError::UnsupportedResponse)
    }

    /// Stores a cookie byte for one host slot.
    ///
    /// Host software uses cookies to recognize its own pairing slot after
    /// the device switched hosts.
    pub async fn set_cookie(&self, host_index: u8, cookie: u8) -> Result<(), ChannelError> {
        let mut request = Message::new(&SET_COOKIE_REQUEST);
        request.set_uint("host_index", host_index as u64)?;
        request.set_uint("cookie", cookie as u64)?;
        let payload = request.encode_payload()?;

        self.chan
            .send_v20(
                v20::Message::Short(self.header(3), payload.try_into().unwrap()),
                SEND_TIMEOUT,
            )
            .await?;

        Ok(())
    }
}
