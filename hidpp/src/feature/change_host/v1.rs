//! Implements the feature starting with version 1.

use std::sync::Arc;

use super::{GET_HOST_INFO_RESPONSE_V1, HostInfo, v0::ChangeHostFeatureV0};
use crate::{
    channel::{ChannelError, HidppChannel, SEND_TIMEOUT},
    codec::Message,
    feature::{CreatableFeature, Feature},
};

/// Implements the `ChangeHost` / `0x1814` feature starting with version 1.
///
/// Version 1 extends the host information with the enhanced host switch
/// capability flag; everything else behaves like
/// [`ChangeHostFeatureV0`].
#[derive(Clone)]
pub struct ChangeHostFeatureV1 {
    inner: ChangeHostFeatureV0,
}

impl CreatableFeature for ChangeHostFeatureV1 {
    const ID: u16 = 0x1814;
    const STARTING_VERSION: u8 = 1;

    fn new(chan: Arc<HidppChannel>, device_index: u8, feature_index: u8) -> Self {
        Self {
            inner: ChangeHostFeatureV0::new(chan, device_index, feature_index),
        }
    }
}

impl Feature for ChangeHostFeatureV1 {
}

impl std::ops::Deref for ChangeHostFeatureV1 {
    type Target = ChangeHostFeatureV0;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl ChangeHostFeatureV1 {
    /// Retrieves the amount of pairable hosts, the currently active one and
    /// the enhanced host switch capability.
    pub async fn get_host_info(&self) -> Result<HostInfo, ChannelError> {
        let response = self
            .inner
            .send_get_host_info(SEND_TIMEOUT)
            .await?;

        let decoded = Message::decode_payload(
            &GET_HOST_INFO_RESPONSE_V1,
            &response.extend_payload()[..16],
        )?;

        Ok(HostInfo {
            num_hosts: decoded.uint("num_hosts").unwrap_or(0) as u8,
            current_host: decoded.uint("current_host").unwrap_or(0) as u8,
            enhanced_host_switch: decoded
                .bitmap_uint("flags", "enhanced_host_switch")
                .unwrap_or(0)
                != 0,
        })
    }
}
