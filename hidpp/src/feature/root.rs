//! Implements the Root feature (ID `0x0000`) that every device supports by
//! default.

use std::{sync::Arc, time::Duration};

use super::{CreatableFeature, Feature, FeatureType};
use crate::{
    channel::{ChannelError, HidppChannel, SEND_TIMEOUT},
    codec::{Direction, FieldDef, Message, Schema, SchemaKey, SchemaRegistry},
    frame::ReportFamily,
    nibble::U4,
    protocol::v20,
};

static GET_FEATURE_REQUEST: Schema = Schema {
    name: "getFeature",
    family: ReportFamily::Short,
    padding: 0x00,
    fields: &[FieldDef::uint("feature_id", 16)],
};

static GET_FEATURE_RESPONSE: Schema = Schema {
    name: "getFeatureResponse",
    family: ReportFamily::Long,
    padding: 0x00,
    fields: &[
        FieldDef::uint("feature_index", 8),
        FieldDef::bitmap("feature_type", 8, &[
            FieldDef::flag("obsolete"),
            FieldDef::flag("hidden"),
            FieldDef::flag("engineering"),
            FieldDef::flag("manufacturing_deactivatable"),
            FieldDef::flag("compliance_deactivatable"),
            FieldDef::uint("reserved", 3),
        ]),
        FieldDef::uint("feature_version", 8),
    ],
};

static PING_REQUEST: Schema = Schema {
    name: "ping",
    family: ReportFamily::Short,
    padding: 0x00,
    fields: &[
        FieldDef::uint("reserved", 16),
        FieldDef::uint("ping_data", 8),
    ],
};

static PING_RESPONSE: Schema = Schema {
    name: "pingResponse",
    family: ReportFamily::Long,
    padding: 0x00,
    fields: &[
        FieldDef::uint("protocol_num", 8),
        FieldDef::uint("target_sw", 8),
        FieldDef::uint("ping_data", 8),
    ],
};

pub(crate) fn register_schemas(registry: &mut SchemaRegistry) {
    let entries: [(u8, Direction, &'static Schema); 4] = [
        (0, Direction::Request, &GET_FEATURE_REQUEST),
        (0, Direction::Response, &GET_FEATURE_RESPONSE),
        (1, Direction::Request, &PING_REQUEST),
        (1, Direction::Response, &PING_RESPONSE),
    ];

    for (function_index, direction, schema) in entries {
        registry.register(
            SchemaKey {
                feature_id: RootFeature::ID,
                version: 0,
                function_index,
                direction,
            },
            schema,
        );
    }
}

/// Implements the `Root` / `0x0000` feature that every HID++2.0 device
/// supports by default.
///
/// This implementation is added automatically to any
/// [`crate::device::Device`] created using [`crate::device::Device::new`].
#[derive(Clone)]
pub struct RootFeature {
    /// The underlying HID++ channel.
    chan: Arc<HidppChannel>,

    /// The index of the device to implement the feature for.
    device_index: u8,
}

impl CreatableFeature for RootFeature {
    const ID: u16 = 0x0000;
    const STARTING_VERSION: u8 = 0;

    fn new(chan: Arc<HidppChannel>, device_index: u8, _: u8) -> Self {
        Self {
            chan,
            device_index,
        }
    }
}

impl Feature for RootFeature {
}

impl RootFeature {
    fn header(&self, function_id: u8) -> v20::MessageHeader {
        v20::MessageHeader {
            device_index: self.device_index,
            feature_index: 0,
            function_id: U4::from_lo(function_id),
            software_id: self.chan.sw_id(),
        }
    }

    /// Retrieves information about a specific feature ID, including its
    /// index in the feature table, its type and its version.
    ///
    /// If the feature is not supported by the device, [`None`] is returned.
    ///
    /// If the device only supports the root feature version 1, the
    /// [`FeatureInformation::version`] field will be `0` for all features.
    pub async fn get_feature(
        &self,
        id: u16,
    ) -> Result<Option<FeatureInformation>, ChannelError> {
        let mut request = Message::new(&GET_FEATURE_REQUEST);
        request.set_uint("feature_id", id as u64)?;
        let payload = request.encode_payload()?;

        let response = self
            .chan
            .send_v20(
                v20::Message::Short(self.header(0), payload.try_into().unwrap()),
                SEND_TIMEOUT,
            )
            .await?;

        let decoded =
            Message::decode_payload(&GET_FEATURE_RESPONSE, &response.extend_payload()[..16])?;

        let index = decoded.uint("feature_index").unwrap_or(0) as u8;
        if index == 0 {
            return Ok(None);
        }

        Ok(Some(FeatureInformation {
            index,
            typ: FeatureType::from(response.extend_payload()[1]),
            version: decoded.uint("feature_version").unwrap_or(0) as u8,
        }))
    }

    /// Pings the device with an arbitrary data byte. The device will respond
    /// with the same data if communication succeeds.
    pub async fn ping(&self, data: u8) -> Result<u8, ChannelError> {
        self.ping_with_timeout(data, SEND_TIMEOUT).await
    }

    /// Like [`Self::ping`], but with a caller-supplied deadline. Used e.g.
    /// while waiting for a device to finish booting after a power cycle.
    pub async fn ping_with_timeout(
        &self,
        data: u8,
        timeout: Duration,
    ) -> Result<u8, ChannelError> {
        let mut request = Message::new(&PING_REQUEST);
        request.set_uint("ping_data", data as u64)?;
        let payload = request.encode_payload()?;

        let response = self
            .chan
            .send_v20(
                v20::Message::Short(self.header(1), payload.try_into().unwrap()),
                timeout,
            )
            .await?;

        let decoded =
            Message::decode_payload(&PING_RESPONSE, &response.extend_payload()[..16])?;
        decoded
            .uint("ping_data")
            .map(|value| value as u8)
            .ok_or(ChannelError::UnsupportedResponse)
    }
}

/// Represents information about a specific feature as returned by the
/// [`RootFeature::get_feature`] function.
#[derive(Clone, Copy, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FeatureInformation {
    /// The index of the feature in the feature table.
    /// This is used for invocations of functions of that feature.
    pub index: u8,

    /// The type of the feature.
    pub typ: FeatureType,

    /// The latest supported version of the feature.
    ///
    /// Multi-version features are always backwards compatible as long as
    /// the feature ID does not change, meaning functions implemented for an
    /// older version of the same feature will behave as expected for every
    /// later version.
    pub version: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_feature_request_wire_format() {
        let mut request = Message::new(&GET_FEATURE_REQUEST);
        request.set_uint("feature_id", 0x1814).unwrap();

        assert_eq!(request.encode_payload().unwrap(), vec![0x18, 0x14, 0x00]);
    }

    #[test]
    fn get_feature_response_decoding() {
        let mut payload = [0u8; 16];
        payload[0] = 0x02;
        payload[1] = 0x60;
        payload[2] = 0x01;

        let decoded = Message::decode_payload(&GET_FEATURE_RESPONSE, &payload).unwrap();
        assert_eq!(decoded.uint("feature_index"), Some(0x02));
        assert_eq!(decoded.uint("feature_version"), Some(0x01));
        assert_eq!(decoded.bitmap_uint("feature_type", "hidden"), Some(1));
        assert_eq!(decoded.bitmap_uint("feature_type", "obsolete"), Some(0));
    }
}
