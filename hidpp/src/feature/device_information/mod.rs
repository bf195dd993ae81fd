//! Implements the `DeviceInformation` feature (ID `0x0003`) that provides
//! some general information about the device.

use std::sync::Arc;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{
    bcd,
    channel::{ChannelError, HidppChannel, SEND_TIMEOUT},
    codec::{Direction, FieldDef, Message, Schema, SchemaKey, SchemaRegistry},
    feature::{CreatableFeature, Feature},
    frame::ReportFamily,
    nibble::U4,
    protocol::v20,
};

static GET_DEVICE_INFO_REQUEST: Schema = Schema {
    name: "getDeviceInfo",
    family: ReportFamily::Short,
    padding: 0x00,
    fields: &[],
};

static GET_DEVICE_INFO_RESPONSE: Schema = Schema {
    name: "getDeviceInfoResponse",
    family: ReportFamily::Long,
    padding: 0x00,
    fields: &[
        FieldDef::uint("entity_count", 8),
        FieldDef::bytes("unit_id", 32),
        FieldDef::bitmap("transport", 16, &[
            FieldDef::uint("reserved", 12),
            FieldDef::flag("usb"),
            FieldDef::flag("e_quad"),
            FieldDef::flag("btle"),
            FieldDef::flag("bluetooth"),
        ]),
        FieldDef::uint("model_id_0", 16),
        FieldDef::uint("model_id_1", 16),
        FieldDef::uint("model_id_2", 16),
        FieldDef::uint("extended_model_id", 8),
        FieldDef::bitmap("capabilities", 8, &[
            FieldDef::uint("reserved", 7),
            FieldDef::flag("serial_number"),
        ]),
    ],
};

static GET_FW_INFO_REQUEST: Schema = Schema {
    name: "getFwInfo",
    family: ReportFamily::Short,
    padding: 0x00,
    fields: &[FieldDef::uint("entity_index", 8)],
};

static GET_FW_INFO_RESPONSE: Schema = Schema {
    name: "getFwInfoResponse",
    family: ReportFamily::Long,
    padding: 0x00,
    fields: &[
        FieldDef::uint("entity_type", 8),
        FieldDef::bytes("firmware_prefix", 24),
        FieldDef::uint("firmware_number", 8),
        FieldDef::uint("revision", 8),
        FieldDef::uint("build", 16),
        FieldDef::bitmap("state", 8, &[
            FieldDef::uint("reserved", 7),
            FieldDef::flag("active"),
        ]),
        FieldDef::uint("transport_pid", 16),
        FieldDef::bytes("extra_version", 40),
    ],
};

static GET_SERIAL_NUMBER_REQUEST: Schema = Schema {
    name: "getDeviceSerialNumber",
    family: ReportFamily::Short,
    padding: 0x00,
    fields: &[],
};

static GET_SERIAL_NUMBER_RESPONSE: Schema = Schema {
    name: "getDeviceSerialNumberResponse",
    family: ReportFamily::Long,
    padding: 0x00,
    fields: &[FieldDef::bytes("serial_number", 96)],
};

pub(crate) fn register_schemas(registry: &mut SchemaRegistry) {
    let entries: [(u8, Direction, &'static Schema); 6] = [
        (0, Direction::Request, &GET_DEVICE_INFO_REQUEST),
        (0, Direction::Response, &GET_DEVICE_INFO_RESPONSE),
        (1, Direction::Request, &GET_FW_INFO_REQUEST),
        (1, Direction::Response, &GET_FW_INFO_RESPONSE),
        (2, Direction::Request, &GET_SERIAL_NUMBER_REQUEST),
        (2, Direction::Response, &GET_SERIAL_NUMBER_RESPONSE),
    ];

    for (function_index, direction, schema) in entries {
        registry.register(
            SchemaKey {
                feature_id: 0x0003,
                version: 0,
                function_index,
                direction,
            },
            schema,
        );
    }
}

/// Implements the `DeviceInformation` / `0x0003` feature.
#[derive(Clone)]
pub struct DeviceInformationFeature {
    /// The underlying HID++ channel.
    chan: Arc<HidppChannel>,

    /// The index of the device to implement the feature for.
    device_index: u8,

    /// The index of the feature in the feature table.
    feature_index: u8,
}

impl CreatableFeature for DeviceInformationFeature {
    const ID: u16 = 0x0003;
    const STARTING_VERSION: u8 = 0;

    fn new(chan: Arc<HidppChannel>, device_index: u8, feature_index: u8) -> Self {
        Self {
            chan,
            device_index,
            feature_index,
        }
    }
}

impl Feature for DeviceInformationFeature {
}

impl DeviceInformationFeature {
    fn header(&self, function_id: u8) -> v20::MessageHeader {
        v20::MessageHeader {
            device_index: self.device_index,
            feature_index: self.feature_index,
            function_id: U4::from_lo(function_id),
            software_id: self.chan.sw_id(),
        }
    }

    /// Retrieves general information about the device and its capabilities.
    pub async fn get_device_info(&self) -> Result<DeviceInformation, ChannelError> {
        let response = self
            .chan
            .send_v20(
                v20::Message::Short(self.header(0), [0x00, 0x00, 0x00]),
                SEND_TIMEOUT,
            )
            .await?;

        let decoded = Message::decode_payload(
            &GET_DEVICE_INFO_RESPONSE,
            &response.extend_payload()[..16],
        )?;

        Ok(DeviceInformation {
            entity_count: decoded.uint("entity_count").unwrap_or(0) as u8,
            unit_id: decoded
                .bytes("unit_id")
                .and_then(|data| data.try_into().ok())
                .ok_or(ChannelError::UnsupportedResponse)?,
            transport: DeviceTransport {
                usb: decoded.bitmap_uint("transport", "usb") == Some(1),
                e_quad: decoded.bitmap_uint("transport", "e_quad") == Some(1),
                btle: decoded.bitmap_uint("transport", "btle") == Some(1),
                bluetooth: decoded.bitmap_uint("transport", "bluetooth") == Some(1),
            },
            model_id: [
                decoded.uint("model_id_0").unwrap_or(0) as u16,
                decoded.uint("model_id_1").unwrap_or(0) as u16,
                decoded.uint("model_id_2").unwrap_or(0) as u16,
            ],
            extended_model_id: decoded.uint("extended_model_id").unwrap_or(0) as u8,
            capabilities: DeviceInformationCapabilities {
                serial_number: decoded.bitmap_uint("capabilities", "serial_number") == Some(1),
            },
        })
    }

    /// Retrieves information about the firmware of a specific entity,
    /// identified by its index bound by the value in
    /// [`DeviceInformation::entity_count`].
    pub async fn get_fw_info(
        &self,
        entity_index: u8,
    ) -> Result<DeviceEntityFirmwareInfo, ChannelError> {
        let mut request = Message::new(&GET_FW_INFO_REQUEST);
        request.set_uint("entity_index", entity_index as u64)?;
        let payload = request.encode_payload()?;

        let response = self
            .chan
            .send_v20(
                v20::Message::Short(self.header(1), payload.try_into().unwrap()),
                SEND_TIMEOUT,
            )
            .await?;

        let decoded =
            Message::decode_payload(&GET_FW_INFO_RESPONSE, &response.extend_payload()[..16])?;

        Ok(DeviceEntityFirmwareInfo {
            entity_type: DeviceEntityType::try_from(
                decoded.uint("entity_type").unwrap_or(0xff) as u8
            )
            .map_err(|_| ChannelError::UnsupportedResponse)?,
            firmware_prefix: String::from_utf8(
                decoded
                    .bytes("firmware_prefix")
                    .unwrap_or_default()
                    .to_vec(),
            )
            .map_err(|_| ChannelError::UnsupportedResponse)?,
            firmware_number: bcd::convert_packed_u8(
                decoded.uint("firmware_number").unwrap_or(0) as u8
            )
            .map_err(|_| ChannelError::UnsupportedResponse)?,
            revision: bcd::convert_packed_u8(decoded.uint("revision").unwrap_or(0) as u8)
                .map_err(|_| ChannelError::UnsupportedResponse)?,
            build: bcd::convert_packed_u16(decoded.uint("build").unwrap_or(0) as u16)
                .map_err(|_| ChannelError::UnsupportedResponse)?,
            active: decoded.bitmap_uint("state", "active") == Some(1),
            transport_pid: decoded.uint("transport_pid").unwrap_or(0) as u16,
            extra_version: decoded
                .bytes("extra_version")
                .and_then(|data| data.try_into().ok())
                .ok_or(ChannelError::UnsupportedResponse)?,
        })
    }

    /// Retrieves the serial number of the device.
    ///
    /// This function was added in feature version 4 and will likely result
    /// in an [`v20::ErrorKind::InvalidFunctionId`] error for older
    /// versions, so [`DeviceInformationCapabilities::serial_number`] should
    /// be verified before calling.
    pub async fn get_serial_number(&self) -> Result<String, ChannelError> {
        let response = self
            .chan
            .send_v20(
                v20::Message::Short(self.header(2), [0x00, 0x00, 0x00]),
                SEND_TIMEOUT,
            )
            .await?;

        let decoded = Message::decode_payload(
            &GET_SERIAL_NUMBER_RESPONSE,
            &response.extend_payload()[..16],
        )?;
        String::from_utf8(decoded.bytes("serial_number").unwrap_or_default().to_vec())
            .map_err(|_| ChannelError::UnsupportedResponse)
    }
}

/// Represents information about the device as reported by
/// [`DeviceInformationFeature::get_device_info`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct DeviceInformation {
    /// The amount of entities in the device from which version information
    /// can be retrieved using [`DeviceInformationFeature::get_fw_info`].
    pub entity_count: u8,

    /// A 4-byte random value serving as a unique identifier (among all
    /// devices with the same [`Self::model_id`]) for the unit.
    pub unit_id: [u8; 4],

    /// A bitfield about which transport protocols the device supports.
    pub transport: DeviceTransport,

    /// The application PIDs of the (up to three) transport protocols the
    /// device supports, in the order stated by [`Self::transport`].
    pub model_id: [u16; 3],

    /// An 8-bit value representing an additional configurable attribute for
    /// a given [`Self::model_id`], set on the production line. This could
    /// be the color of the device.
    pub extended_model_id: u8,

    /// Additional capability flags of this feature.
    pub capabilities: DeviceInformationCapabilities,
}

/// Represents the bitfield stating which transport protocols a device
/// supports.
///
/// One given device can only support up to three transport protocols at a
/// time.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct DeviceTransport {
    /// Whether the device supports USB.
    pub usb: bool,

    /// Whether the device supports eQuad, the protocol used by the Unifying
    /// Receiver.
    pub e_quad: bool,

    /// Whether the device supports Bluetooth Low Energy.
    pub btle: bool,

    /// Whether the device supports Bluetooth.
    pub bluetooth: bool,
}

/// Represents the bitfield stating which additional capabilities this
/// feature supports.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct DeviceInformationCapabilities {
    /// Whether serial number retrieval is supported.
    pub serial_number: bool,
}

/// Represents information about the firmware of a specific device entity as
/// obtained via [`DeviceInformationFeature::get_fw_info`].
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct DeviceEntityFirmwareInfo {
    /// The type of the described entity.
    pub entity_type: DeviceEntityType,

    /// A 3-letter prefix for the firmware name.
    pub firmware_prefix: String,

    /// The firmware number.
    ///
    /// This is represented in packed BCD format in the protocol itself, but
    /// decoding is handled by this implementation automatically.
    pub firmware_number: u8,

    /// The firmware revision, decoded from packed BCD like
    /// [`Self::firmware_number`].
    pub revision: u8,

    /// The firmware build, decoded from packed BCD like
    /// [`Self::firmware_number`].
    pub build: u16,

    /// Whether the entity is the responding and active one.
    ///
    /// Exactly one entity will be active at any given time.
    pub active: bool,

    /// The transport protocol PID.
    ///
    /// If this entity is the active one (see [`Self::active`]), this will
    /// be set to the actual PID. If it is not, this field COULD be
    /// all-zero.
    pub transport_pid: u16,

    /// Optional extra versioning information.
    pub extra_version: [u8; 5],
}

/// Represents the type of a device entity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum DeviceEntityType {
    MainApplication = 0,
    Bootloader = 1,
    Hardware = 2,
    Touchpad = 3,
    OpticalSensor = 4,
    Softdevice = 5,
    RfCompanionMcu = 6,
    FactoryApplication = 7,
    RgbCustomEffect = 8,
    MotorDrive = 9,
}
