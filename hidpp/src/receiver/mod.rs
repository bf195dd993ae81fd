//! Implements the HID++ wireless receivers and the through-receiver access
//! to the devices paired behind them.
//!
//! Receivers speak HID++1.0: their state lives in registers read and
//! written through the sub IDs `0x80..=0x83`. Frames addressed to a paired
//! device carry the device's slot index in the device index byte; the
//! receiver forwards them over the air transparently, so a through-receiver
//! channel is the same [`HidppChannel`] with a different device index.

use std::sync::Arc;

use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

use crate::{
    channel::{ChannelError, HidppChannel, Protocol},
    codec::{FieldDef, Message, Schema},
    device::{Device, DeviceError},
    event::EventEmitter,
    frame::ReportFamily,
    protocol::v10,
};

pub use crate::frame::RECEIVER_DEVICE_INDEX;

/// Contains all known USB vendor and product ID pairs representing Unifying
/// receivers.
pub const UNIFYING_VPID_PAIRS: &[(u16, u16)] = &[(0x046d, 0xc52b), (0x046d, 0xc534)];

/// Contains all known USB vendor and product ID pairs representing BLE Pro
/// receivers.
pub const BLE_PRO_VPID_PAIRS: &[(u16, u16)] = &[(0x046d, 0xc548)];

/// Contains all known USB vendor and product ID pairs representing
/// Lightspeed (gaming) receivers.
pub const LIGHTSPEED_VPID_PAIRS: &[(u16, u16)] = &[
    (0x046d, 0xc539),
    (0x046d, 0xc53a),
    (0x046d, 0xc547),
];

/// The flavor of a wireless receiver, deciding which register sub-layouts
/// apply.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ReceiverKind {
    /// The classic eQuad-based Unifying receiver.
    Unifying,

    /// The BLE Pro receiver (marketed as Bolt).
    BlePro,

    /// The low-latency eQuad gaming receiver.
    Lightspeed,
}

impl ReceiverKind {
    /// The protocol of through-receiver channels behind this receiver.
    pub fn device_protocol(self) -> Protocol {
        match self {
            ReceiverKind::Unifying => Protocol::Unifying,
            ReceiverKind::BlePro => Protocol::BlePro,
            ReceiverKind::Lightspeed => Protocol::EQuad,
        }
    }

    fn pairing_info_base(self) -> u8 {
        match self {
            // eQuad step 4 layouts.
            ReceiverKind::Unifying | ReceiverKind::Lightspeed => 0x20,
            ReceiverKind::BlePro => 0x51,
        }
    }

    fn device_name_base(self) -> u8 {
        match self {
            ReceiverKind::Unifying | ReceiverKind::Lightspeed => 0x40,
            ReceiverKind::BlePro => 0x61,
        }
    }
}

/// Represents the registers common to all supported receivers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum ReceiverRegister {
    /// Controls which unsolicited notifications the receiver reports.
    EnableNotifications = 0x00,

    /// Provides information about the currently connected devices and
    /// triggers fake device arrival notifications.
    ConnectionState = 0x02,

    /// Provides the pairing information of the receiver and its paired
    /// devices through sub-registers.
    NonVolatilePairingInformation = 0xb5,
}

static EQUAD_PAIRING_INFO_RESPONSE: Schema = Schema {
    name: "eQuadPairingInfoResponse",
    family: ReportFamily::Long,
    padding: 0x00,
    fields: &[
        FieldDef::uint("r0", 8),
        FieldDef::uint("destination_id", 8),
        FieldDef::uint("default_report_interval", 8),
        FieldDef::uint("wpid", 16),
        FieldDef::uint("reserved", 16),
        FieldDef::bitmap("device_info", 8, &[
            FieldDef::uint("reserved", 4),
            FieldDef::uint("device_kind", 4),
        ]),
    ],
};

static BLE_PRO_PAIRING_INFO_RESPONSE: Schema = Schema {
    name: "bleProPairingInfoResponse",
    family: ReportFamily::Long,
    padding: 0x00,
    fields: &[
        FieldDef::uint("r0", 8),
        FieldDef::bitmap("device_info", 8, &[
            FieldDef::uint("reserved_hi", 1),
            FieldDef::flag("link_not_established"),
            FieldDef::uint("reserved_lo", 2),
            FieldDef::uint("device_kind", 4),
        ]),
        FieldDef::uint("bluetooth_pid", 16),
        FieldDef::bytes("device_unit_id", 32),
        FieldDef::uint("ble_pro_service_version", 8),
    ],
};

// The name register reports the segment length followed by that many
// characters, which is exactly the count-driven trailer shape of the codec.
static EQUAD_DEVICE_NAME_RESPONSE: Schema = Schema {
    name: "eQuadDeviceNameResponse",
    family: ReportFamily::Long,
    padding: 0x00,
    fields: &[
        FieldDef::uint("r0", 8),
        FieldDef::uint("segment_length", 8),
        FieldDef::records("name", "segment_length", 1),
    ],
};

/// Represents a wireless receiver on a HID++ channel.
pub struct Receiver {
    /// The underlying HID++ channel.
    chan: Arc<HidppChannel>,

    /// The flavor of the receiver.
    pub kind: ReceiverKind,

    /// The emitter used to fan out connection events.
    emitter: Arc<EventEmitter<ConnectionEvent>>,

    /// The handle assigned to the message listener registered via
    /// [`HidppChannel::add_msg_listener`].
    /// This is used to remove the listener when the receiver is dropped.
    msg_listener_hdl: u32,
}

impl Receiver {
    /// Tries to detect a supported receiver on a HID++ channel by its USB
    /// vendor and product IDs.
    pub fn detect(chan: Arc<HidppChannel>) -> Result<Self, ReceiverError> {
        let vpid = (
            chan.transport().transport().vendor_id(),
            chan.transport().transport().product_id(),
        );

        let kind = if UNIFYING_VPID_PAIRS.contains(&vpid) {
            ReceiverKind::Unifying
        } else if BLE_PRO_VPID_PAIRS.contains(&vpid) {
            ReceiverKind::BlePro
        } else if LIGHTSPEED_VPID_PAIRS.contains(&vpid) {
            ReceiverKind::Lightspeed
        } else {
            return Err(ReceiverError::UnknownReceiver);
        };

        Ok(Self::new(chan, kind))
    }

    /// Creates a receiver of a known kind on a HID++ channel.
    pub fn new(chan: Arc<HidppChannel>, kind: ReceiverKind) -> Self {
        let emitter = Arc::new(EventEmitter::new());

        let hdl = chan.add_msg_listener({
            let emitter = Arc::clone(&emitter);

            move |raw, matched| {
                if matched {
                    return;
                }

                let Ok(parsed) = v10::Message::try_from(*raw) else {
                    return;
                };
                let header = parsed.header();

                // Connection notifications carry the device slot in the
                // device index byte, not the receiver index.
                if header.sub_id != v10::NotificationType::DeviceConnection.into()
                    && header.sub_id != v10::NotificationType::DeviceDisconnection.into()
                {
                    return;
                }

                let payload = parsed.extend_payload();
                emitter.emit(ConnectionEvent {
                    device_index: header.device_index,
                    kind: PairedDeviceKind::try_from(payload[1] & 0x0f)
                        .unwrap_or(PairedDeviceKind::Unknown),
                    encrypted: payload[1] & (1 << 5) != 0,
                    online: header.sub_id
                        == u8::from(v10::NotificationType::DeviceConnection)
                        && payload[1] & (1 << 6) == 0,
                    wpid: u16::from_le_bytes(payload[2..=3].try_into().unwrap()),
                });
            }
        });

        Self {
            chan,
            kind,
            emitter,
            msg_listener_hdl: hdl,
        }
    }

    /// The channel the receiver communicates over.
    pub fn channel(&self) -> &Arc<HidppChannel> {
        &self.chan
    }

    /// Creates a new listener for receiving device connection events.
    pub fn listen(&self) -> flume::Receiver<ConnectionEvent> {
        self.emitter.create_receiver()
    }

    /// Initializes a device paired behind the receiver as a
    /// through-receiver channel.
    pub async fn device(&self, slot: u8) -> Result<Device, DeviceError> {
        Device::new(Arc::clone(&self.chan), slot).await
    }

    /// Enables wireless and software notifications so that connection
    /// events are reported.
    pub async fn enable_notifications(&self) -> Result<(), ChannelError> {
        self.chan
            .write_register(
                RECEIVER_DEVICE_INDEX,
                ReceiverRegister::EnableNotifications.into(),
                [0x00, 0x01, 0x00],
            )
            .await
    }

    /// Counts the amount of devices currently paired to this receiver. The
    /// devices don't have to be online to be included here as pairings are
    /// persistent.
    pub async fn count_pairings(&self) -> Result<u8, ChannelError> {
        let response = self
            .chan
            .read_register(
                RECEIVER_DEVICE_INDEX,
                ReceiverRegister::ConnectionState.into(),
                [0x00; 3],
            )
            .await?;

        Ok(response[1])
    }

    /// Triggers device arrival notifications for all devices currently
    /// connected to the receiver. This is useful for device enumeration.
    pub async fn trigger_device_arrival(&self) -> Result<(), ChannelError> {
        self.chan
            .write_register(
                RECEIVER_DEVICE_INDEX,
                ReceiverRegister::ConnectionState.into(),
                [0x02, 0x00, 0x00],
            )
            .await
    }

    /// Provides the pairing information stored for a paired device slot.
    pub async fn device_pairing_information(
        &self,
        slot: u8,
    ) -> Result<DevicePairingInformation, ChannelError> {
        let response = self
            .chan
            .read_long_register(
                RECEIVER_DEVICE_INDEX,
                ReceiverRegister::NonVolatilePairingInformation.into(),
                [self.kind.pairing_info_base() + (slot - 1), 0x00, 0x00],
            )
            .await?;

        match self.kind {
            ReceiverKind::Unifying | ReceiverKind::Lightspeed => {
                let decoded = Message::decode_payload(&EQUAD_PAIRING_INFO_RESPONSE, &response)?;

                Ok(DevicePairingInformation {
                    wpid: decoded.uint("wpid").unwrap_or(0) as u16,
                    kind: decoded
                        .bitmap_uint("device_info", "device_kind")
                        .and_then(|raw| PairedDeviceKind::try_from(raw as u8).ok())
                        .unwrap_or(PairedDeviceKind::Unknown),
                    link_established: true,
                    unit_id: None,
                })
            },
            ReceiverKind::BlePro => {
                let decoded =
                    Message::decode_payload(&BLE_PRO_PAIRING_INFO_RESPONSE, &response)?;

                Ok(DevicePairingInformation {
                    wpid: decoded.uint("bluetooth_pid").unwrap_or(0) as u16,
                    kind: decoded
                        .bitmap_uint("device_info", "device_kind")
                        .and_then(|raw| PairedDeviceKind::try_from(raw as u8).ok())
                        .unwrap_or(PairedDeviceKind::Unknown),
                    link_established: decoded
                        .bitmap_uint("device_info", "link_not_established")
                        == Some(0),
                    unit_id: decoded
                        .bytes("device_unit_id")
                        .and_then(|data| data.try_into().ok()),
                })
            },
        }
    }

    /// Provides the name stored for a paired device slot.
    pub async fn device_name(&self, slot: u8) -> Result<String, ChannelError> {
        let response = self
            .chan
            .read_long_register(
                RECEIVER_DEVICE_INDEX,
                ReceiverRegister::NonVolatilePairingInformation.into(),
                [self.kind.device_name_base() + (slot - 1), 0x01, 0x00],
            )
            .await?;

        let decoded = Message::decode_payload(&EQUAD_DEVICE_NAME_RESPONSE, &response)?;
        let name = decoded
            .bytes("name")
            .ok_or(ChannelError::UnsupportedResponse)?;

        String::from_utf8(name.to_vec()).map_err(|_| ChannelError::UnsupportedResponse)
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.chan.remove_msg_listener(self.msg_listener_hdl);
    }
}

/// Represents some information about a specific device pairing as returned
/// by [`Receiver::device_pairing_information`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct DevicePairingInformation {
    /// The wireless product ID of the device.
    pub wpid: u16,

    /// The kind of the device.
    pub kind: PairedDeviceKind,

    /// Whether the wireless link to the device is currently established.
    ///
    /// eQuad receivers do not report this through the pairing information
    /// register; for them the field is always `true` and connection events
    /// are authoritative.
    pub link_established: bool,

    /// The unit ID of the device. Only reported by BLE Pro receivers.
    pub unit_id: Option<[u8; 4]>,
}

/// Represents the kind of a device paired with a receiver.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum PairedDeviceKind {
    Unknown = 0x00,
    Keyboard = 0x01,
    Mouse = 0x02,
    Numpad = 0x03,
    Presenter = 0x04,
    Remote = 0x07,
    Trackball = 0x08,
    Touchpad = 0x09,
    Tablet = 0x0a,
    Gamepad = 0x0b,
    Joystick = 0x0c,
    Headset = 0x0d,
}

/// Represents a device connection or disconnection event emitted by a
/// receiver.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct ConnectionEvent {
    /// The slot of the device used to communicate with it.
    pub device_index: u8,

    /// The kind of the device.
    pub kind: PairedDeviceKind,

    /// Whether the link to the device is encrypted.
    pub encrypted: bool,

    /// Whether the device is online/reachable.
    pub online: bool,

    /// The wireless product ID of the device.
    pub wpid: u16,
}

/// Represents an error returned by a receiver.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReceiverError {
    /// Indicates that no supported receiver could be identified on a HID++
    /// channel.
    #[error("no (supported) receiver could be found")]
    UnknownReceiver,

    /// Indicates that the underlying channel returned an error.
    #[error("the HID++ channel returned an error")]
    Channel(#[from] ChannelError),
}
