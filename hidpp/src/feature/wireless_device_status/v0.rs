//! Implements the feature starting with version 0.

use std::sync::Arc;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use super::STATUS_BROADCAST_EVENT;
use crate::{
    channel::HidppChannel,
    codec::Message,
    event::EventEmitter,
    feature::{CreatableFeature, EmittingFeature, Feature},
};

/// Implements the `WirelessDeviceStatus` / `0x1d4b` feature.
///
/// The first version supported by this feature is v0.
///
/// The feature has no callable functions; it consists of a single broadcast
/// event the device sends whenever it (re)connects to the host. Test code
/// waits on this broadcast after power cycles and host switches.
pub struct WirelessDeviceStatusFeatureV0 {
    /// The underlying HID++ channel.
    chan: Arc<HidppChannel>,

    /// The emitter used to fan out status broadcasts.
    emitter: Arc<EventEmitter<StatusBroadcast>>,

    /// The handle assigned to the message listener registered via
    /// [`HidppChannel::add_msg_listener`].
    /// This is used to remove the listener when the feature is dropped.
    msg_listener_hdl: u32,
}

impl CreatableFeature for WirelessDeviceStatusFeatureV0 {
    const ID: u16 = 0x1d4b;
    const STARTING_VERSION: u8 = 0;

    fn new(chan: Arc<HidppChannel>, device_index: u8, feature_index: u8) -> Self {
        let emitter = Arc::new(EventEmitter::new());

        let hdl = chan.add_msg_listener({
            let emitter = Arc::clone(&emitter);

            move |raw, matched| {
                if matched {
                    return;
                }

                let header = raw.header();
                // Events carry the event index in the function nibble and a
                // software ID of zero; the broadcast is event 0.
                if header.device_index != device_index
                    || header.sub_id != feature_index
                    || header.function_and_sw_id != 0
                {
                    return;
                }

                let Ok(decoded) =
                    Message::decode_payload(&STATUS_BROADCAST_EVENT, raw.payload())
                else {
                    return;
                };

                let Some(status) = decoded
                    .uint("status")
                    .and_then(|value| DeviceStatus::try_from(value as u8).ok())
                else {
                    return;
                };
                let Some(request) = decoded
                    .uint("request")
                    .and_then(|value| StatusRequest::try_from(value as u8).ok())
                else {
                    return;
                };
                let Some(reason) = decoded
                    .uint("reason")
                    .and_then(|value| StatusReason::try_from(value as u8).ok())
                else {
                    return;
                };

                emitter.emit(StatusBroadcast {
                    status,
                    request,
                    reason,
                });
            }
        });

        Self {
            chan,
            emitter,
            msg_listener_hdl: hdl,
        }
    }
}

impl Feature for WirelessDeviceStatusFeatureV0 {
}

impl EmittingFeature<StatusBroadcast> for WirelessDeviceStatusFeatureV0 {
    fn listen(&self) -> flume::Receiver<StatusBroadcast> {
        self.emitter.create_receiver()
    }
}

impl Drop for WirelessDeviceStatusFeatureV0 {
    fn drop(&mut self) {
        self.chan.remove_msg_listener(self.msg_listener_hdl);
    }
}

/// Represents one status broadcast of the device.
///
/// This broadcast is always enabled; devices send it whenever they
/// (re)connect to the host.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct StatusBroadcast {
    /// The status the device reports to be in.
    pub status: DeviceStatus,

    /// The request the device expresses towards the host software.
    pub request: StatusRequest,

    /// The reason for the broadcast.
    pub reason: StatusReason,
}

/// Represents a device status as reported in [`StatusBroadcast::status`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum DeviceStatus {
    Unknown = 0x00,
    Reconnection = 0x01,
}

/// Represents a request as reported in [`StatusBroadcast::request`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum StatusRequest {
    NoRequest = 0x00,

    /// The device lost its state and the host software should re-apply its
    /// configuration.
    SoftwareReconfigurationNeeded = 0x01,
}

/// Represents a broadcast reason as reported in [`StatusBroadcast::reason`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum StatusReason {
    Unknown = 0x00,
    PowerSwitchActivated = 0x01,
}
