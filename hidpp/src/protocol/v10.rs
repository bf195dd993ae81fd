//! Implements functionality specific to HID++1.0.

use num_enum::{IntoPrimitive, TryFromPrimitive};
use thiserror::Error;

use crate::frame::{FrameHeader, HidppFrame, LONG_REPORT_LENGTH, SHORT_REPORT_LENGTH};

/// Represents the header that every [`HidppFrame`] of HID++1.0 starts with.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct MessageHeader {
    /// The index of the device involved in the communication.
    pub device_index: u8,

    /// The sub ID of the message.
    pub sub_id: u8,
}

/// Represents a HID++1.0 message.
///
/// HID++1.0 only uses the short and long frame families.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Message {
    /// Represents a short HID++1.0 message with 4 bytes of payload.
    Short(MessageHeader, [u8; SHORT_REPORT_LENGTH - 3]),

    /// Represents a long HID++1.0 message with 17 bytes of payload.
    Long(MessageHeader, [u8; LONG_REPORT_LENGTH - 3]),
}

impl Message {
    /// Extracts the header of the message.
    pub fn header(&self) -> MessageHeader {
        match *self {
            Message::Short(header, _) => header,
            Message::Long(header, _) => header,
        }
    }

    /// Extracts the payload of the message and fits it into an array capable
    /// of containing the longest possible payload, filling the rest up with
    /// zeroes.
    ///
    /// In HID++1.0 the payload starts directly after the sub ID, so the
    /// register address byte is part of it.
    pub fn extend_payload(&self) -> [u8; LONG_REPORT_LENGTH - 3] {
        match *self {
            Message::Short(_, payload) => {
                let mut data = [0; LONG_REPORT_LENGTH - 3];
                data[..SHORT_REPORT_LENGTH - 3].copy_from_slice(&payload);
                data
            },
            Message::Long(_, payload) => payload,
        }
    }
}

impl TryFrom<HidppFrame> for Message {
    type Error = ();

    fn try_from(frame: HidppFrame) -> Result<Self, ()> {
        let header = MessageHeader {
            device_index: frame.header().device_index,
            sub_id: frame.header().sub_id,
        };

        match frame {
            HidppFrame::Short(frame_header, payload) => {
                let mut data = [0u8; SHORT_REPORT_LENGTH - 3];
                data[0] = frame_header.function_and_sw_id;
                data[1..].copy_from_slice(&payload);
                Ok(Message::Short(header, data))
            },
            HidppFrame::Long(frame_header, payload) => {
                let mut data = [0u8; LONG_REPORT_LENGTH - 3];
                data[0] = frame_header.function_and_sw_id;
                data[1..].copy_from_slice(&payload);
                Ok(Message::Long(header, data))
            },
            HidppFrame::VeryLong(..) => Err(()),
        }
    }
}

impl From<Message> for HidppFrame {
    fn from(msg: Message) -> Self {
        let header = msg.header();

        match msg {
            Message::Short(_, payload) => HidppFrame::Short(
                FrameHeader {
                    device_index: header.device_index,
                    sub_id: header.sub_id,
                    function_and_sw_id: payload[0],
                },
                payload[1..].try_into().unwrap(),
            ),
            Message::Long(_, payload) => HidppFrame::Long(
                FrameHeader {
                    device_index: header.device_index,
                    sub_id: header.sub_id,
                    function_and_sw_id: payload[0],
                },
                payload[1..].try_into().unwrap(),
            ),
        }
    }
}

/// Represents a globally defined sub ID of a HID++1.0 message.
///
/// This enum only includes sub IDs that are defined globally across all
/// devices. Most devices (e.g. the Unifying Receiver) define additional sub
/// IDs specific to their functionality.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[non_exhaustive]
#[repr(u8)]
pub enum MessageType {
    /// Used to set a 3-byte register value. A sent message of this type is
    /// usually responded with a response message of the same type (or
    /// [`Self::Error`]).
    SetRegister = 0x80,

    /// Used to retrieve a 3-byte register value. A sent message of this type
    /// is usually responded with a response message of the same type (or
    /// [`Self::Error`]).
    GetRegister = 0x81,

    /// Used to set a 16-byte register value. A sent message of this type is
    /// usually responded with a response message of the same type (or
    /// [`Self::Error`]).
    SetLongRegister = 0x82,

    /// Used to retrieve a 16-byte register value. A sent message of this
    /// type is usually responded with a response message of the same type
    /// (or [`Self::Error`]).
    GetLongRegister = 0x83,

    /// Used to indicate an error response. The error code usually included
    /// in the message can be mapped using [`ErrorType::try_from`].
    Error = 0x8f,
}

/// Sub IDs of unsolicited receiver notifications.
///
/// Receivers send these with the device index of the affected paired device,
/// not with the receiver index.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum NotificationType {
    /// A paired device disconnected from the receiver.
    DeviceDisconnection = 0x40,

    /// A paired device connected to the receiver. Also sent for every paired
    /// device when device arrival notifications are triggered.
    DeviceConnection = 0x41,

    /// The link quality of a wireless device changed.
    LinkQuality = 0x49,

    /// The receiver finished processing a device connection burst.
    ConnectionBurstComplete = 0x4b,
}

/// Represents the type of an error a HID++1.0 device returns as part of a
/// message with the [`MessageType::Error`] type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum ErrorType {
    /// No error.
    Success = 0x00,

    /// The sub ID of a sent message is invalid.
    InvalidSubId = 0x01,

    /// The address included in a sent message is invalid.
    InvalidAddress = 0x02,

    /// The value included in a sent message is invalid.
    InvalidValue = 0x03,

    /// A connection request failed on the receiver's side.
    ConnectFail = 0x04,

    /// The receiver indicates that too many devices are connected to it.
    TooManyDevices = 0x05,

    /// The receiver indicates that something already exists.
    AlreadyExists = 0x06,

    /// The receiver is currently handling a downstream (to device) message
    /// and cannot process a second one.
    Busy = 0x07,

    /// Trying to send a message to a device (device index) where there is no
    /// device paired.
    UnknownDevice = 0x08,

    /// A HID++ command has been sent to a device that is in disconnected
    /// mode. When a device is in disconnected mode it cannot receive
    /// commands from the host until the user interacts with it and it
    /// reconnects.
    ResourceError = 0x09,

    /// A sent request is not available in the current context.
    RequestUnavailable = 0x0a,

    /// A request parameter has an unsupported value.
    InvalidParamValue = 0x0b,

    /// The PIN code entered for a device was wrong.
    WrongPinCode = 0x0c,
}

/// Represents a HID++1.0 error as carried by an error message.
///
/// The error message echoes the sub ID and register address of the failed
/// request so that it can be correlated.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Error)]
#[error("the receiver reported a HID++1.0 error of kind {kind:?} for sub id {sub_id:#04x}")]
pub struct Hidpp10Error {
    /// The reported error kind, or [`None`] for codes this crate does not
    /// know.
    pub kind: Option<ErrorType>,

    /// The raw error code as found on the wire.
    pub code: u8,

    /// The sub ID of the request that failed.
    pub sub_id: u8,

    /// The register address of the request that failed.
    pub address: u8,
}

impl Hidpp10Error {
    /// Tries to interpret a message as a HID++1.0 error message.
    ///
    /// Error messages are always short according to the protocol
    /// specification.
    pub fn from_message(msg: &Message) -> Option<Self> {
        let Message::Short(header, payload) = msg else {
            return None;
        };

        if header.sub_id != MessageType::Error.into() {
            return None;
        }

        Some(Self {
            kind: ErrorType::try_from(payload[2]).ok(),
            code: payload[2],
            sub_id: payload[0],
            address: payload[1],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_conversion_keeps_register_address_in_payload() {
        let frame = HidppFrame::Short(
            FrameHeader {
                device_index: 0xff,
                sub_id: 0x81,
                function_and_sw_id: 0xb5,
            },
            [0x20, 0x00, 0x00],
        );

        let msg = Message::try_from(frame).unwrap();
        assert_eq!(msg.header().sub_id, 0x81);
        assert_eq!(msg.extend_payload()[0], 0xb5);
        assert_eq!(msg.extend_payload()[1], 0x20);

        assert_eq!(HidppFrame::from(msg), frame);
    }

    #[test]
    fn error_message_parsing() {
        let msg = Message::Short(
            MessageHeader {
                device_index: 0xff,
                sub_id: 0x8f,
            },
            [0x81, 0xb5, 0x03, 0x00],
        );

        let error = Hidpp10Error::from_message(&msg).unwrap();
        assert_eq!(error.kind, Some(ErrorType::InvalidValue));
        assert_eq!(error.sub_id, 0x81);
        assert_eq!(error.address, 0xb5);
    }

    #[test]
    fn non_error_message_is_not_an_error() {
        let msg = Message::Short(
            MessageHeader {
                device_index: 0xff,
                sub_id: 0x81,
            },
            [0x00, 0x00, 0x00, 0x00],
        );

        assert_eq!(Hidpp10Error::from_message(&msg), None);
    }
}
