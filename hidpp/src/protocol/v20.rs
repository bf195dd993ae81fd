//! Implements functionality specific to HID++2.0.

use num_enum::{FromPrimitive, IntoPrimitive};
use thiserror::Error;

use crate::{
    frame::{
        FrameHeader,
        HidppFrame,
        LONG_REPORT_LENGTH,
        SHORT_REPORT_LENGTH,
        VERY_LONG_REPORT_LENGTH,
    },
    nibble::U4,
};

/// The feature index reserved for HID++2.0 error messages.
pub const ERROR_FEATURE_INDEX: u8 = 0xff;

/// Represents the header that every [`HidppFrame`] of HID++2.0 starts with.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct MessageHeader {
    /// The index of the device involved in the communication.
    pub device_index: u8,

    /// The index of the feature the message belongs to.
    ///
    /// This is not the same as the feature ID, but the index returned from a
    /// feature enumeration request.
    pub feature_index: u8,

    /// The ID of the function involved in the communication.
    pub function_id: U4,

    /// The ID of the software communicating with the device.
    pub software_id: U4,
}

/// Represents a HID++2.0 message.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Message {
    /// Represents a short HID++2.0 message with 3 bytes of payload.
    Short(MessageHeader, [u8; SHORT_REPORT_LENGTH - 4]),

    /// Represents a long HID++2.0 message with 16 bytes of payload.
    Long(MessageHeader, [u8; LONG_REPORT_LENGTH - 4]),

    /// Represents a very long HID++2.0 message with 60 bytes of payload.
    VeryLong(MessageHeader, [u8; VERY_LONG_REPORT_LENGTH - 4]),
}

impl Message {
    /// Extracts the header of the message.
    pub fn header(&self) -> MessageHeader {
        match *self {
            Message::Short(header, _) => header,
            Message::Long(header, _) => header,
            Message::VeryLong(header, _) => header,
        }
    }

    /// Extracts the payload of the message and fits it into an array capable
    /// of containing the longest possible payload, filling the rest up with
    /// zeroes.
    pub fn extend_payload(&self) -> [u8; VERY_LONG_REPORT_LENGTH - 4] {
        let mut data = [0; VERY_LONG_REPORT_LENGTH - 4];
        match *self {
            Message::Short(_, payload) => {
                data[..SHORT_REPORT_LENGTH - 4].copy_from_slice(&payload)
            },
            Message::Long(_, payload) => data[..LONG_REPORT_LENGTH - 4].copy_from_slice(&payload),
            Message::VeryLong(_, payload) => data.copy_from_slice(&payload),
        }
        data
    }
}

impl From<HidppFrame> for Message {
    fn from(frame: HidppFrame) -> Self {
        let frame_header = frame.header();
        let header = MessageHeader {
            device_index: frame_header.device_index,
            feature_index: frame_header.sub_id,
            function_id: frame_header.function_id(),
            software_id: frame_header.software_id(),
        };

        match frame {
            HidppFrame::Short(_, payload) => Message::Short(header, payload),
            HidppFrame::Long(_, payload) => Message::Long(header, payload),
            HidppFrame::VeryLong(_, payload) => Message::VeryLong(header, payload),
        }
    }
}

impl From<Message> for HidppFrame {
    fn from(msg: Message) -> Self {
        let header = msg.header();
        let frame_header = FrameHeader {
            device_index: header.device_index,
            sub_id: header.feature_index,
            function_and_sw_id: U4::combine(header.function_id, header.software_id),
        };

        match msg {
            Message::Short(_, payload) => HidppFrame::Short(frame_header, payload),
            Message::Long(_, payload) => HidppFrame::Long(frame_header, payload),
            Message::VeryLong(_, payload) => HidppFrame::VeryLong(frame_header, payload),
        }
    }
}

/// Represents the kind of an error a HID++2.0 device reports through an
/// error message.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, FromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
#[repr(u8)]
pub enum ErrorKind {
    /// The request is not supported in the current context.
    Unsupported = 0x01,

    /// A request argument is invalid.
    InvalidArgument = 0x02,

    /// The device encountered a hardware error.
    HardwareError = 0x04,

    /// The request is not allowed, e.g. because a deactivatable feature is
    /// currently deactivated.
    NotAllowed = 0x05,

    /// The function index of a sent message is invalid for the feature.
    InvalidFunctionId = 0x07,

    /// The device is busy processing another request.
    Busy = 0x08,

    /// A required resource, e.g. the wireless link, is unavailable.
    ResourceError = 0x09,

    /// A request argument lies outside its supported range.
    OutOfRange = 0x0b,

    /// Any error code this crate does not know.
    #[num_enum(catch_all)]
    Unknown(u8),
}

/// Represents a HID++2.0 error as carried by an error message.
///
/// Error messages echo the feature index, function ID and software ID of the
/// failed request so that it can be correlated.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Error)]
#[error(
    "the device reported a HID++2.0 error of kind {kind:?} \
     for feature index {feature_index:#04x}, function {function_id:?}"
)]
pub struct Hidpp20Error {
    /// The reported error kind.
    pub kind: ErrorKind,

    /// The feature index of the request that failed.
    pub feature_index: u8,

    /// The function ID of the request that failed.
    pub function_id: U4,

    /// The software ID of the request that failed.
    pub software_id: U4,
}

impl Hidpp20Error {
    /// Tries to interpret a frame as a HID++2.0 error message.
    ///
    /// Error messages use the long frame family with the reserved feature
    /// index [`ERROR_FEATURE_INDEX`]. Their payload starts with the feature
    /// index, the function/software ID byte and the error code of the
    /// request that failed.
    pub fn from_frame(frame: &HidppFrame) -> Option<Self> {
        let header = frame.header();
        if header.sub_id != ERROR_FEATURE_INDEX {
            return None;
        }

        let payload = frame.payload();
        Some(Self {
            kind: ErrorKind::from(payload[2]),
            feature_index: payload[0],
            function_id: U4::from_hi(payload[1]),
            software_id: U4::from_lo(payload[1]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_frame_round_trip() {
        let msg = Message::Short(
            MessageHeader {
                device_index: 0x01,
                feature_index: 0x02,
                function_id: U4::from_lo(0x1),
                software_id: U4::from_lo(0xa),
            },
            [0x01, 0x00, 0x00],
        );

        let frame = HidppFrame::from(msg);
        assert_eq!(frame.header().function_and_sw_id, 0x1a);
        assert_eq!(Message::from(frame), msg);
    }

    #[test]
    fn error_frame_parsing() {
        let frame = HidppFrame::Long(
            FrameHeader {
                device_index: 0x01,
                sub_id: ERROR_FEATURE_INDEX,
                function_and_sw_id: 0x00,
            },
            {
                let mut payload = [0u8; 16];
                payload[0] = 0x02;
                payload[1] = 0x1a;
                payload[2] = 0x0b;
                payload
            },
        );

        let error = Hidpp20Error::from_frame(&frame).unwrap();
        assert_eq!(error.kind, ErrorKind::OutOfRange);
        assert_eq!(error.feature_index, 0x02);
        assert_eq!(error.function_id, U4::from_lo(0x1));
        assert_eq!(error.software_id, U4::from_lo(0xa));
    }

    #[test]
    fn unknown_error_codes_are_preserved() {
        assert_eq!(ErrorKind::from(0x42), ErrorKind::Unknown(0x42));
        assert_eq!(u8::from(ErrorKind::Unknown(0x42)), 0x42);
        assert_eq!(ErrorKind::from(0x0b), ErrorKind::OutOfRange);
    }

    #[test]
    fn regular_frame_is_not_an_error() {
        let frame = HidppFrame::Short(
            FrameHeader {
                device_index: 0x01,
                sub_id: 0x02,
                function_and_sw_id: 0x1a,
            },
            [0x00; 3],
        );

        assert_eq!(Hidpp20Error::from_frame(&frame), None);
    }
}
