//! The on-wire frame families used by HID++ and their raw byte forms.
//!
//! Three HID report families carry HID++ traffic, distinguished by the report
//! ID in the first byte: short (7 bytes), long (20 bytes) and very long
//! (64 bytes). BLE links additionally use VLP (very large payload) framing
//! for exchanges exceeding a single frame, see [`VlpFrame`].

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::nibble::U4;

pub const SHORT_REPORT_ID: u8 = 0x10;
pub const SHORT_REPORT_LENGTH: usize = 7;

pub const LONG_REPORT_ID: u8 = 0x11;
pub const LONG_REPORT_LENGTH: usize = 20;

pub const VERY_LONG_REPORT_ID: u8 = 0x12;
pub const VERY_LONG_REPORT_LENGTH: usize = 64;

/// This is the size of the buffer incoming reports are read into.
/// As we only care about HID++ reports, this equals to
/// [`VERY_LONG_REPORT_LENGTH`].
pub const MAX_REPORT_LENGTH: usize = VERY_LONG_REPORT_LENGTH;

/// The index to use in [`FrameHeader::device_index`] when addressing a
/// receiver (or a directly attached device) instead of a paired device slot.
pub const RECEIVER_DEVICE_INDEX: u8 = 0xff;

/// Represents one of the three HID++ frame families.
///
/// The family is selected by the report ID alone, never by the payload
/// content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[repr(u8)]
pub enum ReportFamily {
    Short = SHORT_REPORT_ID,
    Long = LONG_REPORT_ID,
    VeryLong = VERY_LONG_REPORT_ID,
}

impl ReportFamily {
    /// The total frame length of the family, including the report ID byte.
    pub fn total_length(self) -> usize {
        match self {
            Self::Short => SHORT_REPORT_LENGTH,
            Self::Long => LONG_REPORT_LENGTH,
            Self::VeryLong => VERY_LONG_REPORT_LENGTH,
        }
    }

    /// The payload length of the family, excluding the 4 header bytes.
    pub fn payload_length(self) -> usize {
        self.total_length() - 4
    }
}

/// Represents the header that starts every HID++ frame, directly after the
/// report ID byte.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FrameHeader {
    /// The index of the device involved in the communication.
    ///
    /// [`RECEIVER_DEVICE_INDEX`] addresses the receiver itself, `1..=N`
    /// address a paired device slot behind it.
    pub device_index: u8,

    /// The sub ID (HID++1.0) or feature index (HID++2.0) of the frame.
    pub sub_id: u8,

    /// The function index (leftmost 4 bits) and software ID (rightmost
    /// 4 bits).
    ///
    /// For HID++1.0 register traffic this byte carries the register address
    /// instead.
    pub function_and_sw_id: u8,
}

impl FrameHeader {
    /// Extracts the function index nibble.
    pub fn function_id(&self) -> U4 {
        U4::from_hi(self.function_and_sw_id)
    }

    /// Extracts the software ID nibble.
    pub fn software_id(&self) -> U4 {
        U4::from_lo(self.function_and_sw_id)
    }
}

/// Represents a HID++ frame consisting of a header and payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum HidppFrame {
    /// Represents a short HID++ frame that has 3 bytes of payload.
    Short(FrameHeader, [u8; SHORT_REPORT_LENGTH - 4]),

    /// Represents a long HID++ frame that has 16 bytes of payload.
    Long(FrameHeader, [u8; LONG_REPORT_LENGTH - 4]),

    /// Represents a very long HID++ frame that has 60 bytes of payload.
    VeryLong(FrameHeader, [u8; VERY_LONG_REPORT_LENGTH - 4]),
}

impl HidppFrame {
    /// Constructs a frame of the given family, fitting `payload` into the
    /// family's payload size and padding the remainder with zeroes.
    ///
    /// Returns [`None`] if the payload is too long for the family.
    pub fn with_payload(family: ReportFamily, header: FrameHeader, payload: &[u8]) -> Option<Self> {
        if payload.len() > family.payload_length() {
            return None;
        }

        Some(match family {
            ReportFamily::Short => {
                let mut data = [0u8; SHORT_REPORT_LENGTH - 4];
                data[..payload.len()].copy_from_slice(payload);
                Self::Short(header, data)
            },
            ReportFamily::Long => {
                let mut data = [0u8; LONG_REPORT_LENGTH - 4];
                data[..payload.len()].copy_from_slice(payload);
                Self::Long(header, data)
            },
            ReportFamily::VeryLong => {
                let mut data = [0u8; VERY_LONG_REPORT_LENGTH - 4];
                data[..payload.len()].copy_from_slice(payload);
                Self::VeryLong(header, data)
            },
        })
    }

    /// Tries to read a HID++ frame from raw data.
    ///
    /// Returns [`None`] if the report ID does not belong to a HID++ family or
    /// the data length does not match the family's frame length.
    pub fn read_raw(data: &[u8]) -> Option<Self> {
        if data.len() < 4 {
            return None;
        }

        let family = ReportFamily::try_from(data[0]).ok()?;
        if data.len() != family.total_length() {
            return None;
        }

        let header = FrameHeader {
            device_index: data[1],
            sub_id: data[2],
            function_and_sw_id: data[3],
        };

        Some(match family {
            ReportFamily::Short => Self::Short(header, data[4..].try_into().unwrap()),
            ReportFamily::Long => Self::Long(header, data[4..].try_into().unwrap()),
            ReportFamily::VeryLong => Self::VeryLong(header, data[4..].try_into().unwrap()),
        })
    }

    /// Writes a HID++ frame in its raw byte form into a buffer.
    ///
    /// Returns the amount of written bytes.
    pub fn write_raw(&self, buf: &mut [u8]) -> usize {
        let header = self.header();

        buf[0] = self.family().into();
        buf[1] = header.device_index;
        buf[2] = header.sub_id;
        buf[3] = header.function_and_sw_id;

        buf[4..self.family().total_length()].copy_from_slice(self.payload());
        self.family().total_length()
    }

    /// The frame family this frame belongs to.
    pub fn family(&self) -> ReportFamily {
        match self {
            Self::Short(..) => ReportFamily::Short,
            Self::Long(..) => ReportFamily::Long,
            Self::VeryLong(..) => ReportFamily::VeryLong,
        }
    }

    /// Extracts the header of the frame.
    pub fn header(&self) -> FrameHeader {
        match *self {
            Self::Short(header, _) => header,
            Self::Long(header, _) => header,
            Self::VeryLong(header, _) => header,
        }
    }

    /// Provides mutable access to the header of the frame.
    pub fn header_mut(&mut self) -> &mut FrameHeader {
        match self {
            Self::Short(header, _) => header,
            Self::Long(header, _) => header,
            Self::VeryLong(header, _) => header,
        }
    }

    /// Provides the payload of the frame.
    pub fn payload(&self) -> &[u8] {
        match self {
            Self::Short(_, payload) => payload,
            Self::Long(_, payload) => payload,
            Self::VeryLong(_, payload) => payload,
        }
    }

    /// Extracts the payload of the frame and fits it into an array capable of
    /// containing the longest possible payload, filling the rest up with
    /// zeroes.
    pub fn extend_payload(&self) -> [u8; VERY_LONG_REPORT_LENGTH - 4] {
        let mut data = [0u8; VERY_LONG_REPORT_LENGTH - 4];
        let payload = self.payload();
        data[..payload.len()].copy_from_slice(payload);
        data
    }
}

/// Represents the framing byte that starts every VLP frame on a BLE link.
///
/// A logical VLP message is split into one or more chunks. The first chunk
/// carries `begin`, the last one carries `end`, and the 4-bit sequence number
/// increments (wrapping) per chunk so that lost chunks are detectable.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct VlpFraming {
    /// Whether this chunk starts a logical VLP message.
    pub begin: bool,

    /// Whether this chunk completes a logical VLP message.
    pub end: bool,

    /// The chunk sequence number.
    pub sequence: U4,
}

impl VlpFraming {
    /// Parses the framing information from a VLP framing byte.
    ///
    /// The two bits between the begin/end flags and the sequence nibble are
    /// reserved; a byte with any of them set is rejected with [`None`].
    pub fn read_raw(raw: u8) -> Option<Self> {
        if raw & 0x30 != 0 {
            return None;
        }

        Some(Self {
            begin: raw & (1 << 7) != 0,
            end: raw & (1 << 6) != 0,
            sequence: U4::from_lo(raw),
        })
    }

    /// Encodes the framing information into a VLP framing byte.
    pub fn write_raw(&self) -> u8 {
        let mut raw = self.sequence.to_lo();
        if self.begin {
            raw |= 1 << 7;
        }
        if self.end {
            raw |= 1 << 6;
        }

        raw
    }
}

/// Represents a single VLP chunk as read from or written to a BLE link.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct VlpFrame {
    /// The framing information of the chunk.
    pub framing: VlpFraming,

    /// The index of the feature the message belongs to.
    pub feature_index: u8,

    /// The function index (leftmost 4 bits) and software ID (rightmost
    /// 4 bits).
    pub function_and_sw_id: u8,

    /// The chunk payload, extending up to the link MTU minus the 3 framing
    /// bytes.
    pub payload: Vec<u8>,
}

/// Represents a logical VLP message after reassembling its chunks.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct VlpMessage {
    /// The index of the feature the message belongs to.
    pub feature_index: u8,

    /// The function index (leftmost 4 bits) and software ID (rightmost
    /// 4 bits).
    pub function_and_sw_id: u8,

    /// The full payload, concatenated across all chunks.
    pub payload: Vec<u8>,
}

impl VlpMessage {
    /// Extracts the function index nibble.
    pub fn function_id(&self) -> U4 {
        U4::from_hi(self.function_and_sw_id)
    }

    /// Extracts the software ID nibble.
    pub fn software_id(&self) -> U4 {
        U4::from_lo(self.function_and_sw_id)
    }

    /// Splits the message into chunks ready to be written to a link with the
    /// given MTU, assigning framing bytes with wrapping sequence numbers.
    pub fn into_frames(self, mtu: usize) -> Vec<VlpFrame> {
        let chunk_size = mtu.saturating_sub(3).max(1);
        let chunk_count = self.payload.chunks(chunk_size).count().max(1);

        let mut frames = Vec::with_capacity(chunk_count);
        let mut sequence = U4::from_lo(0);

        for index in 0..chunk_count {
            let chunk = self
                .payload
                .chunks(chunk_size)
                .nth(index)
                .unwrap_or(&[])
                .to_vec();

            frames.push(VlpFrame {
                framing: VlpFraming {
                    begin: index == 0,
                    end: index == chunk_count - 1,
                    sequence,
                },
                feature_index: self.feature_index,
                function_and_sw_id: self.function_and_sw_id,
                payload: chunk,
            });

            sequence = sequence.wrapping_next();
        }

        frames
    }
}

impl VlpFrame {
    /// Tries to read a VLP chunk from raw data.
    pub fn read_raw(data: &[u8]) -> Option<Self> {
        if data.len() < 3 {
            return None;
        }

        Some(Self {
            framing: VlpFraming::read_raw(data[0])?,
            feature_index: data[1],
            function_and_sw_id: data[2],
            payload: data[3..].to_vec(),
        })
    }

    /// Writes a VLP chunk in its raw byte form.
    pub fn write_raw(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(3 + self.payload.len());
        data.push(self.framing.write_raw());
        data.push(self.feature_index);
        data.push(self.function_and_sw_id);
        data.extend_from_slice(&self.payload);
        data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_is_selected_by_report_id_only() {
        // A 7-byte buffer with a long report ID must not parse, and neither
        // must a 20-byte buffer with a short report ID.
        let mut short_sized = [0u8; SHORT_REPORT_LENGTH];
        short_sized[0] = LONG_REPORT_ID;
        assert_eq!(HidppFrame::read_raw(&short_sized), None);

        let mut long_sized = [0u8; LONG_REPORT_LENGTH];
        long_sized[0] = SHORT_REPORT_ID;
        assert_eq!(HidppFrame::read_raw(&long_sized), None);

        long_sized[0] = LONG_REPORT_ID;
        assert!(matches!(
            HidppFrame::read_raw(&long_sized),
            Some(HidppFrame::Long(..))
        ));
    }

    #[test]
    fn raw_round_trip() {
        let frame = HidppFrame::Short(
            FrameHeader {
                device_index: 0x01,
                sub_id: 0x00,
                function_and_sw_id: 0x0a,
            },
            [0x18, 0x14, 0x00],
        );

        let mut buf = [0u8; MAX_REPORT_LENGTH];
        let len = frame.write_raw(&mut buf);
        assert_eq!(&buf[..len], &[0x10, 0x01, 0x00, 0x0a, 0x18, 0x14, 0x00]);
        assert_eq!(HidppFrame::read_raw(&buf[..len]), Some(frame));
    }

    #[test]
    fn very_long_round_trip() {
        let mut payload = [0u8; VERY_LONG_REPORT_LENGTH - 4];
        payload[0] = 0xde;
        payload[59] = 0xad;

        let frame = HidppFrame::VeryLong(
            FrameHeader {
                device_index: 0xff,
                sub_id: 0x42,
                function_and_sw_id: 0x21,
            },
            payload,
        );

        let mut buf = [0u8; MAX_REPORT_LENGTH];
        let len = frame.write_raw(&mut buf);
        assert_eq!(len, VERY_LONG_REPORT_LENGTH);
        assert_eq!(HidppFrame::read_raw(&buf[..len]), Some(frame));
    }

    #[test]
    fn header_nibbles() {
        let header = FrameHeader {
            device_index: 0x01,
            sub_id: 0x02,
            function_and_sw_id: 0x1a,
        };

        assert_eq!(header.function_id().to_lo(), 0x1);
        assert_eq!(header.software_id().to_lo(), 0xa);
    }

    #[test]
    fn vlp_framing_round_trip() {
        for begin in [false, true] {
            for end in [false, true] {
                for seq in 0..16u8 {
                    let framing = VlpFraming {
                        begin,
                        end,
                        sequence: U4::from_lo(seq),
                    };

                    let raw = framing.write_raw();
                    assert_eq!(VlpFraming::read_raw(raw), Some(framing));
                }
            }
        }
    }

    #[test]
    fn vlp_framing_rejects_reserved_bits() {
        assert_eq!(VlpFraming::read_raw(0x10), None);
        assert_eq!(VlpFraming::read_raw(0x20), None);
    }

    #[test]
    fn vlp_message_chunking() {
        let msg = VlpMessage {
            feature_index: 0x05,
            function_and_sw_id: 0x21,
            payload: (0..10).collect(),
        };

        // MTU 7 leaves 4 payload bytes per chunk.
        let frames = msg.clone().into_frames(7);
        assert_eq!(frames.len(), 3);

        assert!(frames[0].framing.begin && !frames[0].framing.end);
        assert!(!frames[1].framing.begin && !frames[1].framing.end);
        assert!(!frames[2].framing.begin && frames[2].framing.end);

        assert_eq!(frames[0].framing.sequence.to_lo(), 0);
        assert_eq!(frames[1].framing.sequence.to_lo(), 1);
        assert_eq!(frames[2].framing.sequence.to_lo(), 2);

        let reassembled: Vec<u8> = frames
            .iter()
            .flat_map(|frame| frame.payload.clone())
            .collect();
        assert_eq!(reassembled, msg.payload);
    }

    #[test]
    fn vlp_frame_round_trip() {
        let frame = VlpFrame {
            framing: VlpFraming {
                begin: true,
                end: false,
                sequence: U4::from_lo(0x1),
            },
            feature_index: 0x05,
            function_and_sw_id: 0x21,
            payload: vec![0x01, 0x02, 0x03, 0x04],
        };

        let raw = frame.write_raw();
        assert_eq!(VlpFrame::read_raw(&raw), Some(frame));
    }
}
