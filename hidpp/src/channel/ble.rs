//! BLE-specific channel functionality: VLP reassembly, notification
//! management and the BLE Pro vendor attributes.

use std::time::Duration;

use super::{ChannelError, HidppChannel, SEND_TIMEOUT, pending::PendingResponse};
use crate::{
    frame::{VlpFrame, VlpMessage},
    nibble::U4,
    transport::Characteristic,
};

/// The deadline to use for a VLP exchange spanning the given amount of
/// chunks, scaled up from the regular send timeout.
pub fn vlp_timeout(chunks: usize) -> Duration {
    SEND_TIMEOUT * chunks.max(1) as u32
}

/// Reassembles logical VLP messages out of their chunks.
///
/// Chunks of one message share the feature index and function/software ID
/// byte and carry consecutive (wrapping) sequence numbers. A chunk that does
/// not continue the message currently being assembled drops the partial
/// message.
#[derive(Debug, Default)]
pub(crate) struct VlpAssembler {
    current: Option<Partial>,
}

#[derive(Debug)]
struct Partial {
    feature_index: u8,
    function_and_sw_id: u8,
    next_sequence: U4,
    payload: Vec<u8>,
}

impl VlpAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one received chunk, returning the completed message when the
    /// final chunk arrived.
    pub fn feed(&mut self, chunk: VlpFrame) -> Option<VlpMessage> {
        if chunk.framing.begin {
            if self.current.is_some() {
                tracing::warn!("VLP chunk starts a new message while another is incomplete");
            }

            self.current = Some(Partial {
                feature_index: chunk.feature_index,
                function_and_sw_id: chunk.function_and_sw_id,
                next_sequence: chunk.framing.sequence.wrapping_next(),
                payload: chunk.payload,
            });
        } else {
            let Some(partial) = self.current.as_mut() else {
                tracing::warn!("VLP continuation chunk without a begun message");
                return None;
            };

            if partial.feature_index != chunk.feature_index
                || partial.function_and_sw_id != chunk.function_and_sw_id
                || partial.next_sequence != chunk.framing.sequence
            {
                tracing::warn!("VLP chunk does not continue the current message, dropping both");
                self.current = None;
                return None;
            }

            partial.next_sequence = chunk.framing.sequence.wrapping_next();
            partial.payload.extend_from_slice(&chunk.payload);
        }

        if !chunk.framing.end {
            return None;
        }

        let partial = self.current.take()?;
        Some(VlpMessage {
            feature_index: partial.feature_index,
            function_and_sw_id: partial.function_and_sw_id,
            payload: partial.payload,
        })
    }
}

impl HidppChannel {
    /// Sends a VLP request across a BLE link and waits for its (VLP or
    /// plain-frame) response payload.
    ///
    /// The message's software ID nibble is replaced by a freshly allocated
    /// correlation token, like for regular requests.
    pub async fn send_vlp(
        &self,
        msg: VlpMessage,
        timeout: Duration,
    ) -> Result<VlpMessage, ChannelError> {
        let Some(ble) = self.transport().ble() else {
            return Err(ChannelError::NotBle);
        };
        if !self.is_open() {
            return Err(ChannelError::ChannelClosed);
        }

        let device_index = self.id.device_index;
        let expected = super::pending::V20Expectation {
            feature_index: msg.feature_index,
            function_id: msg.function_id(),
        };

        let (sw_id, receiver) = {
            let mut next = self.sw_id.lock().unwrap();
            let Some((allocated, receiver)) =
                self.pending.alloc_v20(device_index, *next, expected)
            else {
                return Err(ChannelError::ReplayTokenExhausted);
            };
            *next = allocated.wrapping_next();
            (allocated, receiver)
        };

        let function_id = msg.function_id();
        let stamped = VlpMessage {
            function_and_sw_id: U4::combine(function_id, sw_id),
            ..msg
        };

        let mtu = ble.mtu();
        for frame in stamped.into_frames(mtu) {
            if let Err(err) = ble
                .write(Characteristic::HidppReport, &frame.write_raw())
                .await
            {
                self.pending.remove_v20(device_index, sw_id);
                return Err(ChannelError::Transport(err));
            }
        }

        match tokio::time::timeout(timeout, receiver).await {
            Err(_) => {
                self.pending.remove_v20(device_index, sw_id);
                Err(ChannelError::Timeout)
            },
            Ok(Err(_)) => Err(ChannelError::ChannelClosed),
            Ok(Ok(Err(err))) => Err(err.into()),
            Ok(Ok(Ok(PendingResponse::Vlp(msg)))) => Ok(msg),
            Ok(Ok(Ok(PendingResponse::Frame(frame)))) => Ok(VlpMessage {
                feature_index: frame.header().sub_id,
                function_and_sw_id: frame.header().function_and_sw_id,
                payload: frame.payload().to_vec(),
            }),
        }
    }

    /// Subscribes to notifications of the HID++ report characteristic and
    /// the HID input-report characteristics.
    ///
    /// Notifications then surface on the channel's inbound stream like any
    /// other frame.
    pub async fn enable_ble_notifications(&self) -> Result<(), ChannelError> {
        let Some(ble) = self.transport().ble() else {
            return Err(ChannelError::NotBle);
        };

        ble.enable_notification(Characteristic::HidppReport)
            .await
            .map_err(ChannelError::Transport)
    }

    /// Toggles latency suppression through the BLE Pro vendor-specific
    /// characteristic.
    ///
    /// With suppression enabled the device stops honouring the connection
    /// latency negotiated with the host, trading power consumption for
    /// responsiveness. Test benches enable this to keep round-trip timings
    /// deterministic.
    pub async fn set_latency_suppression(&self, enabled: bool) -> Result<(), ChannelError> {
        let Some(ble) = self.transport().ble() else {
            return Err(ChannelError::NotBle);
        };

        ble.write(
            Characteristic::BleProLatencySuppression,
            &[if enabled { 0x01 } else { 0x00 }],
        )
        .await
        .map_err(ChannelError::Transport)
    }

    /// Reads the latency suppression state from the BLE Pro vendor-specific
    /// characteristic.
    pub async fn latency_suppression(&self) -> Result<bool, ChannelError> {
        let Some(ble) = self.transport().ble() else {
            return Err(ChannelError::NotBle);
        };

        let value = ble
            .read(Characteristic::BleProLatencySuppression)
            .await
            .map_err(ChannelError::Transport)?;

        value
            .first()
            .map(|byte| *byte != 0)
            .ok_or(ChannelError::UnsupportedResponse)
    }

    /// Writes the BLE Pro authentication characteristic.
    ///
    /// BLE Pro receivers require this exchange before privileged register
    /// access is granted.
    pub async fn write_ble_pro_authentication(&self, data: &[u8]) -> Result<(), ChannelError> {
        let Some(ble) = self.transport().ble() else {
            return Err(ChannelError::NotBle);
        };

        ble.write(Characteristic::BleProAuthentication, data)
            .await
            .map_err(ChannelError::Transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::VlpFraming;

    fn chunk(begin: bool, end: bool, seq: u8, payload: &[u8]) -> VlpFrame {
        VlpFrame {
            framing: VlpFraming {
                begin,
                end,
                sequence: U4::from_lo(seq),
            },
            feature_index: 0x05,
            function_and_sw_id: 0x21,
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn single_chunk_message() {
        let mut assembler = VlpAssembler::new();
        let msg = assembler
            .feed(chunk(true, true, 0, &[0x01, 0x02]))
            .expect("a complete message");

        assert_eq!(msg.feature_index, 0x05);
        assert_eq!(msg.payload, vec![0x01, 0x02]);
    }

    #[test]
    fn multi_chunk_reassembly() {
        let mut assembler = VlpAssembler::new();
        assert!(assembler.feed(chunk(true, false, 0, &[0x01])).is_none());
        assert!(assembler.feed(chunk(false, false, 1, &[0x02])).is_none());

        let msg = assembler
            .feed(chunk(false, true, 2, &[0x03]))
            .expect("a complete message");
        assert_eq!(msg.payload, vec![0x01, 0x02, 0x03]);
    }

    #[test]
    fn sequence_gap_drops_the_partial_message() {
        let mut assembler = VlpAssembler::new();
        assert!(assembler.feed(chunk(true, false, 0, &[0x01])).is_none());
        // Sequence 2 skips a chunk.
        assert!(assembler.feed(chunk(false, true, 2, &[0x03])).is_none());

        // The partial message is gone; a fresh one assembles fine.
        let msg = assembler.feed(chunk(true, true, 7, &[0xaa])).unwrap();
        assert_eq!(msg.payload, vec![0xaa]);
    }

    #[test]
    fn continuation_without_begin_is_ignored() {
        let mut assembler = VlpAssembler::new();
        assert!(assembler.feed(chunk(false, true, 3, &[0x01])).is_none());
    }
}
