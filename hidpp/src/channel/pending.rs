//! Bookkeeping for sent requests that are waiting for a response.
//!
//! A pending request is shared between the issuing caller and the
//! dispatcher: the caller holds the receiving end of a oneshot slot, the
//! dispatcher completes it when a matching frame (or a matching error
//! frame) arrives. HID++2.0 requests are keyed by their (device index,
//! software ID) tuple; at most one request may occupy a tuple at any
//! instant. HID++1.0 register requests and protocol probes use free-form
//! matchers instead, as HID++1.0 has no software ID.

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::channel::oneshot;

use crate::{
    frame::{HidppFrame, VlpMessage},
    nibble::U4,
    protocol::{v10::Hidpp10Error, v20::Hidpp20Error},
};

/// The ways a pending request can fail before a regular response arrives.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum PendingError {
    /// A HID++1.0 error message matched the request.
    Hidpp10(Hidpp10Error),

    /// A HID++2.0 error message matched the request.
    Hidpp20(Hidpp20Error),

    /// The channel was closed while the request was in flight.
    Closed,
}

/// A successful completion of a pending request.
#[derive(Clone, PartialEq, Eq, Debug)]
pub(crate) enum PendingResponse {
    /// A plain HID++ frame.
    Frame(HidppFrame),

    /// A reassembled VLP message.
    Vlp(VlpMessage),
}

pub(crate) type PendingResult = Result<PendingResponse, PendingError>;

/// What a HID++2.0 response has to look like to complete its request.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) struct V20Expectation {
    pub feature_index: u8,
    pub function_id: U4,
}

struct V20Slot {
    expected: V20Expectation,
    sender: oneshot::Sender<PendingResult>,
}

struct MatcherSlot {
    id: u64,
    device_index: u8,
    matcher: Box<dyn Fn(&HidppFrame) -> bool + Send + Sync>,

    /// The (sub ID, register address) of the sent HID++1.0 request, used to
    /// match error messages against it.
    v10_origin: Option<(u8, u8)>,

    sender: oneshot::Sender<PendingResult>,
}

/// A marker left behind by a cancelled request so that its response, should
/// it still arrive, can be recognized and rerouted.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
struct Tombstone {
    device_index: u8,
    feature_index: u8,
    function_and_sw_id: u8,
}

/// All pending requests of one physical channel, across every addressable
/// device behind it.
#[derive(Default)]
pub(crate) struct PendingTable {
    v20: Mutex<HashMap<(u8, u8), V20Slot>>,
    matchers: Mutex<Vec<MatcherSlot>>,
    tombstones: Mutex<Vec<Tombstone>>,
    next_matcher_id: AtomicU64,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a free software ID slot for a device, rotating from
    /// `start`, and registers the expectation under it.
    ///
    /// Returns [`None`] if all 16 slots of the device are occupied.
    pub fn alloc_v20(
        &self,
        device_index: u8,
        start: U4,
        expected: V20Expectation,
    ) -> Option<(U4, oneshot::Receiver<PendingResult>)> {
        let mut guard = self.v20.lock().unwrap();

        let mut candidate = start;
        for _ in 0..16 {
            let key = (device_index, candidate.to_lo());
            if !guard.contains_key(&key) {
                let (sender, receiver) = oneshot::channel();
                guard.insert(key, V20Slot {
                    expected,
                    sender,
                });
                return Some((candidate, receiver));
            }

            candidate = candidate.wrapping_next();
        }

        None
    }

    /// Removes a request slot, e.g. after its deadline expired, so that the
    /// software ID may be reused.
    pub fn remove_v20(&self, device_index: u8, sw_id: U4) {
        self.v20
            .lock()
            .unwrap()
            .remove(&(device_index, sw_id.to_lo()));
    }

    /// Cancels a request slot, leaving a tombstone behind: a matching frame
    /// arriving later is recognized as a late response.
    pub fn cancel_v20(&self, device_index: u8, sw_id: U4) {
        let Some(slot) = self
            .v20
            .lock()
            .unwrap()
            .remove(&(device_index, sw_id.to_lo()))
        else {
            return;
        };

        self.tombstones.lock().unwrap().push(Tombstone {
            device_index,
            feature_index: slot.expected.feature_index,
            function_and_sw_id: U4::combine(slot.expected.function_id, sw_id),
        });
    }

    /// Registers a free-form matcher waiting for a frame on a device.
    ///
    /// Returns a handle for [`Self::remove_matcher`] together with the
    /// completion receiver.
    pub fn register_matcher(
        &self,
        device_index: u8,
        matcher: impl Fn(&HidppFrame) -> bool + Send + Sync + 'static,
        v10_origin: Option<(u8, u8)>,
    ) -> (u64, oneshot::Receiver<PendingResult>) {
        let id = self.next_matcher_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();

        self.matchers.lock().unwrap().push(MatcherSlot {
            id,
            device_index,
            matcher: Box::new(matcher),
            v10_origin,
            sender,
        });

        (id, receiver)
    }

    /// Removes a matcher slot, e.g. after its deadline expired.
    pub fn remove_matcher(&self, id: u64) {
        self.matchers.lock().unwrap().retain(|slot| slot.id != id);
    }

    /// Tries to complete a pending HID++2.0 request with a response frame.
    ///
    /// Returns whether the frame was consumed.
    pub fn complete_v20(&self, frame: &HidppFrame) -> bool {
        let header = frame.header();
        let key = (header.device_index, header.software_id().to_lo());

        let mut guard = self.v20.lock().unwrap();
        let Some(slot) = guard.get(&key) else {
            return false;
        };

        if slot.expected.feature_index != header.sub_id
            || slot.expected.function_id != header.function_id()
        {
            return false;
        }

        let slot = guard.remove(&key).unwrap();
        // The caller having dropped the receiving end just means it is no
        // longer interested, so a failed send is fine.
        let _ = slot.sender.send(Ok(PendingResponse::Frame(*frame)));
        true
    }

    /// Tries to complete a pending HID++2.0 request with a reassembled VLP
    /// response.
    ///
    /// Returns whether the message was consumed.
    pub fn complete_v20_vlp(&self, device_index: u8, msg: &VlpMessage) -> bool {
        let key = (device_index, msg.software_id().to_lo());

        let mut guard = self.v20.lock().unwrap();
        let Some(slot) = guard.get(&key) else {
            return false;
        };

        if slot.expected.feature_index != msg.feature_index
            || slot.expected.function_id != msg.function_id()
        {
            return false;
        }

        let slot = guard.remove(&key).unwrap();
        let _ = slot.sender.send(Ok(PendingResponse::Vlp(msg.clone())));
        true
    }

    /// Tries to complete a pending matcher request with a frame.
    ///
    /// Returns whether the frame was consumed.
    pub fn complete_matcher(&self, frame: &HidppFrame) -> bool {
        let device_index = frame.header().device_index;

        let mut guard = self.matchers.lock().unwrap();
        let Some(pos) = guard
            .iter()
            .position(|slot| slot.device_index == device_index && (slot.matcher)(frame))
        else {
            return false;
        };

        let slot = guard.remove(pos);
        let _ = slot.sender.send(Ok(PendingResponse::Frame(*frame)));
        true
    }

    /// Tries to complete a pending HID++2.0 request with an error reported
    /// for it.
    ///
    /// Returns whether the error was consumed.
    pub fn complete_error_v20(&self, device_index: u8, error: Hidpp20Error) -> bool {
        let key = (device_index, error.software_id.to_lo());

        let mut guard = self.v20.lock().unwrap();
        let Some(slot) = guard.get(&key) else {
            return false;
        };

        if slot.expected.feature_index != error.feature_index
            || slot.expected.function_id != error.function_id
        {
            return false;
        }

        let slot = guard.remove(&key).unwrap();
        let _ = slot.sender.send(Err(PendingError::Hidpp20(error)));
        true
    }

    /// Tries to complete a pending HID++1.0 register request with an error
    /// reported for it.
    ///
    /// Returns whether the error was consumed.
    pub fn complete_error_v10(&self, device_index: u8, error: Hidpp10Error) -> bool {
        let mut guard = self.matchers.lock().unwrap();
        let Some(pos) = guard.iter().position(|slot| {
            slot.device_index == device_index
                && slot.v10_origin == Some((error.sub_id, error.address))
        }) else {
            return false;
        };

        let slot = guard.remove(pos);
        let _ = slot.sender.send(Err(PendingError::Hidpp10(error)));
        true
    }

    /// Checks whether a frame matches the tombstone of a cancelled request,
    /// consuming the tombstone if so.
    pub fn take_tombstone(&self, frame: &HidppFrame) -> bool {
        let header = frame.header();

        let mut guard = self.tombstones.lock().unwrap();
        let Some(pos) = guard.iter().position(|tombstone| {
            tombstone.device_index == header.device_index
                && tombstone.feature_index == header.sub_id
                && tombstone.function_and_sw_id == header.function_and_sw_id
        }) else {
            return false;
        };

        guard.remove(pos);
        true
    }

    /// Fails every pending request with [`PendingError::Closed`].
    pub fn fail_all_closed(&self) {
        for (_, slot) in self.v20.lock().unwrap().drain() {
            let _ = slot.sender.send(Err(PendingError::Closed));
        }
        for slot in self.matchers.lock().unwrap().drain(..) {
            let _ = slot.sender.send(Err(PendingError::Closed));
        }
        self.tombstones.lock().unwrap().clear();
    }

    /// Fails every pending request of one device with
    /// [`PendingError::Closed`].
    pub fn fail_device_closed(&self, device_index: u8) {
        let mut guard = self.v20.lock().unwrap();
        let keys: Vec<(u8, u8)> = guard
            .keys()
            .filter(|(device, _)| *device == device_index)
            .copied()
            .collect();
        for key in keys {
            if let Some(slot) = guard.remove(&key) {
                let _ = slot.sender.send(Err(PendingError::Closed));
            }
        }
        drop(guard);

        let mut matchers = self.matchers.lock().unwrap();
        let mut removed = Vec::new();
        let mut index = 0;
        while index < matchers.len() {
            if matchers[index].device_index == device_index {
                removed.push(matchers.remove(index));
            } else {
                index += 1;
            }
        }
        drop(matchers);

        for slot in removed {
            let _ = slot.sender.send(Err(PendingError::Closed));
        }

        self.tombstones
            .lock()
            .unwrap()
            .retain(|tombstone| tombstone.device_index != device_index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameHeader;

    fn response(device_index: u8, feature_index: u8, function_and_sw_id: u8) -> HidppFrame {
        HidppFrame::Long(
            FrameHeader {
                device_index,
                sub_id: feature_index,
                function_and_sw_id,
            },
            [0u8; 16],
        )
    }

    #[test]
    fn sixteen_slots_then_exhaustion() {
        let table = PendingTable::new();
        let expected = V20Expectation {
            feature_index: 0x02,
            function_id: U4::from_lo(0x1),
        };

        let mut receivers = Vec::new();
        for _ in 0..16 {
            let (_, rx) = table
                .alloc_v20(0x01, U4::from_lo(0x1), expected)
                .expect("a free slot should exist");
            receivers.push(rx);
        }

        assert!(table.alloc_v20(0x01, U4::from_lo(0x1), expected).is_none());

        // A different device still has free slots.
        assert!(table.alloc_v20(0x02, U4::from_lo(0x1), expected).is_some());
    }

    #[test]
    fn completion_requires_matching_expectation() {
        let table = PendingTable::new();
        let (sw_id, mut rx) = table
            .alloc_v20(0x01, U4::from_lo(0x1), V20Expectation {
                feature_index: 0x02,
                function_id: U4::from_lo(0x1),
            })
            .unwrap();

        // Same software ID, wrong feature index: not consumed.
        let wrong = response(0x01, 0x03, U4::combine(U4::from_lo(0x1), sw_id));
        assert!(!table.complete_v20(&wrong));
        assert!(rx.try_recv().unwrap().is_none());

        let right = response(0x01, 0x02, U4::combine(U4::from_lo(0x1), sw_id));
        assert!(table.complete_v20(&right));
        assert_eq!(
            rx.try_recv().unwrap(),
            Some(Ok(PendingResponse::Frame(right)))
        );

        // The slot is gone afterwards.
        assert!(!table.complete_v20(&right));
    }

    #[test]
    fn error_completion_carries_the_wire_error() {
        let table = PendingTable::new();
        let function_id = U4::from_lo(0x1);
        let (sw_id, mut rx) = table
            .alloc_v20(0x01, U4::from_lo(0x3), V20Expectation {
                feature_index: 0x02,
                function_id,
            })
            .unwrap();

        let error = Hidpp20Error {
            kind: crate::protocol::v20::ErrorKind::OutOfRange,
            feature_index: 0x02,
            function_id,
            software_id: sw_id,
        };

        assert!(table.complete_error_v20(0x01, error));
        assert_eq!(
            rx.try_recv().unwrap(),
            Some(Err(PendingError::Hidpp20(error)))
        );
    }

    #[test]
    fn cancelled_request_leaves_a_tombstone() {
        let table = PendingTable::new();
        let (sw_id, _rx) = table
            .alloc_v20(0x01, U4::from_lo(0x1), V20Expectation {
                feature_index: 0x02,
                function_id: U4::from_lo(0x1),
            })
            .unwrap();

        table.cancel_v20(0x01, sw_id);

        let late = response(0x01, 0x02, U4::combine(U4::from_lo(0x1), sw_id));
        assert!(!table.complete_v20(&late));
        assert!(table.take_tombstone(&late));
        // Consumed: a second identical frame is no longer a late response.
        assert!(!table.take_tombstone(&late));
    }

    #[test]
    fn close_fails_all_pending_requests() {
        let table = PendingTable::new();
        let (_, mut rx) = table
            .alloc_v20(0x01, U4::from_lo(0x1), V20Expectation {
                feature_index: 0x02,
                function_id: U4::from_lo(0x0),
            })
            .unwrap();
        let (_, mut matcher_rx) = table.register_matcher(0xff, |_| true, None);

        table.fail_all_closed();

        assert_eq!(rx.try_recv().unwrap(), Some(Err(PendingError::Closed)));
        assert_eq!(
            matcher_rx.try_recv().unwrap(),
            Some(Err(PendingError::Closed))
        );
    }
}
