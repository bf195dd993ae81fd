//! Classifies every inbound frame into exactly one queue, or into a
//! pending-request completion slot.
//!
//! The classification rules are evaluated in order:
//!
//! 1. A frame matching a pending request on the same channel completes that
//!    request.
//! 2. An error frame (sub ID `0x8f` for HID++1.0, feature index `0xff` for
//!    HID++2.0) completes the pending request it originates from, or lands
//!    in the error queue if none is waiting.
//! 3. Everything else is classified through a routing table keyed by the
//!    feature coordinates of the frame and lands in the corresponding named
//!    queue. Frames whose feature is unknown on this channel go to the
//!    generic event queue.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicU32, Ordering},
    },
};

use crate::{
    channel::pending::PendingTable,
    codec::{Direction, Message, registry::BUILTIN_SCHEMAS},
    frame::{HidppFrame, RECEIVER_DEVICE_INDEX, VlpMessage},
    protocol::{v10, v20},
};

pub mod queue;

pub use queue::{
    CancelToken,
    Inbound,
    MessageQueue,
    QueueError,
    QueueName,
    QueueSet,
    QueuedMessage,
};

/// A listener observing every inbound HID++ frame of a channel.
///
/// The second argument states whether the frame completed a pending
/// request.
pub type MsgListener = Box<dyn Fn(&HidppFrame, bool) + Send + Sync>;

/// One entry of the per-device feature table, learned through feature
/// enumeration.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct FeatureEntry {
    /// The 16-bit feature ID.
    pub feature_id: u16,

    /// The feature version the device reported.
    pub version: u8,
}

/// The dispatcher of one physical channel.
///
/// It owns the queue sets of every addressable device behind the channel
/// and the feature tables used to map feature indices back to feature IDs.
#[derive(Default)]
pub struct Dispatcher {
    queues: Mutex<HashMap<u8, Arc<QueueSet>>>,
    feature_tables: Mutex<HashMap<u8, HashMap<u8, FeatureEntry>>>,
    listeners: Mutex<Vec<(u32, MsgListener)>>,
    next_listener_id: AtomicU32,

    /// Raw HID reports carry no device index, so they are attributed to a
    /// configurable device, usually the DUT the test currently exercises.
    hid_report_device: Mutex<u8>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self {
            hid_report_device: Mutex::new(RECEIVER_DEVICE_INDEX),
            ..Self::default()
        }
    }

    /// Provides the queue set of a device, creating it on first use.
    pub fn queues(&self, device_index: u8) -> Arc<QueueSet> {
        Arc::clone(
            self.queues
                .lock()
                .unwrap()
                .entry(device_index)
                .or_default(),
        )
    }

    /// Selects the device that raw HID reports are attributed to.
    pub fn set_hid_report_device(&self, device_index: u8) {
        *self.hid_report_device.lock().unwrap() = device_index;
    }

    /// Records that `feature_index` resolves to the given feature on a
    /// device. Used to decode and route unsolicited messages.
    pub fn add_feature_entry(
        &self,
        device_index: u8,
        feature_index: u8,
        feature_id: u16,
        version: u8,
    ) {
        self.feature_tables
            .lock()
            .unwrap()
            .entry(device_index)
            .or_default()
            .insert(feature_index, FeatureEntry {
                feature_id,
                version,
            });
    }

    /// Looks up the feature a feature index resolves to on a device.
    pub fn feature_entry(&self, device_index: u8, feature_index: u8) -> Option<FeatureEntry> {
        self.feature_tables
            .lock()
            .unwrap()
            .get(&device_index)?
            .get(&feature_index)
            .copied()
    }

    /// Forgets all feature entries of a device, e.g. after a reset or a DFU
    /// transition invalidated the feature mapping.
    pub fn clear_feature_entries(&self, device_index: u8) {
        self.feature_tables.lock().unwrap().remove(&device_index);
    }

    /// Forgets the feature entries of every device, used when the whole
    /// channel resets.
    pub fn clear_all_feature_entries(&self) {
        self.feature_tables.lock().unwrap().clear();
    }

    /// Registers a listener observing every inbound HID++ frame.
    ///
    /// Returns a handle for [`Self::remove_msg_listener`].
    pub fn add_msg_listener(
        &self,
        listener: impl Fn(&HidppFrame, bool) + Send + Sync + 'static,
    ) -> u32 {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap()
            .push((id, Box::new(listener)));
        id
    }

    /// Removes a listener by its handle.
    pub fn remove_msg_listener(&self, id: u32) {
        self.listeners
            .lock()
            .unwrap()
            .retain(|(listener_id, _)| *listener_id != id);
    }

    /// Processes one raw report received from the transport adapter.
    pub(crate) fn dispatch(&self, data: &[u8], pending: &PendingTable) {
        match HidppFrame::read_raw(data) {
            Some(frame) => self.dispatch_frame(frame, pending),
            None => {
                // Not HID++ traffic: a mouse/keyboard/digitizer interrupt.
                let device_index = *self.hid_report_device.lock().unwrap();
                self.push(device_index, QueueName::Hid, QueuedMessage {
                    inbound: Inbound::HidReport(data.to_vec()),
                    decoded: None,
                    late_response: false,
                });
            },
        }
    }

    /// Processes one inbound HID++ frame.
    pub(crate) fn dispatch_frame(&self, frame: HidppFrame, pending: &PendingTable) {
        let header = frame.header();

        let matched = pending.complete_v20(&frame) || pending.complete_matcher(&frame);

        for (_, listener) in self.listeners.lock().unwrap().iter() {
            listener(&frame, matched);
        }

        if matched {
            return;
        }

        // HID++2.0 error messages complete the request they originate from.
        if header.sub_id == v20::ERROR_FEATURE_INDEX {
            if let Some(error) = v20::Hidpp20Error::from_frame(&frame) {
                if pending.complete_error_v20(header.device_index, error) {
                    return;
                }

                tracing::debug!(?error, "unclaimed HID++2.0 error message");
                self.push(header.device_index, QueueName::Error, QueuedMessage {
                    inbound: Inbound::Frame(frame),
                    decoded: None,
                    late_response: false,
                });
                return;
            }
        }

        // Same for HID++1.0 error messages.
        if header.sub_id == v10::MessageType::Error.into() {
            if let Ok(msg) = v10::Message::try_from(frame) {
                if let Some(error) = v10::Hidpp10Error::from_message(&msg) {
                    if pending.complete_error_v10(header.device_index, error) {
                        return;
                    }

                    tracing::debug!(?error, "unclaimed HID++1.0 error message");
                    self.push(header.device_index, QueueName::ReceiverError, QueuedMessage {
                        inbound: Inbound::Frame(frame),
                        decoded: None,
                        late_response: false,
                    });
                    return;
                }
            }
        }

        // Responses to cancelled requests are kept observable.
        if pending.take_tombstone(&frame) {
            tracing::debug!(device_index = header.device_index, "late response after cancellation");
            self.push(header.device_index, QueueName::Event, QueuedMessage {
                inbound: Inbound::Frame(frame),
                decoded: None,
                late_response: true,
            });
            return;
        }

        self.classify(frame);
    }

    /// Processes one reassembled VLP message received on a BLE link.
    pub(crate) fn dispatch_vlp(
        &self,
        device_index: u8,
        msg: VlpMessage,
        pending: &PendingTable,
    ) {
        if pending.complete_v20_vlp(device_index, &msg) {
            return;
        }

        let entry = self.feature_entry(device_index, msg.feature_index);
        let direction = if msg.software_id().to_lo() == 0 {
            Direction::Event
        } else {
            Direction::Response
        };

        let (queue, decoded) = match entry {
            Some(entry) => (
                route(entry.feature_id, direction),
                BUILTIN_SCHEMAS
                    .lookup_compatible(
                        entry.feature_id,
                        entry.version,
                        msg.function_id().to_lo(),
                        direction,
                    )
                    .and_then(|schema| Message::decode_payload(schema, &msg.payload).ok()),
            ),
            None => (QueueName::Event, None),
        };

        self.push(device_index, queue, QueuedMessage {
            inbound: Inbound::Vlp(msg),
            decoded,
            late_response: false,
        });
    }

    /// Classification rule 3: asynchronous traffic.
    fn classify(&self, frame: HidppFrame) {
        let header = frame.header();
        let device_index = header.device_index;

        // HID++1.0 receiver traffic is recognized by its sub ID.
        if let Ok(msg_type) = v10::MessageType::try_from(header.sub_id) {
            let queue = match msg_type {
                v10::MessageType::Error => QueueName::ReceiverError,
                _ => QueueName::ReceiverResponse,
            };
            self.push(device_index, queue, QueuedMessage {
                inbound: Inbound::Frame(frame),
                decoded: None,
                late_response: false,
            });
            return;
        }

        if let Ok(notification) = v10::NotificationType::try_from(header.sub_id) {
            let queue = match notification {
                v10::NotificationType::DeviceConnection
                | v10::NotificationType::DeviceDisconnection
                | v10::NotificationType::ConnectionBurstComplete => {
                    QueueName::ReceiverConnectionEvent
                },
                v10::NotificationType::LinkQuality => QueueName::Event,
            };
            self.push(device_index, queue, QueuedMessage {
                inbound: Inbound::Frame(frame),
                decoded: None,
                late_response: false,
            });
            return;
        }

        // HID++2.0: resolve the feature index through the device's feature
        // table.
        let Some(entry) = self.feature_entry(device_index, header.sub_id) else {
            self.push(device_index, QueueName::Event, QueuedMessage {
                inbound: Inbound::Frame(frame),
                decoded: None,
                late_response: false,
            });
            return;
        };

        let direction = if header.software_id().to_lo() == 0 {
            Direction::Event
        } else {
            Direction::Response
        };

        let decoded = BUILTIN_SCHEMAS
            .lookup_compatible(
                entry.feature_id,
                entry.version,
                header.function_id().to_lo(),
                direction,
            )
            .and_then(|schema| Message::decode_payload(schema, frame.payload()).ok());

        self.push(device_index, route(entry.feature_id, direction), QueuedMessage {
            inbound: Inbound::Frame(frame),
            decoded,
            late_response: false,
        });
    }

    fn push(&self, device_index: u8, queue: QueueName, msg: QueuedMessage) {
        self.queues(device_index).queue(queue).push(msg);
    }
}

/// Selects the queue a message of the given feature and direction lands in.
pub fn route(feature_id: u16, direction: Direction) -> QueueName {
    // Brightness control has a dedicated queue, for responses and events
    // alike.
    if feature_id == 0x8040 {
        return QueueName::Brightness;
    }

    if direction == Direction::Event {
        return QueueName::Event;
    }

    default_queue(feature_id)
}

/// The home queue of a feature, grouped by the feature ID ranges of the
/// HID++2.0 specification.
pub fn default_queue(feature_id: u16) -> QueueName {
    match feature_id {
        0x0000..=0x00ff => QueueName::Important,
        0x1000..=0x1fff => QueueName::Common,
        0x2000..=0x2fff => QueueName::Mouse,
        0x4000..=0x4fff => QueueName::Keyboard,
        0x8000..=0x8fff => QueueName::Gaming,
        _ => QueueName::Common,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{frame::FrameHeader, nibble::U4};

    fn event_frame(device_index: u8, feature_index: u8, event_id: u8) -> HidppFrame {
        HidppFrame::Long(
            FrameHeader {
                device_index,
                sub_id: feature_index,
                function_and_sw_id: U4::combine(U4::from_lo(event_id), U4::from_lo(0)),
            },
            [0u8; 16],
        )
    }

    #[test]
    fn known_feature_events_route_to_the_event_queue() {
        let dispatcher = Dispatcher::new();
        let pending = PendingTable::new();
        dispatcher.add_feature_entry(0x01, 0x06, 0x1004, 0);

        dispatcher.dispatch_frame(event_frame(0x01, 0x06, 0x0), &pending);

        let queues = dispatcher.queues(0x01);
        assert_eq!(queues.queue(QueueName::Event).len(), 1);
    }

    #[test]
    fn unknown_feature_index_goes_to_the_event_queue() {
        let dispatcher = Dispatcher::new();
        let pending = PendingTable::new();

        dispatcher.dispatch_frame(event_frame(0x01, 0x0c, 0x3), &pending);

        assert_eq!(dispatcher.queues(0x01).queue(QueueName::Event).len(), 1);
    }

    #[test]
    fn unclaimed_error_frames_are_never_dropped() {
        let dispatcher = Dispatcher::new();
        let pending = PendingTable::new();

        let mut payload = [0u8; 16];
        payload[0] = 0x02;
        payload[1] = 0x1a;
        payload[2] = 0x02;
        let error_frame = HidppFrame::Long(
            FrameHeader {
                device_index: 0x01,
                sub_id: v20::ERROR_FEATURE_INDEX,
                function_and_sw_id: 0x00,
            },
            payload,
        );

        dispatcher.dispatch_frame(error_frame, &pending);
        assert_eq!(dispatcher.queues(0x01).queue(QueueName::Error).len(), 1);

        let receiver_error = HidppFrame::Short(
            FrameHeader {
                device_index: RECEIVER_DEVICE_INDEX,
                sub_id: 0x8f,
                function_and_sw_id: 0x81,
            },
            [0xb5, 0x03, 0x00],
        );

        dispatcher.dispatch_frame(receiver_error, &pending);
        assert_eq!(
            dispatcher
                .queues(RECEIVER_DEVICE_INDEX)
                .queue(QueueName::ReceiverError)
                .len(),
            1
        );
    }

    #[test]
    fn receiver_notifications_route_to_the_connection_event_queue() {
        let dispatcher = Dispatcher::new();
        let pending = PendingTable::new();

        let arrival = HidppFrame::Short(
            FrameHeader {
                device_index: 0x01,
                sub_id: 0x41,
                function_and_sw_id: 0x04,
            },
            [0x61, 0x10, 0x40],
        );

        dispatcher.dispatch_frame(arrival, &pending);
        assert_eq!(
            dispatcher
                .queues(0x01)
                .queue(QueueName::ReceiverConnectionEvent)
                .len(),
            1
        );
    }

    #[test]
    fn hid_reports_land_in_the_hid_queue_of_the_selected_device() {
        let dispatcher = Dispatcher::new();
        let pending = PendingTable::new();
        dispatcher.set_hid_report_device(0x01);

        // An 8-byte keyboard interrupt report.
        dispatcher.dispatch(&[0x01, 0x00, 0x00, 0x29, 0x00, 0x00, 0x00, 0x00], &pending);

        assert_eq!(dispatcher.queues(0x01).queue(QueueName::Hid).len(), 1);
    }

    #[test]
    fn brightness_routing_override() {
        assert_eq!(route(0x8040, Direction::Event), QueueName::Brightness);
        assert_eq!(route(0x8040, Direction::Response), QueueName::Brightness);
        assert_eq!(route(0x8071, Direction::Response), QueueName::Gaming);
        assert_eq!(route(0x2201, Direction::Response), QueueName::Mouse);
        assert_eq!(route(0x4522, Direction::Response), QueueName::Keyboard);
        assert_eq!(route(0x1814, Direction::Event), QueueName::Event);
    }
}
