//! Thread-safe, bounded FIFO queues for received messages.
//!
//! Every inbound message lands in exactly one queue, determined by the
//! classification rules of the [dispatcher](crate::dispatcher). Consumers
//! take messages back out with a filter: non-matching messages remain
//! queued, so independent consumers can wait for different messages on the
//! same queue.

use std::{
    collections::VecDeque,
    pin::pin,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::{
    codec::Message,
    frame::{HidppFrame, VlpMessage},
};

/// The default maximum amount of messages a queue holds before dropping its
/// oldest entry.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// The names of the queues maintained per addressable device.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum QueueName {
    /// Protocol bookkeeping features (Root, FeatureSet, ...).
    Important,

    /// Common device features (battery, host management, properties, ...).
    Common,

    /// Mouse features.
    Mouse,

    /// Keyboard features.
    Keyboard,

    /// Gaming features.
    Gaming,

    /// Brightness control.
    Brightness,

    /// Unsolicited feature events without a dedicated queue, unknown
    /// features and late responses.
    Event,

    /// HID++2.0 error messages not claimed by a pending request.
    Error,

    /// Raw HID reports (mouse/keyboard/digitizer interrupts).
    Hid,

    /// HID++1.0 register responses from a receiver.
    ReceiverResponse,

    /// HID++1.0 errors from a receiver not claimed by a pending request.
    ReceiverError,

    /// Receiver notifications about device connections and disconnections.
    ReceiverConnectionEvent,
}

impl QueueName {
    /// All queue names, in the order they are laid out in a [`QueueSet`].
    pub const ALL: [QueueName; 12] = [
        QueueName::Important,
        QueueName::Common,
        QueueName::Mouse,
        QueueName::Keyboard,
        QueueName::Gaming,
        QueueName::Brightness,
        QueueName::Event,
        QueueName::Error,
        QueueName::Hid,
        QueueName::ReceiverResponse,
        QueueName::ReceiverError,
        QueueName::ReceiverConnectionEvent,
    ];

    fn index(self) -> usize {
        QueueName::ALL
            .iter()
            .position(|name| *name == self)
            .unwrap()
    }
}

/// The payload of a queued message.
#[derive(Clone, PartialEq, Debug)]
pub enum Inbound {
    /// A HID++ frame.
    Frame(HidppFrame),

    /// A reassembled VLP message.
    Vlp(VlpMessage),

    /// A raw HID report that is not HID++ traffic.
    HidReport(Vec<u8>),
}

/// A message as held by a queue.
///
/// Consuming a message out of a queue transfers its ownership to the caller.
#[derive(Clone, PartialEq, Debug)]
pub struct QueuedMessage {
    /// The raw inbound payload.
    pub inbound: Inbound,

    /// The structured view over the payload, if a schema was registered for
    /// its protocol coordinates.
    pub decoded: Option<Message>,

    /// Whether this is a response that arrived after its pending request was
    /// cancelled.
    pub late_response: bool,
}

impl QueuedMessage {
    /// Extracts the HID++ frame, if the payload is one.
    pub fn frame(&self) -> Option<&HidppFrame> {
        match &self.inbound {
            Inbound::Frame(frame) => Some(frame),
            _ => None,
        }
    }
}

/// Represents an error returned by a blocking queue operation.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Error)]
pub enum QueueError {
    /// Indicates that no matching message arrived within the timeout.
    #[error("no matching message arrived within the timeout")]
    Timeout,

    /// Indicates that the external cancellation token was triggered.
    #[error("the wait was cancelled")]
    Cancelled,
}

/// An external cancellation token.
///
/// Cloned tokens share their state: cancelling one cancels all of them.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Triggers the token. Every pending and future wait observing it
    /// returns immediately.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Whether the token was triggered.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolves once the token is triggered.
    pub async fn cancelled(&self) {
        loop {
            let mut notified = pin!(self.inner.notify.notified());
            // Register for wakeups before checking the flag so that a
            // trigger between the check and the await is not missed.
            notified.as_mut().enable();

            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// A bounded FIFO of received messages.
///
/// Messages are delivered in the exact order the transport adapter received
/// them. On overflow the oldest entry is dropped and a warning is logged.
#[derive(Debug)]
pub struct MessageQueue {
    name: QueueName,
    inner: Mutex<VecDeque<QueuedMessage>>,
    notify: Notify,
    capacity: usize,
}

impl MessageQueue {
    pub fn new(name: QueueName) -> Self {
        Self::with_capacity(name, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(name: QueueName, capacity: usize) -> Self {
        Self {
            name,
            inner: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity,
        }
    }

    /// The name the queue is registered under.
    pub fn name(&self) -> QueueName {
        self.name
    }

    /// Appends a message, dropping the oldest entry if the queue is full.
    pub(crate) fn push(&self, msg: QueuedMessage) {
        {
            let mut guard = self.inner.lock().unwrap();
            if guard.len() >= self.capacity {
                guard.pop_front();
                tracing::warn!(queue = ?self.name, "queue overflow, dropping oldest message");
            }
            guard.push_back(msg);
        }

        self.notify.notify_waiters();
    }

    /// Takes the first message matching `filter` out of the queue, waiting
    /// up to `timeout` for one to arrive. Non-matching messages remain
    /// queued.
    pub async fn get(
        &self,
        timeout: Duration,
        filter: impl Fn(&QueuedMessage) -> bool,
    ) -> Result<QueuedMessage, QueueError> {
        let deadline = Instant::now() + timeout;

        loop {
            let mut notified = pin!(self.notify.notified());
            // Register for wakeups before scanning so that a push between
            // the scan and the await is not missed.
            notified.as_mut().enable();

            if let Some(msg) = self.get_first(&filter) {
                return Ok(msg);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Err(QueueError::Timeout);
            }
        }
    }

    /// Like [`Self::get`], but additionally returns
    /// [`QueueError::Cancelled`] as soon as `token` is triggered.
    pub async fn get_cancellable(
        &self,
        timeout: Duration,
        token: &CancelToken,
        filter: impl Fn(&QueuedMessage) -> bool,
    ) -> Result<QueuedMessage, QueueError> {
        tokio::select! {
            res = self.get(timeout, filter) => res,
            _ = token.cancelled() => Err(QueueError::Cancelled),
        }
    }

    /// Takes the first message matching `filter` out of the queue without
    /// waiting.
    pub fn get_first(
        &self,
        filter: impl Fn(&QueuedMessage) -> bool,
    ) -> Option<QueuedMessage> {
        let mut guard = self.inner.lock().unwrap();
        let pos = guard.iter().position(filter)?;
        guard.remove(pos)
    }

    /// Discards all messages matching `filter`.
    ///
    /// Returns the amount of discarded messages.
    pub fn clean(&self, filter: impl Fn(&QueuedMessage) -> bool) -> usize {
        let mut guard = self.inner.lock().unwrap();
        let before = guard.len();
        guard.retain(|msg| !filter(msg));
        before - guard.len()
    }

    /// Whether the queue currently holds no messages.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    /// The amount of messages currently held.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

/// The full set of queues of one addressable device.
#[derive(Debug)]
pub struct QueueSet {
    queues: Vec<Arc<MessageQueue>>,
}

impl Default for QueueSet {
    fn default() -> Self {
        Self {
            queues: QueueName::ALL
                .iter()
                .map(|name| Arc::new(MessageQueue::new(*name)))
                .collect(),
        }
    }
}

impl QueueSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provides the queue registered under the given name.
    pub fn queue(&self, name: QueueName) -> &Arc<MessageQueue> {
        &self.queues[name.index()]
    }

    /// Whether all queues of the set are empty.
    pub fn all_empty(&self) -> bool {
        self.queues.iter().all(|queue| queue.is_empty())
    }

    /// Discards all messages from all queues of the set.
    pub fn clear(&self) {
        for queue in &self.queues {
            queue.clean(|_| true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameHeader;

    fn frame_msg(marker: u8) -> QueuedMessage {
        QueuedMessage {
            inbound: Inbound::Frame(HidppFrame::Short(
                FrameHeader {
                    device_index: 0x01,
                    sub_id: marker,
                    function_and_sw_id: 0x00,
                },
                [0x00; 3],
            )),
            decoded: None,
            late_response: false,
        }
    }

    fn marker_of(msg: &QueuedMessage) -> u8 {
        msg.frame().unwrap().header().sub_id
    }

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let queue = MessageQueue::new(QueueName::Common);
        for marker in 0..4 {
            queue.push(frame_msg(marker));
        }

        for marker in 0..4 {
            let msg = queue.get(Duration::from_millis(10), |_| true).await.unwrap();
            assert_eq!(marker_of(&msg), marker);
        }
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn filtered_get_leaves_other_messages_queued() {
        let queue = MessageQueue::new(QueueName::Common);
        queue.push(frame_msg(0x01));
        queue.push(frame_msg(0x02));
        queue.push(frame_msg(0x03));

        let msg = queue
            .get(Duration::from_millis(10), |msg| marker_of(msg) == 0x02)
            .await
            .unwrap();
        assert_eq!(marker_of(&msg), 0x02);

        assert_eq!(queue.len(), 2);
        let first = queue.get_first(|_| true).unwrap();
        assert_eq!(marker_of(&first), 0x01);
    }

    #[tokio::test]
    async fn get_times_out_on_a_silent_queue() {
        let queue = MessageQueue::new(QueueName::Common);

        let started = std::time::Instant::now();
        let res = queue.get(Duration::from_millis(50), |_| true).await;
        assert_eq!(res, Err(QueueError::Timeout));
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn get_wakes_up_on_push() {
        let queue = Arc::new(MessageQueue::new(QueueName::Common));

        let waiter = tokio::spawn({
            let queue = Arc::clone(&queue);
            async move { queue.get(Duration::from_secs(2), |_| true).await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(frame_msg(0x07));

        let msg = waiter.await.unwrap().unwrap();
        assert_eq!(marker_of(&msg), 0x07);
    }

    #[tokio::test]
    async fn overflow_drops_the_oldest_entry() {
        let queue = MessageQueue::with_capacity(QueueName::Common, 2);
        queue.push(frame_msg(0x01));
        queue.push(frame_msg(0x02));
        queue.push(frame_msg(0x03));

        assert_eq!(queue.len(), 2);
        assert_eq!(marker_of(&queue.get_first(|_| true).unwrap()), 0x02);
        assert_eq!(marker_of(&queue.get_first(|_| true).unwrap()), 0x03);
    }

    #[tokio::test]
    async fn cancellation_token_interrupts_get() {
        let queue = Arc::new(MessageQueue::new(QueueName::Common));
        let token = CancelToken::new();

        let waiter = tokio::spawn({
            let queue = Arc::clone(&queue);
            let token = token.clone();
            async move {
                queue
                    .get_cancellable(Duration::from_secs(5), &token, |_| true)
                    .await
            }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();

        assert_eq!(waiter.await.unwrap(), Err(QueueError::Cancelled));
    }

    #[tokio::test]
    async fn clean_discards_matching_messages() {
        let queue = MessageQueue::new(QueueName::Common);
        queue.push(frame_msg(0x01));
        queue.push(frame_msg(0x02));
        queue.push(frame_msg(0x01));

        assert_eq!(queue.clean(|msg| marker_of(msg) == 0x01), 2);
        assert_eq!(queue.len(), 1);
    }
}
