//! Implements basic messaging across HID and HID++ channels.
//!
//! This includes the channel lifecycle, the correlation of incoming frames
//! with previously sent requests, deadlines, cancellation and the HID++1.0
//! register access used for receivers.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::channel::oneshot;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::{
    codec::CodecError,
    dispatcher::{CancelToken, Dispatcher, QueueSet},
    frame::{HidppFrame, MAX_REPORT_LENGTH, ReportFamily, VlpFrame},
    nibble::U4,
    protocol::{v10, v20},
    transport::{
        BleTransport,
        FrameSupport,
        ProbeError,
        Transport,
        TransportError,
        probe_frame_support,
    },
};

pub mod ble;
pub(crate) mod pending;
pub mod registry;

use ble::VlpAssembler;
use pending::{PendingError, PendingResponse, PendingTable, V20Expectation};

/// The default deadline for a request/response exchange.
pub const SEND_TIMEOUT: Duration = Duration::from_millis(500);

/// The deadline for requests that cause the device to reset or otherwise
/// interrupt itself (DFU transitions, host switches, power mode changes).
pub const SEND_TIMEOUT_RESET: Duration = Duration::from_secs(2);

/// The default deadline for waiting on a queue.
pub const QUEUE_TIMEOUT: Duration = Duration::from_secs(2);

/// The deadline for waiting on reconnection events after a device reset.
pub const QUEUE_TIMEOUT_RECONNECTION: Duration = Duration::from_secs(10);

/// The wire protocol an endpoint is reached over.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub enum Protocol {
    /// A directly attached USB device or receiver.
    Usb,

    /// A directly connected BLE peripheral.
    Ble,

    /// A BLE Pro receiver or a device behind one.
    BlePro,

    /// A device behind an eQuad (gaming) receiver.
    EQuad,

    /// A device behind a Unifying receiver.
    Unifying,

    /// The low-latency link of gaming devices.
    GamingLink,
}

impl Protocol {
    /// Whether the protocol runs over a BLE link and thus may carry VLP
    /// frames.
    pub fn is_ble(self) -> bool {
        matches!(self, Protocol::Ble | Protocol::BlePro)
    }
}

/// The lifecycle state of a channel.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum ChannelState {
    Closed,
    Opening,
    Open,
    Closing,
}

/// The identity of a channel: one addressable endpoint.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ChannelId {
    /// The index of the physical port (USB port, BLE slot) the transport is
    /// attached to.
    pub port_index: u8,

    /// The device index addressed through the transport.
    pub device_index: u8,

    /// The wire protocol of the endpoint.
    pub protocol: Protocol,
}

/// The transport adapter backing a channel, keeping the BLE surface
/// reachable where present.
#[derive(Clone)]
pub enum TransportHandle {
    Hid(Arc<dyn Transport>),
    Ble(Arc<dyn BleTransport>),
}

impl TransportHandle {
    /// The plain transport view of the adapter.
    pub fn transport(&self) -> &dyn Transport {
        match self {
            Self::Hid(transport) => transport.as_ref(),
            Self::Ble(transport) => transport.as_ref(),
        }
    }

    /// The BLE view of the adapter, if it is one.
    pub fn ble(&self) -> Option<&dyn BleTransport> {
        match self {
            Self::Hid(_) => None,
            Self::Ble(transport) => Some(transport.as_ref()),
        }
    }
}

/// Represents an error that occurred when creating or interacting with a HID
/// or HID++ communication channel.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ChannelError {
    /// Indicates that the transport adapter returned an error.
    #[error("the transport adapter returned an error")]
    Transport(#[source] TransportError),

    /// Indicates that HID++ support of the transport could not be probed.
    #[error("the transport could not be probed for HID++ support")]
    Probe(#[from] ProbeError),

    /// Indicates that the channel in question does not support HID++.
    #[error("the HID channel does not support HID++")]
    HidppNotSupported,

    /// Indicates that the channel does not support the frame family of the
    /// given message.
    #[error("the channel does not support the given HID++ frame family")]
    FrameFamilyNotSupported,

    /// Indicates that the device reported a HID++2.0 error.
    #[error("the device reported a HID++2.0 error")]
    Hidpp20(#[from] v20::Hidpp20Error),

    /// Indicates that the receiver reported a HID++1.0 error.
    #[error("the receiver reported a HID++1.0 error")]
    Hidpp10(#[from] v10::Hidpp10Error),

    /// Indicates that a frame failed to decode against its schema.
    #[error("a frame could not be decoded")]
    MalformedFrame(#[from] CodecError),

    /// Indicates that a response arrived in a shape the caller cannot
    /// interpret.
    #[error("the response has an unsupported shape")]
    UnsupportedResponse,

    /// Indicates that no response arrived within the deadline.
    #[error("the request timed out")]
    Timeout,

    /// Indicates that the request was cancelled by the caller.
    #[error("the request was cancelled")]
    Cancelled,

    /// Indicates that the channel is (or was concurrently) closed.
    #[error("the channel is closed")]
    ChannelClosed,

    /// Indicates that all 16 software ID slots of the device carry an
    /// in-flight request.
    #[error("all software id slots are occupied")]
    ReplayTokenExhausted,

    /// Indicates that the device does not support the requested feature.
    #[error("the device does not support feature {0:#06x}")]
    FeatureNotSupported(u16),

    /// Indicates that a BLE-only operation was invoked on a channel that
    /// does not run over BLE.
    #[error("the channel does not run over BLE")]
    NotBle,
}

impl From<PendingError> for ChannelError {
    fn from(err: PendingError) -> Self {
        match err {
            PendingError::Hidpp10(inner) => ChannelError::Hidpp10(inner),
            PendingError::Hidpp20(inner) => ChannelError::Hidpp20(inner),
            PendingError::Closed => ChannelError::ChannelClosed,
        }
    }
}

struct ReaderHandle {
    close: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Represents a HID communication channel supporting HID++.
///
/// This is the physical end of a channel tree: a receiver channel and the
/// through-receiver channels of the devices paired behind it all share one
/// `HidppChannel`, distinguished by the device index they stamp into their
/// frames.
pub struct HidppChannel {
    /// The identity of the endpoint the transport is attached to.
    pub id: ChannelId,

    transport: TransportHandle,
    dispatcher: Arc<Dispatcher>,
    pending: Arc<PendingTable>,
    state: Mutex<ChannelState>,
    support: Mutex<FrameSupport>,
    sw_id: Mutex<U4>,
    reader: Mutex<Option<ReaderHandle>>,
}

impl HidppChannel {
    /// Creates a closed channel on top of a transport adapter.
    pub fn new(transport: TransportHandle, id: ChannelId) -> Self {
        Self {
            id,
            transport,
            dispatcher: Arc::new(Dispatcher::new()),
            pending: Arc::new(PendingTable::new()),
            state: Mutex::new(ChannelState::Closed),
            support: Mutex::new(FrameSupport::default()),
            sw_id: Mutex::new(U4::from_lo(0x1)),
            reader: Mutex::new(None),
        }
    }

    /// The current lifecycle state of the channel.
    pub fn state(&self) -> ChannelState {
        *self.state.lock().unwrap()
    }

    /// Whether the channel is currently open.
    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// The HID++ frame families the channel carries, as probed during
    /// [`Self::open`].
    pub fn frame_support(&self) -> FrameSupport {
        *self.support.lock().unwrap()
    }

    /// The software ID the next request will be correlated under.
    ///
    /// The ID rotates with every sent request so that up to 16 requests per
    /// device can be in flight concurrently.
    pub fn sw_id(&self) -> U4 {
        *self.sw_id.lock().unwrap()
    }

    /// Overrides the next software ID.
    pub fn set_sw_id(&self, sw_id: U4) {
        *self.sw_id.lock().unwrap() = sw_id;
    }

    /// The dispatcher classifying the inbound traffic of this channel.
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// The queue set of one device behind this channel.
    pub fn queues(&self, device_index: u8) -> Arc<QueueSet> {
        self.dispatcher.queues(device_index)
    }

    /// The transport adapter backing this channel.
    pub fn transport(&self) -> &TransportHandle {
        &self.transport
    }

    /// Opens the channel: claims the transport, probes which HID++ families
    /// it carries and starts the inbound reader task.
    ///
    /// Returns [`ChannelError::HidppNotSupported`] if the transport carries
    /// no HID++ family at all.
    pub async fn open(&self) -> Result<(), ChannelError> {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                ChannelState::Open | ChannelState::Opening => return Ok(()),
                ChannelState::Closing => return Err(ChannelError::ChannelClosed),
                ChannelState::Closed => *state = ChannelState::Opening,
            }
        }

        let result = self.open_inner().await;

        *self.state.lock().unwrap() = if result.is_ok() {
            ChannelState::Open
        } else {
            ChannelState::Closed
        };

        if result.is_ok() {
            tracing::debug!(id = ?self.id, "channel open");
        }

        result
    }

    async fn open_inner(&self) -> Result<(), ChannelError> {
        self.transport
            .transport()
            .open()
            .await
            .map_err(ChannelError::Transport)?;

        let support = probe_frame_support(self.transport.transport()).await?;
        if !support.any() {
            let _ = self.transport.transport().close().await;
            return Err(ChannelError::HidppNotSupported);
        }
        *self.support.lock().unwrap() = support;

        *self.reader.lock().unwrap() = Some(self.spawn_reader());
        Ok(())
    }

    /// Closes the channel: stops the inbound reader, releases the transport
    /// and fails every in-flight request with
    /// [`ChannelError::ChannelClosed`].
    pub async fn close(&self) -> Result<(), ChannelError> {
        {
            let mut state = self.state.lock().unwrap();
            match *state {
                ChannelState::Closed | ChannelState::Closing => return Ok(()),
                _ => *state = ChannelState::Closing,
            }
        }

        if let Some(reader) = self.reader.lock().unwrap().take() {
            // The reader having already stopped on its own is fine.
            let _ = reader.close.send(());
            reader.task.abort();
        }

        let result = self
            .transport
            .transport()
            .close()
            .await
            .map_err(ChannelError::Transport);

        self.pending.fail_all_closed();
        *self.state.lock().unwrap() = ChannelState::Closed;
        tracing::debug!(id = ?self.id, "channel closed");

        result
    }

    /// Resets the channel: close followed by open.
    ///
    /// Feature caches of the devices behind the channel are invalidated by
    /// their owners; the dispatcher's feature tables are cleared here.
    pub async fn reset(&self) -> Result<(), ChannelError> {
        self.close().await?;
        self.dispatcher.clear_all_feature_entries();
        self.open().await
    }

    fn spawn_reader(&self) -> ReaderHandle {
        let (close_tx, mut close_rx) = oneshot::channel::<()>();

        let transport = self.transport.clone();
        let dispatcher = Arc::clone(&self.dispatcher);
        let pending = Arc::clone(&self.pending);
        let vlp_device = self
            .id
            .protocol
            .is_ble()
            .then_some(self.id.device_index);

        let task = tokio::spawn(async move {
            // VLP chunks can extend up to the BLE MTU, everything else fits
            // a very long report.
            let mut buf = [0u8; MAX_REPORT_LENGTH * 8];
            let mut assembler = VlpAssembler::new();

            loop {
                let received = tokio::select! {
                    _ = &mut close_rx => break,
                    res = transport.transport().receive(&mut buf) => res,
                };

                let len = match received {
                    Ok(len) => len,
                    Err(err) => {
                        // Transient no-data conditions are common on USB and
                        // BLE backends, so reading simply continues.
                        tracing::trace!(error = %err, "transport read failed");
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        continue;
                    },
                };

                let data = &buf[..len];
                if let Some(frame) = HidppFrame::read_raw(data) {
                    dispatcher.dispatch_frame(frame, &pending);
                    continue;
                }

                if let Some(device_index) = vlp_device {
                    if let Some(chunk) = VlpFrame::read_raw(data) {
                        if let Some(msg) = assembler.feed(chunk) {
                            dispatcher.dispatch_vlp(device_index, msg, &pending);
                        }
                        continue;
                    }
                }

                dispatcher.dispatch(data, &pending);
            }
        });

        ReaderHandle {
            close: close_tx,
            task,
        }
    }

    /// Checks whether the channel supports the frame family of the given
    /// message.
    pub fn supports_family(&self, family: ReportFamily) -> bool {
        let support = self.frame_support();
        match family {
            ReportFamily::Short => support.short,
            ReportFamily::Long => support.long,
            ReportFamily::VeryLong => support.very_long,
        }
    }

    async fn send_raw(&self, frame: &HidppFrame) -> Result<(), ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::ChannelClosed);
        }
        if !self.supports_family(frame.family()) {
            return Err(ChannelError::FrameFamilyNotSupported);
        }

        let mut buf = [0u8; MAX_REPORT_LENGTH];
        let len = frame.write_raw(&mut buf);
        self.transport
            .transport()
            .send(&buf[..len])
            .await
            .map_err(ChannelError::Transport)
    }

    /// Sends a HID++2.0 request and waits for its response.
    ///
    /// The message's software ID is replaced by a freshly allocated
    /// correlation token; the caller-supplied value is ignored. The request
    /// occupies one of the 16 software ID slots of its device until the
    /// response, a matching error message or the deadline arrives.
    pub async fn send_v20(
        &self,
        msg: v20::Message,
        timeout: Duration,
    ) -> Result<v20::Message, ChannelError> {
        self.send_v20_inner(msg, timeout, None).await
    }

    /// Like [`Self::send_v20`], but additionally aborts when `token` is
    /// triggered.
    ///
    /// A matching response arriving after cancellation is rerouted to the
    /// event queue, tagged as a late response.
    pub async fn send_v20_cancellable(
        &self,
        msg: v20::Message,
        timeout: Duration,
        token: &CancelToken,
    ) -> Result<v20::Message, ChannelError> {
        self.send_v20_inner(msg, timeout, Some(token)).await
    }

    async fn send_v20_inner(
        &self,
        msg: v20::Message,
        timeout: Duration,
        token: Option<&CancelToken>,
    ) -> Result<v20::Message, ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::ChannelClosed);
        }

        let mut header = msg.header();
        let expected = V20Expectation {
            feature_index: header.feature_index,
            function_id: header.function_id,
        };

        let (sw_id, receiver) = {
            let mut next = self.sw_id.lock().unwrap();
            let Some((allocated, receiver)) =
                self.pending
                    .alloc_v20(header.device_index, *next, expected)
            else {
                return Err(ChannelError::ReplayTokenExhausted);
            };
            *next = allocated.wrapping_next();
            (allocated, receiver)
        };

        header.software_id = sw_id;
        let stamped = match msg {
            v20::Message::Short(_, payload) => v20::Message::Short(header, payload),
            v20::Message::Long(_, payload) => v20::Message::Long(header, payload),
            v20::Message::VeryLong(_, payload) => v20::Message::VeryLong(header, payload),
        };

        if let Err(err) = self.send_raw(&stamped.into()).await {
            self.pending.remove_v20(header.device_index, sw_id);
            return Err(err);
        }

        let wait = tokio::time::timeout(timeout, receiver);

        let completed = match token {
            Some(token) => {
                tokio::select! {
                    res = wait => res,
                    _ = token.cancelled() => {
                        self.pending.cancel_v20(header.device_index, sw_id);
                        return Err(ChannelError::Cancelled);
                    },
                }
            },
            None => wait.await,
        };

        match completed {
            Err(_) => {
                // Deadline: release the slot so the software ID can be
                // reused.
                self.pending.remove_v20(header.device_index, sw_id);
                Err(ChannelError::Timeout)
            },
            Ok(Err(_)) => Err(ChannelError::ChannelClosed),
            Ok(Ok(Err(err))) => Err(err.into()),
            Ok(Ok(Ok(PendingResponse::Frame(frame)))) => Ok(v20::Message::from(frame)),
            Ok(Ok(Ok(PendingResponse::Vlp(_)))) => Err(ChannelError::UnsupportedResponse),
        }
    }

    /// Sends a HID++2.0 message without waiting for a response.
    ///
    /// Used when no response is expected, or when the response will arrive
    /// asynchronously on an event queue because the request interrupts the
    /// device before it can answer (e.g. a restart into the bootloader).
    pub async fn send_only_v20(&self, msg: v20::Message) -> Result<(), ChannelError> {
        self.send_raw(&msg.into()).await
    }

    /// Sends a raw frame and waits for the first inbound frame `matcher`
    /// accepts on the same device index.
    ///
    /// This bypasses software ID correlation and is used for protocol
    /// probes whose response shape is not a regular HID++2.0 response.
    pub async fn send_matched(
        &self,
        frame: HidppFrame,
        timeout: Duration,
        matcher: impl Fn(&HidppFrame) -> bool + Send + Sync + 'static,
    ) -> Result<HidppFrame, ChannelError> {
        self.send_matched_inner(frame, timeout, matcher, None).await
    }

    async fn send_matched_inner(
        &self,
        frame: HidppFrame,
        timeout: Duration,
        matcher: impl Fn(&HidppFrame) -> bool + Send + Sync + 'static,
        v10_origin: Option<(u8, u8)>,
    ) -> Result<HidppFrame, ChannelError> {
        if !self.is_open() {
            return Err(ChannelError::ChannelClosed);
        }

        let device_index = frame.header().device_index;
        let (matcher_id, receiver) =
            self.pending
                .register_matcher(device_index, matcher, v10_origin);

        if let Err(err) = self.send_raw(&frame).await {
            self.pending.remove_matcher(matcher_id);
            return Err(err);
        }

        match tokio::time::timeout(timeout, receiver).await {
            Err(_) => {
                self.pending.remove_matcher(matcher_id);
                Err(ChannelError::Timeout)
            },
            Ok(Err(_)) => Err(ChannelError::ChannelClosed),
            Ok(Ok(Err(err))) => Err(err.into()),
            Ok(Ok(Ok(PendingResponse::Frame(frame)))) => Ok(frame),
            Ok(Ok(Ok(PendingResponse::Vlp(_)))) => Err(ChannelError::UnsupportedResponse),
        }
    }

    /// Reads a short (3 byte) HID++1.0 register.
    pub async fn read_register(
        &self,
        device_index: u8,
        address: u8,
        params: [u8; 3],
    ) -> Result<[u8; 3], ChannelError> {
        let sub_id = v10::MessageType::GetRegister.into();
        let request = v10_request(device_index, sub_id, address, &params);

        let response = self
            .send_matched_inner(
                request,
                SEND_TIMEOUT,
                v10_response_matcher(device_index, sub_id, address),
                Some((sub_id, address)),
            )
            .await?;

        Ok(response.payload()[..3].try_into().unwrap())
    }

    /// Writes a short (3 byte) HID++1.0 register.
    pub async fn write_register(
        &self,
        device_index: u8,
        address: u8,
        params: [u8; 3],
    ) -> Result<(), ChannelError> {
        let sub_id = v10::MessageType::SetRegister.into();
        let request = v10_request(device_index, sub_id, address, &params);

        self.send_matched_inner(
            request,
            SEND_TIMEOUT,
            v10_response_matcher(device_index, sub_id, address),
            Some((sub_id, address)),
        )
        .await?;

        Ok(())
    }

    /// Reads a long (16 byte) HID++1.0 register.
    ///
    /// The first byte of the returned payload echoes the first request
    /// parameter (usually a sub-register selector).
    pub async fn read_long_register(
        &self,
        device_index: u8,
        address: u8,
        params: [u8; 3],
    ) -> Result<[u8; 16], ChannelError> {
        let sub_id = v10::MessageType::GetLongRegister.into();
        let request = v10_request(device_index, sub_id, address, &params);

        let response = self
            .send_matched_inner(
                request,
                SEND_TIMEOUT,
                v10_response_matcher(device_index, sub_id, address),
                Some((sub_id, address)),
            )
            .await?;

        match response {
            HidppFrame::Long(_, payload) => Ok(payload),
            _ => Err(ChannelError::UnsupportedResponse),
        }
    }

    /// Writes a long (16 byte) HID++1.0 register.
    pub async fn write_long_register(
        &self,
        device_index: u8,
        address: u8,
        params: [u8; 16],
    ) -> Result<(), ChannelError> {
        let sub_id = v10::MessageType::SetLongRegister.into();
        let request = HidppFrame::Long(
            crate::frame::FrameHeader {
                device_index,
                sub_id,
                function_and_sw_id: address,
            },
            params,
        );

        self.send_matched_inner(
            request,
            SEND_TIMEOUT,
            v10_response_matcher(device_index, sub_id, address),
            Some((sub_id, address)),
        )
        .await?;

        Ok(())
    }

    /// Registers a listener observing every inbound HID++ frame of the
    /// channel.
    pub fn add_msg_listener(
        &self,
        listener: impl Fn(&HidppFrame, bool) + Send + Sync + 'static,
    ) -> u32 {
        self.dispatcher.add_msg_listener(listener)
    }

    /// Removes a listener by its handle.
    pub fn remove_msg_listener(&self, id: u32) {
        self.dispatcher.remove_msg_listener(id);
    }

    /// Fails the in-flight requests of one device and clears its feature
    /// table, used when a through-receiver child channel closes without
    /// affecting its siblings.
    pub(crate) fn detach_device(&self, device_index: u8) {
        self.pending.fail_device_closed(device_index);
        self.dispatcher.clear_feature_entries(device_index);
    }
}

impl Drop for HidppChannel {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.lock().unwrap().take() {
            let _ = reader.close.send(());
            reader.task.abort();
        }
    }
}

fn v10_request(device_index: u8, sub_id: u8, address: u8, params: &[u8; 3]) -> HidppFrame {
    HidppFrame::Short(
        crate::frame::FrameHeader {
            device_index,
            sub_id,
            function_and_sw_id: address,
        },
        *params,
    )
}

fn v10_response_matcher(
    device_index: u8,
    sub_id: u8,
    address: u8,
) -> impl Fn(&HidppFrame) -> bool + Send + Sync + 'static {
    move |frame| {
        let header = frame.header();
        header.device_index == device_index
            && header.sub_id == sub_id
            && header.function_and_sw_id == address
    }
}
