//! End-to-end exercises of the protocol engine against a scripted mock
//! transport: feature enumeration, host switching, error surfacing,
//! timeouts, cancellation and concurrent correlation.

use std::{
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use hidpp::{
    async_trait,
    channel::{ChannelError, ChannelId, HidppChannel, Protocol, TransportHandle},
    device::Device,
    dispatcher::QueueName,
    feature::{
        EmittingFeature,
        change_host::v1::ChangeHostFeatureV1,
        device_information::DeviceInformationFeature,
        disable_keys_by_usage::v0::DisableKeysByUsageFeatureV0,
        wireless_device_status::v0::{
            DeviceStatus,
            StatusReason,
            StatusRequest,
            WirelessDeviceStatusFeatureV0,
        },
    },
    frame::RECEIVER_DEVICE_INDEX,
    nibble::U4,
    protocol::v20,
    transport::{FrameSupport, Transport, TransportError},
};

type Responder = Box<dyn Fn(&[u8]) -> Option<Vec<Vec<u8>>> + Send + Sync>;

/// A transport whose responses are scripted per request pattern.
struct MockTransport {
    open: AtomicBool,
    silent: AtomicBool,
    sent: Mutex<Vec<Vec<u8>>>,
    responders: Mutex<Vec<Responder>>,
    inbound_tx: flume::Sender<Vec<u8>>,
    inbound_rx: flume::Receiver<Vec<u8>>,
}

impl MockTransport {
    fn new() -> Arc<Self> {
        let (inbound_tx, inbound_rx) = flume::unbounded();
        Arc::new(Self {
            open: AtomicBool::new(false),
            silent: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            responders: Mutex::new(Vec::new()),
            inbound_tx,
            inbound_rx,
        })
    }

    fn respond_with(&self, responder: impl Fn(&[u8]) -> Option<Vec<Vec<u8>>> + Send + Sync + 'static) {
        self.responders.lock().unwrap().push(Box::new(responder));
    }

    /// Delivers a frame as if the device had sent it unsolicited.
    fn inject(&self, frame: Vec<u8>) {
        self.inbound_tx.send(frame).unwrap();
    }

    fn set_silent(&self, silent: bool) {
        self.silent.store(silent, Ordering::SeqCst);
    }

    fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn vendor_id(&self) -> u16 {
        0x046d
    }

    fn product_id(&self) -> u16 {
        0xc52b
    }

    async fn open(&self) -> Result<(), TransportError> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(frame.to_vec());

        if self.silent.load(Ordering::SeqCst) {
            return Ok(());
        }

        let responses = {
            let responders = self.responders.lock().unwrap();
            responders.iter().find_map(|responder| responder(frame))
        };

        if let Some(responses) = responses {
            for response in responses {
                let _ = self.inbound_tx.send(response);
            }
        }

        Ok(())
    }

    async fn receive(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let data = self.inbound_rx.recv_async().await?;
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    fn frame_support_hint(&self) -> Option<FrameSupport> {
        Some(FrameSupport {
            short: true,
            long: true,
            very_long: true,
        })
    }
}

fn channel_id(device_index: u8) -> ChannelId {
    ChannelId {
        port_index: 0,
        device_index,
        protocol: Protocol::Unifying,
    }
}

fn long_response(device_index: u8, feature_index: u8, function_and_sw_id: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0x11, device_index, feature_index, function_and_sw_id];
    frame.extend_from_slice(payload);
    frame.resize(20, 0x00);
    frame
}

/// Answers the HID++2.0 version ping (feature 0x00, function 1).
fn ping_responder() -> Responder {
    Box::new(|request| {
        if request[0] != 0x10 || request[2] != 0x00 || request[3] >> 4 != 0x1 {
            return None;
        }

        Some(vec![long_response(request[1], 0x00, request[3], &[
            0x04,
            0x02,
            request[6],
        ])])
    })
}

/// Answers Root.GetFeature for one feature ID with a fixed slot.
fn get_feature_responder(feature_id: u16, index: u8, version: u8) -> Responder {
    Box::new(move |request| {
        if request[0] != 0x10
            || request[2] != 0x00
            || request[3] >> 4 != 0x0
            || request[4] != (feature_id >> 8) as u8
            || request[5] != feature_id as u8
        {
            return None;
        }

        Some(vec![long_response(request[1], 0x00, request[3], &[
            index, 0x00, version,
        ])])
    })
}

/// Answers any request to a feature index with an empty response that
/// echoes the header.
fn empty_response_responder(feature_index: u8) -> Responder {
    Box::new(move |request| {
        if request[2] != feature_index {
            return None;
        }

        Some(vec![long_response(request[1], feature_index, request[3], &[])])
    })
}

async fn open_channel(transport: Arc<MockTransport>, device_index: u8) -> Arc<HidppChannel> {
    let chan = Arc::new(HidppChannel::new(
        TransportHandle::Hid(transport),
        channel_id(device_index),
    ));
    chan.open().await.unwrap();
    chan
}

// S1: exactly one short Root.GetFeature request goes out, exactly one
// response arrives, and the resolved facade matches the reported version.
#[tokio::test]
async fn s1_feature_enumeration() {
    let transport = MockTransport::new();
    transport.respond_with(ping_responder());
    transport.respond_with(get_feature_responder(0x1814, 0x02, 1));

    let chan = open_channel(Arc::clone(&transport), 0x01).await;
    chan.set_sw_id(U4::from_lo(0));

    let device = Device::new(Arc::clone(&chan), 0x01).await.unwrap();

    let slot = device.feature_slot(0x1814).await.unwrap();
    assert_eq!(slot.index, 0x02);
    assert_eq!(slot.version, 1);

    let get_feature_requests: Vec<Vec<u8>> = transport
        .sent_frames()
        .into_iter()
        .filter(|frame| frame[2] == 0x00 && frame[3] >> 4 == 0x0)
        .collect();
    assert_eq!(get_feature_requests, vec![vec![
        0x10, 0x01, 0x00, 0x00, 0x18, 0x14, 0x00,
    ]]);

    // The facade for the reported version resolves out of the cache: no
    // further round-trip.
    let _facade = device.feature::<ChangeHostFeatureV1>().await.unwrap();
    let lookups_after = transport
        .sent_frames()
        .into_iter()
        .filter(|frame| frame[2] == 0x00 && frame[3] >> 4 == 0x0)
        .count();
    assert_eq!(lookups_after, 1);
}

// Feature-cache coherence: after invalidation, resolving the same feature
// causes exactly one more Root.GetFeature round-trip.
#[tokio::test]
async fn feature_cache_invalidation_causes_one_more_lookup() {
    let transport = MockTransport::new();
    transport.respond_with(ping_responder());
    transport.respond_with(get_feature_responder(0x1814, 0x02, 0));

    let chan = open_channel(Arc::clone(&transport), 0x01).await;
    let device = Device::new(Arc::clone(&chan), 0x01).await.unwrap();

    let lookup_count = |transport: &MockTransport| {
        transport
            .sent_frames()
            .into_iter()
            .filter(|frame| frame[2] == 0x00 && frame[3] >> 4 == 0x0)
            .count()
    };

    device.feature_slot(0x1814).await.unwrap();
    device.feature_slot(0x1814).await.unwrap();
    assert_eq!(lookup_count(&transport), 1);

    device.invalidate_features();
    device.feature_slot(0x1814).await.unwrap();
    assert_eq!(lookup_count(&transport), 2);
}

// S2: the host switch request goes out as a short frame carrying the host
// index, and a response completes the call.
#[tokio::test]
async fn s2_change_host() {
    let transport = MockTransport::new();
    transport.respond_with(ping_responder());
    transport.respond_with(get_feature_responder(0x1814, 0x02, 1));
    transport.respond_with(empty_response_responder(0x02));

    let chan = open_channel(Arc::clone(&transport), 0x01).await;
    let device = Device::new(Arc::clone(&chan), 0x01).await.unwrap();

    let change_host = device.feature::<ChangeHostFeatureV1>().await.unwrap();
    change_host.set_current_host(1).await.unwrap();

    let request = transport
        .sent_frames()
        .into_iter()
        .find(|frame| frame[2] == 0x02)
        .expect("the host switch request should have been sent");

    assert_eq!(request[0], 0x10);
    assert_eq!(request[1], 0x01);
    assert_eq!(request[3] >> 4, 0x1);
    assert_eq!(&request[4..], &[0x01, 0x00, 0x00]);
}

// S2 variant: the device dropping off the link instead of responding also
// counts as a successful host switch.
#[tokio::test(start_paused = true)]
async fn s2_change_host_without_response() {
    let transport = MockTransport::new();
    transport.respond_with(ping_responder());
    transport.respond_with(get_feature_responder(0x1814, 0x02, 1));

    let chan = open_channel(Arc::clone(&transport), 0x01).await;
    let device = Device::new(Arc::clone(&chan), 0x01).await.unwrap();
    let change_host = device.feature::<ChangeHostFeatureV1>().await.unwrap();

    // No responder for feature index 0x02: the request times out, which
    // set_current_host treats as the device having switched away.
    change_host.set_current_host(1).await.unwrap();
}

// S3 (queue level): key-block requests go out and HID reports land in the
// HID queue of the selected device.
#[tokio::test]
async fn s3_disable_keys_and_hid_queue() {
    let transport = MockTransport::new();
    transport.respond_with(ping_responder());
    transport.respond_with(get_feature_responder(0x4522, 0x05, 0));
    transport.respond_with(empty_response_responder(0x05));

    let chan = open_channel(Arc::clone(&transport), 0x01).await;
    let device = Device::new(Arc::clone(&chan), 0x01).await.unwrap();
    chan.dispatcher().set_hid_report_device(0x01);

    let disable_keys = device.feature::<DisableKeysByUsageFeatureV0>().await.unwrap();

    // Disable Escape and Tab.
    disable_keys.disable_keys(&[0x29, 0x2b]).await.unwrap();

    let request = transport
        .sent_frames()
        .into_iter()
        .find(|frame| frame[2] == 0x05 && frame[3] >> 4 == 0x1)
        .expect("the disable request should have been sent");
    assert_eq!(request[0], 0x11);
    assert_eq!(&request[4..6], &[0x29, 0x2b]);
    assert!(request[6..].iter().all(|byte| *byte == 0));

    let hid_queue = Arc::clone(chan.queues(0x01).queue(QueueName::Hid));

    // While the keys are disabled the emulator presses them: the DUT sends
    // nothing, so the queue stays empty.
    assert!(hid_queue.is_empty());

    disable_keys.enable_all_keys().await.unwrap();

    // After enabling, one keystroke produces a make and a break report.
    transport.inject(vec![0x01, 0x00, 0x00, 0x29, 0x00, 0x00, 0x00, 0x00]);
    transport.inject(vec![0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);

    let make = hid_queue
        .get(Duration::from_secs(1), |_| true)
        .await
        .unwrap();
    let break_ = hid_queue
        .get(Duration::from_secs(1), |_| true)
        .await
        .unwrap();

    assert!(matches!(
        make.inbound,
        hidpp::dispatcher::Inbound::HidReport(ref data) if data[3] == 0x29
    ));
    assert!(matches!(
        break_.inbound,
        hidpp::dispatcher::Inbound::HidReport(ref data) if data[3] == 0x00
    ));
    assert!(hid_queue.is_empty());
}

// S4: an out-of-range argument surfaces as a typed error carrying the
// originating feature index and function, within the send deadline.
#[tokio::test]
async fn s4_error_surfacing() {
    let transport = MockTransport::new();
    transport.respond_with(ping_responder());
    transport.respond_with(get_feature_responder(0x1814, 0x02, 1));

    // The device rejects the host index with ERR_OUT_OF_RANGE.
    transport.respond_with(|request: &[u8]| {
        if request[2] != 0x02 || request[3] >> 4 != 0x1 {
            return None;
        }

        Some(vec![long_response(request[1], 0xff, 0x00, &[
            request[2],
            request[3],
            0x0b,
        ])])
    });

    let chan = open_channel(Arc::clone(&transport), 0x01).await;
    let device = Device::new(Arc::clone(&chan), 0x01).await.unwrap();
    let change_host = device.feature::<ChangeHostFeatureV1>().await.unwrap();

    let started = Instant::now();
    let result = change_host.set_current_host(0xff).await;
    assert!(started.elapsed() < Duration::from_millis(500));

    let Err(ChannelError::Hidpp20(error)) = result else {
        panic!("expected a HID++2.0 error, got {result:?}");
    };
    assert_eq!(error.kind, v20::ErrorKind::OutOfRange);
    assert_eq!(error.feature_index, 0x02);
    assert_eq!(error.function_id, U4::from_lo(0x1));

    // The error was claimed by the pending request, not parked in a queue.
    assert!(chan.queues(0x01).all_empty());
}

// S5: a ping into a booting device times out on schedule, releases its
// software ID slot, and a later ping succeeds.
#[tokio::test]
async fn s5_timeout_and_recovery() {
    let transport = MockTransport::new();
    transport.respond_with(ping_responder());

    let chan = open_channel(Arc::clone(&transport), 0x01).await;
    let device = Device::new(Arc::clone(&chan), 0x01).await.unwrap();

    transport.set_silent(true);

    let started = Instant::now();
    let result = device
        .root()
        .ping_with_timeout(0x42, Duration::from_millis(200))
        .await;
    let elapsed = started.elapsed();

    assert!(matches!(result, Err(ChannelError::Timeout)));
    assert!(elapsed >= Duration::from_millis(180));
    assert!(elapsed < Duration::from_millis(400));

    transport.set_silent(false);
    let echo = device
        .root()
        .ping_with_timeout(0x42, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(echo, 0x42);
}

// S6: requests on two distinct channels complete independently, each with
// its own response.
#[tokio::test]
async fn s6_concurrent_requests_on_distinct_channels() {
    async fn set_up(entity_count: u8, device_index: u8) -> (Arc<MockTransport>, Device) {
        let transport = MockTransport::new();
        transport.respond_with(ping_responder());
        transport.respond_with(get_feature_responder(0x0003, 0x03, 0));
        transport.respond_with(move |request: &[u8]| {
            if request[2] != 0x03 || request[3] >> 4 != 0x0 {
                return None;
            }

            let mut payload = [0u8; 15];
            payload[0] = entity_count;
            Some(vec![long_response(request[1], 0x03, request[3], &payload)])
        });

        let chan = open_channel(Arc::clone(&transport), device_index).await;
        let device = Device::new(chan, device_index).await.unwrap();
        (transport, device)
    }

    let (_transport_a, device_a) = set_up(1, RECEIVER_DEVICE_INDEX).await;
    let (_transport_b, device_b) = set_up(2, 0x01).await;

    let info_a = device_a.feature::<DeviceInformationFeature>().await.unwrap();
    let info_b = device_b.feature::<DeviceInformationFeature>().await.unwrap();

    let (result_a, result_b) =
        tokio::join!(info_a.get_device_info(), info_b.get_device_info());

    assert_eq!(result_a.unwrap().entity_count, 1);
    assert_eq!(result_b.unwrap().entity_count, 2);
}

// Two concurrent requests on the same channel get distinct software IDs and
// each caller receives its own response, even when the responses arrive in
// reverse order.
#[tokio::test]
async fn concurrent_requests_complete_out_of_order() {
    let transport = MockTransport::new();
    transport.respond_with(ping_responder());
    transport.respond_with(get_feature_responder(0x0003, 0x03, 0));

    // Park the first fw-info request and answer it only after the second
    // one arrived, reversing the response order.
    let parked: Arc<Mutex<Option<Vec<u8>>>> = Arc::new(Mutex::new(None));
    transport.respond_with({
        let parked = Arc::clone(&parked);
        move |request: &[u8]| {
            if request[2] != 0x03 || request[3] >> 4 != 0x1 {
                return None;
            }

            let response = long_response(request[1], 0x03, request[3], &[
                0x00, b'A', b'B', b'C', 0x12, 0x01, 0x00, 0x01, request[4],
            ]);

            let mut guard = parked.lock().unwrap();
            match guard.take() {
                None => {
                    *guard = Some(response);
                    Some(vec![])
                },
                Some(first) => Some(vec![response, first]),
            }
        }
    });

    let chan = open_channel(Arc::clone(&transport), 0x01).await;
    let device = Device::new(chan, 0x01).await.unwrap();
    let info = device.feature::<DeviceInformationFeature>().await.unwrap();

    let (first, second) = tokio::join!(info.get_fw_info(0x00), info.get_fw_info(0x01));

    // Each caller got a response, and the distinct software IDs kept them
    // apart despite the reversed arrival order.
    assert!(first.is_ok());
    assert!(second.is_ok());

    let fw_requests: Vec<Vec<u8>> = transport
        .sent_frames()
        .into_iter()
        .filter(|frame| frame[2] == 0x03 && frame[3] >> 4 == 0x1)
        .collect();
    assert_eq!(fw_requests.len(), 2);
    assert_ne!(
        fw_requests[0][3] & 0x0f,
        fw_requests[1][3] & 0x0f,
        "concurrent requests must use distinct software IDs"
    );
}

// An unsolicited status broadcast reaches both the feature's listeners and
// the event queue, decoded against its registered schema.
#[tokio::test]
async fn status_broadcast_reaches_listeners_and_the_event_queue() {
    let transport = MockTransport::new();
    transport.respond_with(ping_responder());
    transport.respond_with(get_feature_responder(0x1d4b, 0x06, 0));

    let chan = open_channel(Arc::clone(&transport), 0x01).await;
    let device = Device::new(Arc::clone(&chan), 0x01).await.unwrap();

    let status = device
        .feature::<WirelessDeviceStatusFeatureV0>()
        .await
        .unwrap();
    let listener = status.listen();

    // The device reconnects and broadcasts event 0 of its status feature.
    transport.inject(long_response(0x01, 0x06, 0x00, &[0x01, 0x01, 0x01]));

    let event_queue = Arc::clone(chan.queues(0x01).queue(QueueName::Event));
    let queued = event_queue
        .get(Duration::from_secs(1), |_| true)
        .await
        .unwrap();

    // The dispatcher resolved the feature index and decoded the payload.
    let decoded = queued.decoded.expect("the event schema should be known");
    assert_eq!(decoded.uint("status"), Some(1));

    let broadcast = listener.try_recv().unwrap();
    assert_eq!(broadcast.status, DeviceStatus::Reconnection);
    assert_eq!(broadcast.request, StatusRequest::SoftwareReconfigurationNeeded);
    assert_eq!(broadcast.reason, StatusReason::PowerSwitchActivated);
}

// Cancelling a pending request reroutes its late response to the event
// queue, tagged accordingly.
#[tokio::test]
async fn cancelled_request_reroutes_late_response() {
    let transport = MockTransport::new();
    transport.respond_with(ping_responder());
    transport.respond_with(get_feature_responder(0x1814, 0x02, 0));

    let chan = open_channel(Arc::clone(&transport), 0x01).await;
    let device = Device::new(Arc::clone(&chan), 0x01).await.unwrap();
    device.feature_slot(0x1814).await.unwrap();

    transport.set_silent(true);

    let token = hidpp::dispatcher::CancelToken::new();
    let send = chan.send_v20_cancellable(
        v20::Message::Short(
            v20::MessageHeader {
                device_index: 0x01,
                feature_index: 0x02,
                function_id: U4::from_lo(0x0),
                software_id: chan.sw_id(),
            },
            [0x00; 3],
        ),
        Duration::from_secs(5),
        &token,
    );

    let canceller = async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    };

    let (result, ()) = tokio::join!(send, canceller);
    assert!(matches!(result, Err(ChannelError::Cancelled)));

    // The response shows up late: it must land in the event queue, tagged.
    let request = transport
        .sent_frames()
        .into_iter()
        .rfind(|frame| frame[2] == 0x02)
        .unwrap();
    transport.inject(long_response(0x01, 0x02, request[3], &[0x02, 0x01]));

    let event_queue = Arc::clone(chan.queues(0x01).queue(QueueName::Event));
    let late = event_queue
        .get(Duration::from_secs(1), |msg| msg.late_response)
        .await
        .unwrap();
    assert!(late.late_response);
}

// All 16 software ID slots in flight: the 17th request is rejected, and
// slots free up again once the pending requests finish.
#[tokio::test]
async fn software_id_slot_exhaustion() {
    let transport = MockTransport::new();
    transport.respond_with(ping_responder());

    let chan = open_channel(Arc::clone(&transport), 0x01).await;
    let device = Device::new(Arc::clone(&chan), 0x01).await.unwrap();

    transport.set_silent(true);

    let ping_msg = |chan: &Arc<HidppChannel>| {
        v20::Message::Short(
            v20::MessageHeader {
                device_index: 0x01,
                feature_index: 0x00,
                function_id: U4::from_lo(0x1),
                software_id: chan.sw_id(),
            },
            [0x00; 3],
        )
    };

    let mut slots = Vec::new();
    for _ in 0..16 {
        let chan = Arc::clone(&chan);
        let msg = ping_msg(&chan);
        slots.push(tokio::spawn(async move {
            chan.send_v20(msg, Duration::from_millis(500)).await
        }));
    }

    // Give the spawned requests time to occupy their slots.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let overflow = chan
        .send_v20(ping_msg(&chan), Duration::from_millis(100))
        .await;
    assert!(matches!(overflow, Err(ChannelError::ReplayTokenExhausted)));

    for slot in slots {
        assert!(matches!(slot.await.unwrap(), Err(ChannelError::Timeout)));
    }

    // The deadline released every slot; the channel works again.
    transport.set_silent(false);
    assert!(device.ping(Duration::from_millis(500)).await.is_ok());
}

// Closing a channel fails the requests in flight and later sends are
// rejected outright.
#[tokio::test]
async fn close_fails_inflight_requests() {
    let transport = MockTransport::new();
    transport.respond_with(ping_responder());

    let chan = open_channel(Arc::clone(&transport), 0x01).await;
    let device = Device::new(Arc::clone(&chan), 0x01).await.unwrap();

    transport.set_silent(true);

    let pending = {
        let chan = Arc::clone(&chan);
        tokio::spawn(async move {
            chan.send_v20(
                v20::Message::Short(
                    v20::MessageHeader {
                        device_index: 0x01,
                        feature_index: 0x00,
                        function_id: U4::from_lo(0x1),
                        software_id: chan.sw_id(),
                    },
                    [0x00; 3],
                ),
                Duration::from_secs(5),
            )
            .await
        })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    chan.close().await.unwrap();

    assert!(matches!(
        pending.await.unwrap(),
        Err(ChannelError::ChannelClosed)
    ));
    assert!(matches!(
        device.ping(Duration::from_millis(100)).await,
        Err(ChannelError::ChannelClosed)
    ));
}
