//! The transport adapter contracts bridging the protocol engine to concrete
//! hardware backends.
//!
//! Adapters are the only place aware of USB endpoint descriptors, BLE GATT
//! handles or receiver enumeration. They never inspect payloads beyond what
//! is needed to detect frame boundaries. Concrete implementations live
//! outside this crate (see the `hidbox` prober for an `async-hid` based
//! one); the engine only depends on these traits.

use std::error::Error;

use async_trait::async_trait;
use hidreport::{Field, Report, ReportDescriptor, Usage, UsageId, UsagePage};
use thiserror::Error as ThisError;

use crate::frame::{LONG_REPORT_ID, SHORT_REPORT_ID, VERY_LONG_REPORT_ID};

/// hidapi defines this as the maximum EXPECTED size of report descriptors.
/// We will trust this for now, but a workaround may be required if devices
/// do in fact return longer descriptors.
pub const MAX_REPORT_DESCRIPTOR_LENGTH: usize = 4096;

const SHORT_REPORT_USAGE_PAGE: u16 = 0xff00;
const SHORT_REPORT_USAGE: u16 = 0x0001;

const LONG_REPORT_USAGE_PAGE: u16 = 0xff00;
const LONG_REPORT_USAGE: u16 = 0x0002;

const VERY_LONG_REPORT_USAGE_PAGE: u16 = 0xff00;
const VERY_LONG_REPORT_USAGE: u16 = 0x0004;

/// The error type adapters report. Implementations wrap their own error
/// types into this.
pub type TransportError = Box<dyn Error + Send + Sync>;

/// Which HID++ frame families an interface carries.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FrameSupport {
    /// Whether the interface carries short (7 byte) frames.
    pub short: bool,

    /// Whether the interface carries long (20 byte) frames.
    pub long: bool,

    /// Whether the interface carries very long (64 byte) frames.
    pub very_long: bool,
}

impl FrameSupport {
    /// Whether any HID++ family is supported at all.
    pub fn any(&self) -> bool {
        self.short || self.long || self.very_long
    }
}

/// Represents an arbitrary transport carrying HID++ frames, e.g. a USB HID
/// interface or a BLE link. It has to support async I/O.
///
/// A transport is a single-producer single-consumer resource: one task
/// sends, one task receives. Implementations must make [`Self::send`] safe
/// to call concurrently with [`Self::receive`].
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The USB/BLE vendor ID of the interface.
    fn vendor_id(&self) -> u16;

    /// The USB/BLE product ID of the interface.
    fn product_id(&self) -> u16;

    /// Claims the underlying hardware resource.
    async fn open(&self) -> Result<(), TransportError>;

    /// Releases the underlying hardware resource. A blocked
    /// [`Self::receive`] call must return an error afterwards.
    async fn close(&self) -> Result<(), TransportError>;

    /// Whether the transport is currently open.
    fn is_open(&self) -> bool;

    /// Writes one raw frame to the transport.
    async fn send(&self, frame: &[u8]) -> Result<(), TransportError>;

    /// Reads the next raw frame from the transport into `buf`.
    ///
    /// The sequence of calls forms the inbound frame stream of the channel;
    /// the stream is restartable by simply calling again. If the buffer is
    /// not large enough to fit the whole frame, its remainder should be
    /// discarded and must not be returned by any succeeding call.
    ///
    /// Returns the exact amount of read bytes on success.
    async fn receive(&self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// If the implementation already knows which HID++ frame families the
    /// interface carries, it should return them from this method.
    ///
    /// In this case, the report descriptor will not be read and parsed.
    fn frame_support_hint(&self) -> Option<FrameSupport> {
        None
    }

    /// Retrieves the raw HID report descriptor from the transport, if it has
    /// one. BLE adapters usually don't.
    ///
    /// This is used to determine whether the transport supports HID++.
    ///
    /// Returns the exact size of the report descriptor on success, or
    /// `Ok(None)` if no descriptor is available.
    async fn report_descriptor(&self, buf: &mut [u8]) -> Result<Option<usize>, TransportError> {
        let _ = buf;
        Ok(None)
    }
}

/// The well-known GATT characteristics the protocol engine addresses on a
/// BLE transport.
///
/// The engine only names the role; mapping a role to the concrete GATT
/// handle (discovered during service enumeration) is the adapter's job.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub enum Characteristic {
    /// The HID++ report characteristic of the HID service carrying regular
    /// frames.
    HidppReport,

    /// A HID input-report characteristic, identified by its report
    /// reference descriptor value.
    HidInputReport(u8),

    /// The battery level characteristic of the Battery Service.
    BatteryLevel,

    /// The Logitech vendor-specific attribute toggling latency suppression
    /// on BLE Pro links.
    BleProLatencySuppression,

    /// The Logitech vendor-specific BLE Pro authentication characteristic.
    BleProAuthentication,

    /// The DFU BLE++ channel characteristic, only present while the device
    /// runs its bootloader.
    DfuControl,
}

/// Represents a BLE transport talking GATT to the peripheral.
///
/// Notifications on HID input-report characteristics appear on
/// [`Transport::receive`] just like any other frame; the adapter handles
/// the report-reference tagging internally.
#[async_trait]
pub trait BleTransport: Transport {
    /// Subscribes to notifications of a characteristic.
    async fn enable_notification(
        &self,
        characteristic: Characteristic,
    ) -> Result<(), TransportError>;

    /// Unsubscribes from notifications of a characteristic.
    async fn disable_notification(
        &self,
        characteristic: Characteristic,
    ) -> Result<(), TransportError>;

    /// Reads the current value of a characteristic.
    async fn read(&self, characteristic: Characteristic) -> Result<Vec<u8>, TransportError>;

    /// Writes a value to a characteristic.
    async fn write(
        &self,
        characteristic: Characteristic,
        data: &[u8],
    ) -> Result<(), TransportError>;

    /// The usable ATT payload size of the link.
    fn mtu(&self) -> usize;
}

/// Represents an error that occurred while probing a transport for HID++
/// support.
#[derive(Debug, ThisError)]
pub enum ProbeError {
    /// Indicates that the transport adapter returned an error.
    #[error("the transport adapter returned an error")]
    Transport(#[source] TransportError),

    /// Indicates that the HID report descriptor could not be parsed.
    #[error("the report descriptor could not be parsed")]
    ReportDescriptor(hidreport::ParserError),

    /// Indicates that the transport has no report descriptor and gave no
    /// support hint, so HID++ support cannot be determined.
    #[error("the transport provides neither a support hint nor a report descriptor")]
    Undeterminable,
}

/// Checks which HID++ frame families a transport carries.
///
/// Prefers the adapter's [`Transport::frame_support_hint`] fast path and
/// falls back to parsing the HID report descriptor.
pub async fn probe_frame_support<T: Transport + ?Sized>(
    transport: &T,
) -> Result<FrameSupport, ProbeError> {
    if let Some(support) = transport.frame_support_hint() {
        return Ok(support);
    }

    let mut raw_descriptor = vec![0u8; MAX_REPORT_DESCRIPTOR_LENGTH];
    let descriptor_size = transport
        .report_descriptor(&mut raw_descriptor)
        .await
        .map_err(ProbeError::Transport)?
        .ok_or(ProbeError::Undeterminable)?;

    let descriptor = ReportDescriptor::try_from(&raw_descriptor[..descriptor_size])
        .map_err(ProbeError::ReportDescriptor)?;

    Ok(FrameSupport {
        short: has_vendor_report(&descriptor, SHORT_REPORT_ID, SHORT_REPORT_USAGE_PAGE, SHORT_REPORT_USAGE),
        long: has_vendor_report(&descriptor, LONG_REPORT_ID, LONG_REPORT_USAGE_PAGE, LONG_REPORT_USAGE),
        very_long: has_vendor_report(
            &descriptor,
            VERY_LONG_REPORT_ID,
            VERY_LONG_REPORT_USAGE_PAGE,
            VERY_LONG_REPORT_USAGE,
        ),
    })
}

fn has_vendor_report(
    descriptor: &ReportDescriptor,
    report_id: u8,
    usage_page: u16,
    usage: u16,
) -> bool {
    descriptor
        .find_input_report(&[report_id])
        .and_then(|report| report.fields().first())
        .and_then(|field| match field {
            Field::Array(arr) => Some(arr.usage_range()),
            _ => None,
        })
        .is_some_and(|range| {
            range
                .lookup_usage(&Usage::from_page_and_id(
                    UsagePage::from(usage_page),
                    UsageId::from(usage),
                ))
                .is_some()
        })
}
