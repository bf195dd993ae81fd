//! Implements HID communication using the `async-hid` crate.

use std::{
    fs::File,
    io::Read,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Result, anyhow};
use async_hid::{
    AsyncHidRead,
    AsyncHidWrite,
    Device,
    DeviceId,
    DeviceInfo,
    DeviceReader,
    DeviceWriter,
    HidBackend,
};
use futures_lite::StreamExt;
use hidpp::{
    async_trait,
    channel::{ChannelError, ChannelId, HidppChannel, Protocol, TransportHandle},
    frame::RECEIVER_DEVICE_INDEX,
    transport::{Transport, TransportError},
};
use itertools::Itertools;
use tokio::sync::Mutex;

struct AsyncHidTransport {
    reader: Mutex<DeviceReader>,
    writer: Mutex<DeviceWriter>,
    info: DeviceInfo,
    open: AtomicBool,
}

#[async_trait]
impl Transport for AsyncHidTransport {
    fn vendor_id(&self) -> u16 {
        self.info.vendor_id
    }

    fn product_id(&self) -> u16 {
        self.info.product_id
    }

    async fn open(&self) -> Result<(), TransportError> {
        // The device handle is claimed during enumeration already.
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
        let mut guard = self.writer.lock().await;
        guard.write_output_report(frame).await?;
        Ok(())
    }

    async fn receive(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut guard = self.reader.lock().await;
        Ok(guard.read_input_report(buf).await?)
    }

    async fn report_descriptor(&self, buf: &mut [u8]) -> Result<Option<usize>, TransportError> {
        let DeviceId::DevPath(ref path) = self.info.id else {
            return Err(
                anyhow!("report descriptors are currently only supported on Linux")
                    .into_boxed_dyn_error(),
            );
        };

        let descriptor_path = path.join("device/report_descriptor");
        let mut file = File::open(descriptor_path)?;
        Ok(Some(file.read(buf)?))
    }
}

/// Tries to open HID++ channels on all capable interfaces of the local
/// machine.
pub async fn enumerate_hidpp() -> Result<Vec<Arc<HidppChannel>>> {
    let hid = HidBackend::default();
    let devices: Vec<Device> = hid
        .enumerate()
        .await?
        .collect::<Vec<Device>>()
        .await
        .into_iter()
        .unique_by(|x| x.id.clone())
        .collect();

    let mut channels = Vec::new();
    for (port_index, dev) in devices.into_iter().enumerate() {
        let opened = match dev.open().await {
            Ok(opened) => opened,
            Err(_) => continue,
        };

        let transport = Arc::new(AsyncHidTransport {
            reader: Mutex::new(opened.0),
            writer: Mutex::new(opened.1),
            info: dev.to_device_info(),
            open: AtomicBool::new(false),
        });

        let channel = Arc::new(HidppChannel::new(
            TransportHandle::Hid(transport),
            ChannelId {
                port_index: port_index as u8,
                device_index: RECEIVER_DEVICE_INDEX,
                protocol: Protocol::Usb,
            },
        ));

        match channel.open().await {
            Ok(()) => channels.push(channel),
            Err(ChannelError::HidppNotSupported) => continue,
            Err(other) => {
                return Err(
                    anyhow::Error::new(other).context("could not initialize the HID++ channel")
                );
            },
        }
    }

    Ok(channels)
}
