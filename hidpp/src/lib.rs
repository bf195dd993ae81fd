//! The HID++ / BLE protocol engine of a hardware-in-the-loop harness for
//! Logitech peripherals.
//!
//! A device under test is driven through its HID++2.0 / HID++1.0 / BLE /
//! BLE Pro wire protocols: typed requests are serialized at bit
//! granularity, dispatched onto one of several concurrent transport
//! channels, correlated with their matching responses, and unsolicited
//! traffic is demultiplexed into per-class queues that test code consumes.
//!
//! Logitech kindly provided a [public Google Drive folder](https://drive.google.com/drive/folders/0BxbRzx7vEV7eWmgwazJ3NUFfQ28)
//! with a lot of documentation on HID++ and several device features. These
//! documents were heavily used during the development of this crate.
//!
//! # Quickstart
//!
//! ## Establish HID communication
//!
//! This crate implements the HID++ protocol, not the underlying
//! [HID](https://en.wikipedia.org/wiki/Human_interface_device)
//! communication, which is left to an external crate of your choice.
//! The trait used for bridging your HID implementation to this crate is
//! [`transport::Transport`] (plus [`transport::BleTransport`] for BLE
//! links), so make sure to provide an implementation for it. The traits
//! define async methods using [`mod@async_trait`], which is re-exported for
//! annotating your implementing type.
//!
//! ## Initialize HID++ communication
//!
//! Once you have a working implementation of [`transport::Transport`], you
//! can open a channel on it:
//!
//! ```no_run
//! # async fn demo(
//! #     my_transport: std::sync::Arc<dyn hidpp::transport::Transport>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! use std::sync::Arc;
//!
//! use hidpp::{
//!     channel::{ChannelId, HidppChannel, Protocol, TransportHandle},
//!     device::Device,
//!     feature::change_host::v0::ChangeHostFeatureV0,
//!     receiver::Receiver,
//! };
//!
//! // First, we will create the HID++ channel. Opening it claims the
//! // transport, probes which HID++ frame families the interface carries
//! // and starts the inbound reader task.
//! let chan = Arc::new(HidppChannel::new(
//!     TransportHandle::Hid(my_transport),
//!     ChannelId {
//!         port_index: 0,
//!         device_index: hidpp::receiver::RECEIVER_DEVICE_INDEX,
//!         protocol: Protocol::Usb,
//!     },
//! ));
//! chan.open().await?;
//!
//! // If a wireless receiver is handling the HID++ communication, we can
//! // detect it and enumerate the devices paired behind it.
//! let receiver = Receiver::detect(Arc::clone(&chan))?;
//! receiver.enable_notifications().await?;
//! receiver.trigger_device_arrival().await?;
//!
//! // Let's say we found a device in slot 1 using this enumeration. We can
//! // now initialize it; the frames it sends and receives travel through
//! // the receiver transparently:
//! let device = Device::new(Arc::clone(&chan), 0x01).await?;
//!
//! // Features are resolved lazily through the always-present root
//! // feature: one lookup round-trip per feature ID, cached afterwards.
//! let change_host = device.feature::<ChangeHostFeatureV0>().await?;
//! change_host.set_current_host(1).await?;
//!
//! // Unsolicited traffic lands in per-class queues.
//! let queues = chan.queues(device.device_index);
//! # Ok(())
//! # }
//! ```

pub use async_trait::async_trait;

mod bcd;
pub mod channel;
pub mod codec;
pub mod device;
pub mod dispatcher;
pub mod event;
pub mod feature;
pub mod frame;
pub mod nibble;
pub mod protocol;
pub mod receiver;
pub mod transport;
