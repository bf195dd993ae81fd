use std::io::{BufWriter, Write};

use anyhow::Result;
use clap::Args;
use hidpp::{
    device::{Device, DeviceError},
    feature::{
        device_friendly_name::v0::DeviceFriendlyNameFeatureV0,
        device_information::DeviceInformationFeature,
    },
    receiver::{PairedDeviceKind, Receiver, ReceiverError},
};
use owo_colors::OwoColorize;
use serde::Serialize;
use serde_json::json;

use super::Cli;
use crate::async_hid_impl::enumerate_hidpp;

/// Detect and view general information about connected devices.
#[derive(Args)]
pub struct ProbeCommand {}

impl ProbeCommand {
    pub async fn execute(&self, root: &Cli) -> Result<()> {
        let mut stdout = BufWriter::new(anstream::stdout());

        let receivers = probe_receivers().await?;

        if root.json {
            writeln!(stdout, "{}", json!(receivers)).unwrap();
            return Ok(());
        }

        if receivers.is_empty() {
            writeln!(stdout, "{}", "No HID++ receivers were found.".bright_black()).unwrap();
            return Ok(());
        }

        for (receiver_i, receiver) in receivers.into_iter().enumerate() {
            if receiver_i != 0 {
                writeln!(stdout).unwrap();
            }

            writeln!(
                stdout,
                "{:?} receiver ({:#06x}:{:#06x}), {} paired device(s)",
                receiver.kind,
                receiver.vendor_id.bright_black(),
                receiver.product_id.bright_black(),
                receiver.paired_devices.len().bright_blue(),
            )
            .unwrap();

            let devices_len = receiver.paired_devices.len();
            for (device_i, device) in receiver.paired_devices.into_iter().enumerate() {
                writeln!(
                    stdout,
                    "{} {}: {} {} ({:?}) ({:#06x})",
                    if device_i == devices_len - 1 {
                        " ╰─"
                    } else {
                        " ├─"
                    },
                    device.slot.bright_blue(),
                    if device.online {
                        "●".green().into_styled()
                    } else {
                        "●".red().into_styled()
                    },
                    if device.online {
                        device.name
                    } else {
                        device.name.bright_black().italic().to_string()
                    },
                    device.kind.green(),
                    device.wpid.bright_black(),
                )
                .unwrap();

                let mut properties = Vec::new();
                if let Some(features) = device.properties.feature_count {
                    properties.push(format!("FEATURES: {}", features.bright_black()));
                }
                if let Some(friendly_name) = device.properties.friendly_name {
                    properties.push(format!("FRIENDLY NAME: {}", friendly_name.bright_black()));
                }
                if let Some(serial_number) = device.properties.serial_number {
                    properties.push(format!("SERIAL NUMBER: {}", serial_number.bright_black()));
                }

                let properties_len = properties.len();
                for (property_i, property) in properties.into_iter().enumerate() {
                    writeln!(
                        stdout,
                        "{}{} {}",
                        if device_i == devices_len - 1 {
                            "     "
                        } else {
                            " │   "
                        },
                        if property_i == properties_len - 1 {
                            "╰─"
                        } else {
                            "├─"
                        },
                        property
                    )
                    .unwrap();
                }
            }
        }

        stdout.flush().unwrap();

        Ok(())
    }
}

async fn probe_receivers() -> Result<Vec<ProbedReceiver>> {
    let channels = enumerate_hidpp().await?;

    let mut receivers = Vec::with_capacity(channels.len());
    for channel in channels {
        let receiver = match Receiver::detect(channel) {
            Ok(receiver) => receiver,
            Err(ReceiverError::UnknownReceiver) => continue,
            Err(other) => return Err(other.into()),
        };

        receiver.enable_notifications().await?;

        let pairings = receiver.count_pairings().await?;
        let mut probed_devices = Vec::with_capacity(pairings as usize);

        for slot in 1..=pairings {
            let info = receiver.device_pairing_information(slot).await?;
            let name = receiver
                .device_name(slot)
                .await
                .unwrap_or_else(|_| String::from("<unnamed>"));

            let (online, properties) = match receiver.device(slot).await {
                Ok(device) => (true, probe_properties(&device).await?),
                Err(DeviceError::DeviceNotFound) => {
                    (false, ProbedDeviceProperties::default())
                },
                Err(err) => return Err(err.into()),
            };

            probed_devices.push(ProbedPairedDevice {
                slot,
                name,
                kind: info.kind,
                wpid: info.wpid,
                online,
                properties,
            });
        }

        receivers.push(ProbedReceiver {
            kind: format!("{:?}", receiver.kind),
            vendor_id: receiver.channel().transport().transport().vendor_id(),
            product_id: receiver.channel().transport().transport().product_id(),
            paired_devices: probed_devices,
        });
    }

    Ok(receivers)
}

async fn probe_properties(device: &Device) -> Result<ProbedDeviceProperties> {
    let mut properties = ProbedDeviceProperties::default();

    if let Ok(Some(features)) = device.enumerate_features().await {
        properties.feature_count.replace(features.len());
    }

    if let Some(feature) = device.get_feature::<DeviceFriendlyNameFeatureV0>() {
        if let Ok(friendly_name) = feature.get_whole_friendly_name().await {
            properties.friendly_name.replace(friendly_name);
        }
    }

    if let Some(feature) = device.get_feature::<DeviceInformationFeature>() {
        if let Ok(info) = feature.get_device_info().await {
            if info.capabilities.serial_number {
                if let Ok(serial_number) = feature.get_serial_number().await {
                    properties.serial_number.replace(serial_number);
                }
            }
        }
    }

    Ok(properties)
}

#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize)]
struct ProbedReceiver {
    kind: String,
    vendor_id: u16,
    product_id: u16,
    paired_devices: Vec<ProbedPairedDevice>,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize)]
struct ProbedPairedDevice {
    slot: u8,
    name: String,
    kind: PairedDeviceKind,
    wpid: u16,
    online: bool,
    properties: ProbedDeviceProperties,
}

#[derive(Clone, PartialEq, Eq, Hash, Debug, Default, Serialize)]
struct ProbedDeviceProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    feature_count: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    friendly_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    serial_number: Option<String>,
}
