//! Maintains a registry of well-known HID++2.0 features and their default
//! implementations.

use std::{any::TypeId, collections::HashMap, sync::Arc};

use lazy_static::lazy_static;

use super::Feature;
use crate::{
    channel::HidppChannel,
    feature::{
        CreatableFeature,
        adjustable_dpi::{
            v0::AdjustableDpiFeatureV0,
            v1::AdjustableDpiFeatureV1,
            v2::AdjustableDpiFeatureV2,
        },
        change_host::{v0::ChangeHostFeatureV0, v1::ChangeHostFeatureV1},
        device_friendly_name::v0::DeviceFriendlyNameFeatureV0,
        device_information::DeviceInformationFeature,
        disable_keys_by_usage::v0::DisableKeysByUsageFeatureV0,
        feature_set::v0::FeatureSetFeatureV0,
        root::RootFeature,
        wireless_device_status::v0::WirelessDeviceStatusFeatureV0,
    },
};

/// Represents a function that creates a new dynamically sized feature
/// implementation.
pub type FeatureImplProducer =
    fn(chan: Arc<HidppChannel>, device_index: u8, feature_index: u8) -> (TypeId, Arc<dyn Feature>);

/// Represents a known feature implementation starting from a specific
/// feature version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FeatureVersion {
    /// The minimum feature version the implementation supports.
    pub starting_version: u8,

    /// A pointer to a function producing the feature implementation.
    pub producer: FeatureImplProducer,
}

/// Represents a known HID++2.0 device feature.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KnownFeature {
    /// The name of the feature.
    /// This is usually a slightly modified version of the name found in
    /// Logitech's documentation.
    pub name: &'static str,

    /// A list of concrete implementations of the feature, each supporting
    /// the feature starting from a specific version.
    pub versions: &'static [FeatureVersion],
}

/// Looks up a feature by its ID.
pub fn lookup(feature_id: u16) -> Option<KnownFeature> {
    KNOWN_FEATURES.get(&feature_id).copied()
}

/// Looks up all implementations supporting a specific feature ID and
/// version combination.
pub fn lookup_version(feature_id: u16, feature_version: u8) -> Option<Vec<FeatureVersion>> {
    lookup(feature_id).map(|feat| {
        feat.versions
            .iter()
            .filter(|&ver| ver.starting_version <= feature_version)
            .copied()
            .collect::<Vec<FeatureVersion>>()
    })
}

/// The highest feature version any registered implementation of a feature
/// was written against, or [`None`] for features without implementations.
pub fn max_known_version(feature_id: u16) -> Option<u8> {
    lookup(feature_id)?
        .versions
        .iter()
        .map(|version| version.starting_version)
        .max()
}

/// Creates a new feature with a dynamic return type.
fn new_dyn<F: CreatableFeature>(
    chan: Arc<HidppChannel>,
    device_index: u8,
    feature_index: u8,
) -> (TypeId, Arc<dyn Feature>) {
    (
        TypeId::of::<F>(),
        Arc::new(F::new(chan, device_index, feature_index)),
    )
}

macro_rules! versions {
    ($($feature:ty),* $(,)?) => {
        &[$(FeatureVersion {
            starting_version: <$feature>::STARTING_VERSION,
            producer: new_dyn::<$feature>,
        }),*]
    };
}

lazy_static! {
    static ref KNOWN_FEATURES: HashMap<u16, KnownFeature> = HashMap::from([
        (0x0000, KnownFeature {
            name: "Root",
            versions: versions![RootFeature],
        }),
        (0x0001, KnownFeature {
            name: "FeatureSet",
            versions: versions![FeatureSetFeatureV0],
        }),
        (0x0002, KnownFeature {
            name: "FeatureInfo",
            versions: &[],
        }),
        (0x0003, KnownFeature {
            name: "DeviceInformation",
            versions: versions![DeviceInformationFeature],
        }),
        (0x0005, KnownFeature {
            name: "DeviceTypeAndName",
            versions: &[],
        }),
        (0x0007, KnownFeature {
            name: "DeviceFriendlyName",
            versions: versions![DeviceFriendlyNameFeatureV0],
        }),
        (0x0008, KnownFeature {
            name: "KeepAlive",
            versions: &[],
        }),
        (0x0020, KnownFeature {
            name: "ConfigChange",
            versions: &[],
        }),
        (0x0021, KnownFeature {
            name: "UniqueRandomId",
            versions: &[],
        }),
        (0x00c2, KnownFeature {
            name: "DfuControlSigned",
            versions: &[],
        }),
        (0x00c3, KnownFeature {
            name: "DfuControl",
            versions: &[],
        }),
        (0x00d0, KnownFeature {
            name: "Dfu",
            versions: &[],
        }),
        (0x1000, KnownFeature {
            name: "BatteryStatus",
            versions: &[],
        }),
        (0x1001, KnownFeature {
            name: "BatteryVoltage",
            versions: &[],
        }),
        (0x1004, KnownFeature {
            name: "UnifiedBattery",
            versions: &[],
        }),
        (0x1300, KnownFeature {
            name: "LedControl",
            versions: &[],
        }),
        (0x1500, KnownFeature {
            name: "ForcePairing",
            versions: &[],
        }),
        (0x1602, KnownFeature {
            name: "PasswordAuthentication",
            versions: &[],
        }),
        (0x1801, KnownFeature {
            name: "ManufacturingMode",
            versions: &[],
        }),
        (0x1802, KnownFeature {
            name: "DeviceReset",
            versions: &[],
        }),
        (0x1805, KnownFeature {
            name: "OobState",
            versions: &[],
        }),
        (0x1806, KnownFeature {
            name: "ConfigDeviceProps",
            versions: &[],
        }),
        (0x1814, KnownFeature {
            name: "ChangeHost",
            versions: versions![ChangeHostFeatureV0, ChangeHostFeatureV1],
        }),
        (0x1815, KnownFeature {
            name: "HostsInfo",
            versions: &[],
        }),
        (0x1816, KnownFeature {
            name: "BleProPrepairing",
            versions: &[],
        }),
        (0x1817, KnownFeature {
            name: "LightspeedPrepairing",
            versions: &[],
        }),
        (0x1830, KnownFeature {
            name: "PowerModes",
            versions: &[],
        }),
        (0x1890, KnownFeature {
            name: "RfTest",
            versions: &[],
        }),
        (0x18a1, KnownFeature {
            name: "LedTest",
            versions: &[],
        }),
        (0x1982, KnownFeature {
            name: "Backlight2",
            versions: &[],
        }),
        (0x1b04, KnownFeature {
            name: "ReprogControls5",
            versions: &[],
        }),
        (0x1d4b, KnownFeature {
            name: "WirelessDeviceStatus",
            versions: versions![WirelessDeviceStatusFeatureV0],
        }),
        (0x1df0, KnownFeature {
            name: "RemainingPairings",
            versions: &[],
        }),
        (0x1f20, KnownFeature {
            name: "AdcMeasurement",
            versions: &[],
        }),
        (0x2001, KnownFeature {
            name: "SwapLeftRightButton",
            versions: &[],
        }),
        (0x2100, KnownFeature {
            name: "VerticalScrolling",
            versions: &[],
        }),
        (0x2110, KnownFeature {
            name: "SmartShiftWheel",
            versions: &[],
        }),
        (0x2121, KnownFeature {
            name: "HiResWheel",
            versions: &[],
        }),
        (0x2150, KnownFeature {
            name: "Thumbwheel",
            versions: &[],
        }),
        (0x2201, KnownFeature {
            name: "AdjustableDpi",
            versions: versions![
                AdjustableDpiFeatureV0,
                AdjustableDpiFeatureV1,
                AdjustableDpiFeatureV2,
            ],
        }),
        (0x2202, KnownFeature {
            name: "ExtendedAdjustableDpi",
            versions: &[],
        }),
        (0x2250, KnownFeature {
            name: "XyStats",
            versions: &[],
        }),
        (0x40a0, KnownFeature {
            name: "FnInversion",
            versions: &[],
        }),
        (0x4220, KnownFeature {
            name: "LockKeyState",
            versions: &[],
        }),
        (0x4521, KnownFeature {
            name: "DisableKeys",
            versions: &[],
        }),
        (0x4522, KnownFeature {
            name: "DisableKeysByUsage",
            versions: versions![DisableKeysByUsageFeatureV0],
        }),
        (0x4531, KnownFeature {
            name: "MultiPlatform",
            versions: &[],
        }),
        (0x4540, KnownFeature {
            name: "KeyboardInternationalLayouts",
            versions: &[],
        }),
        (0x4600, KnownFeature {
            name: "Crown",
            versions: &[],
        }),
        (0x6100, KnownFeature {
            name: "TouchpadRawXy",
            versions: &[],
        }),
        (0x6501, KnownFeature {
            name: "Gestures2",
            versions: &[],
        }),
        (0x8010, KnownFeature {
            name: "GamingGKeys",
            versions: &[],
        }),
        (0x8040, KnownFeature {
            name: "BrightnessControl",
            versions: &[],
        }),
        (0x8060, KnownFeature {
            name: "AdjustableReportRate",
            versions: &[],
        }),
        (0x8070, KnownFeature {
            name: "ColorLedEffects",
            versions: &[],
        }),
        (0x8071, KnownFeature {
            name: "RgbEffects",
            versions: &[],
        }),
        (0x8081, KnownFeature {
            name: "PerKeyLighting2",
            versions: &[],
        }),
        (0x80a4, KnownFeature {
            name: "AxisResponseCurve",
            versions: &[],
        }),
        (0x8100, KnownFeature {
            name: "OnboardProfiles",
            versions: &[],
        }),
        (0x8300, KnownFeature {
            name: "Sidetone",
            versions: &[],
        }),
    ]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_lookup_filters_by_starting_version() {
        let all = lookup_version(0x2201, 2).unwrap();
        assert_eq!(all.len(), 3);

        let v1_only = lookup_version(0x2201, 1).unwrap();
        assert_eq!(v1_only.len(), 2);

        let v0_only = lookup_version(0x2201, 0).unwrap();
        assert_eq!(v0_only.len(), 1);
    }

    #[test]
    fn features_without_implementations_are_still_known() {
        let feature = lookup(0x80a4).unwrap();
        assert_eq!(feature.name, "AxisResponseCurve");
        assert!(feature.versions.is_empty());
        assert_eq!(max_known_version(0x80a4), None);
    }

    #[test]
    fn max_known_version_reflects_the_newest_implementation() {
        assert_eq!(max_known_version(0x2201), Some(2));
        assert_eq!(max_known_version(0x1814), Some(1));
        assert_eq!(max_known_version(0x4522), Some(0));
    }
}
