//! Implements the `DisableKeysByUsage` feature (ID `0x4522`) masking
//! individual keyboard keys by their HID usage.

use crate::codec::{Direction, FieldDef, Schema, SchemaKey, SchemaRegistry};
use crate::frame::ReportFamily;

pub mod v0;

/// The amount of usages one disable/enable request carries at most.
pub const USAGES_PER_REQUEST: usize = 16;

pub(crate) static GET_CAPABILITIES_REQUEST: Schema = Schema {
    name: "getCapabilities",
    family: ReportFamily::Short,
    padding: 0x00,
    fields: &[],
};

pub(crate) static GET_CAPABILITIES_RESPONSE: Schema = Schema {
    name: "getCapabilitiesResponse",
    family: ReportFamily::Long,
    padding: 0x00,
    fields: &[FieldDef::uint("max_disabled_usages", 8)],
};

// Disable/enable requests carry a zero-padded block of up to 16 keyboard
// usages; a zero byte terminates the list.
pub(crate) static DISABLE_KEYS_REQUEST: Schema = Schema {
    name: "disableKeys",
    family: ReportFamily::Long,
    padding: 0x00,
    fields: &[FieldDef::bytes("keys_to_disable", 128)],
};

pub(crate) static ENABLE_KEYS_REQUEST: Schema = Schema {
    name: "enableKeys",
    family: ReportFamily::Long,
    padding: 0x00,
    fields: &[FieldDef::bytes("keys_to_enable", 128)],
};

pub(crate) static EMPTY_RESPONSE: Schema = Schema {
    name: "emptyResponse",
    family: ReportFamily::Long,
    padding: 0x00,
    fields: &[],
};

pub(crate) static ENABLE_ALL_KEYS_REQUEST: Schema = Schema {
    name: "enableAllKeys",
    family: ReportFamily::Short,
    padding: 0x00,
    fields: &[],
};

pub(crate) fn register_schemas(registry: &mut SchemaRegistry) {
    let entries: [(u8, Direction, &'static Schema); 8] = [
        (0, Direction::Request, &GET_CAPABILITIES_REQUEST),
        (0, Direction::Response, &GET_CAPABILITIES_RESPONSE),
        (1, Direction::Request, &DISABLE_KEYS_REQUEST),
        (1, Direction::Response, &EMPTY_RESPONSE),
        (2, Direction::Request, &ENABLE_KEYS_REQUEST),
        (2, Direction::Response, &EMPTY_RESPONSE),
        (3, Direction::Request, &ENABLE_ALL_KEYS_REQUEST),
        (3, Direction::Response, &EMPTY_RESPONSE),
    ];

    for (function_index, direction, schema) in entries {
        registry.register(
            SchemaKey {
                feature_id: 0x4522,
                version: 0,
                function_index,
                direction,
            },
            schema,
        );
    }
}
