//! Implements the `WirelessDeviceStatus` feature (ID `0x1d4b`) through
//! which a wireless device broadcasts its connection status to the host.

use crate::codec::{Direction, FieldDef, Schema, SchemaKey, SchemaRegistry};
use crate::frame::ReportFamily;

pub mod v0;

pub(crate) static STATUS_BROADCAST_EVENT: Schema = Schema {
    name: "statusBroadcastEvent",
    family: ReportFamily::Long,
    padding: 0x00,
    fields: &[
        FieldDef::uint("status", 8),
        FieldDef::uint("request", 8),
        FieldDef::uint("reason", 8),
    ],
};

pub(crate) fn register_schemas(registry: &mut SchemaRegistry) {
    registry.register(
        SchemaKey {
            feature_id: 0x1d4b,
            version: 0,
            function_index: 0,
            direction: Direction::Event,
        },
        &STATUS_BROADCAST_EVENT,
    );
}
