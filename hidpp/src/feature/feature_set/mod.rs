//! Implements the `FeatureSet` feature (ID `0x0001`) used to enumerate all
//! features a device supports.

use crate::codec::{Direction, FieldDef, Schema, SchemaKey, SchemaRegistry};
use crate::frame::ReportFamily;

pub mod v0;

pub(crate) static GET_COUNT_REQUEST: Schema = Schema {
    name: "getCount",
    family: ReportFamily::Short,
    padding: 0x00,
    fields: &[],
};

pub(crate) static GET_COUNT_RESPONSE: Schema = Schema {
    name: "getCountResponse",
    family: ReportFamily::Long,
    padding: 0x00,
    fields: &[FieldDef::uint("count", 8)],
};

pub(crate) static GET_FEATURE_ID_REQUEST: Schema = Schema {
    name: "getFeatureId",
    family: ReportFamily::Short,
    padding: 0x00,
    fields: &[FieldDef::uint("feature_index", 8)],
};

pub(crate) static GET_FEATURE_ID_RESPONSE: Schema = Schema {
    name: "getFeatureIdResponse",
    family: ReportFamily::Long,
    padding: 0x00,
    fields: &[
        FieldDef::uint("feature_id", 16),
        FieldDef::bitmap("feature_type", 8, &[
            FieldDef::flag("obsolete"),
            FieldDef::flag("hidden"),
            FieldDef::flag("engineering"),
            FieldDef::flag("manufacturing_deactivatable"),
            FieldDef::flag("compliance_deactivatable"),
            FieldDef::uint("reserved", 3),
        ]),
        FieldDef::uint("feature_version", 8),
    ],
};

pub(crate) fn register_schemas(registry: &mut SchemaRegistry) {
    let entries: [(u8, Direction, &'static Schema); 4] = [
        (0, Direction::Request, &GET_COUNT_REQUEST),
        (0, Direction::Response, &GET_COUNT_RESPONSE),
        (1, Direction::Request, &GET_FEATURE_ID_REQUEST),
        (1, Direction::Response, &GET_FEATURE_ID_RESPONSE),
    ];

    for (function_index, direction, schema) in entries {
        registry.register(
            SchemaKey {
                feature_id: 0x0001,
                version: 0,
                function_index,
                direction,
            },
            schema,
        );
    }
}
