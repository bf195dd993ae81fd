//! Implements the `DeviceFriendlyName` feature (ID `0x0007`) managing the
//! user-visible name a device advertises to its hosts.

use crate::codec::{Direction, FieldDef, Schema, SchemaKey, SchemaRegistry};
use crate::frame::ReportFamily;

pub mod v0;

pub(crate) static GET_FRIENDLY_NAME_LEN_REQUEST: Schema = Schema {
    name: "getFriendlyNameLen",
    family: ReportFamily::Short,
    padding: 0x00,
    fields: &[],
};

pub(crate) static GET_FRIENDLY_NAME_LEN_RESPONSE: Schema = Schema {
    name: "getFriendlyNameLenResponse",
    family: ReportFamily::Long,
    padding: 0x00,
    fields: &[
        FieldDef::uint("name_len", 8),
        FieldDef::uint("name_max_len", 8),
        FieldDef::uint("default_name_len", 8),
    ],
};

pub(crate) static GET_FRIENDLY_NAME_REQUEST: Schema = Schema {
    name: "getFriendlyName",
    family: ReportFamily::Short,
    padding: 0x00,
    fields: &[FieldDef::uint("byte_index", 8)],
};

pub(crate) static NAME_CHUNK_RESPONSE: Schema = Schema {
    name: "nameChunkResponse",
    family: ReportFamily::Long,
    padding: 0x00,
    fields: &[
        FieldDef::uint("byte_index", 8),
        FieldDef::bytes("name_chunk", 120),
    ],
};

pub(crate) static SET_FRIENDLY_NAME_REQUEST: Schema = Schema {
    name: "setFriendlyName",
    family: ReportFamily::Long,
    padding: 0x00,
    fields: &[
        FieldDef::uint("byte_index", 8),
        FieldDef::bytes("name_chunk", 120),
    ],
};

pub(crate) static NAME_LEN_RESPONSE: Schema = Schema {
    name: "nameLenResponse",
    family: ReportFamily::Long,
    padding: 0x00,
    fields: &[FieldDef::uint("name_len", 8)],
};

pub(crate) static RESET_FRIENDLY_NAME_REQUEST: Schema = Schema {
    name: "resetFriendlyName",
    family: ReportFamily::Short,
    padding: 0x00,
    fields: &[],
};

pub(crate) fn register_schemas(registry: &mut SchemaRegistry) {
    let entries: [(u8, Direction, &'static Schema); 10] = [
        (0, Direction::Request, &GET_FRIENDLY_NAME_LEN_REQUEST),
        (0, Direction::Response, &GET_FRIENDLY_NAME_LEN_RESPONSE),
        (1, Direction::Request, &GET_FRIENDLY_NAME_REQUEST),
        (1, Direction::Response, &NAME_CHUNK_RESPONSE),
        (2, Direction::Request, &GET_FRIENDLY_NAME_REQUEST),
        (2, Direction::Response, &NAME_CHUNK_RESPONSE),
        (3, Direction::Request, &SET_FRIENDLY_NAME_REQUEST),
        (3, Direction::Response, &NAME_LEN_RESPONSE),
        (4, Direction::Request, &RESET_FRIENDLY_NAME_REQUEST),
        (4, Direction::Response, &NAME_LEN_RESPONSE),
    ];

    for (function_index, direction, schema) in entries {
        registry.register(
            SchemaKey {
                feature_id: 0x0007,
                version: 0,
                function_index,
                direction,
            },
            schema,
        );
    }
}
