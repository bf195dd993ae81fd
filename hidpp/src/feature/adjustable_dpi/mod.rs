//! Implements the `AdjustableDpi` feature (ID `0x2201`) controlling the
//! resolution of optical mouse sensors.

use crate::codec::{Check, Direction, FieldDef, Schema, SchemaKey, SchemaRegistry};
use crate::frame::ReportFamily;

pub mod v0;
pub mod v1;
pub mod v2;

/// The lowest DPI value a sensor accepts.
pub const MIN_DPI_VALUE: u16 = 0x0001;

/// The highest DPI value a sensor accepts. Values above this encode step
/// sizes in DPI lists.
pub const MAX_DPI_VALUE: u16 = 0xdfff;

pub(crate) static GET_SENSOR_COUNT_REQUEST: Schema = Schema {
    name: "getSensorCount",
    family: ReportFamily::Short,
    padding: 0x00,
    fields: &[],
};

pub(crate) static GET_SENSOR_COUNT_RESPONSE: Schema = Schema {
    name: "getSensorCountResponse",
    family: ReportFamily::Long,
    padding: 0x00,
    fields: &[FieldDef::uint("sensor_count", 8)],
};

pub(crate) static GET_SENSOR_DPI_LIST_REQUEST: Schema = Schema {
    name: "getSensorDpiList",
    family: ReportFamily::Short,
    padding: 0x00,
    fields: &[FieldDef::uint("sensor_index", 8)],
};

pub(crate) static GET_SENSOR_DPI_LIST_RESPONSE: Schema = Schema {
    name: "getSensorDpiListResponse",
    family: ReportFamily::Long,
    padding: 0x00,
    fields: &[
        FieldDef::uint("sensor_index", 8),
        // A zero-terminated sequence of big-endian u16 entries.
        FieldDef::bytes("dpi_list", 112),
    ],
};

pub(crate) static GET_SENSOR_DPI_REQUEST: Schema = Schema {
    name: "getSensorDpi",
    family: ReportFamily::Short,
    padding: 0x00,
    fields: &[FieldDef::uint("sensor_index", 8)],
};

pub(crate) static GET_SENSOR_DPI_RESPONSE_V0: Schema = Schema {
    name: "getSensorDpiResponse",
    family: ReportFamily::Long,
    padding: 0x00,
    fields: &[
        FieldDef::uint("sensor_index", 8),
        FieldDef::uint("dpi", 16),
    ],
};

pub(crate) static GET_SENSOR_DPI_RESPONSE_V1: Schema = Schema {
    name: "getSensorDpiResponse",
    family: ReportFamily::Long,
    padding: 0x00,
    fields: &[
        FieldDef::uint("sensor_index", 8),
        FieldDef::uint("dpi", 16),
        FieldDef::uint("default_dpi", 16),
    ],
};

pub(crate) static SET_SENSOR_DPI_REQUEST: Schema = Schema {
    name: "setSensorDpi",
    family: ReportFamily::Short,
    padding: 0x00,
    fields: &[
        FieldDef::uint("sensor_index", 8),
        FieldDef::uint("dpi", 16).checked(Check::Range {
            min: MIN_DPI_VALUE as u64,
            max: MAX_DPI_VALUE as u64,
        }),
    ],
};

pub(crate) static SET_SENSOR_DPI_RESPONSE: Schema = Schema {
    name: "setSensorDpiResponse",
    family: ReportFamily::Long,
    padding: 0x00,
    fields: &[
        FieldDef::uint("sensor_index", 8),
        FieldDef::uint("dpi", 16),
    ],
};

pub(crate) static SET_SENSOR_DPI_RESPONSE_V2: Schema = Schema {
    name: "setSensorDpiResponse",
    family: ReportFamily::Long,
    padding: 0x00,
    fields: &[
        FieldDef::uint("sensor_index", 8),
        FieldDef::uint("dpi", 16),
        FieldDef::uint("dpi_level", 8),
    ],
};

pub(crate) static GET_NUMBER_OF_DPI_LEVELS_REQUEST: Schema = Schema {
    name: "getNumberOfDpiLevels",
    family: ReportFamily::Short,
    padding: 0x00,
    fields: &[],
};

pub(crate) static GET_NUMBER_OF_DPI_LEVELS_RESPONSE: Schema = Schema {
    name: "getNumberOfDpiLevelsResponse",
    family: ReportFamily::Long,
    padding: 0x00,
    fields: &[FieldDef::uint("dpi_levels", 8)],
};

pub(crate) fn register_schemas(registry: &mut SchemaRegistry) {
    let shared: [(u8, Direction, &'static Schema); 6] = [
        (0, Direction::Request, &GET_SENSOR_COUNT_REQUEST),
        (0, Direction::Response, &GET_SENSOR_COUNT_RESPONSE),
        (1, Direction::Request, &GET_SENSOR_DPI_LIST_REQUEST),
        (1, Direction::Response, &GET_SENSOR_DPI_LIST_RESPONSE),
        (2, Direction::Request, &GET_SENSOR_DPI_REQUEST),
        (3, Direction::Request, &SET_SENSOR_DPI_REQUEST),
    ];

    for version in [0, 1, 2] {
        for (function_index, direction, schema) in shared {
            registry.register(
                SchemaKey {
                    feature_id: 0x2201,
                    version,
                    function_index,
                    direction,
                },
                schema,
            );
        }
    }

    for (version, schema) in [
        (0, &GET_SENSOR_DPI_RESPONSE_V0),
        (1, &GET_SENSOR_DPI_RESPONSE_V1),
    ] {
        registry.register(
            SchemaKey {
                feature_id: 0x2201,
                version,
                function_index: 2,
                direction: Direction::Response,
            },
            schema,
        );
    }

    for (version, schema) in [
        (0, &SET_SENSOR_DPI_RESPONSE),
        (2, &SET_SENSOR_DPI_RESPONSE_V2),
    ] {
        registry.register(
            SchemaKey {
                feature_id: 0x2201,
                version,
                function_index: 3,
                direction: Direction::Response,
            },
            schema,
        );
    }

    registry.register(
        SchemaKey {
            feature_id: 0x2201,
            version: 2,
            function_index: 4,
            direction: Direction::Request,
        },
        &GET_NUMBER_OF_DPI_LEVELS_REQUEST,
    );
    registry.register(
        SchemaKey {
            feature_id: 0x2201,
            version: 2,
            function_index: 4,
            direction: Direction::Response,
        },
        &GET_NUMBER_OF_DPI_LEVELS_RESPONSE,
    );
}

/// One entry of a sensor's DPI list.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum DpiListEntry {
    /// A discrete DPI value the sensor supports.
    Value(u16),

    /// A step size: the sensor supports every value between the surrounding
    /// discrete entries in steps of this size.
    Step(u16),
}

/// Parses the zero-terminated DPI list out of its raw byte form.
///
/// Entries above [`MAX_DPI_VALUE`] encode step sizes, everything else is a
/// discrete value. The list ends at the first zero entry.
pub fn parse_dpi_list(raw: &[u8]) -> Vec<DpiListEntry> {
    let mut entries = Vec::new();

    for pair in raw.chunks_exact(2) {
        let value = u16::from_be_bytes(pair.try_into().unwrap());
        if value == 0 {
            break;
        }

        entries.push(if value > MAX_DPI_VALUE {
            DpiListEntry::Step(value - 0xe000)
        } else {
            DpiListEntry::Value(value)
        });
    }

    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dpi_list_parsing_stops_at_zero() {
        let raw = [
            0x03, 0x20, // 800
            0xe0, 0x32, // step 50
            0x0c, 0x80, // 3200
            0x00, 0x00, // terminator
            0x01, 0x90, // ignored
        ];

        assert_eq!(parse_dpi_list(&raw), vec![
            DpiListEntry::Value(800),
            DpiListEntry::Step(50),
            DpiListEntry::Value(3200),
        ]);
    }

    #[test]
    fn empty_dpi_list() {
        assert_eq!(parse_dpi_list(&[0x00, 0x00]), vec![]);
    }
}
