//! A registry of payload schemas keyed by their protocol coordinates.
//!
//! The feature specifications define one payload layout per (feature,
//! version, function, direction) combination. Feature implementations
//! register their layouts here so that the dispatcher can decode incoming
//! frames, most importantly events, without a pending request to match
//! against.

use std::collections::HashMap;

use lazy_static::lazy_static;

use super::message::Schema;

/// The direction of a message relative to the host software.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Direction {
    /// Host to device.
    Request,

    /// Device to host, solicited.
    Response,

    /// Device to host, unsolicited.
    Event,
}

/// The protocol coordinates of a payload schema.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SchemaKey {
    /// The 16-bit feature ID, e.g. `0x1814`.
    pub feature_id: u16,

    /// The feature version the schema belongs to.
    pub version: u8,

    /// The function index (for requests and responses) or event index (for
    /// events) within the feature.
    pub function_index: u8,

    /// The message direction.
    pub direction: Direction,
}

/// Maps protocol coordinates to payload schemas.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    map: HashMap<SchemaKey, &'static Schema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a schema under its coordinates, replacing a previous entry
    /// for the same key.
    pub fn register(&mut self, key: SchemaKey, schema: &'static Schema) {
        self.map.insert(key, schema);
    }

    /// Looks up the schema for exactly the given coordinates.
    pub fn lookup(&self, key: SchemaKey) -> Option<&'static Schema> {
        self.map.get(&key).copied()
    }

    /// Looks up a schema for the given coordinates, falling back to the
    /// highest registered version at or below `version`.
    ///
    /// Feature versions are backwards compatible, so a layout registered for
    /// an older version still decodes messages of a newer device.
    pub fn lookup_compatible(
        &self,
        feature_id: u16,
        version: u8,
        function_index: u8,
        direction: Direction,
    ) -> Option<&'static Schema> {
        self.map
            .iter()
            .filter(|(key, _)| {
                key.feature_id == feature_id
                    && key.function_index == function_index
                    && key.direction == direction
                    && key.version <= version
            })
            .max_by_key(|(key, _)| key.version)
            .map(|(_, schema)| *schema)
    }
}

lazy_static! {
    /// The schemas of all features implemented by this crate.
    pub static ref BUILTIN_SCHEMAS: SchemaRegistry = {
        let mut registry = SchemaRegistry::new();
        crate::feature::register_builtin_schemas(&mut registry);
        registry
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{codec::field::FieldDef, frame::ReportFamily};

    static V0: Schema = Schema {
        name: "v0",
        family: ReportFamily::Long,
        padding: 0x00,
        fields: &[FieldDef::uint("value", 8)],
    };

    static V2: Schema = Schema {
        name: "v2",
        family: ReportFamily::Long,
        padding: 0x00,
        fields: &[FieldDef::uint("value", 16)],
    };

    fn key(version: u8) -> SchemaKey {
        SchemaKey {
            feature_id: 0x2201,
            version,
            function_index: 2,
            direction: Direction::Response,
        }
    }

    #[test]
    fn compatible_lookup_picks_highest_known_version() {
        let mut registry = SchemaRegistry::new();
        registry.register(key(0), &V0);
        registry.register(key(2), &V2);

        assert_eq!(
            registry
                .lookup_compatible(0x2201, 0, 2, Direction::Response)
                .map(|schema| schema.name),
            Some("v0")
        );
        assert_eq!(
            registry
                .lookup_compatible(0x2201, 1, 2, Direction::Response)
                .map(|schema| schema.name),
            Some("v0")
        );
        // A device reporting a version newer than any known one falls back
        // to the highest registered layout.
        assert_eq!(
            registry
                .lookup_compatible(0x2201, 5, 2, Direction::Response)
                .map(|schema| schema.name),
            Some("v2")
        );
    }

    #[test]
    fn unknown_coordinates_yield_none() {
        let registry = SchemaRegistry::new();
        assert!(
            registry
                .lookup_compatible(0x9999, 0, 0, Direction::Event)
                .is_none()
        );
    }
}
