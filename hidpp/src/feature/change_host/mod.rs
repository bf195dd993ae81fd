//! Implements the `ChangeHost` feature (ID `0x1814`) used to switch a
//! multi-host device to another paired host.

use crate::codec::{Direction, FieldDef, Schema, SchemaKey, SchemaRegistry};
use crate::frame::ReportFamily;

pub mod v0;
pub mod v1;

pub(crate) static GET_HOST_INFO_REQUEST: Schema = Schema {
    name: "getHostInfo",
    family: ReportFamily::Short,
    padding: 0x00,
    fields: &[],
};

pub(crate) static GET_HOST_INFO_RESPONSE_V0: Schema = Schema {
    name: "getHostInfoResponse",
    family: ReportFamily::Long,
    padding: 0x00,
    fields: &[
        FieldDef::uint("num_hosts", 8),
        FieldDef::uint("current_host", 8),
    ],
};

pub(crate) static GET_HOST_INFO_RESPONSE_V1: Schema = Schema {
    name: "getHostInfoResponse",
    family: ReportFamily::Long,
    padding: 0x00,
    fields: &[
        FieldDef::uint("num_hosts", 8),
        FieldDef::uint("current_host", 8),
        FieldDef::bitmap("flags", 8, &[
            FieldDef::uint("reserved", 7),
            FieldDef::flag("enhanced_host_switch"),
        ]),
    ],
};

pub(crate) static SET_CURRENT_HOST_REQUEST: Schema = Schema {
    name: "setCurrentHost",
    family: ReportFamily::Short,
    padding: 0x00,
    fields: &[
        // Host indices are 0-based. The device enforces its own host count
        // and reports OutOfRange for invalid indices, so the field domain
        // stays the full byte.
        FieldDef::uint("host_index", 8),
    ],
};

pub(crate) static SET_CURRENT_HOST_RESPONSE: Schema = Schema {
    name: "setCurrentHostResponse",
    family: ReportFamily::Long,
    padding: 0x00,
    fields: &[],
};

pub(crate) static GET_COOKIES_REQUEST: Schema = Schema {
    name: "getCookies",
    family: ReportFamily::Short,
    padding: 0x00,
    fields: &[],
};

pub(crate) static GET_COOKIES_RESPONSE: Schema = Schema {
    name: "getCookiesResponse",
    family: ReportFamily::Long,
    padding: 0x00,
    fields: &[FieldDef::bytes("cookies", 128)],
};

pub(crate) static SET_COOKIE_REQUEST: Schema = Schema {
    name: "setCookie",
    family: ReportFamily::Short,
    padding: 0x00,
    fields: &[
        FieldDef::uint("host_index", 8),
        FieldDef::uint("cookie", 8),
    ],
};

pub(crate) static SET_COOKIE_RESPONSE: Schema = Schema {
    name: "setCookieResponse",
    family: ReportFamily::Long,
    padding: 0x00,
    fields: &[],
};

pub(crate) fn register_schemas(registry: &mut SchemaRegistry) {
    let shared: [(u8, Direction, &'static Schema); 7] = [
        (0, Direction::Request, &GET_HOST_INFO_REQUEST),
        (1, Direction::Request, &SET_CURRENT_HOST_REQUEST),
        (1, Direction::Response, &SET_CURRENT_HOST_RESPONSE),
        (2, Direction::Request, &GET_COOKIES_REQUEST),
        (2, Direction::Response, &GET_COOKIES_RESPONSE),
        (3, Direction::Request, &SET_COOKIE_REQUEST),
        (3, Direction::Response, &SET_COOKIE_RESPONSE),
    ];

    for version in [0, 1] {
        for (function_index, direction, schema) in shared {
            registry.register(
                SchemaKey {
                    feature_id: 0x1814,
                    version,
                    function_index,
                    direction,
                },
                schema,
            );
        }
    }

    registry.register(
        SchemaKey {
            feature_id: 0x1814,
            version: 0,
            function_index: 0,
            direction: Direction::Response,
        },
        &GET_HOST_INFO_RESPONSE_V0,
    );
    registry.register(
        SchemaKey {
            feature_id: 0x1814,
            version: 1,
            function_index: 0,
            direction: Direction::Response,
        },
        &GET_HOST_INFO_RESPONSE_V1,
    );
}

/// Information about the hosts a device is paired to.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[non_exhaustive]
pub struct HostInfo {
    /// The amount of hosts the device can be paired to.
    pub num_hosts: u8,

    /// The 0-based index of the host the device currently talks to.
    pub current_host: u8,

    /// Whether the device supports the enhanced host switch with per-host
    /// cookies.
    ///
    /// This field was added in feature version 1 and is `false` for
    /// version 0 devices.
    pub enhanced_host_switch: bool,
}
