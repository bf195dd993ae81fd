//! Deterministic, bit-exact encoding and decoding between structured
//! messages and frame payload bytes.
//!
//! Payloads are described by [`message::Schema`]s: ordered lists of
//! [`field::FieldDef`]s with bit-granular widths, validation checks and
//! conversion rules. A [`message::Message`] is the structured view over one
//! payload. Schemas are registered per (feature, version, function,
//! direction) in [`registry::SchemaRegistry`].

use thiserror::Error;

pub mod bits;
pub mod field;
pub mod message;
pub mod registry;

pub use field::{Check, FieldDef, FieldKind, FieldValue};
pub use message::{Message, Schema};
pub use registry::{Direction, SchemaKey, SchemaRegistry};

/// Represents an error raised while encoding or decoding a payload.
///
/// Decode-side errors indicate a malformed frame; encode-side errors
/// indicate an ill-formed message and are usually caught while building the
/// request.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Indicates that a field name does not exist in the schema.
    #[error("the schema defines no field named `{0}`")]
    UnknownField(String),

    /// Indicates that a value's type does not match its field kind.
    #[error("the value type does not match the kind of field `{0}`")]
    WrongKind(&'static str),

    /// Indicates that a value lies outside the declared domain of its field.
    #[error("the value of field `{0}` is outside its declared domain")]
    Domain(&'static str),

    /// Indicates that a validation check attached to a field failed.
    #[error("a validation check failed for field `{0}`")]
    CheckFailed(&'static str),

    /// Indicates that the payload ended before the field could be read.
    #[error("the payload is too short to contain field `{0}`")]
    Truncated(&'static str),

    /// Indicates that the encoded fields do not fit the frame family.
    #[error("the encoded payload exceeds the frame family length")]
    Overflow,
}
