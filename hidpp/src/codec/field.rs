//! Field definitions making up payload schemas.
//!
//! A schema is an ordered list of [`FieldDef`]s. The declaration order is the
//! layout order on the wire, mirroring the descending field-identifier
//! convention of the HID++ feature specifications.

/// Describes a single field of a payload schema.
#[derive(Clone, Copy, Debug)]
pub struct FieldDef {
    /// The field name, unique within its schema.
    pub name: &'static str,

    /// The width of the field in bits (1..=1024).
    ///
    /// There is no byte alignment requirement; a field may start and end in
    /// the middle of a byte.
    pub bits: u16,

    /// How the raw bits are interpreted.
    pub kind: FieldKind,

    /// The value used when the field was not explicitly set.
    ///
    /// Interpreted according to [`Self::kind`]: the unsigned value for
    /// [`FieldKind::UInt`], the two's complement bit pattern for
    /// [`FieldKind::SInt`]. Byte-string and bitmap fields default to all
    /// zeroes and ignore this.
    pub default: u64,

    /// An optional validation predicate applied when setting and decoding
    /// the field.
    pub check: Option<Check>,
}

impl FieldDef {
    /// An unchecked big-endian unsigned integer field.
    pub const fn uint(name: &'static str, bits: u16) -> Self {
        Self {
            name,
            bits,
            kind: FieldKind::UInt,
            default: 0,
            check: None,
        }
    }

    /// A two's complement signed integer field.
    pub const fn sint(name: &'static str, bits: u16) -> Self {
        Self {
            name,
            bits,
            kind: FieldKind::SInt,
            default: 0,
            check: None,
        }
    }

    /// A raw byte-string field. `bits` must be a multiple of 8.
    pub const fn bytes(name: &'static str, bits: u16) -> Self {
        Self {
            name,
            bits,
            kind: FieldKind::Bytes,
            default: 0,
            check: None,
        }
    }

    /// A composite bitmap field recursing into its own sub-schema.
    pub const fn bitmap(name: &'static str, bits: u16, fields: &'static [FieldDef]) -> Self {
        Self {
            name,
            bits,
            kind: FieldKind::Bitmap(fields),
            default: 0,
            check: None,
        }
    }

    /// A single-bit flag, the degenerate unsigned field.
    pub const fn flag(name: &'static str) -> Self {
        Self::uint(name, 1)
    }

    /// A trailing record-list field whose byte length is the value of the
    /// `count` field multiplied by `record_bytes`.
    pub const fn records(name: &'static str, count: &'static str, record_bytes: u16) -> Self {
        Self {
            name,
            // The bit length of a record list is computed while decoding.
            bits: 0,
            kind: FieldKind::Records {
                count,
                record_bytes,
            },
            default: 0,
            check: None,
        }
    }

    /// Attaches a validation predicate to the field.
    pub const fn checked(mut self, check: Check) -> Self {
        self.check = Some(check);
        self
    }

    /// Overrides the default value of the field.
    pub const fn with_default(mut self, default: u64) -> Self {
        self.default = default;
        self
    }
}

/// The interpretation of a field's raw bits.
#[derive(Clone, Copy, Debug)]
pub enum FieldKind {
    /// A big-endian unsigned integer of up to 64 bits.
    UInt,

    /// A two's complement signed integer of up to 64 bits.
    SInt,

    /// A raw byte string.
    Bytes,

    /// A composite bitfield that is itself a field container and recurses
    /// through the codec with its own sub-schema. The sub-field bit widths
    /// must sum up to the declared width of this field.
    Bitmap(&'static [FieldDef]),

    /// A variable-length trailing byte string whose length is determined by
    /// an earlier field's value: `count` records of `record_bytes` bytes
    /// each. The decoder computes the length after parsing the prefix.
    Records {
        count: &'static str,
        record_bytes: u16,
    },
}

/// A validation predicate attached to a field.
#[derive(Clone, Copy, Debug)]
pub enum Check {
    /// The unsigned value must lie in `min..=max`.
    Range { min: u64, max: u64 },

    /// The signed value must lie in `min..=max`.
    SignedRange { min: i64, max: i64 },

    /// The byte string must have exactly this many bytes.
    ByteCount(usize),

    /// The unsigned value must be one of the listed discrete values.
    OneOf(&'static [u64]),
}

/// A concrete value held by a message field.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum FieldValue {
    UInt(u64),
    SInt(i64),
    Bytes(Vec<u8>),

    /// One value per sub-field of the bitmap, in declared order.
    Bitmap(Vec<FieldValue>),
}

impl FieldValue {
    /// Extracts the unsigned value, if this is one.
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            Self::UInt(value) => Some(*value),
            _ => None,
        }
    }

    /// Extracts the signed value, if this is one.
    pub fn as_sint(&self) -> Option<i64> {
        match self {
            Self::SInt(value) => Some(*value),
            _ => None,
        }
    }

    /// Extracts the byte string, if this is one.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(data) => Some(data),
            _ => None,
        }
    }

    /// Extracts the bitmap sub-values, if this is a bitmap.
    pub fn as_bitmap(&self) -> Option<&[FieldValue]> {
        match self {
            Self::Bitmap(values) => Some(values),
            _ => None,
        }
    }
}
