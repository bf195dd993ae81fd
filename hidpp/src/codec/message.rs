//! The generic message value and its bit-exact encoding.
//!
//! Instead of one struct per feature × version × function, a message is a
//! generic value holding a reference to a [`Schema`] plus one [`FieldValue`]
//! per field. The schema registry in [`crate::codec::registry`] maps protocol
//! coordinates to schemas.

use super::{
    CodecError,
    bits::{BitReader, BitWriter},
    field::{Check, FieldDef, FieldKind, FieldValue},
};
use crate::frame::ReportFamily;

/// Describes the payload of one concrete message.
#[derive(Clone, Copy, Debug)]
pub struct Schema {
    /// A diagnostic name for the message, e.g. `setSensorDpi`.
    pub name: &'static str,

    /// The frame family the message is transported in.
    pub family: ReportFamily,

    /// The byte pattern used to pad the encoded bit string on the right up
    /// to the family's payload length.
    pub padding: u8,

    /// The fields of the payload, in wire layout order.
    pub fields: &'static [FieldDef],
}

impl Schema {
    /// The amount of payload bits described by the schema, excluding
    /// variable-length record fields.
    pub fn fixed_bit_len(&self) -> usize {
        self.fields
            .iter()
            .map(|field| field.bits as usize)
            .sum()
    }
}

/// A structured view over a frame payload: an ordered tuple of typed field
/// values described by a [`Schema`].
#[derive(Clone, PartialEq, Debug)]
pub struct Message {
    schema: &'static Schema,
    values: Vec<FieldValue>,
}

impl Message {
    /// Creates a message with every field set to its default value.
    pub fn new(schema: &'static Schema) -> Self {
        Self {
            schema,
            values: schema.fields.iter().map(default_value).collect(),
        }
    }

    /// The schema describing this message.
    pub fn schema(&self) -> &'static Schema {
        self.schema
    }

    /// Sets a field to a new value, validating it against the field's
    /// declared domain and checks.
    pub fn set(&mut self, name: &str, value: FieldValue) -> Result<(), CodecError> {
        let index = self
            .field_index(name)
            .ok_or(CodecError::UnknownField(name.to_string()))?;

        validate(&self.schema.fields[index], &value)?;
        self.values[index] = value;
        Ok(())
    }

    /// Convenience wrapper around [`Self::set`] for unsigned fields.
    pub fn set_uint(&mut self, name: &str, value: u64) -> Result<(), CodecError> {
        self.set(name, FieldValue::UInt(value))
    }

    /// Convenience wrapper around [`Self::set`] for signed fields.
    pub fn set_sint(&mut self, name: &str, value: i64) -> Result<(), CodecError> {
        self.set(name, FieldValue::SInt(value))
    }

    /// Convenience wrapper around [`Self::set`] for byte-string fields.
    pub fn set_bytes(&mut self, name: &str, value: impl Into<Vec<u8>>) -> Result<(), CodecError> {
        self.set(name, FieldValue::Bytes(value.into()))
    }

    /// Retrieves the current value of a field.
    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.field_index(name).map(|index| &self.values[index])
    }

    /// Retrieves an unsigned field value.
    pub fn uint(&self, name: &str) -> Option<u64> {
        self.get(name).and_then(FieldValue::as_uint)
    }

    /// Retrieves a signed field value.
    pub fn sint(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(FieldValue::as_sint)
    }

    /// Retrieves a byte-string field value.
    pub fn bytes(&self, name: &str) -> Option<&[u8]> {
        self.get(name).and_then(FieldValue::as_bytes)
    }

    /// Retrieves a single sub-value of a bitmap field.
    pub fn bitmap_uint(&self, name: &str, sub_name: &str) -> Option<u64> {
        let index = self.field_index(name)?;
        let FieldKind::Bitmap(sub_fields) = self.schema.fields[index].kind else {
            return None;
        };

        let sub_index = sub_fields.iter().position(|field| field.name == sub_name)?;
        self.values[index]
            .as_bitmap()?
            .get(sub_index)?
            .as_uint()
    }

    /// Serializes the message into the payload bytes of its frame family.
    ///
    /// Fields are laid out in schema order, the resulting bit string is
    /// padded on the right with the schema's padding byte up to the family's
    /// payload length.
    pub fn encode_payload(&self) -> Result<Vec<u8>, CodecError> {
        let mut writer = BitWriter::new();
        encode_fields(self.schema.fields, &self.values, &mut writer)?;

        let capacity = self.schema.family.payload_length() * 8;
        if writer.bit_len() > capacity {
            return Err(CodecError::Overflow);
        }

        writer.pad_to(capacity, self.schema.padding);
        Ok(writer.finish())
    }

    /// Parses a frame payload into a message, consuming bits field-by-field
    /// in schema order and running every field's validation.
    pub fn decode_payload(schema: &'static Schema, payload: &[u8]) -> Result<Self, CodecError> {
        let mut reader = BitReader::new(payload);
        let values = decode_fields(schema.fields, &mut reader)?;

        Ok(Self {
            schema,
            values,
        })
    }

    /// The amount of payload bits actually covered by field values, i.e. the
    /// encoded length without trailing padding.
    pub fn bit_len(&self) -> usize {
        self.schema
            .fields
            .iter()
            .zip(&self.values)
            .map(|(field, value)| match field.kind {
                FieldKind::Records { .. } => match value {
                    FieldValue::Bytes(data) => data.len() * 8,
                    _ => 0,
                },
                _ => field.bits as usize,
            })
            .sum()
    }

    fn field_index(&self, name: &str) -> Option<usize> {
        self.schema
            .fields
            .iter()
            .position(|field| field.name == name)
    }
}

fn default_value(field: &FieldDef) -> FieldValue {
    match field.kind {
        FieldKind::UInt => FieldValue::UInt(field.default),
        FieldKind::SInt => FieldValue::SInt(sign_extend(field.default, field.bits as usize)),
        FieldKind::Bytes => FieldValue::Bytes(vec![0; field.bits as usize / 8]),
        FieldKind::Bitmap(sub_fields) => {
            FieldValue::Bitmap(sub_fields.iter().map(default_value).collect())
        },
        FieldKind::Records { .. } => FieldValue::Bytes(Vec::new()),
    }
}

fn sign_extend(raw: u64, bits: usize) -> i64 {
    if bits >= 64 {
        return raw as i64;
    }

    if raw & (1 << (bits - 1)) != 0 {
        (raw as i64) - (1i64 << bits)
    } else {
        raw as i64
    }
}

fn validate(field: &FieldDef, value: &FieldValue) -> Result<(), CodecError> {
    let in_domain = match (&field.kind, value) {
        (FieldKind::UInt, FieldValue::UInt(raw)) => {
            field.bits >= 64 || *raw < 1u64 << field.bits
        },
        (FieldKind::SInt, FieldValue::SInt(raw)) => {
            let bits = field.bits as u32;
            bits >= 64 || (-(1i64 << (bits - 1))..1i64 << (bits - 1)).contains(raw)
        },
        (FieldKind::Bytes, FieldValue::Bytes(data)) => data.len() * 8 == field.bits as usize,
        (FieldKind::Records { record_bytes, .. }, FieldValue::Bytes(data)) => {
            *record_bytes == 0 || data.len() % *record_bytes as usize == 0
        },
        (FieldKind::Bitmap(sub_fields), FieldValue::Bitmap(values)) => {
            if sub_fields.len() != values.len() {
                return Err(CodecError::WrongKind(field.name));
            }

            for (sub_field, sub_value) in sub_fields.iter().zip(values) {
                validate(sub_field, sub_value)?;
            }
            true
        },
        _ => return Err(CodecError::WrongKind(field.name)),
    };

    if !in_domain {
        return Err(CodecError::Domain(field.name));
    }

    run_check(field, value)
}

fn run_check(field: &FieldDef, value: &FieldValue) -> Result<(), CodecError> {
    let Some(check) = field.check else {
        return Ok(());
    };

    let passed = match (check, value) {
        (Check::Range { min, max }, FieldValue::UInt(raw)) => (min..=max).contains(raw),
        (Check::SignedRange { min, max }, FieldValue::SInt(raw)) => (min..=max).contains(raw),
        (Check::ByteCount(count), FieldValue::Bytes(data)) => data.len() == count,
        (Check::OneOf(allowed), FieldValue::UInt(raw)) => allowed.contains(raw),
        _ => false,
    };

    if passed {
        Ok(())
    } else {
        Err(CodecError::CheckFailed(field.name))
    }
}

fn encode_fields(
    fields: &[FieldDef],
    values: &[FieldValue],
    writer: &mut BitWriter,
) -> Result<(), CodecError> {
    for (field, value) in fields.iter().zip(values) {
        match (&field.kind, value) {
            (FieldKind::UInt, FieldValue::UInt(raw)) => {
                writer.push_bits(*raw, field.bits as usize);
            },
            (FieldKind::SInt, FieldValue::SInt(raw)) => {
                let mask = if field.bits >= 64 {
                    u64::MAX
                } else {
                    (1u64 << field.bits) - 1
                };
                writer.push_bits(*raw as u64 & mask, field.bits as usize);
            },
            (FieldKind::Bytes, FieldValue::Bytes(data)) => {
                writer.push_bytes(data);
            },
            (FieldKind::Bitmap(sub_fields), FieldValue::Bitmap(sub_values)) => {
                encode_fields(sub_fields, sub_values, writer)?;
            },
            (
                FieldKind::Records {
                    count,
                    record_bytes,
                },
                FieldValue::Bytes(data),
            ) => {
                let declared = lookup_count(fields, values, count)?;
                if data.len() != declared as usize * *record_bytes as usize {
                    return Err(CodecError::Domain(field.name));
                }
                writer.push_bytes(data);
            },
            _ => return Err(CodecError::WrongKind(field.name)),
        }
    }

    Ok(())
}

fn decode_fields(
    fields: &[FieldDef],
    reader: &mut BitReader<'_>,
) -> Result<Vec<FieldValue>, CodecError> {
    let mut values = Vec::with_capacity(fields.len());

    for field in fields {
        let value = match field.kind {
            FieldKind::UInt => FieldValue::UInt(
                reader
                    .read_bits(field.bits as usize)
                    .ok_or(CodecError::Truncated(field.name))?,
            ),
            FieldKind::SInt => {
                let raw = reader
                    .read_bits(field.bits as usize)
                    .ok_or(CodecError::Truncated(field.name))?;
                FieldValue::SInt(sign_extend(raw, field.bits as usize))
            },
            FieldKind::Bytes => FieldValue::Bytes(
                reader
                    .read_bytes(field.bits as usize / 8)
                    .ok_or(CodecError::Truncated(field.name))?,
            ),
            FieldKind::Bitmap(sub_fields) => {
                FieldValue::Bitmap(decode_fields(sub_fields, reader)?)
            },
            FieldKind::Records {
                count,
                record_bytes,
            } => {
                // The record count is carried by an earlier field, so the
                // trailer length is only known after parsing the prefix.
                let declared = lookup_count(fields, &values, count)?;
                FieldValue::Bytes(
                    reader
                        .read_bytes(declared as usize * record_bytes as usize)
                        .ok_or(CodecError::Truncated(field.name))?,
                )
            },
        };

        run_check(field, &value)?;
        values.push(value);
    }

    Ok(values)
}

fn lookup_count(
    fields: &[FieldDef],
    values: &[FieldValue],
    count_name: &'static str,
) -> Result<u64, CodecError> {
    fields
        .iter()
        .position(|field| field.name == count_name)
        .and_then(|index| values.get(index))
        .and_then(FieldValue::as_uint)
        .ok_or(CodecError::UnknownField(count_name.to_string()))
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::codec::field::Check;

    static HOST_FLAGS: &[FieldDef] = &[
        FieldDef::flag("reserved"),
        FieldDef::flag("absent"),
        FieldDef::flag("paired"),
        FieldDef::flag("connected"),
    ];

    static TEST_SCHEMA: Schema = Schema {
        name: "test",
        family: ReportFamily::Long,
        padding: 0x00,
        fields: &[
            FieldDef::uint("sensor_index", 8),
            FieldDef::uint("dpi", 16).checked(Check::Range {
                min: 0x0001,
                max: 0xdfff,
            }),
            FieldDef::sint("delta", 12),
            FieldDef::bitmap("flags", 4, HOST_FLAGS),
            FieldDef::bytes("unit_id", 32),
        ],
    };

    static RECORDS_SCHEMA: Schema = Schema {
        name: "records",
        family: ReportFamily::Long,
        padding: 0x00,
        fields: &[
            FieldDef::uint("count", 8),
            FieldDef::records("usages", "count", 2),
        ],
    };

    #[test]
    fn defaults_round_trip() {
        let mut message = Message::new(&TEST_SCHEMA);
        // The default dpi of 0 violates its range check, so assign one.
        message.set_uint("dpi", 0x0320).unwrap();

        let payload = message.encode_payload().unwrap();
        assert_eq!(payload.len(), ReportFamily::Long.payload_length());

        let decoded = Message::decode_payload(&TEST_SCHEMA, &payload).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn set_rejects_out_of_domain_values() {
        let mut message = Message::new(&TEST_SCHEMA);

        assert!(matches!(
            message.set_uint("sensor_index", 0x100),
            Err(CodecError::Domain(_))
        ));
        assert!(matches!(
            message.set_uint("dpi", 0xe000),
            Err(CodecError::CheckFailed(_))
        ));
        assert!(matches!(
            message.set_sint("delta", 2048),
            Err(CodecError::Domain(_))
        ));
        assert!(matches!(
            message.set_bytes("unit_id", vec![0u8; 3]),
            Err(CodecError::Domain(_))
        ));
        assert!(matches!(
            message.set_uint("nonexistent", 0),
            Err(CodecError::UnknownField(_))
        ));
    }

    #[test]
    fn decode_runs_validation() {
        let mut message = Message::new(&TEST_SCHEMA);
        message.set_uint("dpi", 0x0320).unwrap();
        let mut payload = message.encode_payload().unwrap();

        // Clear the dpi bytes so its range check (min 0x0001) fails.
        payload[1] = 0x00;
        payload[2] = 0x00;

        assert!(matches!(
            Message::decode_payload(&TEST_SCHEMA, &payload),
            Err(CodecError::CheckFailed("dpi"))
        ));
    }

    #[test]
    fn variable_trailer_length_follows_count() {
        let mut message = Message::new(&RECORDS_SCHEMA);
        message.set_uint("count", 3).unwrap();
        message
            .set_bytes("usages", vec![0x00, 0x29, 0x00, 0x2b, 0x00, 0x4c])
            .unwrap();

        let payload = message.encode_payload().unwrap();
        let decoded = Message::decode_payload(&RECORDS_SCHEMA, &payload).unwrap();

        assert_eq!(decoded.uint("count"), Some(3));
        assert_eq!(
            decoded.bytes("usages"),
            Some(&[0x00, 0x29, 0x00, 0x2b, 0x00, 0x4c][..])
        );
    }

    #[test]
    fn trailer_not_matching_count_is_rejected() {
        let mut message = Message::new(&RECORDS_SCHEMA);
        message.set_uint("count", 2).unwrap();
        message.set_bytes("usages", vec![0x00, 0x29]).unwrap();

        assert!(matches!(
            message.encode_payload(),
            Err(CodecError::Domain("usages"))
        ));
    }

    #[test]
    fn bitmap_sub_fields_are_addressable() {
        let mut message = Message::new(&TEST_SCHEMA);
        message.set_uint("dpi", 0x0320).unwrap();
        message
            .set(
                "flags",
                FieldValue::Bitmap(vec![
                    FieldValue::UInt(0),
                    FieldValue::UInt(0),
                    FieldValue::UInt(1),
                    FieldValue::UInt(1),
                ]),
            )
            .unwrap();

        let payload = message.encode_payload().unwrap();
        let decoded = Message::decode_payload(&TEST_SCHEMA, &payload).unwrap();

        assert_eq!(decoded.bitmap_uint("flags", "paired"), Some(1));
        assert_eq!(decoded.bitmap_uint("flags", "absent"), Some(0));
    }

    proptest! {
        /// For every message with fields inside their declared domains,
        /// decoding its encoding yields the message back.
        #[test]
        fn prop_round_trip(
            sensor_index in 0u64..=0xff,
            dpi in 0x0001u64..=0xdfff,
            delta in -2048i64..=2047,
            flags in prop::collection::vec(0u64..=1, 4),
            unit_id in prop::collection::vec(any::<u8>(), 4),
        ) {
            let mut message = Message::new(&TEST_SCHEMA);
            message.set_uint("sensor_index", sensor_index).unwrap();
            message.set_uint("dpi", dpi).unwrap();
            message.set_sint("delta", delta).unwrap();
            message.set(
                "flags",
                FieldValue::Bitmap(flags.into_iter().map(FieldValue::UInt).collect()),
            ).unwrap();
            message.set_bytes("unit_id", unit_id).unwrap();

            let payload = message.encode_payload().unwrap();
            prop_assert_eq!(payload.len(), ReportFamily::Long.payload_length());

            let decoded = Message::decode_payload(&TEST_SCHEMA, &payload).unwrap();
            prop_assert_eq!(decoded, message);
        }

        /// Re-encoding a decoded payload reproduces the original bytes up to
        /// the unpadded length.
        #[test]
        fn prop_encode_of_decode_is_identity(payload in prop::collection::vec(any::<u8>(), 16)) {
            let Ok(decoded) = Message::decode_payload(&TEST_SCHEMA, &payload) else {
                // Payloads violating a check are allowed to be rejected.
                return Ok(());
            };

            let reencoded = decoded.encode_payload().unwrap();
            let significant = decoded.bit_len() / 8;
            prop_assert_eq!(&reencoded[..significant], &payload[..significant]);
        }
    }
}
