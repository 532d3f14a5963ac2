//! The recursive field-descriptor engine.
//!
//! A [`FieldSpec`] tree describes how a packet body maps to a [`Value`]
//! tree. Descriptors are immutable and shared by every connection of a
//! protocol version. Switch and optional descriptors evaluate plain function
//! pointers against a [`Scope`], a borrow stack of the enclosing in-progress
//! records, so no parsed value ever stores a parent reference.

use std::io::Read;

use conduit_utils::BlockPos;
use conduit_utils::codec;
use conduit_utils::serial::{ReadFrom, WriteTo, read_string, write_string};

use crate::ProtocolError;
use crate::value::{ArrayValue, Compound, Value};

/// The chain of records enclosing the field currently being parsed or
/// emitted. `parent()` is the innermost record; `root()` the outermost.
#[derive(Clone, Copy)]
pub struct Scope<'a> {
    compound: &'a Compound,
    outer: Option<&'a Scope<'a>>,
}

impl<'a> Scope<'a> {
    /// A scope with a single frame.
    #[must_use]
    pub fn new(compound: &'a Compound) -> Self {
        Self {
            compound,
            outer: None,
        }
    }

    /// The record directly enclosing the current field.
    #[must_use]
    pub fn parent(&self) -> &'a Compound {
        self.compound
    }

    /// The outermost enclosing record (the packet body).
    #[must_use]
    pub fn root(&self) -> &'a Compound {
        let mut scope = self;
        while let Some(outer) = scope.outer {
            scope = outer;
        }
        scope.compound
    }
}

/// Selects the switch arm from the fields parsed so far.
pub type Selector = fn(&Scope<'_>) -> Option<i64>;
/// Decides whether an optional field is present.
pub type Predicate = fn(&Scope<'_>) -> bool;

/// A field descriptor.
#[derive(Debug)]
pub enum FieldSpec {
    /// Signed 8-bit integer.
    Byte,
    /// Unsigned 8-bit integer.
    UByte,
    /// Signed 16-bit integer, big-endian.
    Short,
    /// Unsigned 16-bit integer, big-endian.
    UShort,
    /// Signed 32-bit integer, big-endian.
    Int,
    /// Unsigned 32-bit integer, big-endian.
    UInt,
    /// Signed 64-bit integer, big-endian.
    Long,
    /// Unsigned 64-bit integer, big-endian.
    ULong,
    /// 32-bit float, big-endian.
    Float,
    /// 64-bit float, big-endian.
    Double,
    /// One byte; nonzero parses as true.
    Bool,
    /// Variable-length integer.
    VarInt,
    /// Varint-length-prefixed UTF-8 string.
    String,
    /// A JSON document inside a string field.
    Json,
    /// 16 raw bytes.
    Uuid,
    /// Packed position.
    Position,
    /// Raw bytes. With a length descriptor, exactly that many bytes;
    /// without one, the rest of the body.
    Raw(Option<Box<FieldSpec>>),
    /// A length-prefixed sequence.
    Array {
        /// Descriptor of the length prefix.
        len: Box<FieldSpec>,
        /// Descriptor of each item.
        item: Box<FieldSpec>,
    },
    /// An ordered record of named fields.
    Fields(Vec<(&'static str, FieldSpec)>),
    /// A discriminated choice between arm descriptors.
    Switch {
        /// Label used in diagnostics.
        label: &'static str,
        /// Produces the arm key from the enclosing records.
        selector: Selector,
        /// Arm table.
        arms: Vec<(i64, FieldSpec)>,
    },
    /// A conditionally present field.
    Optional {
        /// Decides presence from the enclosing records.
        predicate: Predicate,
        /// Descriptor of the field when present.
        inner: Box<FieldSpec>,
    },
}

impl FieldSpec {
    /// Parses one value off the reader.
    #[allow(clippy::too_many_lines)]
    pub fn parse(
        &self,
        r: &mut impl Read,
        scope: Option<&Scope<'_>>,
    ) -> Result<Value, ProtocolError> {
        Ok(match self {
            Self::Byte => Value::Byte(i8::read(r)?),
            Self::UByte => Value::UByte(u8::read(r)?),
            Self::Short => Value::Short(i16::read(r)?),
            Self::UShort => Value::UShort(u16::read(r)?),
            Self::Int => Value::Int(i32::read(r)?),
            Self::UInt => Value::UInt(u32::read(r)?),
            Self::Long => Value::Long(i64::read(r)?),
            Self::ULong => Value::ULong(u64::read(r)?),
            Self::Float => Value::Float(f32::read(r)?),
            Self::Double => Value::Double(f64::read(r)?),
            Self::Bool => Value::Bool(bool::read(r)?),
            Self::VarInt => Value::VarInt(codec::VarInt::read(r)?.0),
            Self::String => Value::String(read_string(r)?),
            Self::Json => {
                let raw = read_string(r)?;
                Value::Json(serde_json::from_str(&raw)?)
            }
            Self::Uuid => Value::Uuid(uuid::Uuid::read(r)?),
            Self::Position => Value::Position(BlockPos::read(r)?),
            Self::Raw(len) => match len {
                Some(len) => {
                    let n = parse_length(len, r, scope)?;
                    let mut buf = vec![0u8; n];
                    r.read_exact(&mut buf)?;
                    Value::Raw(buf)
                }
                None => {
                    let mut buf = Vec::new();
                    r.read_to_end(&mut buf)?;
                    Value::Raw(buf)
                }
            },
            Self::Array { len, item } => {
                let n = parse_length(len, r, scope)?;
                let mut arr = ArrayValue::with_capacity(n.min(64));
                for _ in 0..n {
                    arr.push_parsed(item.parse(r, scope)?);
                }
                Value::Array(arr)
            }
            Self::Fields(specs) => {
                let mut compound = Compound::with_capacity(specs.len());
                for &(name, ref spec) in specs {
                    let value = {
                        let inner = Scope {
                            compound: &compound,
                            outer: scope,
                        };
                        spec.parse(r, Some(&inner))?
                    };
                    compound.push_parsed(name, value);
                }
                Value::Compound(compound)
            }
            Self::Switch {
                label,
                selector,
                arms,
            } => {
                let scope = enclosing(scope, label)?;
                let key = selector(scope).ok_or_else(|| {
                    ProtocolError::Malformed(format!("switch `{label}` selector found no key"))
                })?;
                let arm = lookup_arm(arms, key, *label)?;
                arm.parse(r, Some(scope))?
            }
            Self::Optional { predicate, inner } => {
                let scope = enclosing(scope, "optional")?;
                if predicate(scope) {
                    inner.parse(r, Some(scope))?
                } else {
                    Value::Absent
                }
            }
        })
    }

    /// Emits one value to `out`.
    #[allow(clippy::too_many_lines)]
    pub fn emit(
        &self,
        value: &Value,
        scope: Option<&Scope<'_>>,
        out: &mut Vec<u8>,
    ) -> Result<(), ProtocolError> {
        match (self, value) {
            (Self::Byte, Value::Byte(v)) => v.write(out)?,
            (Self::UByte, Value::UByte(v)) => v.write(out)?,
            (Self::Short, Value::Short(v)) => v.write(out)?,
            (Self::UShort, Value::UShort(v)) => v.write(out)?,
            (Self::Int, Value::Int(v)) => v.write(out)?,
            (Self::UInt, Value::UInt(v)) => v.write(out)?,
            (Self::Long, Value::Long(v)) => v.write(out)?,
            (Self::ULong, Value::ULong(v)) => v.write(out)?,
            (Self::Float, Value::Float(v)) => v.write(out)?,
            (Self::Double, Value::Double(v)) => v.write(out)?,
            (Self::Bool, Value::Bool(v)) => v.write(out)?,
            (Self::VarInt, Value::VarInt(v)) => codec::VarInt(*v).write(out)?,
            (Self::String, Value::String(v)) => write_string(v, out)?,
            (Self::Json, Value::Json(v)) => {
                let raw = serde_json::to_string(v)?;
                write_string(&raw, out)?;
            }
            (Self::Uuid, Value::Uuid(v)) => v.write(out)?,
            (Self::Position, Value::Position(v)) => v.write(out)?,
            (Self::Raw(len), Value::Raw(bytes)) => {
                if let Some(len) = len {
                    len.emit(&length_value(len, bytes.len())?, scope, out)?;
                }
                out.extend_from_slice(bytes);
            }
            (Self::Array { len, item }, Value::Array(arr)) => {
                len.emit(&length_value(len, arr.len())?, scope, out)?;
                for item_value in arr.iter() {
                    item.emit(item_value, scope, out)?;
                }
            }
            (Self::Fields(specs), Value::Compound(compound)) => {
                for &(name, ref spec) in specs {
                    let value = compound.get(name).ok_or_else(|| {
                        ProtocolError::Malformed(format!("missing field `{name}`"))
                    })?;
                    let inner = Scope {
                        compound,
                        outer: scope,
                    };
                    spec.emit(value, Some(&inner), out)?;
                }
            }
            (
                Self::Switch {
                    label,
                    selector,
                    arms,
                },
                value,
            ) => {
                let scope = enclosing(scope, label)?;
                let key = selector(scope).ok_or_else(|| {
                    ProtocolError::Malformed(format!("switch `{label}` selector found no key"))
                })?;
                let arm = lookup_arm(arms, key, *label)?;
                arm.emit(value, Some(scope), out)?;
            }
            (Self::Optional { predicate, inner }, value) => {
                let scope = enclosing(scope, "optional")?;
                if predicate(scope) {
                    if matches!(value, Value::Absent) {
                        return Err(ProtocolError::Malformed(
                            "optional predicate is true but the value is absent".into(),
                        ));
                    }
                    inner.emit(value, Some(scope), out)?;
                }
            }
            (spec, value) => {
                return Err(ProtocolError::Malformed(format!(
                    "value {value} does not match descriptor {spec:?}"
                )));
            }
        }
        Ok(())
    }
}

fn enclosing<'a, 'b>(
    scope: Option<&'a Scope<'b>>,
    label: &str,
) -> Result<&'a Scope<'b>, ProtocolError> {
    scope.ok_or_else(|| ProtocolError::Malformed(format!("`{label}` used outside a record")))
}

fn lookup_arm<'a>(
    arms: &'a [(i64, FieldSpec)],
    key: i64,
    label: &'static str,
) -> Result<&'a FieldSpec, ProtocolError> {
    arms.iter()
        .find(|(k, _)| *k == key)
        .map(|(_, spec)| spec)
        .ok_or(ProtocolError::UnknownVariant { field: label, key })
}

fn parse_length(
    spec: &FieldSpec,
    r: &mut impl Read,
    scope: Option<&Scope<'_>>,
) -> Result<usize, ProtocolError> {
    let value = spec.parse(r, scope)?;
    let n = value
        .as_int()
        .ok_or_else(|| ProtocolError::Malformed(format!("non-integer length field: {value}")))?;
    usize::try_from(n).map_err(|_| ProtocolError::Malformed(format!("negative length {n}")))
}

fn length_value(spec: &FieldSpec, len: usize) -> Result<Value, ProtocolError> {
    Ok(match spec {
        FieldSpec::VarInt => Value::VarInt(len as i32),
        FieldSpec::Byte => Value::Byte(len as i8),
        FieldSpec::UByte => Value::UByte(len as u8),
        FieldSpec::Short => Value::Short(len as i16),
        FieldSpec::UShort => Value::UShort(len as u16),
        FieldSpec::Int => Value::Int(len as i32),
        FieldSpec::UInt => Value::UInt(len as u32),
        FieldSpec::Long => Value::Long(len as i64),
        FieldSpec::ULong => Value::ULong(len as u64),
        other => {
            return Err(ProtocolError::Malformed(format!(
                "descriptor {other:?} cannot carry a length"
            )));
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn fields(entries: Vec<(&'static str, FieldSpec)>) -> FieldSpec {
        FieldSpec::Fields(entries)
    }

    fn roundtrip(spec: &FieldSpec, bytes: &[u8]) -> Value {
        let mut cursor = Cursor::new(bytes);
        let value = spec.parse(&mut cursor, None).expect("parse");
        assert_eq!(cursor.position() as usize, bytes.len(), "trailing bytes");

        let mut out = Vec::new();
        spec.emit(&value, None, &mut out).expect("emit");
        assert_eq!(out, bytes, "emit differs from parsed bytes");
        value
    }

    #[test]
    fn test_primitive_record_roundtrip() {
        let spec = fields(vec![
            ("flags", FieldSpec::Byte),
            ("count", FieldSpec::UShort),
            ("id", FieldSpec::Int),
            ("time", FieldSpec::Long),
            ("health", FieldSpec::Float),
            ("x", FieldSpec::Double),
            ("on_ground", FieldSpec::Bool),
            ("entity", FieldSpec::VarInt),
            ("name", FieldSpec::String),
        ]);

        let mut bytes = Vec::new();
        bytes.push(0xFFu8); // flags = -1
        bytes.extend_from_slice(&1000u16.to_be_bytes());
        bytes.extend_from_slice(&(-5i32).to_be_bytes());
        bytes.extend_from_slice(&123_456_789i64.to_be_bytes());
        bytes.extend_from_slice(&20.0f32.to_be_bytes());
        bytes.extend_from_slice(&64.5f64.to_be_bytes());
        bytes.push(1);
        bytes.extend_from_slice(&[0xAC, 0x02]); // varint 300
        bytes.push(5);
        bytes.extend_from_slice(b"steve");

        let value = roundtrip(&spec, &bytes);
        let compound = value.as_compound().expect("compound");
        assert_eq!(compound.int("flags"), Some(-1));
        assert_eq!(compound.int("count"), Some(1000));
        assert_eq!(compound.int("entity"), Some(300));
        assert_eq!(compound.string("name"), Some("steve"));
        assert_eq!(compound.boolean("on_ground"), Some(true));
    }

    #[test]
    fn test_raw_with_and_without_length() {
        let spec = fields(vec![
            ("token", FieldSpec::Raw(Some(Box::new(FieldSpec::VarInt)))),
            ("rest", FieldSpec::Raw(None)),
        ]);

        let bytes = [3, 0xAA, 0xBB, 0xCC, 0x01, 0x02];
        let value = roundtrip(&spec, &bytes);
        let compound = value.as_compound().expect("compound");
        assert_eq!(
            compound.get("token"),
            Some(&Value::Raw(vec![0xAA, 0xBB, 0xCC]))
        );
        assert_eq!(compound.get("rest"), Some(&Value::Raw(vec![0x01, 0x02])));
    }

    #[test]
    fn test_switch_and_optional() {
        // An action-tagged record: action 0 carries a name plus an optional
        // display name, action 4 carries nothing.
        let spec = fields(vec![
            ("action", FieldSpec::VarInt),
            (
                "body",
                FieldSpec::Switch {
                    label: "action",
                    selector: |s| s.parent().int("action"),
                    arms: vec![
                        (
                            0,
                            fields(vec![
                                ("name", FieldSpec::String),
                                ("has_display", FieldSpec::Bool),
                                (
                                    "display",
                                    FieldSpec::Optional {
                                        predicate: |s| {
                                            s.parent().boolean("has_display").unwrap_or(false)
                                        },
                                        inner: Box::new(FieldSpec::String),
                                    },
                                ),
                            ]),
                        ),
                        (4, fields(vec![])),
                    ],
                },
            ),
        ]);

        // action = 0, predicate true
        let mut bytes = vec![0, 3];
        bytes.extend_from_slice(b"abc");
        bytes.push(1);
        bytes.push(2);
        bytes.extend_from_slice(b"ab");
        let value = roundtrip(&spec, &bytes);
        let body = value
            .as_compound()
            .and_then(|c| c.get("body"))
            .and_then(Value::as_compound)
            .expect("body");
        assert_eq!(body.string("display"), Some("ab"));

        // action = 0, predicate false: the optional consumes nothing
        let mut bytes = vec![0, 3];
        bytes.extend_from_slice(b"abc");
        bytes.push(0);
        let value = roundtrip(&spec, &bytes);
        let body = value
            .as_compound()
            .and_then(|c| c.get("body"))
            .and_then(Value::as_compound)
            .expect("body");
        assert_eq!(body.get("display"), Some(&Value::Absent));

        // action = 4: the empty arm
        let bytes = vec![4];
        roundtrip(&spec, &bytes);

        // action = 9: no arm
        let bytes = vec![9];
        let mut cursor = Cursor::new(bytes.as_slice());
        assert!(matches!(
            spec.parse(&mut cursor, None),
            Err(ProtocolError::UnknownVariant {
                field: "action",
                key: 9
            })
        ));
    }

    #[test]
    fn test_switch_selector_reads_root_across_array() {
        // Array items switch on a field of the packet root, two records up.
        let spec = fields(vec![
            ("mode", FieldSpec::VarInt),
            (
                "items",
                FieldSpec::Array {
                    len: Box::new(FieldSpec::VarInt),
                    item: Box::new(fields(vec![(
                        "data",
                        FieldSpec::Switch {
                            label: "mode",
                            selector: |s| s.root().int("mode"),
                            arms: vec![(1, FieldSpec::Byte), (2, FieldSpec::Short)],
                        },
                    )])),
                },
            ),
        ]);

        let bytes = vec![2, 2, 0x01, 0x02, 0x03, 0x04];
        let value = roundtrip(&spec, &bytes);
        let items = value
            .as_compound()
            .and_then(|c| c.get("items"))
            .and_then(Value::as_array)
            .expect("items");
        assert_eq!(items.len(), 2);
        assert_eq!(
            items.get(0).and_then(Value::as_compound).unwrap().get("data"),
            Some(&Value::Short(0x0102))
        );
    }

    #[test]
    fn test_json_roundtrip() {
        let spec = fields(vec![("reason", FieldSpec::Json)]);
        let mut bytes = Vec::new();
        let raw = r#"{"text":"bye"}"#;
        bytes.push(raw.len() as u8);
        bytes.extend_from_slice(raw.as_bytes());

        let value = roundtrip(&spec, &bytes);
        let compound = value.as_compound().expect("compound");
        assert_eq!(
            compound.get("reason"),
            Some(&Value::Json(serde_json::json!({"text": "bye"})))
        );
    }

    #[test]
    fn test_underflow_reports_buffer_underflow() {
        let spec = fields(vec![("id", FieldSpec::Long)]);
        let mut cursor = Cursor::new(&[0u8, 1, 2][..]);
        assert!(matches!(
            spec.parse(&mut cursor, None),
            Err(ProtocolError::BufferUnderflow)
        ));
    }
}
