//! Packet descriptors and packet instances.

use std::fmt;
use std::io::Read;

use conduit_utils::codec::VarInt;
use conduit_utils::serial::WriteTo;

use crate::ProtocolError;
use crate::fields::{FieldSpec, Scope};
use crate::registry::{Direction, ProtocolState};
use crate::value::{Compound, Value};

/// A named packet descriptor: id, direction, state, and the root field
/// record. Built once at startup and shared as `&'static` by every
/// connection.
#[derive(Debug)]
pub struct PacketType {
    /// The packet's name, unique within its direction and state.
    pub name: &'static str,
    /// The numeric packet id.
    pub id: i32,
    /// The direction the packet flows.
    pub direction: Direction,
    /// The state the packet lives in.
    pub state: ProtocolState,
    /// The root descriptor; always [`FieldSpec::Fields`].
    pub fields: FieldSpec,
}

impl PacketType {
    /// Parses a packet body (after the id varint) against this type.
    pub fn parse_body(&'static self, r: &mut impl Read) -> Result<Compound, ProtocolError> {
        match self.fields.parse(r, None)? {
            Value::Compound(compound) => Ok(compound),
            other => Err(ProtocolError::Malformed(format!(
                "packet root must be a record, got {other}"
            ))),
        }
    }

    /// Constructs a packet instance from field values.
    ///
    /// Fields are matched by name against the descriptor and stored in
    /// declared order; optional fields may be omitted and default to absent.
    pub fn make(
        &'static self,
        mut entries: Vec<(&'static str, Value)>,
    ) -> Result<PacketValue, ProtocolError> {
        let FieldSpec::Fields(specs) = &self.fields else {
            return Err(ProtocolError::Malformed(format!(
                "packet type {} has no record root",
                self.name
            )));
        };

        let mut root = Compound::with_capacity(specs.len());
        for &(name, ref spec) in specs {
            let position = entries.iter().position(|(n, _)| *n == name);
            match position {
                Some(i) => root.push_parsed(name, entries.remove(i).1),
                None if matches!(spec, FieldSpec::Optional { .. }) => {
                    root.push_parsed(name, Value::Absent);
                }
                None => {
                    return Err(ProtocolError::Malformed(format!(
                        "missing field `{name}` for packet {}",
                        self.name
                    )));
                }
            }
        }
        if let Some((name, _)) = entries.first() {
            return Err(ProtocolError::Malformed(format!(
                "packet {} has no field `{name}`",
                self.name
            )));
        }

        Ok(PacketValue {
            ty: self,
            root,
            cache: None,
        })
    }
}

/// A decoded packet: its type, the tree of field values, and (when it came
/// off the wire) the payload bytes it was parsed from.
///
/// A clean packet re-emits its cached payload verbatim; any mutation marks
/// the tree dirty and forces a re-encode.
#[derive(Clone)]
pub struct PacketValue {
    ty: &'static PacketType,
    root: Compound,
    cache: Option<Vec<u8>>,
}

impl PacketValue {
    pub(crate) fn new_parsed(ty: &'static PacketType, root: Compound, cache: Vec<u8>) -> Self {
        Self {
            ty,
            root,
            cache: Some(cache),
        }
    }

    /// The packet's type descriptor.
    #[must_use]
    pub fn packet_type(&self) -> &'static PacketType {
        self.ty
    }

    /// The packet's name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.ty.name
    }

    /// The root record, read-only.
    #[must_use]
    pub fn root(&self) -> &Compound {
        &self.root
    }

    /// The root record, mutable. Mutations through the returned reference
    /// mark the touched nodes dirty.
    pub fn root_mut(&mut self) -> &mut Compound {
        &mut self.root
    }

    /// The named top-level field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.root.get(name)
    }

    /// Replaces a top-level field, marking the packet dirty.
    pub fn set(&mut self, name: &str, value: Value) -> Option<Value> {
        self.root.set(name, value)
    }

    /// Whether any node of the tree has been mutated since parse.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.root.is_dirty()
    }

    /// Encodes the packet payload: the id varint followed by the body.
    ///
    /// A clean packet with a cached payload returns the cache verbatim.
    pub fn emit(&self) -> Result<Vec<u8>, ProtocolError> {
        if !self.is_dirty() {
            if let Some(cache) = &self.cache {
                return Ok(cache.clone());
            }
        }

        let FieldSpec::Fields(specs) = &self.ty.fields else {
            return Err(ProtocolError::Malformed(format!(
                "packet type {} has no record root",
                self.ty.name
            )));
        };
        let mut out = Vec::new();
        VarInt(self.ty.id).write(&mut out)?;
        for &(name, ref spec) in specs {
            let value = self
                .root
                .get(name)
                .ok_or_else(|| ProtocolError::Malformed(format!("missing field `{name}`")))?;
            let scope = Scope::new(&self.root);
            spec.emit(value, Some(&scope), &mut out)?;
        }
        Ok(out)
    }
}

impl fmt::Display for PacketValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.ty.name, self.root)
    }
}

impl fmt::Debug for PacketValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
