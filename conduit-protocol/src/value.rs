//! Parsed field values.
//!
//! Every mutating accessor marks its node dirty. Reaching a nested node
//! mutably always passes through the marking accessors of its ancestors, so
//! mutating a leaf dirties the whole ancestor chain up to the packet root.

use std::fmt;

use conduit_utils::BlockPos;
use uuid::Uuid;

/// A single parsed field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Signed 8-bit integer.
    Byte(i8),
    /// Unsigned 8-bit integer.
    UByte(u8),
    /// Signed 16-bit integer.
    Short(i16),
    /// Unsigned 16-bit integer.
    UShort(u16),
    /// Signed 32-bit integer.
    Int(i32),
    /// Unsigned 32-bit integer.
    UInt(u32),
    /// Signed 64-bit integer.
    Long(i64),
    /// Unsigned 64-bit integer.
    ULong(u64),
    /// 32-bit float.
    Float(f32),
    /// 64-bit float.
    Double(f64),
    /// Boolean.
    Bool(bool),
    /// Variable-length integer.
    VarInt(i32),
    /// Length-prefixed UTF-8 string.
    String(String),
    /// A JSON document carried inside a string field.
    Json(serde_json::Value),
    /// 128-bit UUID.
    Uuid(Uuid),
    /// Packed block position.
    Position(BlockPos),
    /// Raw bytes.
    Raw(Vec<u8>),
    /// A length-prefixed sequence.
    Array(ArrayValue),
    /// An ordered record of named fields.
    Compound(Compound),
    /// An optional field whose predicate was false.
    Absent,
}

impl Value {
    /// The value as a widened integer, when it is any integer kind.
    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Byte(v) => Some(i64::from(*v)),
            Self::UByte(v) => Some(i64::from(*v)),
            Self::Short(v) => Some(i64::from(*v)),
            Self::UShort(v) => Some(i64::from(*v)),
            Self::Int(v) | Self::VarInt(v) => Some(i64::from(*v)),
            Self::UInt(v) => Some(i64::from(*v)),
            Self::Long(v) => Some(*v),
            Self::ULong(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// The value as a bool, when it is one.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// The value as a string slice, when it is one.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// The value as a compound, when it is one.
    #[must_use]
    pub fn as_compound(&self) -> Option<&Compound> {
        match self {
            Self::Compound(c) => Some(c),
            _ => None,
        }
    }

    /// The value as a mutable compound, when it is one. Marks it dirty.
    pub fn as_compound_mut(&mut self) -> Option<&mut Compound> {
        match self {
            Self::Compound(c) => {
                c.dirty = true;
                Some(c)
            }
            _ => None,
        }
    }

    /// The value as an array, when it is one.
    #[must_use]
    pub fn as_array(&self) -> Option<&ArrayValue> {
        match self {
            Self::Array(a) => Some(a),
            _ => None,
        }
    }

    /// The value as a mutable array, when it is one. Marks it dirty.
    pub fn as_array_mut(&mut self) -> Option<&mut ArrayValue> {
        match self {
            Self::Array(a) => {
                a.dirty = true;
                Some(a)
            }
            _ => None,
        }
    }

    pub(crate) fn is_dirty(&self) -> bool {
        match self {
            Self::Compound(c) => c.is_dirty(),
            Self::Array(a) => a.is_dirty(),
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Byte(v) => write!(f, "{v}"),
            Self::UByte(v) => write!(f, "{v}"),
            Self::Short(v) => write!(f, "{v}"),
            Self::UShort(v) => write!(f, "{v}"),
            Self::Int(v) | Self::VarInt(v) => write!(f, "{v}"),
            Self::UInt(v) => write!(f, "{v}"),
            Self::Long(v) => write!(f, "{v}"),
            Self::ULong(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Bool(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
            Self::Uuid(v) => write!(f, "{v}"),
            Self::Position(v) => write!(f, "{v}"),
            Self::Raw(bytes) => {
                if bytes.len() < 100 {
                    write!(f, "<Data:")?;
                    for b in bytes {
                        write!(f, " {b:02x}")?;
                    }
                    write!(f, ">")
                } else {
                    write!(f, "<Data: {} bytes>", bytes.len())
                }
            }
            Self::Array(a) => a.fmt(f),
            Self::Compound(c) => c.fmt(f),
            Self::Absent => write!(f, "None"),
        }
    }
}

/// An ordered record of named field values.
#[derive(Debug, Clone, Default)]
pub struct Compound {
    entries: Vec<(&'static str, Value)>,
    dirty: bool,
}

impl Compound {
    /// Creates an empty compound.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            dirty: false,
        }
    }

    /// Appends a parsed field without marking the compound dirty.
    pub(crate) fn push_parsed(&mut self, name: &'static str, value: Value) {
        self.entries.push((name, value));
    }

    /// The named field, if present.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }

    /// Mutable access to the named field. Marks the compound dirty.
    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        let entry = self
            .entries
            .iter_mut()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v);
        if entry.is_some() {
            self.dirty = true;
        }
        entry
    }

    /// Replaces the named field. Marks the compound dirty. Returns the old
    /// value, or `None` (and stores nothing) when the field does not exist.
    pub fn set(&mut self, name: &str, value: Value) -> Option<Value> {
        let slot = self
            .entries
            .iter_mut()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)?;
        self.dirty = true;
        Some(std::mem::replace(slot, value))
    }

    /// The named field widened to an integer.
    #[must_use]
    pub fn int(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_int)
    }

    /// The named field as a bool.
    #[must_use]
    pub fn boolean(&self, name: &str) -> Option<bool> {
        self.get(name).and_then(Value::as_bool)
    }

    /// The named field as a string slice.
    #[must_use]
    pub fn string(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    /// Iterates the fields in declared order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.entries.iter().map(|(n, v)| (*n, v))
    }

    /// The number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the compound has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether this node or any node below it has been mutated.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty || self.entries.iter().any(|(_, v)| v.is_dirty())
    }
}

// Structural equality; dirty flags do not participate.
impl PartialEq for Compound {
    fn eq(&self, other: &Self) -> bool {
        self.entries == other.entries
    }
}

impl fmt::Display for Compound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        write!(f, "}}")
    }
}

/// A parsed length-prefixed sequence.
#[derive(Debug, Clone, Default)]
pub struct ArrayValue {
    items: Vec<Value>,
    dirty: bool,
}

impl ArrayValue {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            dirty: false,
        }
    }

    pub(crate) fn push_parsed(&mut self, value: Value) {
        self.items.push(value);
    }

    /// The item at `index`, if present.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.items.get(index)
    }

    /// Mutable access to the item at `index`. Marks the array dirty.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut Value> {
        let item = self.items.get_mut(index);
        if item.is_some() {
            self.dirty = true;
        }
        item
    }

    /// Appends an item. Marks the array dirty.
    pub fn push(&mut self, value: Value) {
        self.dirty = true;
        self.items.push(value);
    }

    /// Replaces the item at `index`. Marks the array dirty.
    pub fn replace(&mut self, index: usize, value: Value) -> Option<Value> {
        let slot = self.items.get_mut(index)?;
        self.dirty = true;
        Some(std::mem::replace(slot, value))
    }

    /// Iterates the items in order.
    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.items.iter()
    }

    /// The number of items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the array has no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether this node or any node below it has been mutated.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty || self.items.iter().any(Value::is_dirty)
    }
}

impl PartialEq for ArrayValue {
    fn eq(&self, other: &Self) -> bool {
        self.items == other.items
    }
}

impl fmt::Display for ArrayValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.items.len() >= 10 {
            return write!(f, "<Array: {} items>", self.items.len());
        }
        write!(f, "[")?;
        for (i, item) in self.items.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{item}")?;
        }
        write!(f, "]")
    }
}
