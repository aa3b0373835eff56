//! Descriptor-driven protobuf codec.
//!
//! Decodes wire bytes into a [`DynamicMessage`] and encodes it back using
//! nothing but a [`TypeDefinition`], so no per-type generated code is needed.
//! Fields the definition does not know are kept as [`UnknownField`]s and
//! written back verbatim.

use indexmap::IndexMap;
use protocache_core::error::{CodecError, WireError};
use std::fmt;

use crate::descriptor::{FieldDefinition, FieldKind, ScalarType, TypeDefinition};
use crate::wire::{
    decode_zigzag32, decode_zigzag64, encode_zigzag32, encode_zigzag64, WireReader, WireType,
    WireWriter,
};

/// Maximum message nesting accepted while decoding.
pub const MAX_DEPTH: usize = 100;

/// A decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Vec<u8>),
    /// Enum number. Numbers unknown to the enum definition are kept as-is.
    EnumNumber(i32),
    Message(DynamicMessage),
    List(Vec<Value>),
    /// Map entries in wire order.
    Map(Vec<(Value, Value)>),
}

impl Value {
    fn type_label(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::I32(_) => "i32",
            Value::I64(_) => "i64",
            Value::U32(_) => "u32",
            Value::U64(_) => "u64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::EnumNumber(_) => "enum",
            Value::Message(_) => "message",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn as_message(&self) -> Option<&DynamicMessage> {
        match self {
            Value::Message(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::I32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::U32(v) => write!(f, "{v}"),
            Value::U64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
            Value::EnumNumber(n) => write!(f, "{n}"),
            Value::Message(m) => write!(f, "{m}"),
            Value::List(items) => {
                let parts: Vec<_> = items.iter().map(|x| x.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Map(entries) => {
                let parts: Vec<_> = entries.iter().map(|(k, v)| format!("{k}: {v}")).collect();
                write!(f, "{{{}}}", parts.join(", "))
            }
        }
    }
}

/// A field present on the wire but absent from the message definition.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownField {
    pub number: u32,
    pub wire_type: WireType,
    /// Raw value bytes as read, including a length prefix or end-group tag.
    pub data: Vec<u8>,
}

/// A message instance whose shape is given by a [`TypeDefinition`].
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicMessage {
    descriptor: TypeDefinition,
    /// Field number → value, in the order fields were set.
    fields: IndexMap<u32, Value>,
    unknown: Vec<UnknownField>,
}

impl DynamicMessage {
    /// Empty message of type `descriptor`.
    pub fn new(descriptor: TypeDefinition) -> Result<Self, CodecError> {
        if !descriptor.is_message() {
            return Err(CodecError::NotAMessage {
                name: descriptor.full_name().to_string(),
            });
        }
        Ok(Self {
            descriptor,
            fields: IndexMap::new(),
            unknown: Vec::new(),
        })
    }

    pub fn descriptor(&self) -> &TypeDefinition {
        &self.descriptor
    }

    /// Value of a field by proto or JSON name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        let number = self.descriptor.field_by_name(name)?.number();
        self.fields.get(&number)
    }

    pub fn get_by_number(&self, number: u32) -> Option<&Value> {
        self.fields.get(&number)
    }

    /// Set a field by name. Setting a oneof member clears its siblings.
    pub fn set(&mut self, name: &str, value: Value) -> Result<(), CodecError> {
        let descriptor = self.descriptor.clone();
        let field = descriptor
            .field_by_name(name)
            .ok_or_else(|| CodecError::UnknownField {
                message: descriptor.full_name().to_string(),
                field: name.to_string(),
            })?;
        check_value(&field, &value)?;
        self.insert(&field, value);
        Ok(())
    }

    pub fn clear(&mut self, name: &str) -> Option<Value> {
        let number = self.descriptor.field_by_name(name)?.number();
        self.fields.shift_remove(&number)
    }

    /// Set fields as `(number, value)` pairs in the order they were set.
    pub fn fields(&self) -> impl Iterator<Item = (u32, &Value)> {
        self.fields.iter().map(|(n, v)| (*n, v))
    }

    pub fn unknown_fields(&self) -> &[UnknownField] {
        &self.unknown
    }

    /// True if this message or any nested message carries unknown fields,
    /// i.e. it was probably written with a newer schema.
    pub fn has_unknown_fields(&self) -> bool {
        !self.unknown.is_empty() || self.fields.values().any(value_has_unknown)
    }

    /// Serialize to protobuf wire bytes.
    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        let mut w = WireWriter::new();
        encode_message(self, &mut w)?;
        Ok(w.into_inner())
    }

    fn insert(&mut self, field: &FieldDefinition<'_>, value: Value) {
        if let Some(oneof) = field.data.oneof {
            let siblings: Vec<u32> = self
                .descriptor
                .fields()
                .filter(|f| f.data.oneof == Some(oneof) && f.number() != field.number())
                .map(|f| f.number())
                .collect();
            for n in siblings {
                self.fields.shift_remove(&n);
            }
        }
        self.fields.insert(field.number(), value);
    }

    fn push_repeated(&mut self, number: u32, value: Value) {
        match self.fields.entry(number).or_insert_with(|| Value::List(Vec::new())) {
            Value::List(items) => items.push(value),
            slot => *slot = Value::List(vec![value]),
        }
    }

    fn push_map_entry(&mut self, number: u32, key: Value, value: Value) {
        match self.fields.entry(number).or_insert_with(|| Value::Map(Vec::new())) {
            Value::Map(entries) => {
                // Later entries for the same key win.
                entries.retain(|(k, _)| *k != key);
                entries.push((key, value));
            }
            slot => *slot = Value::Map(vec![(key, value)]),
        }
    }
}

impl fmt::Display for DynamicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<_> = self
            .descriptor
            .fields()
            .filter_map(|fd| {
                self.fields
                    .get(&fd.number())
                    .map(|v| format!("{}: {v}", fd.name()))
            })
            .collect();
        write!(f, "{} {{{}}}", self.descriptor.name(), parts.join(", "))
    }
}

fn value_has_unknown(v: &Value) -> bool {
    match v {
        Value::Message(m) => m.has_unknown_fields(),
        Value::List(items) => items.iter().any(value_has_unknown),
        Value::Map(entries) => entries.iter().any(|(_, v)| value_has_unknown(v)),
        _ => false,
    }
}

impl TypeDefinition {
    /// Decode protobuf wire bytes as a message of this type.
    pub fn decode(&self, bytes: &[u8]) -> Result<DynamicMessage, CodecError> {
        decode_message(self, bytes, 0)
    }

    /// Encode a message of this type. Fails if `msg` is of another type.
    pub fn encode(&self, msg: &DynamicMessage) -> Result<Vec<u8>, CodecError> {
        if msg.descriptor() != self {
            return Err(CodecError::InvalidValue {
                field: self.full_name().to_string(),
                reason: format!("message is of type '{}'", msg.descriptor().full_name()),
            });
        }
        msg.encode()
    }
}

// ─── Decoding ────────────────────────────────────────────────────────────────

fn decode_message(def: &TypeDefinition, bytes: &[u8], depth: usize) -> Result<DynamicMessage, CodecError> {
    let mut msg = DynamicMessage::new(def.clone())?;
    let mut r = WireReader::new(bytes);
    merge_fields(&mut msg, &mut r, None, depth)?;
    Ok(msg)
}

/// Read fields into `msg` until the input ends, or until the end-group tag
/// for `group` when decoding a group body.
fn merge_fields(
    msg: &mut DynamicMessage,
    r: &mut WireReader<'_>,
    group: Option<u32>,
    depth: usize,
) -> Result<(), CodecError> {
    if depth > MAX_DEPTH {
        return Err(CodecError::RecursionLimit { limit: MAX_DEPTH });
    }
    let def = msg.descriptor.clone();
    loop {
        if r.is_empty() {
            return match group {
                Some(field) => Err(WireError::UnterminatedGroup { field }.into()),
                None => Ok(()),
            };
        }
        let (number, wt) = r.read_tag()?;
        if wt == WireType::EndGroup {
            return match group {
                Some(g) if g == number => Ok(()),
                _ => Err(WireError::UnexpectedEndGroup { field: number }.into()),
            };
        }
        match def.field_by_number(number) {
            Some(field) => read_field(msg, &field, wt, r, depth)?,
            None => {
                let data = r.skip_field(number, wt)?.to_vec();
                msg.unknown.push(UnknownField {
                    number,
                    wire_type: wt,
                    data,
                });
            }
        }
    }
}

fn scalar_wire_type(s: ScalarType) -> WireType {
    match s {
        ScalarType::Double | ScalarType::Fixed64 | ScalarType::Sfixed64 => WireType::Fixed64,
        ScalarType::Float | ScalarType::Fixed32 | ScalarType::Sfixed32 => WireType::Fixed32,
        ScalarType::String | ScalarType::Bytes => WireType::Len,
        _ => WireType::Varint,
    }
}

fn kind_wire_type(kind: FieldKind) -> WireType {
    match kind {
        FieldKind::Scalar(s) => scalar_wire_type(s),
        FieldKind::Enum(_) => WireType::Varint,
        FieldKind::Message(_) => WireType::Len,
        FieldKind::Group(_) => WireType::StartGroup,
    }
}

fn read_field(
    msg: &mut DynamicMessage,
    field: &FieldDefinition<'_>,
    wt: WireType,
    r: &mut WireReader<'_>,
    depth: usize,
) -> Result<(), CodecError> {
    let kind = field.data.kind;
    let expected = kind_wire_type(kind);

    // Packed repeated scalars arrive as one length-delimited blob; parsers
    // must accept both forms regardless of the declared packing.
    if field.is_repeated() && wt == WireType::Len && expected != WireType::Len {
        if !matches!(expected, WireType::Varint | WireType::Fixed32 | WireType::Fixed64) {
            return Err(mismatch(field, expected, wt));
        }
        let mut packed = r.read_nested()?;
        while !packed.is_empty() {
            let v = read_value(field, kind, &mut packed, depth)?;
            msg.push_repeated(field.number(), v);
        }
        return Ok(());
    }

    if wt != expected {
        return Err(mismatch(field, expected, wt));
    }

    if field.is_map() {
        let entry_def = field.message_type().ok_or_else(|| mismatch(field, expected, wt))?;
        let entry = decode_message(&entry_def, r.read_bytes()?, depth + 1)?;
        let key = match entry.fields.get(&1) {
            Some(k) => k.clone(),
            None => default_value(&entry_def, 1)?,
        };
        let value = match entry.fields.get(&2) {
            Some(v) => v.clone(),
            None => default_value(&entry_def, 2)?,
        };
        msg.push_map_entry(field.number(), key, value);
        return Ok(());
    }

    let value = read_value(field, kind, r, depth)?;
    if field.is_repeated() {
        msg.push_repeated(field.number(), value);
    } else {
        msg.insert(field, value);
    }
    Ok(())
}

fn read_value(
    field: &FieldDefinition<'_>,
    kind: FieldKind,
    r: &mut WireReader<'_>,
    depth: usize,
) -> Result<Value, CodecError> {
    let parent = field.containing_type();
    Ok(match kind {
        FieldKind::Scalar(s) => read_scalar(s, r)?,
        FieldKind::Enum(_) => Value::EnumNumber(r.read_varint()? as i32),
        FieldKind::Message(idx) => {
            Value::Message(decode_message(&parent.sibling(idx), r.read_bytes()?, depth + 1)?)
        }
        FieldKind::Group(idx) => {
            let mut sub = DynamicMessage::new(parent.sibling(idx))?;
            merge_fields(&mut sub, r, Some(field.number()), depth + 1)?;
            Value::Message(sub)
        }
    })
}

fn read_scalar(s: ScalarType, r: &mut WireReader<'_>) -> Result<Value, CodecError> {
    Ok(match s {
        ScalarType::Double => Value::F64(f64::from_bits(r.read_fixed64()?)),
        ScalarType::Float => Value::F32(f32::from_bits(r.read_fixed32()?)),
        ScalarType::Int64 => Value::I64(r.read_varint()? as i64),
        ScalarType::Uint64 => Value::U64(r.read_varint()?),
        ScalarType::Int32 => Value::I32(r.read_varint()? as i32),
        ScalarType::Fixed64 => Value::U64(r.read_fixed64()?),
        ScalarType::Fixed32 => Value::U32(r.read_fixed32()?),
        ScalarType::Bool => Value::Bool(r.read_varint()? != 0),
        ScalarType::String => Value::String(r.read_str()?.to_owned()),
        ScalarType::Bytes => Value::Bytes(r.read_bytes()?.to_vec()),
        ScalarType::Uint32 => Value::U32(r.read_varint()? as u32),
        ScalarType::Sfixed32 => Value::I32(r.read_fixed32()? as i32),
        ScalarType::Sfixed64 => Value::I64(r.read_fixed64()? as i64),
        ScalarType::Sint32 => Value::I32(decode_zigzag32(r.read_varint()? as u32)),
        ScalarType::Sint64 => Value::I64(decode_zigzag64(r.read_varint()?)),
    })
}

fn mismatch(field: &FieldDefinition<'_>, expected: WireType, actual: WireType) -> CodecError {
    CodecError::WireTypeMismatch {
        field: field.name().to_string(),
        expected: expected.as_u8(),
        actual: actual.as_u8(),
    }
}

/// Zero value of field `number` of `def`, used for absent map keys/values.
fn default_value(def: &TypeDefinition, number: u32) -> Result<Value, CodecError> {
    let field = def.field_by_number(number).ok_or_else(|| CodecError::UnknownField {
        message: def.full_name().to_string(),
        field: number.to_string(),
    })?;
    Ok(match field.data.kind {
        FieldKind::Scalar(s) => match s {
            ScalarType::Double => Value::F64(0.0),
            ScalarType::Float => Value::F32(0.0),
            ScalarType::Int64 | ScalarType::Sfixed64 | ScalarType::Sint64 => Value::I64(0),
            ScalarType::Uint64 | ScalarType::Fixed64 => Value::U64(0),
            ScalarType::Int32 | ScalarType::Sfixed32 | ScalarType::Sint32 => Value::I32(0),
            ScalarType::Uint32 | ScalarType::Fixed32 => Value::U32(0),
            ScalarType::Bool => Value::Bool(false),
            ScalarType::String => Value::String(String::new()),
            ScalarType::Bytes => Value::Bytes(Vec::new()),
        },
        FieldKind::Enum(_) => Value::EnumNumber(0),
        FieldKind::Message(idx) | FieldKind::Group(idx) => {
            Value::Message(DynamicMessage::new(def.sibling(idx))?)
        }
    })
}

// ─── Encoding ────────────────────────────────────────────────────────────────

fn encode_message(msg: &DynamicMessage, w: &mut WireWriter) -> Result<(), CodecError> {
    for field in msg.descriptor.fields() {
        let Some(value) = msg.fields.get(&field.number()) else {
            continue;
        };
        encode_field(&field, value, w)?;
    }
    for u in &msg.unknown {
        w.write_tag(u.number, u.wire_type);
        w.write_raw(&u.data);
    }
    Ok(())
}

fn encode_field(field: &FieldDefinition<'_>, value: &Value, w: &mut WireWriter) -> Result<(), CodecError> {
    let number = field.number();
    if field.is_map() {
        let Value::Map(entries) = value else {
            return Err(invalid(field, "map", value));
        };
        let entry_def = field.message_type().ok_or_else(|| invalid(field, "map", value))?;
        let key_field = entry_def.field_by_number(1);
        let value_field = entry_def.field_by_number(2);
        let (Some(key_field), Some(value_field)) = (key_field, value_field) else {
            return Err(invalid(field, "map entry with key and value", value));
        };
        for (k, v) in entries {
            let mut entry = WireWriter::new();
            encode_single(&key_field, k, &mut entry)?;
            encode_single(&value_field, v, &mut entry)?;
            w.write_bytes_field(number, entry.as_slice());
        }
        return Ok(());
    }

    if field.is_repeated() {
        let Value::List(items) = value else {
            return Err(invalid(field, "list", value));
        };
        if field.is_packed() {
            if items.is_empty() {
                return Ok(());
            }
            let mut packed = WireWriter::new();
            for item in items {
                write_packed_element(field, item, &mut packed)?;
            }
            w.write_bytes_field(number, packed.as_slice());
        } else {
            for item in items {
                encode_single(field, item, w)?;
            }
        }
        return Ok(());
    }

    encode_single(field, value, w)
}

fn write_packed_element(field: &FieldDefinition<'_>, value: &Value, w: &mut WireWriter) -> Result<(), CodecError> {
    match field.data.kind {
        FieldKind::Scalar(s) => write_scalar(field, s, value, w),
        FieldKind::Enum(_) => match value {
            Value::EnumNumber(n) => {
                w.write_varint(*n as i64 as u64);
                Ok(())
            }
            other => Err(invalid(field, "enum", other)),
        },
        _ => Err(invalid(field, "packable scalar", value)),
    }
}

fn encode_single(field: &FieldDefinition<'_>, value: &Value, w: &mut WireWriter) -> Result<(), CodecError> {
    let number = field.number();
    let kind = field.data.kind;
    match kind {
        FieldKind::Scalar(s) => {
            w.write_tag(number, scalar_wire_type(s));
            write_scalar(field, s, value, w)
        }
        FieldKind::Enum(_) => match value {
            Value::EnumNumber(n) => {
                w.write_varint_field(number, *n as i64 as u64);
                Ok(())
            }
            other => Err(invalid(field, "enum", other)),
        },
        FieldKind::Message(idx) | FieldKind::Group(idx) => {
            let Value::Message(m) = value else {
                return Err(invalid(field, "message", value));
            };
            let target = field.containing_type().sibling(idx);
            if m.descriptor != target {
                return Err(CodecError::InvalidValue {
                    field: field.name().to_string(),
                    reason: format!(
                        "expected message '{}', got '{}'",
                        target.full_name(),
                        m.descriptor.full_name()
                    ),
                });
            }
            if matches!(kind, FieldKind::Group(_)) {
                w.write_tag(number, WireType::StartGroup);
                encode_message(m, w)?;
                w.write_tag(number, WireType::EndGroup);
            } else {
                let mut sub = WireWriter::new();
                encode_message(m, &mut sub)?;
                w.write_bytes_field(number, sub.as_slice());
            }
            Ok(())
        }
    }
}

/// Write a scalar value (no tag).
fn write_scalar(field: &FieldDefinition<'_>, s: ScalarType, value: &Value, w: &mut WireWriter) -> Result<(), CodecError> {
    match (s, value) {
        (ScalarType::Double, Value::F64(v)) => w.write_fixed64(v.to_bits()),
        (ScalarType::Float, Value::F32(v)) => w.write_fixed32(v.to_bits()),
        (ScalarType::Int64, Value::I64(v)) => w.write_varint(*v as u64),
        (ScalarType::Uint64, Value::U64(v)) => w.write_varint(*v),
        (ScalarType::Int32, Value::I32(v)) => w.write_varint(*v as i64 as u64),
        (ScalarType::Fixed64, Value::U64(v)) => w.write_fixed64(*v),
        (ScalarType::Fixed32, Value::U32(v)) => w.write_fixed32(*v),
        (ScalarType::Bool, Value::Bool(v)) => w.write_varint(u64::from(*v)),
        (ScalarType::String, Value::String(v)) => w.write_bytes(v.as_bytes()),
        (ScalarType::Bytes, Value::Bytes(v)) => w.write_bytes(v),
        (ScalarType::Uint32, Value::U32(v)) => w.write_varint(u64::from(*v)),
        (ScalarType::Sfixed32, Value::I32(v)) => w.write_fixed32(*v as u32),
        (ScalarType::Sfixed64, Value::I64(v)) => w.write_fixed64(*v as u64),
        (ScalarType::Sint32, Value::I32(v)) => w.write_varint(u64::from(encode_zigzag32(*v))),
        (ScalarType::Sint64, Value::I64(v)) => w.write_varint(encode_zigzag64(*v)),
        (s, other) => return Err(invalid(field, &s.to_string(), other)),
    }
    Ok(())
}

fn invalid(field: &FieldDefinition<'_>, expected: &str, got: &Value) -> CodecError {
    CodecError::InvalidValue {
        field: field.name().to_string(),
        reason: format!("expected {expected}, got {}", got.type_label()),
    }
}

/// Shallow shape check used by [`DynamicMessage::set`].
fn check_value(field: &FieldDefinition<'_>, value: &Value) -> Result<(), CodecError> {
    if field.is_map() {
        return match value {
            Value::Map(_) => Ok(()),
            other => Err(invalid(field, "map", other)),
        };
    }
    if field.is_repeated() {
        return match value {
            Value::List(_) => Ok(()),
            other => Err(invalid(field, "list", other)),
        };
    }
    let ok = match (field.data.kind, value) {
        (FieldKind::Scalar(s), v) => matches!(
            (s, v),
            (ScalarType::Double, Value::F64(_))
                | (ScalarType::Float, Value::F32(_))
                | (ScalarType::Int64 | ScalarType::Sfixed64 | ScalarType::Sint64, Value::I64(_))
                | (ScalarType::Uint64 | ScalarType::Fixed64, Value::U64(_))
                | (ScalarType::Int32 | ScalarType::Sfixed32 | ScalarType::Sint32, Value::I32(_))
                | (ScalarType::Uint32 | ScalarType::Fixed32, Value::U32(_))
                | (ScalarType::Bool, Value::Bool(_))
                | (ScalarType::String, Value::String(_))
                | (ScalarType::Bytes, Value::Bytes(_))
        ),
        (FieldKind::Enum(_), Value::EnumNumber(_)) => true,
        (FieldKind::Message(_) | FieldKind::Group(_), Value::Message(_)) => true,
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(invalid(field, &field.field_type().to_string(), value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decoder::decode;
    use crate::fixture::{descriptor_set, EnumBuilder, FieldSpec, FileBuilder, MessageBuilder};
    use std::collections::HashMap;

    fn schema(syntax: &str) -> HashMap<String, TypeDefinition> {
        let payload = descriptor_set(&[FileBuilder::new("shop.proto")
            .package("shop")
            .syntax(syntax)
            .enumeration(EnumBuilder::new("Status").value("PENDING", 0).value("PAID", 1))
            .message(
                MessageBuilder::new("Order")
                    .field(FieldSpec::scalar("id", 1, ScalarType::Int64))
                    .field(FieldSpec::scalar("note", 2, ScalarType::String))
                    .field(FieldSpec::scalar("qty", 3, ScalarType::Int32).repeated())
                    .field(FieldSpec::message("item", 4, ".shop.Item").repeated())
                    .field(FieldSpec::enumeration("status", 5, ".shop.Status"))
                    .field(FieldSpec::message("tags", 6, ".shop.Order.TagsEntry").repeated())
                    .field(FieldSpec::scalar("delta", 7, ScalarType::Sint32))
                    .field(FieldSpec::scalar("card", 8, ScalarType::String).oneof(0))
                    .field(FieldSpec::scalar("cash", 9, ScalarType::Bool).oneof(0))
                    .oneof("payment")
                    .nested(MessageBuilder::map_entry(
                        "TagsEntry",
                        FieldSpec::scalar("key", 1, ScalarType::String),
                        FieldSpec::scalar("value", 2, ScalarType::Int32),
                    )),
            )
            .message(
                MessageBuilder::new("Item")
                    .field(FieldSpec::scalar("sku", 1, ScalarType::String))
                    .field(FieldSpec::scalar("price", 2, ScalarType::Double)),
            )]);
        decode(&payload).unwrap()
    }

    #[test]
    fn decodes_hand_encoded_message() {
        let types = schema("proto3");
        let order = &types["shop.Order"];

        let mut w = WireWriter::new();
        w.write_varint_field(1, 150);
        w.write_str_field(2, "rush");
        w.write_varint_field(5, 1);
        w.write_tag(7, WireType::Varint);
        w.write_varint(u64::from(encode_zigzag32(-3)));
        let msg = order.decode(w.as_slice()).unwrap();

        assert_eq!(msg.get("id"), Some(&Value::I64(150)));
        assert_eq!(msg.get("note").and_then(Value::as_str), Some("rush"));
        assert_eq!(msg.get("status"), Some(&Value::EnumNumber(1)));
        assert_eq!(msg.get("delta"), Some(&Value::I32(-3)));
        assert!(!msg.has_unknown_fields());
    }

    #[test]
    fn negative_int32_uses_ten_byte_varint() {
        let types = schema("proto3");
        let order = &types["shop.Order"];
        let mut msg = DynamicMessage::new(order.clone()).unwrap();
        msg.set("qty", Value::List(vec![Value::I32(-1)])).unwrap();
        let bytes = msg.encode().unwrap();
        // tag, length 10, then ten bytes of 0xff..0x01
        assert_eq!(bytes[0], 0x1a);
        assert_eq!(bytes[1], 10);
        assert_eq!(order.decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn packed_and_unpacked_repeated_both_decode() {
        let types = schema("proto2");
        let order = &types["shop.Order"];

        let mut unpacked = WireWriter::new();
        unpacked.write_varint_field(3, 1);
        unpacked.write_varint_field(3, 2);

        let mut body = WireWriter::new();
        body.write_varint(1);
        body.write_varint(2);
        let mut packed = WireWriter::new();
        packed.write_bytes_field(3, body.as_slice());

        let a = order.decode(unpacked.as_slice()).unwrap();
        let b = order.decode(packed.as_slice()).unwrap();
        let expected = Value::List(vec![Value::I32(1), Value::I32(2)]);
        assert_eq!(a.get("qty"), Some(&expected));
        assert_eq!(b.get("qty"), Some(&expected));
        // proto2 re-encodes unpacked
        assert_eq!(a.encode().unwrap(), unpacked.into_inner());
    }

    #[test]
    fn proto3_repeated_scalars_encode_packed() {
        let types = schema("proto3");
        let mut msg = DynamicMessage::new(types["shop.Order"].clone()).unwrap();
        msg.set("qty", Value::List(vec![Value::I32(1), Value::I32(2)])).unwrap();
        assert_eq!(msg.encode().unwrap(), vec![0x1a, 2, 1, 2]);
    }

    #[test]
    fn nested_messages_and_maps_survive_encode_decode() {
        let types = schema("proto3");
        let order = &types["shop.Order"];
        let mut item = DynamicMessage::new(types["shop.Item"].clone()).unwrap();
        item.set("sku", Value::String("A-1".into())).unwrap();
        item.set("price", Value::F64(9.5)).unwrap();

        let mut msg = DynamicMessage::new(order.clone()).unwrap();
        msg.set("item", Value::List(vec![Value::Message(item)])).unwrap();
        msg.set(
            "tags",
            Value::Map(vec![(Value::String("gift".into()), Value::I32(1))]),
        )
        .unwrap();

        let bytes = order.encode(&msg).unwrap();
        let back = order.decode(&bytes).unwrap();
        assert_eq!(back, msg);
        let first = &back.get("item").and_then(Value::as_list).unwrap()[0];
        assert_eq!(
            first.as_message().unwrap().get("price"),
            Some(&Value::F64(9.5))
        );
    }

    #[test]
    fn map_entry_with_missing_value_gets_default() {
        let types = schema("proto3");
        let mut entry = WireWriter::new();
        entry.write_str_field(1, "k");
        let mut w = WireWriter::new();
        w.write_bytes_field(6, entry.as_slice());
        let msg = types["shop.Order"].decode(w.as_slice()).unwrap();
        assert_eq!(
            msg.get("tags"),
            Some(&Value::Map(vec![(Value::String("k".into()), Value::I32(0))]))
        );
    }

    #[test]
    fn oneof_member_replaces_sibling() {
        let types = schema("proto3");
        let mut msg = DynamicMessage::new(types["shop.Order"].clone()).unwrap();
        msg.set("card", Value::String("visa".into())).unwrap();
        msg.set("cash", Value::Bool(true)).unwrap();
        assert!(msg.get("card").is_none());
        assert_eq!(msg.get("cash"), Some(&Value::Bool(true)));
    }

    #[test]
    fn unknown_fields_are_kept_and_reencoded() {
        let types = schema("proto3");
        let order = &types["shop.Order"];
        let mut w = WireWriter::new();
        w.write_varint_field(1, 7);
        w.write_str_field(99, "from the future");
        let msg = order.decode(w.as_slice()).unwrap();
        assert!(msg.has_unknown_fields());
        assert_eq!(msg.unknown_fields()[0].number, 99);
        assert_eq!(msg.encode().unwrap(), w.into_inner());
    }

    #[test]
    fn wire_type_mismatch_is_reported() {
        let types = schema("proto3");
        let mut w = WireWriter::new();
        w.write_str_field(1, "not a varint");
        let err = types["shop.Order"].decode(w.as_slice()).unwrap_err();
        assert_eq!(
            err,
            CodecError::WireTypeMismatch {
                field: "id".into(),
                expected: 0,
                actual: 2
            }
        );
    }

    #[test]
    fn set_rejects_wrong_shape() {
        let types = schema("proto3");
        let mut msg = DynamicMessage::new(types["shop.Order"].clone()).unwrap();
        assert!(matches!(
            msg.set("id", Value::String("x".into())),
            Err(CodecError::InvalidValue { .. })
        ));
        assert!(matches!(
            msg.set("nope", Value::Bool(true)),
            Err(CodecError::UnknownField { .. })
        ));
    }

    #[test]
    fn enum_is_not_a_message() {
        let types = schema("proto3");
        assert!(matches!(
            types["shop.Status"].decode(&[]),
            Err(CodecError::NotAMessage { .. })
        ));
    }

    #[test]
    fn recursion_limit_stops_deep_nesting() {
        let payload = descriptor_set(&[FileBuilder::new("r.proto")
            .package("r")
            .message(MessageBuilder::new("R").field(FieldSpec::message("r", 1, ".r.R")))]);
        let types = decode(&payload).unwrap();
        let mut bytes = Vec::new();
        for _ in 0..(MAX_DEPTH + 5) {
            let mut w = WireWriter::new();
            w.write_bytes_field(1, &bytes);
            bytes = w.into_inner();
        }
        assert_eq!(
            types["r.R"].decode(&bytes).unwrap_err(),
            CodecError::RecursionLimit { limit: MAX_DEPTH }
        );
    }

    #[test]
    fn groups_decode() {
        let payload = descriptor_set(&[FileBuilder::new("g.proto")
            .package("g")
            .syntax("proto2")
            .message(MessageBuilder::new("Outer").field(FieldSpec::group("inner", 1, ".g.Inner")))
            .message(MessageBuilder::new("Inner").field(FieldSpec::scalar("n", 2, ScalarType::Uint32)))]);
        let types = decode(&payload).unwrap();
        let mut w = WireWriter::new();
        w.write_tag(1, WireType::StartGroup);
        w.write_varint_field(2, 5);
        w.write_tag(1, WireType::EndGroup);
        let msg = types["g.Outer"].decode(w.as_slice()).unwrap();
        let inner = msg.get("inner").and_then(Value::as_message).unwrap();
        assert_eq!(inner.get("n"), Some(&Value::U32(5)));
        assert_eq!(msg.encode().unwrap(), w.into_inner());
    }

    #[test]
    fn bytes_display_as_prefixed_hex() {
        assert_eq!(Value::Bytes(vec![0x00, 0xab, 0x10]).to_string(), "0x00ab10");
        assert_eq!(Value::Bytes(Vec::new()).to_string(), "0x");
        let list = Value::List(vec![Value::Bytes(vec![0xff]), Value::Bytes(vec![1])]);
        assert_eq!(list.to_string(), "[0xff, 0x01]");
    }
}
