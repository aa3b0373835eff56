//! Descriptor-set decoder.
//!
//! Parses a serialized `google.protobuf.FileDescriptorSet` into a
//! [`DescriptorPool`]. Decoding runs in two passes:
//!
//! 1. **Framing**: walk the payload into raw file/message/enum/field
//!    records. Only the descriptor fields protocache needs are kept; every
//!    other field (options, services, source info…) is skipped by wire type.
//! 2. **Resolution**: register every message and enum under its
//!    fully-qualified name, then resolve each field's `type_name` against the
//!    whole payload. Declaration order across files does not matter.
//!
//! Any failure aborts the whole payload; nothing partial is returned.

use protocache_core::error::{DecodeError, WireError};
use std::collections::{HashMap, HashSet};

use crate::descriptor::{
    DescriptorPool, EnumData, EnumValue, FieldData, FieldKind, FileInfo, Label, MessageData,
    PoolInner, ScalarType, Syntax, TypeBody, TypeData, TypeDefinition, TYPE_ENUM, TYPE_GROUP,
    TYPE_MESSAGE,
};
use crate::wire::{WireReader, WireType, MAX_NESTING_DEPTH};

/// Decode a descriptor-set payload into a name-keyed mapping of types.
///
/// Every returned definition has all of its field type references resolved.
pub fn decode(payload: &[u8]) -> Result<HashMap<String, TypeDefinition>, DecodeError> {
    decode_pool(payload).map(DescriptorPool::into_mapping)
}

/// Decode a descriptor-set payload into a [`DescriptorPool`].
pub fn decode_pool(payload: &[u8]) -> Result<DescriptorPool, DecodeError> {
    let files = parse_descriptor_set(payload)?;
    PoolBuilder::default().build(files)
}

/// Re-key a decoded mapping by Java class name (see
/// [`TypeDefinition::java_class_name`]).
pub fn java_class_names(
    mapping: HashMap<String, TypeDefinition>,
) -> HashMap<String, TypeDefinition> {
    mapping
        .into_values()
        .map(|def| (def.java_class_name(), def))
        .collect()
}

// ─── Pass 1: framing ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct RawFile {
    name: String,
    package: String,
    dependencies: Vec<String>,
    syntax: Option<String>,
    java_package: Option<String>,
    messages: Vec<RawMessage>,
    enums: Vec<RawEnum>,
}

#[derive(Debug, Default)]
struct RawMessage {
    name: String,
    fields: Vec<RawField>,
    nested: Vec<RawMessage>,
    enums: Vec<RawEnum>,
    oneofs: Vec<String>,
    map_entry: bool,
}

#[derive(Debug, Default)]
struct RawField {
    name: String,
    number: i32,
    label: i32,
    ty: i32,
    type_name: Option<String>,
    json_name: Option<String>,
    packed: Option<bool>,
    oneof_index: Option<i32>,
    proto3_optional: bool,
}

#[derive(Debug, Default)]
struct RawEnum {
    name: String,
    values: Vec<EnumValue>,
}

fn expect_wire(r: &WireReader<'_>, actual: WireType, expected: WireType) -> Result<(), WireError> {
    if actual == expected {
        Ok(())
    } else {
        Err(WireError::InvalidWireType {
            wire_type: actual.as_u8(),
            offset: r.offset(),
        })
    }
}

fn read_string(r: &mut WireReader<'_>, wt: WireType) -> Result<String, WireError> {
    expect_wire(r, wt, WireType::Len)?;
    Ok(r.read_str()?.to_owned())
}

fn read_int32(r: &mut WireReader<'_>, wt: WireType) -> Result<i32, WireError> {
    expect_wire(r, wt, WireType::Varint)?;
    Ok(r.read_varint()? as i32)
}

fn read_bool(r: &mut WireReader<'_>, wt: WireType) -> Result<bool, WireError> {
    expect_wire(r, wt, WireType::Varint)?;
    Ok(r.read_varint()? != 0)
}

fn read_nested<'a>(r: &mut WireReader<'a>, wt: WireType) -> Result<WireReader<'a>, WireError> {
    expect_wire(r, wt, WireType::Len)?;
    r.read_nested()
}

fn parse_descriptor_set(payload: &[u8]) -> Result<Vec<RawFile>, WireError> {
    let mut r = WireReader::new(payload);
    let mut files = Vec::new();
    while !r.is_empty() {
        let (number, wt) = r.read_tag()?;
        match number {
            1 => {
                let mut sub = read_nested(&mut r, wt)?;
                files.push(parse_file(&mut sub)?);
            }
            _ => {
                r.skip_field(number, wt)?;
            }
        }
    }
    Ok(files)
}

fn parse_file(r: &mut WireReader<'_>) -> Result<RawFile, WireError> {
    let mut file = RawFile::default();
    while !r.is_empty() {
        let (number, wt) = r.read_tag()?;
        match number {
            1 => file.name = read_string(r, wt)?,
            2 => file.package = read_string(r, wt)?,
            3 => file.dependencies.push(read_string(r, wt)?),
            4 => file.messages.push(parse_message(&mut read_nested(r, wt)?, 0)?),
            5 => file.enums.push(parse_enum(&mut read_nested(r, wt)?)?),
            8 => file.java_package = parse_file_options(&mut read_nested(r, wt)?)?,
            12 => file.syntax = Some(read_string(r, wt)?),
            _ => {
                r.skip_field(number, wt)?;
            }
        }
    }
    Ok(file)
}

/// `FileOptions.java_package` (field 1); everything else is skipped.
fn parse_file_options(r: &mut WireReader<'_>) -> Result<Option<String>, WireError> {
    let mut java_package = None;
    while !r.is_empty() {
        let (number, wt) = r.read_tag()?;
        match number {
            1 => java_package = Some(read_string(r, wt)?),
            _ => {
                r.skip_field(number, wt)?;
            }
        }
    }
    Ok(java_package)
}

fn parse_message(r: &mut WireReader<'_>, depth: usize) -> Result<RawMessage, WireError> {
    if depth >= MAX_NESTING_DEPTH {
        return Err(WireError::NestingTooDeep {
            limit: MAX_NESTING_DEPTH,
        });
    }
    let mut msg = RawMessage::default();
    while !r.is_empty() {
        let (number, wt) = r.read_tag()?;
        match number {
            1 => msg.name = read_string(r, wt)?,
            2 => msg.fields.push(parse_field(&mut read_nested(r, wt)?)?),
            3 => msg.nested.push(parse_message(&mut read_nested(r, wt)?, depth + 1)?),
            4 => msg.enums.push(parse_enum(&mut read_nested(r, wt)?)?),
            7 => msg.map_entry = parse_message_options(&mut read_nested(r, wt)?)?,
            8 => msg.oneofs.push(parse_oneof(&mut read_nested(r, wt)?)?),
            _ => {
                r.skip_field(number, wt)?;
            }
        }
    }
    Ok(msg)
}

/// `MessageOptions.map_entry` (field 7).
fn parse_message_options(r: &mut WireReader<'_>) -> Result<bool, WireError> {
    let mut map_entry = false;
    while !r.is_empty() {
        let (number, wt) = r.read_tag()?;
        match number {
            7 => map_entry = read_bool(r, wt)?,
            _ => {
                r.skip_field(number, wt)?;
            }
        }
    }
    Ok(map_entry)
}

fn parse_oneof(r: &mut WireReader<'_>) -> Result<String, WireError> {
    let mut name = String::new();
    while !r.is_empty() {
        let (number, wt) = r.read_tag()?;
        match number {
            1 => name = read_string(r, wt)?,
            _ => {
                r.skip_field(number, wt)?;
            }
        }
    }
    Ok(name)
}

fn parse_field(r: &mut WireReader<'_>) -> Result<RawField, WireError> {
    let mut field = RawField::default();
    while !r.is_empty() {
        let (number, wt) = r.read_tag()?;
        match number {
            1 => field.name = read_string(r, wt)?,
            3 => field.number = read_int32(r, wt)?,
            4 => field.label = read_int32(r, wt)?,
            5 => field.ty = read_int32(r, wt)?,
            6 => field.type_name = Some(read_string(r, wt)?),
            8 => field.packed = parse_field_options(&mut read_nested(r, wt)?)?,
            9 => field.oneof_index = Some(read_int32(r, wt)?),
            10 => field.json_name = Some(read_string(r, wt)?),
            17 => field.proto3_optional = read_bool(r, wt)?,
            _ => {
                r.skip_field(number, wt)?;
            }
        }
    }
    Ok(field)
}

/// `FieldOptions.packed` (field 2).
fn parse_field_options(r: &mut WireReader<'_>) -> Result<Option<bool>, WireError> {
    let mut packed = None;
    while !r.is_empty() {
        let (number, wt) = r.read_tag()?;
        match number {
            2 => packed = Some(read_bool(r, wt)?),
            _ => {
                r.skip_field(number, wt)?;
            }
        }
    }
    Ok(packed)
}

fn parse_enum(r: &mut WireReader<'_>) -> Result<RawEnum, WireError> {
    let mut e = RawEnum::default();
    while !r.is_empty() {
        let (number, wt) = r.read_tag()?;
        match number {
            1 => e.name = read_string(r, wt)?,
            2 => e.values.push(parse_enum_value(&mut read_nested(r, wt)?)?),
            _ => {
                r.skip_field(number, wt)?;
            }
        }
    }
    Ok(e)
}

fn parse_enum_value(r: &mut WireReader<'_>) -> Result<EnumValue, WireError> {
    let mut value = EnumValue {
        name: String::new(),
        number: 0,
    };
    while !r.is_empty() {
        let (number, wt) = r.read_tag()?;
        match number {
            1 => value.name = read_string(r, wt)?,
            2 => value.number = read_int32(r, wt)?,
            _ => {
                r.skip_field(number, wt)?;
            }
        }
    }
    Ok(value)
}

// ─── Pass 2: registration + resolution ───────────────────────────────────────

/// A registered message whose fields still carry unresolved type names.
struct PendingMessage {
    index: usize,
    fields: Vec<RawField>,
    oneofs: Vec<String>,
    map_entry: bool,
}

#[derive(Default)]
struct PoolBuilder {
    files: Vec<FileInfo>,
    types: Vec<TypeData>,
    names: HashMap<String, usize>,
    pending: Vec<PendingMessage>,
}

fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{scope}.{name}")
    }
}

fn malformed(reason: String) -> DecodeError {
    DecodeError::MalformedPayload { reason }
}

impl PoolBuilder {
    fn build(mut self, raw_files: Vec<RawFile>) -> Result<DescriptorPool, DecodeError> {
        let mut file_names = HashSet::new();
        for raw in &raw_files {
            if !file_names.insert(raw.name.clone()) {
                return Err(DecodeError::DuplicateDefinition {
                    name: raw.name.clone(),
                });
            }
        }
        // Every import must be part of the same payload.
        for raw in &raw_files {
            if let Some(missing) = raw.dependencies.iter().find(|d| !file_names.contains(*d)) {
                return Err(DecodeError::UnresolvedReference {
                    type_name: missing.clone(),
                    referenced_by: raw.name.clone(),
                });
            }
        }

        for raw in raw_files {
            let file = self.files.len();
            self.files.push(FileInfo {
                name: raw.name,
                package: raw.package.clone(),
                dependencies: raw.dependencies,
                syntax: raw.syntax.as_deref().map(Syntax::parse).unwrap_or_default(),
                java_package: raw.java_package,
            });
            for e in raw.enums {
                self.register_enum(file, &raw.package, e)?;
            }
            for m in raw.messages {
                self.register_message(file, &raw.package, m)?;
            }
        }

        for pending in std::mem::take(&mut self.pending) {
            let data = self.resolve_message(&pending)?;
            self.types[pending.index].body = TypeBody::Message(data);
        }

        Ok(DescriptorPool::from_inner(PoolInner {
            files: self.files,
            types: self.types,
            names: self.names,
        }))
    }

    fn register(&mut self, file: usize, full_name: String, body: TypeBody) -> Result<usize, DecodeError> {
        if self.names.contains_key(&full_name) {
            return Err(DecodeError::DuplicateDefinition { name: full_name });
        }
        let index = self.types.len();
        self.names.insert(full_name.clone(), index);
        self.types.push(TypeData {
            full_name,
            file,
            body,
        });
        Ok(index)
    }

    fn register_enum(&mut self, file: usize, scope: &str, raw: RawEnum) -> Result<(), DecodeError> {
        let full_name = qualify(scope, &raw.name);
        self.register(file, full_name, TypeBody::Enum(EnumData { values: raw.values }))?;
        Ok(())
    }

    fn register_message(&mut self, file: usize, scope: &str, raw: RawMessage) -> Result<(), DecodeError> {
        let full_name = qualify(scope, &raw.name);
        // Placeholder body until every name in the payload is known.
        let index = self.register(file, full_name.clone(), TypeBody::Message(MessageData::default()))?;
        for e in raw.enums {
            self.register_enum(file, &full_name, e)?;
        }
        for nested in raw.nested {
            self.register_message(file, &full_name, nested)?;
        }
        self.pending.push(PendingMessage {
            index,
            fields: raw.fields,
            oneofs: raw.oneofs,
            map_entry: raw.map_entry,
        });
        Ok(())
    }

    /// Protobuf scoping: a leading `.` means fully qualified; otherwise the
    /// name is tried in the innermost scope first, then each enclosing one.
    fn lookup(&self, type_name: &str, scope: &str) -> Option<usize> {
        if let Some(absolute) = type_name.strip_prefix('.') {
            return self.names.get(absolute).copied();
        }
        let mut scope = scope;
        loop {
            if let Some(&idx) = self.names.get(&qualify(scope, type_name)) {
                return Some(idx);
            }
            if scope.is_empty() {
                return None;
            }
            scope = scope.rsplit_once('.').map(|(outer, _)| outer).unwrap_or("");
        }
    }

    fn resolve_message(&self, pending: &PendingMessage) -> Result<MessageData, DecodeError> {
        let owner = self.types[pending.index].full_name.as_str();
        let mut fields = Vec::with_capacity(pending.fields.len());

        for raw in &pending.fields {
            if raw.number <= 0 {
                return Err(malformed(format!(
                    "field '{}' of '{owner}' has invalid number {}",
                    raw.name, raw.number
                )));
            }
            let oneof = match raw.oneof_index {
                None => None,
                Some(i) if i >= 0 && (i as usize) < pending.oneofs.len() => Some(i as usize),
                Some(i) => {
                    return Err(malformed(format!(
                        "field '{}' of '{owner}' has oneof index {i} out of range",
                        raw.name
                    )))
                }
            };
            fields.push(FieldData {
                name: raw.name.clone(),
                json_name: raw.json_name.clone().unwrap_or_else(|| json_name(&raw.name)),
                number: raw.number as u32,
                label: match raw.label {
                    2 => Label::Required,
                    3 => Label::Repeated,
                    _ => Label::Optional,
                },
                kind: self.resolve_kind(raw, owner)?,
                packed: raw.packed,
                oneof,
                proto3_optional: raw.proto3_optional,
            });
        }

        fields.sort_by_key(|f| f.number);
        let mut by_number = HashMap::with_capacity(fields.len());
        let mut by_name = HashMap::with_capacity(fields.len());
        for (i, f) in fields.iter().enumerate() {
            if by_number.insert(f.number, i).is_some() {
                return Err(malformed(format!(
                    "field number {} is used twice in '{owner}'",
                    f.number
                )));
            }
            by_name.insert(f.name.clone(), i);
        }

        Ok(MessageData {
            fields,
            oneofs: pending.oneofs.clone(),
            map_entry: pending.map_entry,
            by_number,
            by_name,
        })
    }

    fn resolve_kind(&self, raw: &RawField, owner: &str) -> Result<FieldKind, DecodeError> {
        if let Some(scalar) = ScalarType::from_type_code(raw.ty) {
            return Ok(FieldKind::Scalar(scalar));
        }
        if !matches!(raw.ty, 0 | TYPE_GROUP | TYPE_MESSAGE | TYPE_ENUM) {
            return Err(malformed(format!(
                "field '{}' of '{owner}' has unknown type code {}",
                raw.name, raw.ty
            )));
        }
        let type_name = raw.type_name.as_deref().ok_or_else(|| {
            malformed(format!(
                "field '{}' of '{owner}' has neither a scalar type nor a type name",
                raw.name
            ))
        })?;
        let idx = self
            .lookup(type_name, owner)
            .ok_or_else(|| DecodeError::UnresolvedReference {
                type_name: type_name.trim_start_matches('.').to_string(),
                referenced_by: format!("{owner}.{}", raw.name),
            })?;
        let is_enum = matches!(self.types[idx].body, TypeBody::Enum(_));
        match (raw.ty, is_enum) {
            (TYPE_ENUM, true) | (0, true) => Ok(FieldKind::Enum(idx)),
            (TYPE_MESSAGE, false) | (0, false) => Ok(FieldKind::Message(idx)),
            (TYPE_GROUP, false) => Ok(FieldKind::Group(idx)),
            _ => Err(malformed(format!(
                "field '{}' of '{owner}' declares type code {} but '{}' is {}",
                raw.name,
                raw.ty,
                self.types[idx].full_name,
                if is_enum { "an enum" } else { "a message" }
            ))),
        }
    }
}

/// protoc's default JSON name: drop underscores, upper-case the next letter.
fn json_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = false;
    for c in name.chars() {
        if c == '_' {
            upper = true;
        } else if upper {
            out.extend(c.to_uppercase());
            upper = false;
        } else {
            out.push(c);
        }
    }
    out
}
