//! Decoded schema types.
//!
//! Every payload decodes into one immutable [`DescriptorPool`]. A
//! [`TypeDefinition`] is a cheap-clone handle (`Arc` + index) into that pool,
//! and field type references are pool indices resolved once at decode time.
//! Handles from different payloads can live side by side in the store; each
//! keeps its own pool alive.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Source syntax of a schema file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Syntax {
    #[default]
    Proto2,
    Proto3,
    Editions,
}

impl Syntax {
    pub(crate) fn parse(s: &str) -> Self {
        match s {
            "proto3" => Syntax::Proto3,
            "editions" => Syntax::Editions,
            _ => Syntax::Proto2,
        }
    }
}

impl fmt::Display for Syntax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Syntax::Proto2 => "proto2",
            Syntax::Proto3 => "proto3",
            Syntax::Editions => "editions",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Label {
    #[default]
    Optional,
    Required,
    Repeated,
}

/// Protobuf scalar field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Double,
    Float,
    Int64,
    Uint64,
    Int32,
    Fixed64,
    Fixed32,
    Bool,
    String,
    Bytes,
    Uint32,
    Sfixed32,
    Sfixed64,
    Sint32,
    Sint64,
}

pub(crate) const TYPE_GROUP: i32 = 10;
pub(crate) const TYPE_MESSAGE: i32 = 11;
pub(crate) const TYPE_ENUM: i32 = 14;

impl ScalarType {
    /// Map a `FieldDescriptorProto.Type` number to a scalar type.
    /// Group, message and enum codes return `None`.
    pub fn from_type_code(code: i32) -> Option<Self> {
        Some(match code {
            1 => Self::Double,
            2 => Self::Float,
            3 => Self::Int64,
            4 => Self::Uint64,
            5 => Self::Int32,
            6 => Self::Fixed64,
            7 => Self::Fixed32,
            8 => Self::Bool,
            9 => Self::String,
            12 => Self::Bytes,
            13 => Self::Uint32,
            15 => Self::Sfixed32,
            16 => Self::Sfixed64,
            17 => Self::Sint32,
            18 => Self::Sint64,
            _ => return None,
        })
    }

    pub fn type_code(self) -> i32 {
        match self {
            Self::Double => 1,
            Self::Float => 2,
            Self::Int64 => 3,
            Self::Uint64 => 4,
            Self::Int32 => 5,
            Self::Fixed64 => 6,
            Self::Fixed32 => 7,
            Self::Bool => 8,
            Self::String => 9,
            Self::Bytes => 12,
            Self::Uint32 => 13,
            Self::Sfixed32 => 15,
            Self::Sfixed64 => 16,
            Self::Sint32 => 17,
            Self::Sint64 => 18,
        }
    }

    /// Whether repeated fields of this type may use packed encoding.
    pub fn is_packable(self) -> bool {
        !matches!(self, Self::String | Self::Bytes)
    }
}

impl fmt::Display for ScalarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Double => "double",
            Self::Float => "float",
            Self::Int64 => "int64",
            Self::Uint64 => "uint64",
            Self::Int32 => "int32",
            Self::Fixed64 => "fixed64",
            Self::Fixed32 => "fixed32",
            Self::Bool => "bool",
            Self::String => "string",
            Self::Bytes => "bytes",
            Self::Uint32 => "uint32",
            Self::Sfixed32 => "sfixed32",
            Self::Sfixed64 => "sfixed64",
            Self::Sint32 => "sint32",
            Self::Sint64 => "sint64",
        };
        write!(f, "{s}")
    }
}

/// Name/number pair of an enum member.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EnumValue {
    pub name: String,
    pub number: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Message,
    Enum,
}

// ─── Pool internals ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FieldKind {
    Scalar(ScalarType),
    Message(usize),
    Group(usize),
    Enum(usize),
}

#[derive(Debug)]
pub(crate) struct FieldData {
    pub name: String,
    pub json_name: String,
    pub number: u32,
    pub label: Label,
    pub kind: FieldKind,
    pub packed: Option<bool>,
    pub oneof: Option<usize>,
    pub proto3_optional: bool,
}

#[derive(Debug, Default)]
pub(crate) struct MessageData {
    /// Sorted by field number.
    pub fields: Vec<FieldData>,
    pub oneofs: Vec<String>,
    pub map_entry: bool,
    pub by_number: HashMap<u32, usize>,
    pub by_name: HashMap<String, usize>,
}

#[derive(Debug, Default)]
pub(crate) struct EnumData {
    pub values: Vec<EnumValue>,
}

#[derive(Debug)]
pub(crate) enum TypeBody {
    Message(MessageData),
    Enum(EnumData),
}

#[derive(Debug)]
pub(crate) struct TypeData {
    pub full_name: String,
    pub file: usize,
    pub body: TypeBody,
}

/// One schema file of a decoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub package: String,
    pub dependencies: Vec<String>,
    pub syntax: Syntax,
    pub java_package: Option<String>,
}

#[derive(Debug)]
pub(crate) struct PoolInner {
    pub files: Vec<FileInfo>,
    pub types: Vec<TypeData>,
    pub names: HashMap<String, usize>,
}

/// All types decoded from one descriptor-set payload.
#[derive(Debug, Clone)]
pub struct DescriptorPool {
    inner: Arc<PoolInner>,
}

impl DescriptorPool {
    pub(crate) fn from_inner(inner: PoolInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Look up a type of this pool by fully-qualified name.
    pub fn get(&self, full_name: &str) -> Option<TypeDefinition> {
        self.inner
            .names
            .get(full_name)
            .map(|&index| self.definition(index))
    }

    pub fn files(&self) -> &[FileInfo] {
        &self.inner.files
    }

    pub fn len(&self) -> usize {
        self.inner.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.types.is_empty()
    }

    /// Every type of the pool, in declaration order.
    pub fn types(&self) -> impl Iterator<Item = TypeDefinition> + '_ {
        (0..self.inner.types.len()).map(|i| self.definition(i))
    }

    /// Consume the pool into the name-keyed mapping the store ingests.
    pub fn into_mapping(self) -> HashMap<String, TypeDefinition> {
        (0..self.inner.types.len())
            .map(|i| {
                let def = self.definition(i);
                (def.full_name().to_string(), def)
            })
            .collect()
    }

    fn definition(&self, index: usize) -> TypeDefinition {
        TypeDefinition {
            pool: Arc::clone(&self.inner),
            index,
        }
    }
}

// ─── Public handles ──────────────────────────────────────────────────────────

/// A decoded message or enum type.
///
/// Cloning is cheap. Two handles are equal when they point at the same type
/// of the same decoded payload.
#[derive(Clone)]
pub struct TypeDefinition {
    pool: Arc<PoolInner>,
    index: usize,
}

impl TypeDefinition {
    fn data(&self) -> &TypeData {
        &self.pool.types[self.index]
    }

    pub(crate) fn sibling(&self, index: usize) -> TypeDefinition {
        TypeDefinition {
            pool: Arc::clone(&self.pool),
            index,
        }
    }

    pub(crate) fn message_data(&self) -> Option<&MessageData> {
        match &self.data().body {
            TypeBody::Message(m) => Some(m),
            TypeBody::Enum(_) => None,
        }
    }

    /// Package-qualified name, e.g. `test.Outer.Inner`.
    pub fn full_name(&self) -> &str {
        &self.data().full_name
    }

    /// Local name, e.g. `Inner`.
    pub fn name(&self) -> &str {
        let full = self.full_name();
        full.rsplit_once('.').map(|(_, n)| n).unwrap_or(full)
    }

    pub fn file(&self) -> &FileInfo {
        &self.pool.files[self.data().file]
    }

    pub fn package(&self) -> &str {
        &self.file().package
    }

    pub fn syntax(&self) -> Syntax {
        self.file().syntax
    }

    pub fn kind(&self) -> TypeKind {
        match self.data().body {
            TypeBody::Message(_) => TypeKind::Message,
            TypeBody::Enum(_) => TypeKind::Enum,
        }
    }

    pub fn is_message(&self) -> bool {
        self.kind() == TypeKind::Message
    }

    pub fn is_enum(&self) -> bool {
        self.kind() == TypeKind::Enum
    }

    /// Synthetic `*Entry` message generated for a map field.
    pub fn is_map_entry(&self) -> bool {
        self.message_data().map(|m| m.map_entry).unwrap_or(false)
    }

    /// Fields in field-number order. Empty for enums.
    pub fn fields(&self) -> impl ExactSizeIterator<Item = FieldDefinition<'_>> + '_ {
        let fields: &[FieldData] = self
            .message_data()
            .map(|m| m.fields.as_slice())
            .unwrap_or(&[]);
        fields.iter().map(move |data| FieldDefinition { parent: self, data })
    }

    pub fn field_by_number(&self, number: u32) -> Option<FieldDefinition<'_>> {
        let m = self.message_data()?;
        let data = &m.fields[*m.by_number.get(&number)?];
        Some(FieldDefinition { parent: self, data })
    }

    /// Look up a field by its proto name or its JSON name.
    pub fn field_by_name(&self, name: &str) -> Option<FieldDefinition<'_>> {
        let m = self.message_data()?;
        let idx = match m.by_name.get(name) {
            Some(&idx) => idx,
            None => m.fields.iter().position(|f| f.json_name == name)?,
        };
        Some(FieldDefinition {
            parent: self,
            data: &m.fields[idx],
        })
    }

    pub fn oneofs(&self) -> &[String] {
        self.message_data()
            .map(|m| m.oneofs.as_slice())
            .unwrap_or(&[])
    }

    /// Enum members in declaration order. Empty for messages.
    pub fn enum_values(&self) -> &[EnumValue] {
        match &self.data().body {
            TypeBody::Enum(e) => &e.values,
            TypeBody::Message(_) => &[],
        }
    }

    pub fn enum_value_by_name(&self, name: &str) -> Option<&EnumValue> {
        self.enum_values().iter().find(|v| v.name == name)
    }

    pub fn enum_value_by_number(&self, number: i32) -> Option<&EnumValue> {
        self.enum_values().iter().find(|v| v.number == number)
    }

    /// Distinct types referenced by this type's fields, in field order.
    pub fn dependencies(&self) -> Vec<TypeDefinition> {
        let mut seen = Vec::new();
        if let Some(m) = self.message_data() {
            for f in &m.fields {
                let idx = match f.kind {
                    FieldKind::Message(i) | FieldKind::Group(i) | FieldKind::Enum(i) => i,
                    FieldKind::Scalar(_) => continue,
                };
                if !seen.contains(&idx) {
                    seen.push(idx);
                }
            }
        }
        seen.into_iter().map(|i| self.sibling(i)).collect()
    }

    /// Name the type is known by in Java: the file's `java_package` replaces
    /// the proto package prefix. Without the option this is the full name.
    pub fn java_class_name(&self) -> String {
        let file = self.file();
        match file.java_package.as_deref() {
            None | Some("") => self.full_name().to_string(),
            Some(java) if file.package.is_empty() => format!("{java}.{}", self.full_name()),
            Some(java) => self.full_name().replacen(file.package.as_str(), java, 1),
        }
    }
}

impl PartialEq for TypeDefinition {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.pool, &other.pool) && self.index == other.index
    }
}

impl Eq for TypeDefinition {}

impl fmt::Debug for TypeDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDefinition")
            .field("full_name", &self.full_name())
            .field("kind", &self.kind())
            .finish()
    }
}

/// Resolved type of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    Scalar(ScalarType),
    Message(TypeDefinition),
    Group(TypeDefinition),
    Enum(TypeDefinition),
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Scalar(s) => write!(f, "{s}"),
            FieldType::Message(t) | FieldType::Group(t) | FieldType::Enum(t) => {
                write!(f, "{}", t.full_name())
            }
        }
    }
}

/// Borrowed view of one message field.
#[derive(Clone, Copy)]
pub struct FieldDefinition<'a> {
    parent: &'a TypeDefinition,
    pub(crate) data: &'a FieldData,
}

impl<'a> FieldDefinition<'a> {
    pub fn name(&self) -> &'a str {
        &self.data.name
    }

    pub fn json_name(&self) -> &'a str {
        &self.data.json_name
    }

    pub fn number(&self) -> u32 {
        self.data.number
    }

    pub fn label(&self) -> Label {
        self.data.label
    }

    pub fn is_repeated(&self) -> bool {
        self.data.label == Label::Repeated
    }

    pub fn field_type(&self) -> FieldType {
        match self.data.kind {
            FieldKind::Scalar(s) => FieldType::Scalar(s),
            FieldKind::Message(i) => FieldType::Message(self.parent.sibling(i)),
            FieldKind::Group(i) => FieldType::Group(self.parent.sibling(i)),
            FieldKind::Enum(i) => FieldType::Enum(self.parent.sibling(i)),
        }
    }

    /// Message (or group) type of this field, if it has one.
    pub fn message_type(&self) -> Option<TypeDefinition> {
        match self.data.kind {
            FieldKind::Message(i) | FieldKind::Group(i) => Some(self.parent.sibling(i)),
            _ => None,
        }
    }

    pub fn enum_type(&self) -> Option<TypeDefinition> {
        match self.data.kind {
            FieldKind::Enum(i) => Some(self.parent.sibling(i)),
            _ => None,
        }
    }

    /// Repeated field whose element type is a synthetic map entry.
    pub fn is_map(&self) -> bool {
        self.is_repeated()
            && matches!(self.data.kind, FieldKind::Message(i)
                if self.parent.sibling(i).is_map_entry())
    }

    /// Whether a repeated field is written in packed form. An explicit
    /// `[packed = ...]` option wins; otherwise proto3 and editions pack.
    pub fn is_packed(&self) -> bool {
        if !self.is_repeated() {
            return false;
        }
        let packable = match self.data.kind {
            FieldKind::Scalar(s) => s.is_packable(),
            FieldKind::Enum(_) => true,
            _ => false,
        };
        if !packable {
            return false;
        }
        self.data
            .packed
            .unwrap_or(self.parent.syntax() != Syntax::Proto2)
    }

    pub fn oneof_name(&self) -> Option<&'a str> {
        let m = self.parent.message_data()?;
        self.data.oneof.map(|i| m.oneofs[i].as_str())
    }

    pub fn is_proto3_optional(&self) -> bool {
        self.data.proto3_optional
    }

    /// The message this field belongs to.
    pub fn containing_type(&self) -> &'a TypeDefinition {
        self.parent
    }
}

impl fmt::Debug for FieldDefinition<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDefinition")
            .field("name", &self.name())
            .field("number", &self.number())
            .field("label", &self.label())
            .field("type", &self.field_type().to_string())
            .finish()
    }
}
