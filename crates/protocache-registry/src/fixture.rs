//! In-process `FileDescriptorSet` builders for tests.
//!
//! Enabled by `cfg(test)` or the `test-util` feature so downstream crates
//! can build payloads without protoc.

use crate::descriptor::{ScalarType, TYPE_ENUM, TYPE_GROUP, TYPE_MESSAGE};
use crate::wire::WireWriter;

#[derive(Debug, Clone)]
pub struct FieldSpec {
    name: String,
    number: i32,
    label: i32,
    ty: i32,
    type_name: Option<String>,
    packed: Option<bool>,
    oneof_index: Option<i32>,
}

impl FieldSpec {
    fn new(name: &str, number: i32, ty: i32, type_name: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            number,
            label: 1,
            ty,
            type_name: type_name.map(str::to_string),
            packed: None,
            oneof_index: None,
        }
    }

    pub fn scalar(name: &str, number: i32, ty: ScalarType) -> Self {
        Self::new(name, number, ty.type_code(), None)
    }

    pub fn message(name: &str, number: i32, type_name: &str) -> Self {
        Self::new(name, number, TYPE_MESSAGE, Some(type_name))
    }

    pub fn group(name: &str, number: i32, type_name: &str) -> Self {
        Self::new(name, number, TYPE_GROUP, Some(type_name))
    }

    pub fn enumeration(name: &str, number: i32, type_name: &str) -> Self {
        Self::new(name, number, TYPE_ENUM, Some(type_name))
    }

    pub fn repeated(mut self) -> Self {
        self.label = 3;
        self
    }

    pub fn required(mut self) -> Self {
        self.label = 2;
        self
    }

    pub fn packed(mut self, packed: bool) -> Self {
        self.packed = Some(packed);
        self
    }

    pub fn oneof(mut self, index: i32) -> Self {
        self.oneof_index = Some(index);
        self
    }

    fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.write_str_field(1, &self.name);
        w.write_varint_field(3, self.number as i64 as u64);
        w.write_varint_field(4, self.label as u64);
        w.write_varint_field(5, self.ty as u64);
        if let Some(type_name) = &self.type_name {
            w.write_str_field(6, type_name);
        }
        if let Some(packed) = self.packed {
            let mut opts = WireWriter::new();
            opts.write_varint_field(2, packed as u64);
            w.write_bytes_field(8, opts.as_slice());
        }
        if let Some(i) = self.oneof_index {
            w.write_varint_field(9, i as u64);
        }
        w.into_inner()
    }
}

#[derive(Debug, Clone)]
pub struct EnumBuilder {
    name: String,
    values: Vec<(String, i32)>,
}

impl EnumBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            values: Vec::new(),
        }
    }

    pub fn value(mut self, name: &str, number: i32) -> Self {
        self.values.push((name.to_string(), number));
        self
    }

    fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.write_str_field(1, &self.name);
        for (name, number) in &self.values {
            let mut v = WireWriter::new();
            v.write_str_field(1, name);
            v.write_varint_field(2, *number as i64 as u64);
            w.write_bytes_field(2, v.as_slice());
        }
        w.into_inner()
    }
}

#[derive(Debug, Clone)]
pub struct MessageBuilder {
    name: String,
    fields: Vec<FieldSpec>,
    nested: Vec<MessageBuilder>,
    enums: Vec<EnumBuilder>,
    oneofs: Vec<String>,
    map_entry: bool,
}

impl MessageBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fields: Vec::new(),
            nested: Vec::new(),
            enums: Vec::new(),
            oneofs: Vec::new(),
            map_entry: false,
        }
    }

    /// Synthetic map entry `<Name>Entry { key = 1; value = 2; }`.
    pub fn map_entry(name: &str, key: FieldSpec, value: FieldSpec) -> Self {
        let mut entry = Self::new(name).field(key).field(value);
        entry.map_entry = true;
        entry
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn nested(mut self, msg: MessageBuilder) -> Self {
        self.nested.push(msg);
        self
    }

    pub fn enumeration(mut self, e: EnumBuilder) -> Self {
        self.enums.push(e);
        self
    }

    pub fn oneof(mut self, name: &str) -> Self {
        self.oneofs.push(name.to_string());
        self
    }

    fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.write_str_field(1, &self.name);
        for f in &self.fields {
            w.write_bytes_field(2, &f.encode());
        }
        for m in &self.nested {
            w.write_bytes_field(3, &m.encode());
        }
        for e in &self.enums {
            w.write_bytes_field(4, &e.encode());
        }
        if self.map_entry {
            let mut opts = WireWriter::new();
            opts.write_varint_field(7, 1);
            w.write_bytes_field(7, opts.as_slice());
        }
        for o in &self.oneofs {
            let mut decl = WireWriter::new();
            decl.write_str_field(1, o);
            w.write_bytes_field(8, decl.as_slice());
        }
        w.into_inner()
    }
}

#[derive(Debug, Clone)]
pub struct FileBuilder {
    name: String,
    package: String,
    dependencies: Vec<String>,
    syntax: Option<String>,
    java_package: Option<String>,
    messages: Vec<MessageBuilder>,
    enums: Vec<EnumBuilder>,
}

impl FileBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            package: String::new(),
            dependencies: Vec::new(),
            syntax: None,
            java_package: None,
            messages: Vec::new(),
            enums: Vec::new(),
        }
    }

    pub fn package(mut self, package: &str) -> Self {
        self.package = package.to_string();
        self
    }

    pub fn dependency(mut self, file: &str) -> Self {
        self.dependencies.push(file.to_string());
        self
    }

    pub fn syntax(mut self, syntax: &str) -> Self {
        self.syntax = Some(syntax.to_string());
        self
    }

    pub fn java_package(mut self, java_package: &str) -> Self {
        self.java_package = Some(java_package.to_string());
        self
    }

    pub fn message(mut self, msg: MessageBuilder) -> Self {
        self.messages.push(msg);
        self
    }

    pub fn enumeration(mut self, e: EnumBuilder) -> Self {
        self.enums.push(e);
        self
    }

    fn encode(&self) -> Vec<u8> {
        let mut w = WireWriter::new();
        w.write_str_field(1, &self.name);
        if !self.package.is_empty() {
            w.write_str_field(2, &self.package);
        }
        for d in &self.dependencies {
            w.write_str_field(3, d);
        }
        for m in &self.messages {
            w.write_bytes_field(4, &m.encode());
        }
        for e in &self.enums {
            w.write_bytes_field(5, &e.encode());
        }
        if let Some(java_package) = &self.java_package {
            let mut opts = WireWriter::new();
            opts.write_str_field(1, java_package);
            w.write_bytes_field(8, opts.as_slice());
        }
        if let Some(syntax) = &self.syntax {
            w.write_str_field(12, syntax);
        }
        w.into_inner()
    }
}

/// Serialize files into a `FileDescriptorSet` payload.
pub fn descriptor_set(files: &[FileBuilder]) -> Vec<u8> {
    let mut w = WireWriter::new();
    for f in files {
        w.write_bytes_field(1, &f.encode());
    }
    w.into_inner()
}

/// `one.proto`: `package test; message One { int64 field_one = 1; }`.
pub fn one_proto() -> Vec<u8> {
    descriptor_set(&[FileBuilder::new("one.proto")
        .package("test")
        .syntax("proto3")
        .message(MessageBuilder::new("One").field(FieldSpec::scalar(
            "field_one",
            1,
            ScalarType::Int64,
        )))])
}
