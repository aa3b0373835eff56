//! `protocache describe`: pretty-print one type definition.

use protocache_registry::{FieldDefinition, FieldType, Label, TypeDefinition};
use std::fmt::Write as _;

pub fn run(def: &TypeDefinition) {
    print!("{}", render(def));
}

pub fn render(def: &TypeDefinition) -> String {
    let mut out = String::new();
    let file = def.file();
    let kind = if def.is_enum() { "enum" } else { "message" };
    let _ = writeln!(out, "{kind} {} ({}, {})", def.full_name(), def.syntax(), file.name);
    if def.java_class_name() != def.full_name() {
        let _ = writeln!(out, "  Java class:  {}", def.java_class_name());
    }

    if def.is_enum() {
        let _ = writeln!(out, "  Values:      {}", def.enum_values().len());
        for v in def.enum_values() {
            let _ = writeln!(out, "    - {} = {}", v.name, v.number);
        }
        return out;
    }

    let _ = writeln!(out, "  Fields:      {}", def.fields().len());
    for field in def.fields() {
        let oneof = field
            .oneof_name()
            .map(|o| format!(" [oneof {o}]"))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "    - {} = {}: {}{}",
            field.name(),
            field.number(),
            type_label(&field),
            oneof
        );
    }
    let deps = def.dependencies();
    if !deps.is_empty() {
        let names: Vec<_> = deps.iter().map(|d| d.full_name()).collect();
        let _ = writeln!(out, "  References:  {}", names.join(", "));
    }
    out
}

fn type_label(field: &FieldDefinition<'_>) -> String {
    if field.is_map() {
        if let Some(entry) = field.message_type() {
            let key = entry.field_by_number(1).map(|f| f.field_type().to_string());
            let value = entry.field_by_number(2).map(|f| f.field_type().to_string());
            if let (Some(k), Some(v)) = (key, value) {
                return format!("map<{k}, {v}>");
            }
        }
    }
    let base = match field.field_type() {
        FieldType::Group(t) => format!("group {}", t.full_name()),
        other => other.to_string(),
    };
    match field.label() {
        Label::Repeated => format!("repeated {base}"),
        Label::Required => format!("required {base}"),
        Label::Optional if field.is_proto3_optional() => format!("optional {base}"),
        Label::Optional => base,
    }
}
