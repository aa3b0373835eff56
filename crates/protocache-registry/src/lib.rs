//! # protocache-registry
//!
//! Schema side of protocache.
//!
//! - [`decoder`] turns a serialized `FileDescriptorSet` into a name-keyed
//!   mapping of [`TypeDefinition`]s, every cross-reference resolved.
//! - [`store`] keeps the live mapping behind an atomically swapped snapshot.
//! - [`codec`] and [`json`] decode, encode and render messages using only a
//!   [`TypeDefinition`].

pub mod codec;
pub mod decoder;
pub mod descriptor;
#[cfg(any(test, feature = "test-util"))]
pub mod fixture;
pub mod json;
pub mod store;
pub mod wire;

pub use codec::{DynamicMessage, UnknownField, Value, MAX_DEPTH};
pub use decoder::{decode, decode_pool, java_class_names};
pub use descriptor::{
    DescriptorPool, EnumValue, FieldDefinition, FieldType, FileInfo, Label, ScalarType, Syntax,
    TypeDefinition, TypeKind,
};
pub use store::{DescriptorStore, Snapshot};
pub use wire::WireType;
