//! Decoded schema descriptor model.
//!
//! A [`DescriptorRecord`] is the owned, structured form of one embedded
//! `FileDescriptorProto`. Wire decoding is done by `prost`; the generated
//! `prost_types` structs are then folded into the smaller tree below, which
//! keeps exactly what the renderer needs and preserves values the renderer
//! must reject (unknown labels, unknown types, extra extension ranges)
//! instead of normalizing them away.
//!
//! Record identity is the raw byte string it was decoded from, not the
//! decoded tree.

use crate::error::{Error, Result};
use crate::scanner::{RawCandidate, PROTO_SUFFIX};
use bytes::Bytes;
use prost::Message;
use prost_types::field_descriptor_proto::Type;
use prost_types::{
    DescriptorProto, EnumDescriptorProto, FieldDescriptorProto, FileDescriptorProto,
};
use std::hash::{Hash, Hasher};
use std::path::{Component, Path, PathBuf};

/// Path of the meta-schema describing descriptors themselves; never reported
pub const RESERVED_META_PATH: &str = "google/protobuf/descriptor.proto";

/// One decoded schema file
#[derive(Debug, Clone)]
pub struct DescriptorRecord {
    raw: Bytes,
    /// Declared logical file name, e.g. `a/b.proto`
    pub path: String,
    /// Dotted namespace, possibly empty
    pub package: String,
    /// Imported paths in declaration order
    pub imports: Vec<String>,
    /// Top-level enums
    pub enums: Vec<EnumNode>,
    /// Top-level messages
    pub messages: Vec<MessageNode>,
    /// Top-level extensions
    pub extensions: Vec<FieldNode>,
}

impl DescriptorRecord {
    /// Decode a serialized `FileDescriptorProto`
    pub fn decode(raw: impl Into<Bytes>) -> Result<Self> {
        let raw = raw.into();
        let proto = FileDescriptorProto::decode(raw.clone())?;
        Ok(Self::from_proto(raw, proto))
    }

    /// Decode a scanner candidate, rejecting records that are not reportable
    /// schema files (wrong suffix, or the reserved meta-schema)
    pub fn from_candidate(candidate: &RawCandidate) -> Result<Self> {
        let record = Self::decode(candidate.data.clone())?;
        if !record.is_reportable() {
            return Err(Error::not_a_descriptor(record.path));
        }
        Ok(record)
    }

    fn from_proto(raw: Bytes, proto: FileDescriptorProto) -> Self {
        Self {
            raw,
            path: proto.name().to_string(),
            package: proto.package().to_string(),
            imports: proto.dependency,
            enums: proto.enum_type.into_iter().map(EnumNode::from).collect(),
            messages: proto.message_type.into_iter().map(MessageNode::from).collect(),
            extensions: proto.extension.into_iter().map(FieldNode::from).collect(),
        }
    }

    /// The bytes this record was decoded from
    pub fn raw(&self) -> &Bytes {
        &self.raw
    }

    /// Display name: the last segment of the declared path
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Whether this record is a schema file worth reporting
    pub fn is_reportable(&self) -> bool {
        let suffix = std::str::from_utf8(PROTO_SUFFIX).unwrap_or(".proto");
        self.path.ends_with(suffix) && self.path != RESERVED_META_PATH
    }

    /// Decode the raw bytes again into the full `prost_types` message
    pub fn to_proto(&self) -> Result<FileDescriptorProto> {
        Ok(FileDescriptorProto::decode(self.raw.clone())?)
    }

    /// The declared path as a relative filesystem path.
    ///
    /// Fails when the path is absolute or walks out of its root, since
    /// declared paths come straight from untrusted bytes.
    pub fn relative_path(&self) -> Result<PathBuf> {
        let path = Path::new(&self.path);
        let mut out = PathBuf::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => out.push(part),
                Component::CurDir => {}
                _ => return Err(Error::path_traversal(path)),
            }
        }
        if out.as_os_str().is_empty() {
            return Err(Error::path_traversal(path));
        }
        Ok(out)
    }
}

impl PartialEq for DescriptorRecord {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl Eq for DescriptorRecord {}

impl Hash for DescriptorRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

/// A message definition and everything nested in it
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageNode {
    /// Message name
    pub name: String,
    /// Fields in declaration order
    pub fields: Vec<FieldNode>,
    /// Nested messages
    pub messages: Vec<MessageNode>,
    /// Nested enums
    pub enums: Vec<EnumNode>,
    /// Oneof groups; membership is recorded on the fields
    pub oneofs: Vec<OneofDecl>,
    /// Declared extension ranges
    pub extension_ranges: Vec<ExtensionRange>,
    /// Extensions declared inside this message
    pub extensions: Vec<FieldNode>,
}

impl From<DescriptorProto> for MessageNode {
    fn from(message: DescriptorProto) -> Self {
        Self {
            name: message.name().to_string(),
            fields: message.field.into_iter().map(FieldNode::from).collect(),
            messages: message.nested_type.into_iter().map(MessageNode::from).collect(),
            enums: message.enum_type.into_iter().map(EnumNode::from).collect(),
            oneofs: message
                .oneof_decl
                .into_iter()
                .map(|oneof| OneofDecl {
                    name: oneof.name().to_string(),
                })
                .collect(),
            extension_ranges: message
                .extension_range
                .into_iter()
                .map(|range| ExtensionRange {
                    start: range.start(),
                    end: range.end(),
                })
                .collect(),
            extensions: message.extension.into_iter().map(FieldNode::from).collect(),
        }
    }
}

/// A named oneof group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneofDecl {
    /// Group name
    pub name: String,
}

/// Range of field numbers reserved for extensions, end exclusive as encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensionRange {
    /// First number in the range
    pub start: i32,
    /// End of the range as stored in the descriptor
    pub end: i32,
}

/// A field or extension definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldNode {
    /// Field name
    pub name: String,
    /// Field number
    pub number: i32,
    /// Cardinality label
    pub label: Label,
    /// Scalar type or referenced type
    pub field_type: FieldType,
    /// Default value as written in the descriptor
    pub default_value: Option<String>,
    /// `[deprecated = true]`
    pub deprecated: bool,
    /// `[packed = true]`
    pub packed: bool,
    /// Index into the containing message's oneofs
    pub oneof_index: Option<i32>,
    /// Extended message, for extensions only
    pub extendee: Option<String>,
}

impl From<FieldDescriptorProto> for FieldNode {
    fn from(field: FieldDescriptorProto) -> Self {
        let options = field.options.as_ref();
        Self {
            name: field.name().to_string(),
            number: field.number(),
            label: Label::from_raw(field.label),
            field_type: FieldType::from_raw(field.r#type, field.type_name.as_deref()),
            deprecated: options.and_then(|o| o.deprecated).unwrap_or(false),
            packed: options.and_then(|o| o.packed).unwrap_or(false),
            default_value: field.default_value,
            oneof_index: field.oneof_index,
            extendee: field.extendee,
        }
    }
}

/// Field cardinality
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    /// `optional`
    Optional,
    /// `required`
    Required,
    /// `repeated`
    Repeated,
    /// A label number outside the known set
    Unrecognized(i32),
}

impl Label {
    /// Map the raw descriptor value; an absent label is `optional`
    pub fn from_raw(value: Option<i32>) -> Self {
        match value {
            None | Some(1) => Label::Optional,
            Some(2) => Label::Required,
            Some(3) => Label::Repeated,
            Some(other) => Label::Unrecognized(other),
        }
    }

    /// The keyword written before the field type
    pub fn keyword(&self) -> Option<&'static str> {
        match self {
            Label::Optional => Some("optional"),
            Label::Required => Some("required"),
            Label::Repeated => Some("repeated"),
            Label::Unrecognized(_) => None,
        }
    }
}

/// Field type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    /// One of the built-in scalar types
    Scalar(ScalarType),
    /// Fully-qualified message reference
    Message(String),
    /// Fully-qualified enum reference
    Enum(String),
    /// Proto2 group, carrying its type name
    Group(String),
    /// A type number outside the known set
    Unrecognized(i32),
}

impl FieldType {
    /// Map the raw descriptor type number and type name.
    ///
    /// A missing type with a type name is a not-yet-resolved reference; a
    /// missing type without one takes the descriptor default (`double`).
    pub fn from_raw(value: Option<i32>, type_name: Option<&str>) -> Self {
        let type_name = type_name.unwrap_or_default().to_string();
        let Some(value) = value else {
            return if type_name.is_empty() {
                FieldType::Scalar(ScalarType::Double)
            } else {
                FieldType::Message(type_name)
            };
        };

        match Type::try_from(value) {
            Ok(Type::Message) => FieldType::Message(type_name),
            Ok(Type::Enum) => FieldType::Enum(type_name),
            Ok(Type::Group) => FieldType::Group(type_name),
            Ok(scalar) => ScalarType::from_type(scalar)
                .map(FieldType::Scalar)
                .unwrap_or(FieldType::Unrecognized(value)),
            Err(_) => FieldType::Unrecognized(value),
        }
    }

    /// Whether values of this type are written as quoted text
    pub fn is_string(&self) -> bool {
        matches!(self, FieldType::Scalar(ScalarType::String))
    }

    /// Whether values of this type are raw bytes
    pub fn is_bytes(&self) -> bool {
        matches!(self, FieldType::Scalar(ScalarType::Bytes))
    }
}

/// Built-in scalar field types, named after their schema keywords
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
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

impl ScalarType {
    fn from_type(value: Type) -> Option<Self> {
        Some(match value {
            Type::Double => ScalarType::Double,
            Type::Float => ScalarType::Float,
            Type::Int64 => ScalarType::Int64,
            Type::Uint64 => ScalarType::Uint64,
            Type::Int32 => ScalarType::Int32,
            Type::Fixed64 => ScalarType::Fixed64,
            Type::Fixed32 => ScalarType::Fixed32,
            Type::Bool => ScalarType::Bool,
            Type::String => ScalarType::String,
            Type::Bytes => ScalarType::Bytes,
            Type::Uint32 => ScalarType::Uint32,
            Type::Sfixed32 => ScalarType::Sfixed32,
            Type::Sfixed64 => ScalarType::Sfixed64,
            Type::Sint32 => ScalarType::Sint32,
            Type::Sint64 => ScalarType::Sint64,
            Type::Group | Type::Message | Type::Enum => return None,
        })
    }

    /// Schema keyword for this type
    pub fn keyword(&self) -> &'static str {
        match self {
            ScalarType::Double => "double",
            ScalarType::Float => "float",
            ScalarType::Int64 => "int64",
            ScalarType::Uint64 => "uint64",
            ScalarType::Int32 => "int32",
            ScalarType::Fixed64 => "fixed64",
            ScalarType::Fixed32 => "fixed32",
            ScalarType::Bool => "bool",
            ScalarType::String => "string",
            ScalarType::Bytes => "bytes",
            ScalarType::Uint32 => "uint32",
            ScalarType::Sfixed32 => "sfixed32",
            ScalarType::Sfixed64 => "sfixed64",
            ScalarType::Sint32 => "sint32",
            ScalarType::Sint64 => "sint64",
        }
    }
}

/// An enum definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumNode {
    /// Enum name
    pub name: String,
    /// Values in declaration order
    pub values: Vec<EnumValue>,
}

impl From<EnumDescriptorProto> for EnumNode {
    fn from(enum_type: EnumDescriptorProto) -> Self {
        Self {
            name: enum_type.name().to_string(),
            values: enum_type
                .value
                .into_iter()
                .map(|value| EnumValue {
                    name: value.name().to_string(),
                    number: value.number(),
                })
                .collect(),
        }
    }
}

/// One `NAME = NUMBER` enum entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    /// Value name
    pub name: String,
    /// Value number
    pub number: i32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost_types::{FieldOptions, OneofDescriptorProto};

    fn field(name: &str, number: i32, label: i32, ty: Type) -> FieldDescriptorProto {
        FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(number),
            label: Some(label),
            r#type: Some(ty as i32),
            ..Default::default()
        }
    }

    fn sample() -> FileDescriptorProto {
        FileDescriptorProto {
            name: Some("dir/sample.proto".to_string()),
            package: Some("dir.pkg".to_string()),
            dependency: vec!["dir/base.proto".to_string(), "dir/base.proto".to_string()],
            message_type: vec![DescriptorProto {
                name: Some("Outer".to_string()),
                field: vec![
                    FieldDescriptorProto {
                        options: Some(FieldOptions {
                            deprecated: Some(true),
                            ..Default::default()
                        }),
                        default_value: Some("7".to_string()),
                        ..field("count", 1, 2, Type::Int32)
                    },
                    FieldDescriptorProto {
                        type_name: Some(".dir.pkg.Outer.Inner".to_string()),
                        oneof_index: Some(0),
                        ..field("inner", 2, 1, Type::Message)
                    },
                ],
                nested_type: vec![DescriptorProto {
                    name: Some("Inner".to_string()),
                    ..Default::default()
                }],
                oneof_decl: vec![OneofDescriptorProto {
                    name: Some("choice".to_string()),
                    options: None,
                }],
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_decode_builds_tree() {
        let record = DescriptorRecord::decode(sample().encode_to_vec()).unwrap();

        assert_eq!(record.path, "dir/sample.proto");
        assert_eq!(record.name(), "sample.proto");
        assert_eq!(record.package, "dir.pkg");
        assert_eq!(record.imports.len(), 2);

        let outer = &record.messages[0];
        assert_eq!(outer.messages[0].name, "Inner");
        assert_eq!(outer.oneofs[0].name, "choice");

        let count = &outer.fields[0];
        assert_eq!(count.label, Label::Required);
        assert_eq!(count.field_type, FieldType::Scalar(ScalarType::Int32));
        assert_eq!(count.default_value.as_deref(), Some("7"));
        assert!(count.deprecated);
        assert!(!count.packed);

        let inner = &outer.fields[1];
        assert_eq!(inner.field_type, FieldType::Message(".dir.pkg.Outer.Inner".to_string()));
        assert_eq!(inner.oneof_index, Some(0));
    }

    #[test]
    fn test_identity_is_raw_bytes() {
        let bytes = sample().encode_to_vec();
        let a = DescriptorRecord::decode(bytes.clone()).unwrap();
        let b = DescriptorRecord::decode(bytes).unwrap();
        assert_eq!(a, b);

        let mut other = sample();
        other.package = Some("dir.other".to_string());
        let c = DescriptorRecord::decode(other.encode_to_vec()).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_candidate_filter() {
        let mut meta = sample();
        meta.name = Some(RESERVED_META_PATH.to_string());
        let candidate = RawCandidate::new(meta.encode_to_vec().into(), 0..0);
        assert!(matches!(
            DescriptorRecord::from_candidate(&candidate),
            Err(Error::NotADescriptor { .. })
        ));

        let mut text = sample();
        text.name = Some("notes.txt".to_string());
        let candidate = RawCandidate::new(text.encode_to_vec().into(), 0..0);
        assert!(DescriptorRecord::from_candidate(&candidate).is_err());

        let candidate = RawCandidate::new(Bytes::from_static(&[0x0A, 0x05, b'a']), 0..3);
        assert!(matches!(
            DescriptorRecord::from_candidate(&candidate),
            Err(Error::DescriptorParse(_))
        ));
    }

    #[test]
    fn test_unknown_label_and_type_are_preserved() {
        assert_eq!(Label::from_raw(Some(9)), Label::Unrecognized(9));
        assert_eq!(Label::from_raw(None), Label::Optional);
        assert_eq!(FieldType::from_raw(Some(42), None), FieldType::Unrecognized(42));
        assert_eq!(
            FieldType::from_raw(None, Some(".a.B")),
            FieldType::Message(".a.B".to_string())
        );
        assert_eq!(FieldType::from_raw(None, None), FieldType::Scalar(ScalarType::Double));
    }

    #[test]
    fn test_relative_path() {
        let mut record = DescriptorRecord::decode(sample().encode_to_vec()).unwrap();
        assert_eq!(record.relative_path().unwrap(), PathBuf::from("dir/sample.proto"));

        record.path = "../../etc/passwd.proto".to_string();
        assert!(matches!(record.relative_path(), Err(Error::PathTraversal { .. })));

        record.path = "/abs/x.proto".to_string();
        assert!(record.relative_path().is_err());
    }
}
