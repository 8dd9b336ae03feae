//! Extensible descriptor tree traversal.
//!
//! [`walk`] drives a [`DescriptorVisitor`] over a record in the same order
//! the renderer writes it.

use crate::descriptor::{DescriptorRecord, EnumNode, FieldNode, MessageNode, OneofDecl};

/// Callbacks invoked while walking a descriptor record.
///
/// Every method has a no-op default, so implementors only override what
/// they care about.
///
/// # Example
///
/// ```
/// use protodig_core::render::{walk, DescriptorVisitor};
/// use protodig_core::descriptor::MessageNode;
///
/// struct MessageNames(Vec<String>);
///
/// impl DescriptorVisitor for MessageNames {
///     fn visit_message(&mut self, message: &MessageNode, _depth: usize) {
///         self.0.push(message.name.clone());
///     }
/// }
/// ```
pub trait DescriptorVisitor {
    /// Called once for the record before anything inside it
    fn visit_file(&mut self, record: &DescriptorRecord) {
        let _ = record;
    }

    /// Called for each message, top-level or nested
    fn visit_message(&mut self, message: &MessageNode, depth: usize) {
        let _ = (message, depth);
    }

    /// Called for each regular field
    fn visit_field(&mut self, field: &FieldNode) {
        let _ = field;
    }

    /// Called for each enum, top-level or nested
    fn visit_enum(&mut self, enum_type: &EnumNode) {
        let _ = enum_type;
    }

    /// Called for each oneof group
    fn visit_oneof(&mut self, oneof: &OneofDecl) {
        let _ = oneof;
    }

    /// Called for each extension, top-level or declared in a message
    fn visit_extension(&mut self, extension: &FieldNode) {
        let _ = extension;
    }
}

/// Walk `record`, calling `visitor` for every element
pub fn walk(record: &DescriptorRecord, visitor: &mut impl DescriptorVisitor) {
    visitor.visit_file(record);
    for enum_type in &record.enums {
        visitor.visit_enum(enum_type);
    }
    for message in &record.messages {
        walk_message(message, 0, visitor);
    }
    for extension in &record.extensions {
        visitor.visit_extension(extension);
    }
}

fn walk_message(message: &MessageNode, depth: usize, visitor: &mut impl DescriptorVisitor) {
    visitor.visit_message(message, depth);
    for enum_type in &message.enums {
        visitor.visit_enum(enum_type);
    }
    for nested in &message.messages {
        walk_message(nested, depth + 1, visitor);
    }
    for field in &message.fields {
        visitor.visit_field(field);
    }
    for oneof in &message.oneofs {
        visitor.visit_oneof(oneof);
    }
    for extension in &message.extensions {
        visitor.visit_extension(extension);
    }
}

/// A visitor that counts the elements of a record
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StatsVisitor {
    /// Number of messages, nested ones included
    pub message_count: usize,
    /// Number of regular fields
    pub field_count: usize,
    /// Number of enums
    pub enum_count: usize,
    /// Number of oneof groups
    pub oneof_count: usize,
    /// Number of extensions
    pub extension_count: usize,
}

impl StatsVisitor {
    /// Count the elements of `record`
    pub fn collect(record: &DescriptorRecord) -> Self {
        let mut stats = Self::default();
        walk(record, &mut stats);
        stats
    }
}

impl DescriptorVisitor for StatsVisitor {
    fn visit_message(&mut self, _message: &MessageNode, _depth: usize) {
        self.message_count += 1;
    }

    fn visit_field(&mut self, _field: &FieldNode) {
        self.field_count += 1;
    }

    fn visit_enum(&mut self, _enum_type: &EnumNode) {
        self.enum_count += 1;
    }

    fn visit_oneof(&mut self, _oneof: &OneofDecl) {
        self.oneof_count += 1;
    }

    fn visit_extension(&mut self, _extension: &FieldNode) {
        self.extension_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;
    use prost_types::{
        DescriptorProto, EnumDescriptorProto, FieldDescriptorProto, FileDescriptorProto,
    };

    fn record() -> DescriptorRecord {
        let field = |name: &str| FieldDescriptorProto {
            name: Some(name.to_string()),
            number: Some(1),
            ..Default::default()
        };
        let proto = FileDescriptorProto {
            name: Some("stats.proto".to_string()),
            enum_type: vec![EnumDescriptorProto::default()],
            message_type: vec![DescriptorProto {
                name: Some("A".to_string()),
                field: vec![field("x"), field("y")],
                nested_type: vec![DescriptorProto {
                    name: Some("B".to_string()),
                    field: vec![field("z")],
                    enum_type: vec![EnumDescriptorProto::default()],
                    ..Default::default()
                }],
                ..Default::default()
            }],
            extension: vec![field("ext")],
            ..Default::default()
        };
        DescriptorRecord::decode(proto.encode_to_vec()).unwrap()
    }

    #[test]
    fn test_stats_visitor() {
        let stats = StatsVisitor::collect(&record());
        assert_eq!(stats.message_count, 2);
        assert_eq!(stats.field_count, 3);
        assert_eq!(stats.enum_count, 2);
        assert_eq!(stats.oneof_count, 0);
        assert_eq!(stats.extension_count, 1);
    }

    #[test]
    fn test_message_depth() {
        struct Depths(Vec<(String, usize)>);
        impl DescriptorVisitor for Depths {
            fn visit_message(&mut self, message: &MessageNode, depth: usize) {
                self.0.push((message.name.clone(), depth));
            }
        }

        let mut depths = Depths(Vec::new());
        walk(&record(), &mut depths);
        assert_eq!(depths.0, vec![("A".to_string(), 0), ("B".to_string(), 1)]);
    }
}
