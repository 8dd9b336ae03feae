//! Schema source rendering.
//!
//! Turns an admitted [`DescriptorRecord`] back into `.proto` text. Output
//! is always proto2 syntax and covers the constructs the descriptor model
//! keeps: imports, package, enums, messages with nested types, oneofs, a
//! single extension range, and extensions. Anything the renderer cannot
//! express faithfully fails with [`Error::UnsupportedSchemaFeature`] rather
//! than being dropped.
//!
//! ## Extensibility
//!
//! The [`DescriptorVisitor`] trait walks the same tree for callers that
//! want something other than source text (counts, indexes, and so on).

mod visitor;

use crate::descriptor::{DescriptorRecord, EnumNode, FieldNode, FieldType, MessageNode};
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::MAX_FIELD_NUMBER;

pub use visitor::{walk, DescriptorVisitor, StatsVisitor};

/// Configuration for rendering
#[derive(Debug, Clone)]
pub struct RenderConfig {
    /// Indentation string (default: 2 spaces)
    pub indent_str: String,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            indent_str: "  ".to_string(),
        }
    }
}

impl RenderConfig {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the indentation string
    pub fn indent_str(mut self, s: impl Into<String>) -> Self {
        self.indent_str = s.into();
        self
    }
}

/// Renders registry entries to schema source
#[derive(Debug, Clone, Default)]
pub struct Renderer {
    config: RenderConfig,
}

impl Renderer {
    /// Creates a renderer with the given configuration
    pub fn new(config: RenderConfig) -> Self {
        Self { config }
    }

    /// Render the registry entry for `record`'s path.
    ///
    /// Only admitted state is rendered: when another record with the same
    /// path was admitted first, that record's text is produced. Fails with
    /// [`Error::NotAdmitted`] if nothing holds the path.
    pub fn render(&self, record: &DescriptorRecord, registry: &Registry) -> Result<String> {
        let entry = registry
            .get(&record.path)
            .ok_or_else(|| Error::not_admitted(&record.path))?;

        let mut writer = LineWriter::new(&self.config);
        writer.write_file(entry)?;
        Ok(writer.finish())
    }
}

/// Render `record` with the default configuration
pub fn render(record: &DescriptorRecord, registry: &Registry) -> Result<String> {
    Renderer::default().render(record, registry)
}

/// Accumulates indented output lines
struct LineWriter<'a> {
    config: &'a RenderConfig,
    lines: Vec<String>,
    indent_level: usize,
}

impl<'a> LineWriter<'a> {
    fn new(config: &'a RenderConfig) -> Self {
        Self {
            config,
            lines: Vec::new(),
            indent_level: 0,
        }
    }

    fn finish(self) -> String {
        self.lines.join("\n")
    }

    fn indent(&mut self) {
        self.indent_level += 1;
    }

    fn dedent(&mut self) {
        self.indent_level = self.indent_level.saturating_sub(1);
    }

    fn line(&mut self, s: impl AsRef<str>) {
        let mut line = self.config.indent_str.repeat(self.indent_level);
        line.push_str(s.as_ref());
        self.lines.push(line);
    }

    fn blank(&mut self) {
        self.lines.push(String::new());
    }

    fn write_file(&mut self, record: &DescriptorRecord) -> Result<()> {
        self.line("syntax = \"proto2\";");
        self.blank();

        for import in &record.imports {
            self.line(format!("import \"{}\";", import));
        }

        if !record.package.is_empty() {
            self.line(format!("package {};", record.package));
            self.blank();
        }

        for enum_type in &record.enums {
            self.write_enum(enum_type);
        }

        for message in &record.messages {
            self.write_message(message)?;
        }

        self.write_extensions(&record.extensions)
    }

    fn write_enum(&mut self, enum_type: &EnumNode) {
        self.line(format!("enum {} {{", enum_type.name));
        self.indent();
        for value in &enum_type.values {
            self.line(format!("{} = {};", value.name, value.number));
        }
        self.dedent();
        self.line("}");
    }

    fn write_message(&mut self, message: &MessageNode) -> Result<()> {
        self.line(format!("message {} {{", message.name));
        self.indent();

        for enum_type in &message.enums {
            self.write_enum(enum_type);
        }

        for nested in &message.messages {
            self.write_message(nested)?;
        }

        let oneof_of = |field: &FieldNode| {
            field
                .oneof_index
                .and_then(|i| usize::try_from(i).ok())
                .filter(|&i| i < message.oneofs.len())
        };

        for field in message.fields.iter().filter(|f| oneof_of(f).is_none()) {
            self.line(field_line(field, false)?);
        }

        for (index, oneof) in message.oneofs.iter().enumerate() {
            self.line(format!("oneof {} {{", oneof.name));
            self.indent();
            for field in message.fields.iter().filter(|f| oneof_of(f) == Some(index)) {
                self.line(field_line(field, true)?);
            }
            self.dedent();
            self.line("}");
        }

        match message.extension_ranges.as_slice() {
            [] => {}
            [range] => {
                let end = range.end.min(MAX_FIELD_NUMBER as i32);
                self.line(format!("extensions {} to {};", range.start, end));
            }
            ranges => {
                return Err(Error::unsupported(format!(
                    "message '{}' declares {} extension ranges",
                    message.name,
                    ranges.len()
                )));
            }
        }

        self.write_extensions(&message.extensions)?;

        self.dedent();
        self.line("}");
        self.blank();
        Ok(())
    }

    /// One `extend` block per extendee, in first-seen order
    fn write_extensions(&mut self, extensions: &[FieldNode]) -> Result<()> {
        let mut groups: Vec<(&str, Vec<&FieldNode>)> = Vec::new();
        for extension in extensions {
            let extendee = extension.extendee.as_deref().unwrap_or_default();
            match groups.iter_mut().find(|(name, _)| *name == extendee) {
                Some((_, members)) => members.push(extension),
                None => groups.push((extendee, vec![extension])),
            }
        }

        for (extendee, members) in groups {
            self.line(format!("extend {} {{", extendee));
            self.indent();
            for extension in members {
                self.line(field_line(extension, false)?);
            }
            self.dedent();
            self.line("}");
        }

        Ok(())
    }
}

/// A single field declaration, without indentation
fn field_line(field: &FieldNode, in_oneof: bool) -> Result<String> {
    let label = field.label.keyword().ok_or_else(|| {
        Error::unsupported(format!(
            "field '{}' has unrecognized label {:?}",
            field.name, field.label
        ))
    })?;

    let mut parts: Vec<String> = Vec::new();
    if !in_oneof {
        parts.push(label.to_string());
    }

    parts.push(match &field.field_type {
        FieldType::Scalar(scalar) => scalar.keyword().to_string(),
        FieldType::Message(name) | FieldType::Enum(name) => name.clone(),
        FieldType::Group(_) => {
            return Err(Error::unsupported(format!("field '{}' is a group", field.name)));
        }
        FieldType::Unrecognized(value) => {
            return Err(Error::unsupported(format!(
                "field '{}' has unrecognized type {}",
                field.name, value
            )));
        }
    });

    parts.push(field.name.clone());
    parts.push("=".to_string());
    parts.push(field.number.to_string());

    let mut options = Vec::new();
    // Text defaults are quoted so the output parses; the descriptor stores them bare
    if let Some(default) = field.default_value.as_deref().filter(|d| !d.is_empty()) {
        let formatted = if field.field_type.is_string() {
            format!("\"{}\"", escape_string(default))
        } else if field.field_type.is_bytes() {
            // Stored already C-escaped
            format!("\"{}\"", default)
        } else {
            default.to_string()
        };
        options.push(format!("default = {}", formatted));
    }
    if field.deprecated {
        options.push("deprecated = true".to_string());
    }
    if field.packed {
        options.push("packed = true".to_string());
    }
    if !options.is_empty() {
        parts.push(format!("[{}]", options.join(", ")));
    }

    Ok(format!("{};", parts.join(" ")))
}

/// Escape a string for proto syntax
fn escape_string(s: &str) -> String {
    let mut result = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            '\r' => result.push_str("\\r"),
            '\t' => result.push_str("\\t"),
            _ if c.is_ascii_control() => {
                result.push_str(&format!("\\x{:02x}", c as u8));
            }
            _ => result.push(c),
        }
    }
    result
}
