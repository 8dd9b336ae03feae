//! Error types for the protodig-core library.
//!
//! Errors fall into two groups. Wire and decode failures are recovered
//! locally by the scanner (a bad candidate is simply dropped), while
//! resolution and rendering failures are surfaced to the caller.

use std::collections::BTreeSet;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for protodig operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for all protodig operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Failed to read an input file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A declared schema path would escape the output directory
    #[error("path traversal detected: '{path}' would escape output directory")]
    PathTraversal {
        /// The suspicious path
        path: PathBuf,
    },

    /// The wire reader ran out of bytes in the middle of a value
    #[error("truncated wire data at offset {offset}")]
    Truncated {
        /// Byte offset where the value started
        offset: usize,
    },

    /// Invalid protobuf wire format
    #[error("invalid protobuf wire format at offset {offset}: {details}")]
    InvalidWireFormat {
        /// Byte offset where the error occurred
        offset: usize,
        /// Detailed description of the issue
        details: String,
    },

    /// Candidate bytes did not decode as a FileDescriptorProto
    #[error("failed to parse FileDescriptorProto: {0}")]
    DescriptorParse(#[from] prost::DecodeError),

    /// Candidate decoded, but is not a schema file we report
    #[error("not a schema descriptor: '{path}'")]
    NotADescriptor {
        /// The declared path of the rejected record
        path: String,
    },

    /// Records remain unadmitted after every resolution pass
    #[error(
        "{} imported schema file(s) could not be found: {}",
        .missing.len(),
        join_paths(.missing)
    )]
    UnresolvedDependencies {
        /// Every import path that no input provided
        missing: BTreeSet<String>,
    },

    /// The record uses a construct the renderer cannot express
    #[error("unsupported schema feature: {reason}")]
    UnsupportedSchemaFeature {
        /// What was encountered
        reason: String,
    },

    /// The record's path has no entry in the registry
    #[error("'{path}' was never admitted to the registry; no output produced")]
    NotAdmitted {
        /// Declared path of the record
        path: String,
    },

    /// Linking admitted records into a descriptor pool failed
    #[error("failed to link '{path}': {details}")]
    DescriptorLink {
        /// Declared path of the record that failed to link
        path: String,
        /// Linker message
        details: String,
    },
}

fn join_paths(paths: &BTreeSet<String>) -> String {
    paths.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

impl Error {
    /// Creates a new file read error
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a new path traversal error
    pub fn path_traversal(path: impl Into<PathBuf>) -> Self {
        Self::PathTraversal { path: path.into() }
    }

    /// Creates a new truncation error
    pub fn truncated(offset: usize) -> Self {
        Self::Truncated { offset }
    }

    /// Creates a new wire format error
    pub fn invalid_wire_format(offset: usize, details: impl Into<String>) -> Self {
        Self::InvalidWireFormat {
            offset,
            details: details.into(),
        }
    }

    /// Creates a new rejected-record error
    pub fn not_a_descriptor(path: impl Into<String>) -> Self {
        Self::NotADescriptor { path: path.into() }
    }

    /// Creates a new unresolved dependencies error
    pub fn unresolved(missing: BTreeSet<String>) -> Self {
        Self::UnresolvedDependencies { missing }
    }

    /// Creates a new unsupported feature error
    pub fn unsupported(reason: impl Into<String>) -> Self {
        Self::UnsupportedSchemaFeature {
            reason: reason.into(),
        }
    }

    /// Creates a new not-admitted error
    pub fn not_admitted(path: impl Into<String>) -> Self {
        Self::NotAdmitted { path: path.into() }
    }

    /// Creates a new link error
    pub fn descriptor_link(path: impl Into<String>, details: impl Into<String>) -> Self {
        Self::DescriptorLink {
            path: path.into(),
            details: details.into(),
        }
    }

    /// Returns true if this error is handled locally by dropping a candidate
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Truncated { .. }
                | Self::InvalidWireFormat { .. }
                | Self::DescriptorParse(_)
                | Self::NotADescriptor { .. }
        )
    }
}
