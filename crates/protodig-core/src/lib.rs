//! # protodig-core
//!
//! A library for recovering Protocol Buffer schema definitions from the
//! serialized descriptors compiled into binaries.
//!
//! This crate provides the core functionality for:
//! - Scanning arbitrary bytes for embedded schema descriptor records
//! - Admitting records into a registry once their imports are present
//! - Rendering admitted records back to `.proto` source
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`scanner`]: Marker search, record framing and wire format reading
//! - [`descriptor`]: The decoded descriptor model
//! - [`registry`]: Path-keyed store of admitted records
//! - [`resolver`]: Fixed-point resolution across all inputs
//! - [`render`]: Schema source rendering
//! - [`error`]: Error types and handling
//!
//! ## Example
//!
//! ```no_run
//! use protodig_core::{scan_and_resolve, ByteSource};
//!
//! let binary = std::path::Path::new("./target/release/my_app");
//! let resolution = scan_and_resolve([ByteSource::from(binary)])?;
//!
//! for record in resolution.records() {
//!     println!("// {}", record.path);
//!     println!("{}", resolution.render(record)?);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Extensibility
//!
//! The library provides several traits for customization:
//!
//! - [`DescriptorVisitor`]: Walk admitted records for purposes other than rendering
//! - [`ScanStrategy`]: Customize the binary scanning algorithm
//!

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unreachable_pub)]

pub mod descriptor;
pub mod error;
pub mod registry;
pub mod render;
pub mod resolver;
pub mod scanner;

// Re-export primary types for convenience
pub use descriptor::DescriptorRecord;
pub use error::{Error, Result};
pub use registry::Registry;
pub use render::{render, DescriptorVisitor, RenderConfig, Renderer, StatsVisitor};
pub use resolver::{scan_and_resolve, ByteSource, Resolution, Resolver, ResolverConfig};
pub use scanner::{RawCandidate, ScanStrategy, Scanner, ScannerConfig};

/// Crate version for programmatic access
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum valid protobuf field number (2^29 - 1)
/// Used as the upper bound of `extensions X to Y` ranges
pub const MAX_FIELD_NUMBER: u32 = 536_870_911;
