//! Binary scanning module for finding embedded protobuf descriptors.
//!
//! Compiled binaries keep serialized `FileDescriptorProto` records in their
//! data sections with nothing marking where a record starts or ends. This
//! module recovers candidate records from an arbitrary byte buffer.
//!
//! ## Algorithm Overview
//!
//! 1. Search forward for the `.proto` byte sequence (the tail of the
//!    record's `name` field)
//! 2. Backtrack to the nearest `0x0A` byte (field 1, wire type LEN), the
//!    hypothesized start of the record
//! 3. Reject the hit if the span from that byte to the marker is much
//!    longer than the declared name length allows
//! 4. Walk fields forward until a zero tag, an unreadable tag, or the end
//!    of the buffer; that position is the end of the record
//!
//! Every candidate is only a guess until it decodes. Decoding lives in
//! [`crate::descriptor`].
//!
//! ## Extensibility
//!
//! The [`ScanStrategy`] trait allows custom scanning algorithms:
//!
//! ```no_run
//! use protodig_core::scanner::{RawCandidate, ScanStrategy};
//! use protodig_core::Result;
//!
//! struct CustomScanner;
//!
//! impl ScanStrategy for CustomScanner {
//!     fn scan(&self, data: &[u8]) -> Result<Vec<RawCandidate>> {
//!         // Custom scanning logic
//!         Ok(vec![])
//!     }
//! }
//! ```

mod wire;

use crate::error::Result;
use bytes::Bytes;
use std::ops::Range;
use tracing::{debug, trace};

pub use wire::{find_record_end, read_varint, skip_field, WireType};

/// Pattern to search for in binaries (filename suffix)
pub const PROTO_SUFFIX: &[u8] = b".proto";

/// Magic byte indicating start of FileDescriptorProto
/// This is field 1 (name) with wire type 2 (LEN): (1 << 3) | 2 = 0x0A
const MAGIC_BYTE: u8 = 0x0A;

/// Bytes of a single candidate record, copied out of the scanned buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCandidate {
    /// The raw bytes of the candidate FileDescriptorProto
    pub data: Bytes,
    /// Byte range in the original input where this was found
    pub range: Range<usize>,
}

impl RawCandidate {
    /// Creates a new candidate
    pub fn new(data: Bytes, range: Range<usize>) -> Self {
        Self { data, range }
    }

    /// Returns the data as a slice
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Offset of the first byte in the scanned buffer
    pub fn offset(&self) -> usize {
        self.range.start
    }
}

/// Configuration for the scanner
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Literal bytes ending every schema file name
    pub marker: Vec<u8>,
    /// Allowance for header bytes around the name when checking the span
    pub header_margin: usize,
    /// How far the observed span may exceed the expected one
    pub span_slack: usize,
    /// Maximum number of descriptors to find (0 = unlimited)
    pub max_results: usize,
    /// Minimum size for a valid descriptor; the default is the smallest
    /// record possible, a name field holding only the marker
    pub min_descriptor_size: usize,
    /// Maximum size for a valid descriptor (filters garbage)
    pub max_descriptor_size: usize,
    /// End a record at a second top-level name field
    pub stop_at_repeated_name: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            marker: PROTO_SUFFIX.to_vec(),
            header_margin: 7,
            span_slack: 30,
            max_results: 0,
            min_descriptor_size: 2 + PROTO_SUFFIX.len(),
            max_descriptor_size: 10 * 1024 * 1024, // 10 MB
            stop_at_repeated_name: true,
        }
    }
}

impl ScannerConfig {
    /// Creates a new scanner config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the marker bytes searched for
    pub fn marker(mut self, marker: impl Into<Vec<u8>>) -> Self {
        self.marker = marker.into();
        self
    }

    /// Sets the maximum number of results to return
    pub fn max_results(mut self, max: usize) -> Self {
        self.max_results = max;
        self
    }

    /// Sets the minimum descriptor size filter
    pub fn min_descriptor_size(mut self, size: usize) -> Self {
        self.min_descriptor_size = size;
        self
    }

    /// Sets the maximum descriptor size filter
    pub fn max_descriptor_size(mut self, size: usize) -> Self {
        self.max_descriptor_size = size;
        self
    }

    /// Sets whether a repeated name field ends a record
    pub fn stop_at_repeated_name(mut self, stop: bool) -> Self {
        self.stop_at_repeated_name = stop;
        self
    }
}

/// Trait for implementing custom scanning strategies
///
/// This trait allows you to plug in different algorithms for finding
/// protobuf descriptors in binary data.
pub trait ScanStrategy: Send + Sync {
    /// Scan the provided data for protobuf descriptors
    fn scan(&self, data: &[u8]) -> Result<Vec<RawCandidate>>;

    /// Scan the data and return an iterator (for streaming large files)
    fn scan_iter<'a>(
        &'a self,
        data: &'a [u8],
    ) -> Box<dyn Iterator<Item = Result<RawCandidate>> + 'a> {
        match self.scan(data) {
            Ok(results) => Box::new(results.into_iter().map(Ok)),
            Err(e) => Box::new(std::iter::once(Err(e))),
        }
    }
}

/// Primary scanner for finding embedded protobuf descriptors
#[derive(Debug, Clone, Default)]
pub struct Scanner {
    config: ScannerConfig,
}

impl Scanner {
    /// Creates a new scanner with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new scanner with custom configuration
    pub fn with_config(config: ScannerConfig) -> Self {
        Self { config }
    }

    /// Returns the scanner configuration
    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Lazily yields candidate records found in `data`
    pub fn candidates<'a>(&'a self, data: &'a [u8]) -> Candidates<'a> {
        Candidates {
            config: &self.config,
            data,
            position: 0,
            found: 0,
        }
    }
}

impl ScanStrategy for Scanner {
    fn scan(&self, data: &[u8]) -> Result<Vec<RawCandidate>> {
        debug!("Starting scan of {} bytes", data.len());
        let results: Vec<_> = self.candidates(data).collect();
        debug!("Scan complete: found {} candidates", results.len());
        Ok(results)
    }

    fn scan_iter<'a>(
        &'a self,
        data: &'a [u8],
    ) -> Box<dyn Iterator<Item = Result<RawCandidate>> + 'a> {
        Box::new(self.candidates(data).map(Ok))
    }
}

/// Iterator over the candidate records of one buffer
#[derive(Debug)]
pub struct Candidates<'a> {
    config: &'a ScannerConfig,
    data: &'a [u8],
    /// Nothing before this offset is searched again
    position: usize,
    found: usize,
}

impl Candidates<'_> {
    /// Find the start of a record by backtracking from a marker hit
    fn find_record_start(&self, marker_pos: usize) -> Option<usize> {
        let data = self.data;
        let marker_end = marker_pos + self.config.marker.len();

        let start = self.position
            + data[self.position..marker_pos]
                .iter()
                .rposition(|&b| b == MAGIC_BYTE)?;

        // A name of exactly ten bytes has a length prefix equal to the magic byte
        if start > self.position
            && data[start - 1] == MAGIC_BYTE
            && declared_end(data, start - 1) == Some(marker_end)
        {
            return Some(start - 1);
        }

        let (name_len, after_len) = read_varint(data, start + 1).ok()?;
        let name_len = usize::try_from(name_len).unwrap_or(usize::MAX);
        let expected_len = (1 + after_len - (start + 1))
            .saturating_add(name_len)
            .saturating_add(self.config.header_margin);
        let actual_len = marker_end - start;

        if actual_len > expected_len.saturating_add(self.config.span_slack) {
            trace!(
                "Rejecting marker at {}: span {} exceeds expected {}",
                marker_pos,
                actual_len,
                expected_len
            );
            return None;
        }

        Some(start)
    }
}

impl Iterator for Candidates<'_> {
    type Item = RawCandidate;

    fn next(&mut self) -> Option<RawCandidate> {
        let marker = self.config.marker.as_slice();
        if marker.is_empty() {
            return None;
        }

        while self.position < self.data.len() {
            if self.config.max_results > 0 && self.found >= self.config.max_results {
                return None;
            }

            let Some(relative_pos) = find_subsequence(&self.data[self.position..], marker) else {
                self.position = self.data.len();
                return None;
            };

            let marker_pos = self.position + relative_pos;
            let marker_end = marker_pos + marker.len();
            trace!("Found marker at position {}", marker_pos);

            let Some(start) = self.find_record_start(marker_pos) else {
                self.position = marker_end;
                continue;
            };

            let end = find_record_end(self.data, start, self.config.stop_at_repeated_name);
            // Never search inside a claimed record, and always move forward
            self.position = end.max(marker_end);

            let len = end.saturating_sub(start);
            if len < self.config.min_descriptor_size || len > self.config.max_descriptor_size {
                trace!("Discarding {} byte candidate at {}", len, start);
                continue;
            }

            debug!("Found candidate at {}..{} ({} bytes)", start, end, len);
            self.found += 1;
            return Some(RawCandidate::new(
                Bytes::copy_from_slice(&self.data[start..end]),
                start..end,
            ));
        }

        None
    }
}

/// Position just past the length-delimited value whose tag is at `tag_pos`
fn declared_end(data: &[u8], tag_pos: usize) -> Option<usize> {
    let (len, after_len) = read_varint(data, tag_pos + 1).ok()?;
    after_len.checked_add(usize::try_from(len).ok()?)
}

/// Find a subsequence within a byte slice
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
