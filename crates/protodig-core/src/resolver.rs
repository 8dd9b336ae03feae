//! Dependency resolution over every record found in a set of inputs.
//!
//! Records are discovered in whatever order the inputs happen to hold
//! them, so a record can turn up before the files it imports. The
//! [`Resolver`] gathers all decoded records into a working set
//! (deduplicated by raw bytes) and sweeps registry admission over it until
//! a sweep admits nothing new. Each sweep either admits at least one record
//! or ends the loop, so there are at most as many sweeps as records.
//!
//! The whole scan-and-resolve cycle runs up to [`ResolverConfig::passes`]
//! times (two by default) before unresolved imports are reported.
//!
//! Scanning and decoding are pure per input and run on the rayon pool when
//! the `parallel` feature is enabled. The working set and the registry are
//! only ever touched by the thread driving [`Resolver::run`].

use crate::descriptor::{DescriptorRecord, RESERVED_META_PATH};
use crate::error::{Error, Result};
use crate::registry::Registry;
use crate::render::{RenderConfig, Renderer};
use crate::scanner::{ScanStrategy, Scanner};
use bytes::Bytes;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// A readable input: a file on disk or a buffer already in memory
#[derive(Debug, Clone)]
pub enum ByteSource {
    /// File read in full when scanned
    Path(PathBuf),
    /// In-memory bytes
    Memory(Bytes),
}

impl ByteSource {
    /// Read the whole input
    pub fn load(&self) -> Result<Bytes> {
        match self {
            ByteSource::Path(path) => std::fs::read(path)
                .map(Bytes::from)
                .map_err(|e| Error::file_read(path, e)),
            ByteSource::Memory(bytes) => Ok(bytes.clone()),
        }
    }
}

impl fmt::Display for ByteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByteSource::Path(path) => write!(f, "{}", path.display()),
            ByteSource::Memory(bytes) => write!(f, "<{} bytes in memory>", bytes.len()),
        }
    }
}

impl From<PathBuf> for ByteSource {
    fn from(path: PathBuf) -> Self {
        ByteSource::Path(path)
    }
}

impl From<&Path> for ByteSource {
    fn from(path: &Path) -> Self {
        ByteSource::Path(path.to_path_buf())
    }
}

impl From<Bytes> for ByteSource {
    fn from(bytes: Bytes) -> Self {
        ByteSource::Memory(bytes)
    }
}

impl From<Vec<u8>> for ByteSource {
    fn from(bytes: Vec<u8>) -> Self {
        ByteSource::Memory(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for ByteSource {
    fn from(bytes: &'static [u8]) -> Self {
        ByteSource::Memory(Bytes::from_static(bytes))
    }
}

/// Configuration for resolution
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Full scan-and-resolve cycles before giving up
    pub passes: usize,
    /// Scan inputs concurrently (needs the `parallel` feature)
    pub parallel: bool,
    /// Import paths satisfied without a record
    pub external_paths: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            passes: 2,
            parallel: true,
            // Scanning drops this record, so its importers must not wait on it
            external_paths: vec![RESERVED_META_PATH.to_string()],
        }
    }
}

impl ResolverConfig {
    /// Creates a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of passes (at least one)
    pub fn passes(mut self, passes: usize) -> Self {
        self.passes = passes.max(1);
        self
    }

    /// Sets whether inputs are scanned concurrently
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Replaces the set of externally satisfied import paths
    pub fn external_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.external_paths = paths.into_iter().map(Into::into).collect();
        self
    }
}

/// Decoded records, deduplicated by their raw bytes, in discovery order
#[derive(Debug, Default)]
struct WorkingSet {
    records: Vec<Arc<DescriptorRecord>>,
    seen: HashSet<Bytes>,
    /// Index of the input each record was first found in
    origins: HashMap<Bytes, usize>,
}

impl WorkingSet {
    fn insert(&mut self, record: DescriptorRecord) -> bool {
        if !self.seen.insert(record.raw().clone()) {
            return false;
        }
        self.records.push(Arc::new(record));
        true
    }

    fn insert_from(&mut self, origin: usize, record: DescriptorRecord) -> bool {
        let raw = record.raw().clone();
        let inserted = self.insert(record);
        if inserted {
            self.origins.insert(raw, origin);
        }
        inserted
    }

    fn with_path<'a>(
        &'a self,
        path: &'a str,
    ) -> impl Iterator<Item = &'a Arc<DescriptorRecord>> + 'a {
        self.records.iter().filter(move |r| r.path == path)
    }
}

/// Drives scanning, deduplication and registry admission
pub struct Resolver {
    config: ResolverConfig,
    strategy: Arc<dyn ScanStrategy>,
    working: WorkingSet,
    registry: Registry,
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolver")
            .field("config", &self.config)
            .field("records", &self.working.records.len())
            .field("admitted", &self.registry.len())
            .finish()
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new(ResolverConfig::default())
    }
}

impl Resolver {
    /// Creates a resolver using the default [`Scanner`]
    pub fn new(config: ResolverConfig) -> Self {
        Self::with_strategy(config, Arc::new(Scanner::new()))
    }

    /// Creates a resolver with a custom scanning strategy
    pub fn with_strategy(config: ResolverConfig, strategy: Arc<dyn ScanStrategy>) -> Self {
        let registry = Registry::with_external(config.external_paths.iter().cloned());
        Self {
            config,
            strategy,
            working: WorkingSet::default(),
            registry,
        }
    }

    /// Scan one input and decode its candidates.
    ///
    /// Candidates that do not decode, or are not reportable schema files,
    /// are dropped here.
    pub fn extract(&self, source: &ByteSource) -> Result<Vec<DescriptorRecord>> {
        let data = source.load()?;
        let mut records = Vec::new();

        for candidate in self.strategy.scan_iter(&data) {
            let decoded = candidate.and_then(|c| {
                DescriptorRecord::from_candidate(&c).map_err(|e| {
                    trace!("Dropping candidate at offset {} in {}: {}", c.offset(), source, e);
                    e
                })
            });
            match decoded {
                Ok(record) => records.push(record),
                Err(e) if e.is_recoverable() => {}
                Err(e) => return Err(e),
            }
        }

        debug!("Decoded {} record(s) from {}", records.len(), source);
        Ok(records)
    }

    fn extract_all(&self, sources: &[ByteSource]) -> Result<Vec<Vec<DescriptorRecord>>> {
        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            if self.config.parallel {
                return sources.par_iter().map(|source| self.extract(source)).collect();
            }
        }

        sources.iter().map(|source| self.extract(source)).collect()
    }

    /// Add decoded records to the working set; returns how many were new
    pub fn ingest(&mut self, records: impl IntoIterator<Item = DescriptorRecord>) -> usize {
        let mut new = 0;
        for record in records {
            if self.working.insert(record) {
                new += 1;
            }
        }
        new
    }

    /// One admission attempt over every record whose path is still absent.
    /// Returns the number of records newly admitted.
    pub fn sweep(&mut self) -> usize {
        let mut admitted = 0;
        for record in &self.working.records {
            if self.registry.get(&record.path).is_none() && self.registry.try_admit(record) {
                admitted += 1;
            }
        }
        admitted
    }

    /// Sweep until a sweep admits nothing; returns the total admitted
    pub fn resolve_fixed_point(&mut self) -> usize {
        let mut total = 0;
        let mut sweeps = 0;
        loop {
            let admitted = self.sweep();
            sweeps += 1;
            total += admitted;
            if admitted == 0 {
                break;
            }
        }
        debug!("Fixed point after {} sweep(s), {} admitted", sweeps, total);
        total
    }

    /// Records whose path has no registry entry
    pub fn pending(&self) -> impl Iterator<Item = &Arc<DescriptorRecord>> {
        self.working
            .records
            .iter()
            .filter(|r| self.registry.get(&r.path).is_none())
    }

    /// Import paths that block `record`, followed transitively.
    ///
    /// An unmet import with no record anywhere in the working set is
    /// missing outright. One that does have records, none admitted, is
    /// followed into those records' own unmet imports.
    pub fn missing_imports(&self, record: &DescriptorRecord) -> BTreeSet<String> {
        let mut visited = HashSet::new();
        let mut missing = BTreeSet::new();
        self.collect_missing(record, &mut visited, &mut missing);
        missing
    }

    fn collect_missing<'a>(
        &'a self,
        record: &'a DescriptorRecord,
        visited: &mut HashSet<&'a [u8]>,
        missing: &mut BTreeSet<String>,
    ) {
        if !visited.insert(record.raw().as_ref()) {
            return;
        }

        for import in self.registry.unmet_imports(record) {
            let mut providers = self.working.with_path(import).peekable();
            if providers.peek().is_none() {
                missing.insert(import.to_string());
                continue;
            }
            for provider in providers {
                self.collect_missing(provider, visited, missing);
            }
        }
    }

    /// Union of missing imports across every pending record.
    ///
    /// When pending records only wait on each other (an import cycle), no
    /// import is missing outright; their own paths are reported instead.
    pub fn all_missing(&self) -> BTreeSet<String> {
        let mut missing = BTreeSet::new();
        for record in self.pending() {
            missing.extend(self.missing_imports(record));
        }
        if missing.is_empty() {
            missing.extend(self.pending().map(|r| r.path.clone()));
        }
        missing
    }

    /// The registry built so far
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run the full cycle over `sources`.
    ///
    /// Fails with [`Error::UnresolvedDependencies`] when records remain
    /// pending after the last pass, and with [`Error::FileRead`] when an
    /// input cannot be read.
    pub fn run(mut self, sources: &[ByteSource]) -> Result<Resolution> {
        for pass in 1..=self.config.passes.max(1) {
            let batches = self.extract_all(sources)?;
            let found: usize = batches.iter().map(Vec::len).sum();
            let mut new = 0;
            for (origin, batch) in batches.into_iter().enumerate() {
                for record in batch {
                    if self.working.insert_from(origin, record) {
                        new += 1;
                    }
                }
            }
            let admitted = self.resolve_fixed_point();

            let pending = self.pending().count();
            info!(
                "Pass {}: {} record(s) found, {} new, {} admitted, {} pending",
                pass, found, new, admitted, pending
            );

            if pending == 0 {
                return Ok(Resolution {
                    records: self.working.records,
                    origins: self.working.origins,
                    sources: sources.to_vec(),
                    registry: self.registry,
                });
            }
        }

        Err(Error::unresolved(self.all_missing()))
    }
}

/// Outcome of a successful resolution
#[derive(Debug)]
pub struct Resolution {
    records: Vec<Arc<DescriptorRecord>>,
    origins: HashMap<Bytes, usize>,
    sources: Vec<ByteSource>,
    registry: Registry,
}

impl Resolution {
    /// Every distinct record found, in discovery order
    pub fn records(&self) -> &[Arc<DescriptorRecord>] {
        &self.records
    }

    /// The input `record` was first found in
    pub fn origin(&self, record: &DescriptorRecord) -> Option<&ByteSource> {
        self.origins
            .get(record.raw())
            .and_then(|&index| self.sources.get(index))
    }

    /// The registry all records were admitted into
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render `record` with the default configuration
    pub fn render(&self, record: &DescriptorRecord) -> Result<String> {
        Renderer::new(RenderConfig::default()).render(record, &self.registry)
    }
}

/// Scan every input and resolve the records found, with default settings
pub fn scan_and_resolve<I, S>(inputs: I) -> Result<Resolution>
where
    I: IntoIterator<Item = S>,
    S: Into<ByteSource>,
{
    let sources: Vec<ByteSource> = inputs.into_iter().map(Into::into).collect();
    Resolver::default().run(&sources)
}
