//! protodig - Recover Protocol Buffer schema sources from compiled binaries
//!
//! This tool scans files for embedded protobuf file descriptors, resolves
//! the imports between them, and writes each one back out as `.proto`
//! source.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, ValueEnum};
use protodig_core::{
    ByteSource, DescriptorRecord, Error as CoreError, Registry, RenderConfig, Renderer, Resolution,
    Resolver, ResolverConfig, Scanner, ScannerConfig, StatsVisitor,
};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn, Level};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Recover Protocol Buffer schema sources from compiled binaries
#[derive(Parser, Debug)]
#[command(name = "protodig")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    input: InputMode,

    /// Output directory for recovered .proto files
    #[arg(short, long, env = "PROTODIG_OUTPUT", default_value = ".")]
    output: PathBuf,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// How output files are placed under the output directory
    #[arg(long, value_enum, default_value = "flat")]
    layout: Layout,

    /// Maximum number of descriptors to extract per file (0 = unlimited)
    #[arg(long, default_value = "0")]
    max_descriptors: usize,

    /// Full scan-and-resolve passes before giving up on missing imports
    #[arg(long, env = "PROTODIG_PASSES", default_value = "2")]
    passes: usize,

    /// Scan inputs one at a time instead of in parallel
    #[arg(long)]
    serial: bool,

    /// Dry run - don't write files, just show what would be written
    #[arg(long)]
    dry_run: bool,

    /// Overwrite existing files
    #[arg(long)]
    force: bool,

    /// Only list recovered schema files without writing them
    #[arg(long)]
    list_only: bool,

    /// Link every recovered file into a descriptor pool and report failures
    #[arg(long)]
    verify: bool,

    /// Conflict resolution strategy for same-name different-content protos
    #[arg(long, value_enum, default_value = "hash-suffix")]
    conflict_strategy: ConflictStrategy,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct InputMode {
    /// Path to a single file to scan
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Path to a directory to scan recursively
    #[arg(short, long)]
    directory: Option<PathBuf>,
}

/// Placement of output files
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Layout {
    /// Write every file directly into the output directory by its base name
    Flat,
    /// Recreate the declared directory structure under the output directory
    Tree,
}

/// Strategy for resolving naming conflicts
#[derive(Debug, Clone, Copy, ValueEnum)]
enum ConflictStrategy {
    /// Append a short content hash: file~a1b2c3d4.proto
    HashSuffix,
    /// Append the source file name: file~from-binary.proto
    SourceSuffix,
    /// Skip conflicting files (keep first occurrence only)
    SkipConflicts,
}

/// Tracks written output names for deduplication
#[derive(Default)]
struct OutputRegistry {
    /// Maps output name -> (content_hash, output_path)
    seen: HashMap<String, Vec<(String, PathBuf)>>,
    stats: OutputStats,
}

#[derive(Default)]
struct OutputStats {
    total_found: usize,
    duplicates_skipped: usize,
    conflicts_renamed: usize,
    no_output: usize,
    written: usize,
}

impl OutputRegistry {
    fn new() -> Self {
        Self::default()
    }

    /// Compute a short hash of the content (first 8 chars of blake3)
    fn content_hash(content: &str) -> String {
        let hash = blake3::hash(content.as_bytes());
        hash.to_hex()[..8].to_string()
    }

    fn is_duplicate(&self, name: &str, content_hash: &str) -> bool {
        self.seen
            .get(name)
            .is_some_and(|entries| entries.iter().any(|(h, _)| h == content_hash))
    }

    fn variant_count(&self, name: &str) -> usize {
        self.seen.get(name).map_or(0, Vec::len)
    }

    /// Register an output and return where it should be written, or None if
    /// it should be skipped
    fn register(
        &mut self,
        name: &str,
        content_hash: &str,
        output_dir: &Path,
        source: Option<&Path>,
        strategy: ConflictStrategy,
    ) -> Option<PathBuf> {
        self.stats.total_found += 1;

        if self.is_duplicate(name, content_hash) {
            debug!("Skipping duplicate: {} (hash: {})", name, content_hash);
            self.stats.duplicates_skipped += 1;
            return None;
        }

        let output_path = if self.variant_count(name) == 0 {
            output_dir.join(name)
        } else {
            match strategy {
                ConflictStrategy::SkipConflicts => {
                    debug!(
                        "Skipping conflict: {} (different content, hash: {})",
                        name, content_hash
                    );
                    self.stats.duplicates_skipped += 1;
                    return None;
                }
                ConflictStrategy::HashSuffix => {
                    let new_name = Self::add_suffix(name, &format!("~{}", content_hash));
                    info!("Conflict resolved: {} -> {} (content differs)", name, new_name);
                    self.stats.conflicts_renamed += 1;
                    output_dir.join(new_name)
                }
                ConflictStrategy::SourceSuffix => {
                    let source_name = source
                        .and_then(|p| p.file_stem())
                        .and_then(|s| s.to_str())
                        .unwrap_or("unknown");
                    let new_name = Self::add_suffix(name, &format!("~from-{}", source_name));
                    info!("Conflict resolved: {} -> {} (from {})", name, new_name, source_name);
                    self.stats.conflicts_renamed += 1;
                    output_dir.join(new_name)
                }
            }
        };

        self.seen
            .entry(name.to_string())
            .or_default()
            .push((content_hash.to_string(), output_path.clone()));

        Some(output_path)
    }

    /// Add a suffix before the .proto extension
    fn add_suffix(name: &str, suffix: &str) -> String {
        if let Some(stem) = name.strip_suffix(".proto") {
            format!("{}{}.proto", stem, suffix)
        } else {
            format!("{}{}", name, suffix)
        }
    }

    fn print_summary(&self) {
        info!(
            "Summary: {} found, {} duplicates skipped, {} conflicts renamed, \
             {} without output, {} written",
            self.stats.total_found,
            self.stats.duplicates_skipped,
            self.stats.conflicts_renamed,
            self.stats.no_output,
            self.stats.written
        );
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_target(false)
        .init();

    let inputs = collect_inputs(&cli.input)?;
    let resolution = resolve(&cli, &inputs)?;
    write_outputs(&cli, &resolution)
}

/// Every file named by the input mode, in a stable order
fn collect_inputs(input: &InputMode) -> Result<Vec<PathBuf>> {
    if let Some(ref file) = input.file {
        if !file.exists() {
            bail!("Input file does not exist: {}", file.display());
        }
        if !file.is_file() {
            bail!("Input path is not a file: {}", file.display());
        }
        Ok(vec![file.clone()])
    } else if let Some(ref directory) = input.directory {
        if !directory.exists() {
            bail!("Directory does not exist: {}", directory.display());
        }
        if !directory.is_dir() {
            bail!("Path is not a directory: {}", directory.display());
        }
        Ok(collect_directory(directory))
    } else {
        bail!("Either --file or --directory must be specified")
    }
}

fn collect_directory(directory: &Path) -> Vec<PathBuf> {
    info!("Scanning directory: {}", directory.display());

    let files: Vec<PathBuf> = WalkDir::new(directory)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            let hidden = entry.file_name().to_str().is_some_and(|n| n.starts_with('.'));
            if hidden {
                trace!("Skipping hidden file: {}", entry.path().display());
            }
            !hidden
        })
        .map(|entry| entry.into_path())
        .collect();

    info!("Found {} file(s) under {}", files.len(), directory.display());
    files
}

/// Scan every input and resolve imports across all of them
fn resolve(cli: &Cli, inputs: &[PathBuf]) -> Result<Resolution> {
    let scanner = Scanner::with_config(ScannerConfig::new().max_results(cli.max_descriptors));
    let config = ResolverConfig::new().passes(cli.passes).parallel(!cli.serial);
    let sources: Vec<ByteSource> = inputs
        .iter()
        .map(|path| ByteSource::from(path.as_path()))
        .collect();

    info!("Scanning {} file(s) for protobuf definitions", sources.len());

    match Resolver::with_strategy(config, Arc::new(scanner)).run(&sources) {
        Ok(resolution) => {
            info!("Resolved {} schema file(s)", resolution.records().len());
            Ok(resolution)
        }
        Err(CoreError::UnresolvedDependencies { missing }) => {
            for path in &missing {
                eprintln!("missing: {}", path);
            }
            bail!(
                "Unable to recover all protobuf definitions; \
                 {} imported file(s) could not be found",
                missing.len()
            )
        }
        Err(e) => Err(e).context("Failed to scan inputs"),
    }
}

/// Link every admitted record and report the ones the linker rejects
fn verify(registry: &Registry) -> usize {
    let (pool, failures) = registry.link();
    for failure in &failures {
        warn!("Verification failed: {}", failure);
    }
    info!("Linked {} of {} schema file(s)", pool.files().len(), registry.len());
    failures.len()
}

/// Output file name for `record` under the chosen layout
fn output_name(record: &DescriptorRecord, layout: Layout) -> protodig_core::Result<String> {
    match layout {
        Layout::Flat => Ok(record.name().to_string()),
        Layout::Tree => Ok(record.relative_path()?.to_string_lossy().into_owned()),
    }
}

fn write_outputs(cli: &Cli, resolution: &Resolution) -> Result<()> {
    if cli.verify {
        verify(resolution.registry());
    }

    let renderer = Renderer::new(RenderConfig::new());
    let mut outputs = OutputRegistry::new();

    for record in resolution.records() {
        if cli.list_only {
            let stats = StatsVisitor::collect(record);
            println!(
                "{} ({} messages, {} enums, {} fields)",
                record.path, stats.message_count, stats.enum_count, stats.field_count
            );
            continue;
        }

        let content = match renderer.render(record, resolution.registry()) {
            Ok(content) => content,
            Err(e) => {
                warn!("No output produced for {}: {}", record.path, e);
                outputs.stats.no_output += 1;
                continue;
            }
        };

        let name = match output_name(record, cli.layout) {
            Ok(name) => name,
            Err(e) => {
                warn!("No output produced for {}: {}", record.path, e);
                outputs.stats.no_output += 1;
                continue;
            }
        };

        let content_hash = OutputRegistry::content_hash(&content);
        let source = match resolution.origin(record) {
            Some(ByteSource::Path(path)) => Some(path.as_path()),
            _ => None,
        };

        let Some(output_path) =
            outputs.register(&name, &content_hash, &cli.output, source, cli.conflict_strategy)
        else {
            continue;
        };

        if cli.dry_run {
            println!("Would write: {}", output_path.display());
            if cli.verbose > 0 {
                println!("---");
                println!("{}", content);
                println!("---");
            }
            continue;
        }

        match write_proto_file(&output_path, &content, cli.force) {
            Ok(()) => {
                println!("Wrote {}", output_path.display());
                outputs.stats.written += 1;
            }
            Err(e) => {
                error!("Failed to write {}: {:#}", output_path.display(), e);
            }
        }
    }

    if !cli.list_only && !cli.dry_run {
        outputs.print_summary();
    }

    Ok(())
}

/// Write a proto file to disk, creating parent directories as needed
fn write_proto_file(output_path: &Path, content: &str, force: bool) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    if output_path.exists() && !force {
        bail!("File already exists: {} (use --force to overwrite)", output_path.display());
    }

    let mut file = fs::File::create(output_path)
        .with_context(|| format!("Failed to create file: {}", output_path.display()))?;

    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write file: {}", output_path.display()))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    /// `simple.proto` holding `message Simple { optional int32 x = 1; }`,
    /// wrapped in junk and null-terminated
    const SIMPLE_RECORD: &[u8] =
        b"junk\n\x0csimple.proto\"\x13\n\x06Simple\x12\x09\n\x01x\x18\x01 \x01(\x05\x00tail";

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("protodig").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_output_registry_deduplication() {
        let mut registry = OutputRegistry::new();
        let temp_dir = TempDir::new().unwrap();
        let hash = OutputRegistry::content_hash("syntax = \"proto2\";\npackage test;");

        let out = temp_dir.path();

        let path1 = registry.register("test.proto", &hash, out, None, ConflictStrategy::HashSuffix);
        assert!(path1.unwrap().ends_with("test.proto"));

        let path2 = registry.register("test.proto", &hash, out, None, ConflictStrategy::HashSuffix);
        assert!(path2.is_none());
        assert_eq!(registry.stats.duplicates_skipped, 1);
    }

    #[test]
    fn test_output_registry_conflict_hash_suffix() {
        let mut registry = OutputRegistry::new();
        let temp_dir = TempDir::new().unwrap();
        let hash1 = OutputRegistry::content_hash("package test1;");
        let hash2 = OutputRegistry::content_hash("package test2;");

        let out = temp_dir.path();
        let strategy = ConflictStrategy::HashSuffix;
        let path1 = registry.register("test.proto", &hash1, out, None, strategy);
        assert!(path1.unwrap().ends_with("test.proto"));

        let path2 = registry.register("test.proto", &hash2, out, None, strategy).unwrap();
        assert_eq!(path2, temp_dir.path().join(format!("test~{}.proto", hash2)));
        assert_eq!(registry.stats.conflicts_renamed, 1);
    }

    #[test]
    fn test_output_registry_conflict_source_suffix() {
        let mut registry = OutputRegistry::new();
        let out = Path::new("out");
        let hash1 = OutputRegistry::content_hash("one");
        let hash2 = OutputRegistry::content_hash("two");

        registry.register("a.proto", &hash1, out, None, ConflictStrategy::SourceSuffix);
        let renamed = registry.register(
            "a.proto",
            &hash2,
            out,
            Some(Path::new("/bin/server.exe")),
            ConflictStrategy::SourceSuffix,
        );
        assert_eq!(renamed, Some(out.join("a~from-server.proto")));
    }

    #[test]
    fn test_output_registry_skip_conflicts() {
        let mut registry = OutputRegistry::new();
        let out = Path::new("out");
        let hash1 = OutputRegistry::content_hash("one");
        let hash2 = OutputRegistry::content_hash("two");

        assert!(registry
            .register("a.proto", &hash1, out, None, ConflictStrategy::SkipConflicts)
            .is_some());
        assert!(registry
            .register("a.proto", &hash2, out, None, ConflictStrategy::SkipConflicts)
            .is_none());
        assert_eq!(registry.stats.duplicates_skipped, 1);
    }

    #[test]
    fn test_add_suffix() {
        assert_eq!(OutputRegistry::add_suffix("test.proto", "~abc123"), "test~abc123.proto");
        assert_eq!(
            OutputRegistry::add_suffix("path/to/test.proto", "~abc123"),
            "path/to/test~abc123.proto"
        );
    }

    #[test]
    fn test_content_hash() {
        let hash1 = OutputRegistry::content_hash("hello");
        let hash2 = OutputRegistry::content_hash("hello");
        let hash3 = OutputRegistry::content_hash("world");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 8);
    }

    #[test]
    fn test_collect_directory_skips_hidden_files() {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir(temp_dir.path().join("nested")).unwrap();
        fs::write(temp_dir.path().join("b.bin"), b"b").unwrap();
        fs::write(temp_dir.path().join("nested/a.bin"), b"a").unwrap();
        fs::write(temp_dir.path().join(".hidden"), b"h").unwrap();

        let files = collect_directory(temp_dir.path());
        assert_eq!(
            files,
            vec![temp_dir.path().join("b.bin"), temp_dir.path().join("nested/a.bin")]
        );
    }

    #[test]
    fn test_missing_input_is_an_error() {
        let cli = parse(&["--file", "/definitely/not/here.bin"]);
        assert!(collect_inputs(&cli.input).is_err());
    }

    #[test]
    fn test_scan_directory_and_write() {
        let input = TempDir::new().unwrap();
        let output = TempDir::new().unwrap();
        fs::write(input.path().join("00000.bin"), SIMPLE_RECORD).unwrap();

        let cli = parse(&[
            "--directory",
            input.path().to_str().unwrap(),
            "--output",
            output.path().to_str().unwrap(),
            "--serial",
        ]);
        let inputs = collect_inputs(&cli.input).unwrap();
        let resolution = resolve(&cli, &inputs).unwrap();
        write_outputs(&cli, &resolution).unwrap();

        let written = fs::read_to_string(output.path().join("simple.proto")).unwrap();
        assert_eq!(
            written,
            "syntax = \"proto2\";\n\nmessage Simple {\n  optional int32 x = 1;\n}\n"
        );
    }

    #[test]
    fn test_existing_file_needs_force() {
        let output = TempDir::new().unwrap();
        let path = output.path().join("deep/dir/a.proto");

        write_proto_file(&path, "first", false).unwrap();
        assert!(write_proto_file(&path, "second", false).is_err());
        write_proto_file(&path, "second", true).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "second");
    }

    #[test]
    fn test_tree_layout_rejects_escaping_paths() {
        let escaping = DescriptorRecord::decode(&b"\n\x0a../x.proto"[..]).unwrap();
        assert!(output_name(&escaping, Layout::Tree).is_err());
        assert_eq!(output_name(&escaping, Layout::Flat).unwrap(), "x.proto");

        let nested = DescriptorRecord::decode(&b"\n\x0ba/b/c.proto"[..]).unwrap();
        assert_eq!(
            output_name(&nested, Layout::Tree).unwrap(),
            Path::new("a/b/c.proto").to_string_lossy()
        );
    }

    #[test]
    fn test_verify_counts_link_failures() {
        let resolution = protodig_core::scan_and_resolve([SIMPLE_RECORD]).unwrap();
        assert_eq!(verify(resolution.registry()), 0);
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
