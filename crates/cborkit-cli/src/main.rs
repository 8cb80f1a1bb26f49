//! cborkit - Validate and inspect CBOR files
//!
//! This tool decodes files as CBOR sequences, reports the first malformed
//! item with its byte offset, and optionally prints item statistics and a
//! canonical-form check.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use cborkit_core::{
    encode, Decoder, DecoderConfig, DuplicateKeyPolicy, Event, Reader, WireItem,
    DEFAULT_MAX_DEPTH, DEFAULT_MAX_EXPONENT_MAGNITUDE,
};
use clap::{Args, Parser};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn, Level};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

/// Validate and inspect CBOR files
#[derive(Parser, Debug)]
#[command(name = "cborkit")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    input: InputMode,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Maximum nesting depth accepted
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH)]
    max_depth: usize,

    /// Maximum magnitude of decimal fraction and bigfloat exponents
    #[arg(long, default_value_t = DEFAULT_MAX_EXPONENT_MAGNITUDE)]
    max_exponent: u64,

    /// Fail on maps that repeat a key
    #[arg(long)]
    reject_duplicate_keys: bool,

    /// Keep numeric tags (bignums, decimal fractions, bigfloats) as plain tags
    #[arg(long)]
    raw_tags: bool,

    /// Only process files with this extension when walking a directory
    #[arg(short, long)]
    extension: Option<String>,

    /// Print counts of each item kind
    #[arg(long)]
    stats: bool,

    /// Check whether the input is already in canonical form
    #[arg(long)]
    canonical: bool,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct InputMode {
    /// Path to a single CBOR file
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Path to a directory of CBOR files to process
    #[arg(short, long)]
    directory: Option<PathBuf>,
}

impl Cli {
    fn decoder(&self) -> Decoder {
        let duplicate_keys = if self.reject_duplicate_keys {
            DuplicateKeyPolicy::Reject
        } else {
            DuplicateKeyPolicy::KeepAll
        };
        let config = DecoderConfig::new()
            .max_depth(self.max_depth)
            .max_exponent_magnitude(self.max_exponent)
            .decode_numeric_tags(!self.raw_tags)
            .duplicate_keys(duplicate_keys);
        Decoder::new(config)
    }
}

/// Counts of items by kind, gathered from reader events
#[derive(Debug, Default, PartialEq)]
struct KindStats {
    counts: BTreeMap<&'static str, usize>,
    max_depth: usize,
}

impl KindStats {
    fn collect(reader: &mut Reader) -> cborkit_core::Result<Self> {
        let mut stats = Self::default();
        while let Some(event) = reader.next_event()? {
            stats.max_depth = stats.max_depth.max(reader.depth());
            if let Some(kind) = event_kind(&event) {
                *stats.counts.entry(kind).or_default() += 1;
            }
        }
        Ok(stats)
    }

    fn print(&self) {
        for (kind, count) in &self.counts {
            println!("  {:<12} {}", kind, count);
        }
        println!("  {:<12} {}", "max depth", self.max_depth);
    }
}

fn event_kind(event: &Event) -> Option<&'static str> {
    let kind = match event {
        Event::UInt(_) | Event::NegInt(_) => "integer",
        Event::ByteString(_) | Event::ByteStringStart => "bytes",
        Event::TextString(_) | Event::TextStringStart => "text",
        Event::ArrayStart(_) => "array",
        Event::MapStart(_) => "map",
        Event::Tag(_) => "tag",
        Event::Bool(_) => "bool",
        Event::Null => "null",
        Event::Simple(_) => "simple",
        Event::Float16(_) | Event::Float32(_) | Event::Float64(_) => "float",
        Event::End => return None,
    };
    Some(kind)
}

/// Outcome of re-encoding a decoded sequence
#[derive(Debug)]
struct CanonicalCheck {
    is_canonical: bool,
    canonical_len: usize,
    fingerprint: String,
}

impl CanonicalCheck {
    fn run(input: &[u8], items: &[WireItem]) -> cborkit_core::Result<Self> {
        let mut canonical = Vec::with_capacity(input.len());
        for item in items {
            canonical.extend_from_slice(&encode(item)?);
        }
        Ok(Self {
            is_canonical: canonical == input,
            canonical_len: canonical.len(),
            fingerprint: fingerprint(&canonical),
        })
    }
}

/// Compute a short hash of the content (first 16 chars of blake3)
fn fingerprint(content: &[u8]) -> String {
    let hash = blake3::hash(content);
    hash.to_hex()[..16].to_string()
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
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

    // Dispatch based on input mode
    let failures = if let Some(ref file) = cli.input.file {
        process_single_file(&cli, file)?
    } else if let Some(ref directory) = cli.input.directory {
        process_directory(&cli, directory)?
    } else {
        bail!("Either --file or --directory must be specified")
    };

    if failures > 0 {
        bail!("{} file(s) failed to decode", failures);
    }
    Ok(())
}

/// Process a single file, returning the number of failures
fn process_single_file(cli: &Cli, file: &Path) -> Result<usize> {
    if !file.exists() {
        bail!("Input file does not exist: {}", file.display());
    }
    if !file.is_file() {
        bail!("Input path is not a file: {}", file.display());
    }

    Ok(usize::from(!report_file(cli, file)?))
}

/// Process a directory of files recursively, returning the number of failures
fn process_directory(cli: &Cli, directory: &Path) -> Result<usize> {
    if !directory.exists() {
        bail!("Directory does not exist: {}", directory.display());
    }
    if !directory.is_dir() {
        bail!("Path is not a directory: {}", directory.display());
    }

    info!("Scanning directory: {}", directory.display());

    let mut processed = 0;
    let mut failures = 0;

    for path in collect_files(directory, cli.extension.as_deref()) {
        debug!("Processing: {}", path.display());
        match report_file(cli, &path) {
            Ok(true) => {}
            Ok(false) => failures += 1,
            Err(e) => {
                warn!("Error processing {}: {:#}", path.display(), e);
                failures += 1;
            }
        }
        processed += 1;
    }

    info!("Processed {} files, {} failed", processed, failures);
    Ok(failures)
}

/// Files under `directory`, sorted, skipping hidden files
fn collect_files(directory: &Path, extension: Option<&str>) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(directory)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|path| path.is_file())
        .filter(|path| {
            !path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with('.'))
                .unwrap_or(false)
        })
        .filter(|path| match extension {
            Some(wanted) => path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case(wanted.trim_start_matches('.')))
                .unwrap_or(false),
            None => true,
        })
        .collect();
    files.sort();
    files
}

/// Result of decoding one file
#[derive(Debug)]
struct FileReport {
    len: usize,
    items: cborkit_core::Result<Vec<WireItem>>,
    stats: Option<cborkit_core::Result<KindStats>>,
    canonical: Option<cborkit_core::Result<CanonicalCheck>>,
}

fn inspect(cli: &Cli, data: Vec<u8>) -> FileReport {
    let len = data.len();
    let decoder = cli.decoder();
    let data = Bytes::from(data);

    let items = decoder.decode_sequence(data.clone());
    let stats = cli
        .stats
        .then(|| KindStats::collect(&mut decoder.reader(data.clone())));
    let canonical = match &items {
        Ok(items) if cli.canonical => Some(CanonicalCheck::run(&data, items)),
        _ => None,
    };

    FileReport {
        len,
        items,
        stats,
        canonical,
    }
}

/// Decode and report on one file; returns whether it decoded cleanly
fn report_file(cli: &Cli, path: &Path) -> Result<bool> {
    trace!("Reading {}", path.display());
    let data =
        fs::read(path).with_context(|| format!("Failed to read input file: {}", path.display()))?;

    let report = inspect(cli, data);
    let ok = match &report.items {
        Ok(items) => {
            println!(
                "{}: ok, {} item(s), {} bytes",
                path.display(),
                items.len(),
                report.len
            );
            true
        }
        Err(e) => {
            println!("{}: error: {}", path.display(), e);
            false
        }
    };

    if let Some(stats) = &report.stats {
        match stats {
            Ok(stats) => stats.print(),
            // Already reported above
            Err(e) => trace!("Stats stopped early: {}", e),
        }
    }

    if let Some(check) = report.canonical {
        let check = check
            .with_context(|| format!("Failed to re-encode items from {}", path.display()))?;
        let verdict = if check.is_canonical {
            "canonical"
        } else {
            "not canonical"
        };
        println!(
            "  {} ({} bytes canonical), fingerprint {}",
            verdict, check.canonical_len, check.fingerprint
        );
    }

    Ok(ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cli_for(args: &[&str]) -> Cli {
        let mut argv = vec!["cborkit", "-f", "unused.cbor"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    #[test]
    fn test_decoder_follows_flags() {
        let cli = cli_for(&["--max-depth", "8", "--raw-tags", "--reject-duplicate-keys"]);
        let decoder = cli.decoder();
        assert_eq!(decoder.config().max_depth, 8);
        assert!(!decoder.config().decode_numeric_tags);
        assert_eq!(decoder.config().duplicate_keys, DuplicateKeyPolicy::Reject);
    }

    #[test]
    fn test_inspect_valid_sequence() {
        let cli = cli_for(&["--stats", "--canonical"]);
        // 1, [2, "a"], h'ff'
        let report = inspect(&cli, vec![0x01, 0x82, 0x02, 0x61, 0x61, 0x41, 0xff]);

        assert_eq!(report.items.unwrap().len(), 3);
        let stats = report.stats.unwrap().unwrap();
        assert_eq!(stats.counts["integer"], 2);
        assert_eq!(stats.counts["array"], 1);
        assert_eq!(stats.counts["text"], 1);
        assert_eq!(stats.counts["bytes"], 1);
        assert_eq!(stats.max_depth, 1);
        assert!(report.canonical.unwrap().unwrap().is_canonical);
    }

    #[test]
    fn test_inspect_non_canonical() {
        let cli = cli_for(&["--canonical"]);
        // 10 with a one-byte argument, indefinite empty array
        let report = inspect(&cli, vec![0x18, 0x0a, 0x9f, 0xff]);
        let check = report.canonical.unwrap().unwrap();
        assert!(!check.is_canonical);
        assert_eq!(check.canonical_len, 2);
        assert_eq!(check.fingerprint, fingerprint(&[0x0a, 0x80]));
    }

    #[test]
    fn test_inspect_reports_errors() {
        let cli = cli_for(&["--canonical", "--max-depth", "2"]);
        let report = inspect(&cli, vec![0x81, 0x81, 0x81, 0x00]);
        assert!(matches!(
            report.items,
            Err(cborkit_core::Error::DepthExceeded { offset: 2, limit: 2 })
        ));
        assert!(report.canonical.is_none());
    }

    #[test]
    fn test_directory_counts_failures() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("good.cbor"), [0x83, 0x01, 0x02, 0x03]).unwrap();
        fs::write(temp_dir.path().join("bad.cbor"), [0x83, 0x01]).unwrap();
        fs::write(temp_dir.path().join(".hidden.cbor"), [0xff]).unwrap();
        fs::write(temp_dir.path().join("notes.txt"), b"not cbor").unwrap();

        let dir = temp_dir.path().to_str().unwrap();
        let cli = Cli::parse_from(["cborkit", "-d", dir, "-e", "cbor"]);
        assert_eq!(process_directory(&cli, temp_dir.path()).unwrap(), 1);

        let files = collect_files(temp_dir.path(), None);
        assert_eq!(files.len(), 3);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let cli = cli_for(&[]);
        assert!(process_single_file(&cli, &temp_dir.path().join("absent.cbor")).is_err());
        assert!(process_single_file(&cli, temp_dir.path()).is_err());
    }

    #[test]
    fn test_fingerprint() {
        let hash1 = fingerprint(b"hello");
        let hash2 = fingerprint(b"hello");
        let hash3 = fingerprint(b"world");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 16);
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
