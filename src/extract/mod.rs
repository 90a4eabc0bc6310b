// src/extract/mod.rs

//! Archive extraction strategy chain
//!
//! Update packages arrive in several container formats, often nested.
//! Extraction walks an ordered list of strategies until one produces at
//! least one regular file in the destination:
//!
//! 1. native zip archive handling (many .cab-labelled updates are zips)
//! 2. the `expand` tool, when present
//! 3. the `7z` tool, when present
//! 4. binary signature scan: carve embedded archives out of wrapper
//!    formats and recurse on the carved candidate
//!
//! Each strategy reports `Ok(false)` to mean "not applicable here, try
//! the next one"; only I/O on the destination itself is a hard error.

pub mod process;

use crate::error::{Error, Result};
use process::ProcessExecutor;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Maximum nesting depth for carved embedded archives
const MAX_CARVE_DEPTH: usize = 2;

/// Minimum plausible size for a carved archive candidate
const MIN_CARVE_BYTES: usize = 1024;

/// Archive magics the binary scan looks for
const SIGNATURES: &[&[u8]] = &[b"MSCF", b"PK\x03\x04", b"PK\x05\x06"];

/// One way of turning an archive file into a directory tree
pub trait ExtractionStrategy {
    fn name(&self) -> &'static str;

    /// Attempt extraction. `Ok(true)` means this strategy ran and
    /// believes it produced output; `Ok(false)` means it does not apply
    /// to this file (wrong format, tool missing).
    fn try_extract(&self, source: &Path, dest: &Path) -> Result<bool>;
}

/// Native zip handling via the zip crate
pub struct ZipArchiveStrategy;

impl ExtractionStrategy for ZipArchiveStrategy {
    fn name(&self) -> &'static str {
        "zip archive"
    }

    fn try_extract(&self, source: &Path, dest: &Path) -> Result<bool> {
        let file = File::open(source)?;
        let mut archive = match zip::ZipArchive::new(file) {
            Ok(a) => a,
            Err(e) => {
                debug!("{} is not a zip archive: {}", source.display(), e);
                return Ok(false);
            }
        };

        if archive.is_empty() {
            return Ok(false);
        }

        match archive.extract(dest) {
            Ok(()) => Ok(true),
            Err(e) => {
                warn!("zip extraction of {} failed: {}", source.display(), e);
                Ok(false)
            }
        }
    }
}

/// External extraction tool invoked through the bounded executor
pub struct ExternalToolStrategy {
    tool: &'static str,
    executor: ProcessExecutor,
}

impl ExternalToolStrategy {
    pub fn expand() -> Self {
        Self {
            tool: "expand",
            executor: ProcessExecutor::new(),
        }
    }

    pub fn seven_zip() -> Self {
        Self {
            tool: "7z",
            executor: ProcessExecutor::new(),
        }
    }

    fn args(&self, source: &Path, dest: &Path) -> Vec<String> {
        let src = source.to_string_lossy().into_owned();
        let dst = dest.to_string_lossy().into_owned();
        match self.tool {
            "expand" => vec![src, "-F:*".to_string(), dst],
            _ => vec!["x".to_string(), src, format!("-o{}", dst), "-y".to_string()],
        }
    }
}

impl ExtractionStrategy for ExternalToolStrategy {
    fn name(&self) -> &'static str {
        match self.tool {
            "expand" => "expand tool",
            _ => "7z tool",
        }
    }

    fn try_extract(&self, source: &Path, dest: &Path) -> Result<bool> {
        let args = self.args(source, dest);
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();

        match self.executor.run(self.tool, &arg_refs) {
            Ok(output) => Ok(output.success()),
            Err(Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} not available on this system", self.tool);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}

/// The full ordered chain, with the binary-scan fallback
pub struct ExtractionChain {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl Default for ExtractionChain {
    fn default() -> Self {
        Self {
            strategies: vec![
                Box::new(ZipArchiveStrategy),
                Box::new(ExternalToolStrategy::expand()),
                Box::new(ExternalToolStrategy::seven_zip()),
            ],
        }
    }
}

impl ExtractionChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain with a caller-supplied strategy table, in order
    pub fn with_strategies(strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        Self { strategies }
    }

    /// Extract `source` into `dest`, trying every strategy in order and
    /// finally the embedded-archive scan. Success requires at least one
    /// regular file in `dest` afterwards.
    pub fn extract(&self, source: &Path, dest: &Path) -> Result<()> {
        self.extract_inner(source, dest, 0)
    }

    fn extract_inner(&self, source: &Path, dest: &Path, depth: usize) -> Result<()> {
        fs::create_dir_all(dest)?;

        let mut last_attempted = "none";
        for strategy in &self.strategies {
            last_attempted = strategy.name();
            debug!("trying {} on {}", strategy.name(), source.display());
            if strategy.try_extract(source, dest)? && Self::has_extracted_files(dest) {
                info!(
                    "extracted {} with {}",
                    source.display(),
                    strategy.name()
                );
                return Ok(());
            }
        }

        if depth < MAX_CARVE_DEPTH {
            if self.scan_and_carve(source, dest, depth)? {
                return Ok(());
            }
            last_attempted = "binary signature scan";
        }

        Err(Error::ExtractionFailed(format!(
            "no strategy could extract {} (last attempted: {})",
            source.display(),
            last_attempted
        )))
    }

    /// Scan for embedded archive signatures, carve each candidate to a
    /// temp file and recurse the whole chain on it. Carved files are
    /// always deleted, success or not.
    fn scan_and_carve(&self, source: &Path, dest: &Path, depth: usize) -> Result<bool> {
        let data = fs::read(source)?;
        if data.len() < MIN_CARVE_BYTES {
            return Ok(false);
        }

        for offset in signature_offsets(&data) {
            if data.len() - offset < MIN_CARVE_BYTES {
                continue;
            }

            let carved = dest.join(format!("embedded_{}.tmp", offset));
            debug!(
                "carving candidate at offset {} from {}",
                offset,
                source.display()
            );
            fs::write(&carved, &data[offset..])?;

            let result = self.extract_inner(&carved, dest, depth + 1);
            let _ = fs::remove_file(&carved);

            if result.is_ok() {
                info!(
                    "extracted embedded archive at offset {} of {}",
                    offset,
                    source.display()
                );
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// At least one regular, non-carve file exists under dest
    fn has_extracted_files(dest: &Path) -> bool {
        WalkDir::new(dest)
            .into_iter()
            .filter_map(|e| e.ok())
            .any(|e| {
                e.file_type().is_file()
                    && e.path().extension().map_or(true, |ext| ext != "tmp")
            })
    }
}

/// Offsets of known archive magics, skipping offset zero (the container
/// itself already failed every direct strategy).
fn signature_offsets(data: &[u8]) -> Vec<usize> {
    let mut offsets = Vec::new();
    for sig in SIGNATURES {
        let mut start = 0;
        while start + sig.len() <= data.len() {
            match find_subsequence(&data[start..], sig) {
                Some(rel) => {
                    let abs = start + rel;
                    if abs != 0 {
                        offsets.push(abs);
                    }
                    start = abs + 1;
                }
                None => break,
            }
        }
    }
    offsets.sort_unstable();
    offsets.dedup();
    offsets
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// List every regular file under a directory, relative paths sorted
pub fn list_files(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.path().strip_prefix(root).ok().map(Path::to_path_buf))
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn build_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        for (name, content) in entries {
            writer
                .start_file(*name, SimpleFileOptions::default())
                .unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_zip_strategy_extracts() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("pkg.cab");
        build_zip(&archive, &[("inner/file.txt", b"payload")]);

        let dest = dir.path().join("out");
        fs::create_dir_all(&dest).unwrap();
        let ok = ZipArchiveStrategy.try_extract(&archive, &dest).unwrap();
        assert!(ok);
        assert_eq!(
            fs::read_to_string(dest.join("inner/file.txt")).unwrap(),
            "payload"
        );
    }

    #[test]
    fn test_zip_strategy_rejects_non_zip() {
        let dir = TempDir::new().unwrap();
        let bogus = dir.path().join("bogus.cab");
        fs::write(&bogus, b"this is not an archive").unwrap();

        let dest = dir.path().join("out");
        fs::create_dir_all(&dest).unwrap();
        assert!(!ZipArchiveStrategy.try_extract(&bogus, &dest).unwrap());
    }

    #[test]
    fn test_chain_extracts_plain_zip() {
        let dir = TempDir::new().unwrap();
        let archive = dir.path().join("pkg.cab");
        build_zip(&archive, &[("a.txt", b"a")]);

        let dest = dir.path().join("out");
        ExtractionChain::new().extract(&archive, &dest).unwrap();
        assert!(dest.join("a.txt").exists());
    }

    #[test]
    fn test_chain_fails_on_garbage_naming_last_strategy() {
        let dir = TempDir::new().unwrap();
        let bogus = dir.path().join("bogus.cab");
        fs::write(&bogus, vec![0u8; 4096]).unwrap();

        let dest = dir.path().join("out");
        let err = ExtractionChain::new().extract(&bogus, &dest).unwrap_err();
        assert!(matches!(err, Error::ExtractionFailed(_)));
        assert!(err.to_string().contains("last attempted"));
    }

    #[test]
    fn test_embedded_archive_in_opaque_wrapper_is_extracted() {
        let dir = TempDir::new().unwrap();
        let inner = dir.path().join("inner.zip");
        // Padding pushes the payload past the minimum carve size
        build_zip(
            &inner,
            &[("carved.txt", b"found me"), ("pad.bin", &[0x5a; 2048])],
        );
        let zip_bytes = fs::read(&inner).unwrap();

        // Wrap the zip in an opaque header no direct strategy understands
        let wrapper = dir.path().join("wrapper.bin");
        let mut data = vec![0u8; 2000];
        data.extend_from_slice(&zip_bytes);
        fs::write(&wrapper, &data).unwrap();

        let dest = dir.path().join("out");
        ExtractionChain::new().extract(&wrapper, &dest).unwrap();
        assert_eq!(
            fs::read_to_string(dest.join("carved.txt")).unwrap(),
            "found me"
        );

        // Carved temp files never survive
        assert!(list_files(&dest)
            .iter()
            .all(|p| p.extension().map_or(true, |e| e != "tmp")));
    }

    #[test]
    fn test_signature_offsets_skip_zero() {
        let mut data = b"PK\x03\x04".to_vec();
        data.extend_from_slice(&[0u8; 100]);
        data.extend_from_slice(b"MSCF");
        data.extend_from_slice(&[0u8; 100]);

        let offsets = signature_offsets(&data);
        assert!(!offsets.contains(&0));
        assert!(offsets.contains(&104));
    }

    #[test]
    fn test_list_files_sorted_relative() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("b/two.txt"), "2").unwrap();
        fs::write(dir.path().join("one.txt"), "1").unwrap();

        let files = list_files(dir.path());
        assert_eq!(
            files,
            vec![PathBuf::from("b/two.txt"), PathBuf::from("one.txt")]
        );
    }
}
