// src/fsutil/mod.rs

//! Path safety and destination classification
//!
//! Archive entry names come from untrusted packages, so every destination
//! is checked against the install root before a single byte is copied.
//! Classification decides where an extracted file lands under the target
//! tree, mirroring the layout conventions of component packages.

use std::path::{Component, Path, PathBuf};

/// Top-level folders a payload path may address directly
const RECOGNIZED_ROOTS: &[&str] = &["windows", "program files", "program files (x86)", "programdata", "users"];

/// Normalize an archive entry name: backslash separators become `/`,
/// leading separators and drive prefixes are stripped.
pub fn normalize_entry_path(entry: &str) -> PathBuf {
    let unified = entry.replace('\\', "/");
    let trimmed = unified.trim_start_matches('/');
    // Strip a drive prefix like "C:"
    let without_drive = match trimmed.split_once(':') {
        Some((drive, rest)) if drive.len() == 1 => rest.trim_start_matches('/'),
        _ => trimmed,
    };
    PathBuf::from(without_drive)
}

/// Resolve `.` and `..` components lexically, without touching the
/// filesystem. `..` at the top pops nothing (the path stays rooted).
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Whether `candidate` is the root itself or strictly inside it.
///
/// Comparison is lexical after normalization, case-folded to match
/// case-insensitive target trees; when both paths exist they are
/// canonicalized first so symlinks cannot escape.
pub fn is_under_root(candidate: &Path, root: &Path) -> bool {
    // Resolve both on the same plane: canonical only when both exist,
    // lexical otherwise, so a canonicalized root never mismatches a
    // not-yet-created destination.
    let (resolved_candidate, resolved_root) = match (candidate.canonicalize(), root.canonicalize())
    {
        (Ok(c), Ok(r)) => (c, r),
        _ => (lexical_normalize(candidate), lexical_normalize(root)),
    };

    let cand = resolved_candidate.to_string_lossy().to_lowercase();
    let base = resolved_root.to_string_lossy().to_lowercase();

    if cand == base {
        return true;
    }
    cand.starts_with(&format!("{}/", base.trim_end_matches('/')))
}

/// Whether a filename is a servicing metadata file (.mum manifest or
/// .cat catalog)
pub fn is_metadata_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()).map(|e| e.to_ascii_lowercase()),
        Some(ref e) if e == "mum" || e == "cat"
    )
}

/// Whether a filename is a security catalog (.cat), case-insensitive
pub fn is_catalog_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("cat"))
}

/// Decide where an extracted file lands under the install root.
///
/// Paths carrying a WinSxS or servicing\Packages marker map verbatim
/// under `<root>/Windows` from the marker onward. Metadata files without
/// a marker go to the package store. Payload addressed from a recognized
/// top-level folder mirrors its relative path; anything else is treated
/// as system payload under `<root>/Windows`.
pub fn classify_destination(relative: &Path, root: &Path) -> PathBuf {
    let normalized = lexical_normalize(relative);
    let components: Vec<String> = normalized
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().to_lowercase()),
            _ => None,
        })
        .collect();

    if let Some(pos) = marker_position(&components) {
        let mut dest = root.join("Windows");
        for component in normalized.components().skip(skip_to(&normalized, pos)) {
            dest.push(component);
        }
        return dest;
    }

    if is_metadata_file(&normalized) {
        let filename = normalized.file_name().unwrap_or_default();
        return root
            .join("Windows")
            .join("servicing")
            .join("Packages")
            .join(filename);
    }

    if let Some(first) = components.first() {
        if RECOGNIZED_ROOTS.contains(&first.as_str()) {
            return root.join(&normalized);
        }
    }

    root.join("Windows").join(&normalized)
}

/// Index of the first marker component: `winsxs`, or `servicing` directly
/// followed by `packages`.
fn marker_position(components: &[String]) -> Option<usize> {
    for (i, c) in components.iter().enumerate() {
        if c == "winsxs" {
            return Some(i);
        }
        if c == "servicing" && components.get(i + 1).map(String::as_str) == Some("packages") {
            return Some(i);
        }
    }
    None
}

/// Translate a component index back into a `components()` skip count
/// (normal components only follow any prefix/root components).
fn skip_to(path: &Path, normal_index: usize) -> usize {
    let mut seen_normal = 0;
    for (i, c) in path.components().enumerate() {
        if matches!(c, Component::Normal(_)) {
            if seen_normal == normal_index {
                return i;
            }
            seen_normal += 1;
        }
    }
    0
}
