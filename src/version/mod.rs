// src/version/mod.rs

//! Version parsing and comparison for component packages
//!
//! Component versions are dot-separated strings of 1-4 non-negative
//! integer segments ("10.0.19041.1"). Comparison right-pads both sides
//! to four segments with zeros, so "1.2" and "1.2.0.0" are equal.

use regex::Regex;
use std::cmp::Ordering;
use std::sync::OnceLock;

const SEGMENTS: usize = 4;

fn version_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+(\.\d+){0,3}$").expect("version pattern is valid"))
}

/// Check that a version string matches the accepted grammar
pub fn is_valid(version: &str) -> bool {
    version_pattern().is_match(version)
}

/// Split a version string into four numeric segments.
///
/// Unparsable segments compare as 0; segments past the fourth are ignored.
fn segments(version: &str) -> [u64; SEGMENTS] {
    let mut out = [0u64; SEGMENTS];
    for (i, part) in version.split('.').take(SEGMENTS).enumerate() {
        out[i] = part.parse().unwrap_or(0);
    }
    out
}

/// Compare two version strings segment-by-segment, first difference wins
pub fn compare(v1: &str, v2: &str) -> Ordering {
    let a = segments(v1);
    let b = segments(v2);
    for i in 0..SEGMENTS {
        match a[i].cmp(&b[i]) {
            Ordering::Equal => {}
            ord => return ord,
        }
    }
    Ordering::Equal
}
