// src/identity/mod.rs

//! Package identity and compatibility predicates
//!
//! A `PackageIdentity` names one versioned component: name, version,
//! processor architecture, language, and public key token. Two identities
//! describe the *same package* when everything except the version matches;
//! supersedence and upgrade decisions only ever compare versions between
//! identities that share that key.

use crate::version;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Processor architecture of a package or a target system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    X86,
    Amd64,
    Arm,
    Arm64,
    Neutral,
}

impl Architecture {
    /// Parse an architecture string, applying the usual aliases
    /// ("x64" means amd64, "any cpu" means neutral). Empty strings are
    /// treated as neutral, matching manifest conventions.
    pub fn parse(s: &str) -> Option<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "x86" => Some(Self::X86),
            "amd64" | "x64" => Some(Self::Amd64),
            "arm" => Some(Self::Arm),
            "arm64" => Some(Self::Arm64),
            "neutral" | "any cpu" | "" => Some(Self::Neutral),
            _ => None,
        }
    }

    /// Architecture of the system this process runs on
    pub fn current() -> Self {
        match std::env::consts::ARCH {
            "x86_64" => Self::Amd64,
            "x86" => Self::X86,
            "arm" => Self::Arm,
            "aarch64" => Self::Arm64,
            _ => Self::Neutral,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::X86 => "x86",
            Self::Amd64 => "amd64",
            Self::Arm => "arm",
            Self::Arm64 => "arm64",
            Self::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identity of one versioned component package
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackageIdentity {
    pub name: String,
    pub version: String,
    pub architecture: Architecture,
    pub language: String,
    pub public_key_token: String,
}

impl PackageIdentity {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        architecture: Architecture,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            architecture,
            language: "neutral".to_string(),
            public_key_token: String::new(),
        }
    }

    /// Full identity string including version (cache key in the catalog)
    pub fn full_identity(&self) -> String {
        format!(
            "{}_{}_{}_{}_{}",
            self.name, self.version, self.architecture, self.language, self.public_key_token
        )
    }

    /// Short identity for log output
    pub fn short_identity(&self) -> String {
        format!("{}_{}_{}", self.name, self.version, self.architecture)
    }

    /// True when the other identity names the same package, possibly at a
    /// different version (name, architecture, language, token all match).
    pub fn same_package(&self, other: &PackageIdentity) -> bool {
        self.name.eq_ignore_ascii_case(&other.name)
            && self.architecture == other.architecture
            && self.language.eq_ignore_ascii_case(&other.language)
            && self
                .public_key_token
                .eq_ignore_ascii_case(&other.public_key_token)
    }

    /// Architecture/language compatibility between two packages.
    ///
    /// A mismatch on either axis fails unless one side is neutral; an
    /// empty language also acts as a wildcard.
    pub fn is_compatible_with(&self, other: &PackageIdentity) -> bool {
        if self.architecture != Architecture::Neutral
            && other.architecture != Architecture::Neutral
            && self.architecture != other.architecture
        {
            return false;
        }

        let lang_neutral =
            |l: &str| l.is_empty() || l.eq_ignore_ascii_case("neutral");
        if !lang_neutral(&self.language)
            && !lang_neutral(&other.language)
            && !self.language.eq_ignore_ascii_case(&other.language)
        {
            return false;
        }

        true
    }

    /// Whether this package can run on the given system architecture.
    ///
    /// Neutral runs everywhere; x86 packages additionally run on amd64
    /// systems (one-directional).
    pub fn runs_on(&self, system: Architecture) -> bool {
        match (self.architecture, system) {
            (Architecture::Neutral, _) => true,
            (a, s) if a == s => true,
            (Architecture::X86, Architecture::Amd64) => true,
            _ => false,
        }
    }

    /// Strictly-newer comparison; identities with different names never
    /// compare as newer.
    pub fn is_newer_than(&self, other: &PackageIdentity) -> bool {
        if !self.name.eq_ignore_ascii_case(&other.name) {
            return false;
        }
        version::compare(&self.version, &other.version) == std::cmp::Ordering::Greater
    }

    /// Basic identity validity: non-empty name and a well-formed version
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty() && !self.version.is_empty() && version::is_valid(&self.version)
    }
}

impl fmt::Display for PackageIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_identity())
    }
}
