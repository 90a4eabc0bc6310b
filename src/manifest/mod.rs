// src/manifest/mod.rs

//! Component manifest parsing
//!
//! Manifests (`.mum`/`.xml`, and identity-bearing `.cat` filenames)
//! describe one component: its identity, the identities it depends on,
//! and the identities it supersedes. Parsing goes through a chain of
//! fallbacks:
//!
//! 1. Structured XML parse of identity elements (`name`, `version`,
//!    `processorArchitecture`, `language`, `publicKeyToken` attributes)
//! 2. Filename convention `Name~Token~Arch~Language~Version.ext`
//! 3. Last-resort `KB\d+` update-identifier match, version 1.0.0.0
//!
//! A manifest whose name is still empty after all fallbacks is rejected.
//! Parsed manifests are cached keyed by a hash of the source path.

use crate::error::{Error, Result};
use crate::identity::{Architecture, PackageIdentity};
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// What kind of component a manifest describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentType {
    Package,
    Assembly,
    Component,
}

/// One parsed, validated component manifest. Immutable after validation.
#[derive(Debug, Clone)]
pub struct ComponentManifest {
    pub identity: PackageIdentity,
    pub dependencies: Vec<PackageIdentity>,
    pub supersedes: Vec<PackageIdentity>,
    pub component_type: ComponentType,
    pub restart_required: bool,
    pub source_path: PathBuf,
}

fn kb_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"KB(\d+)").expect("KB pattern is valid"))
}

/// Parser with a per-instance cache keyed by source-path hash
#[derive(Default)]
pub struct ManifestParser {
    cache: HashMap<String, ComponentManifest>,
}

impl ManifestParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a manifest file, consulting the cache first.
    pub fn parse(&mut self, path: &Path) -> Result<ComponentManifest> {
        let key = path_hash(path);
        if let Some(cached) = self.cache.get(&key) {
            debug!("using cached manifest for {}", path.display());
            return Ok(cached.clone());
        }

        let manifest = parse_file(path)?;
        validate(&manifest)?;
        self.cache.insert(key, manifest.clone());
        Ok(manifest)
    }
}

/// Content hash of a source path, used as the parse-cache key
fn path_hash(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    hex::encode(hasher.finalize())
}

fn validate(manifest: &ComponentManifest) -> Result<()> {
    if manifest.identity.name.is_empty() {
        return Err(Error::ManifestInvalid(format!(
            "empty package name after all fallbacks: {}",
            manifest.source_path.display()
        )));
    }
    if manifest.identity.version.is_empty() {
        return Err(Error::ManifestInvalid(format!(
            "empty version: {}",
            manifest.source_path.display()
        )));
    }
    if !crate::version::is_valid(&manifest.identity.version) {
        return Err(Error::ManifestInvalid(format!(
            "invalid version format '{}': {}",
            manifest.identity.version,
            manifest.source_path.display()
        )));
    }
    Ok(())
}

fn parse_file(path: &Path) -> Result<ComponentManifest> {
    let raw = fs::read(path)?;
    let content = String::from_utf8_lossy(&raw);

    let mut manifest = parse_xml(&content, path);

    // Structured parse yielded nothing usable: fall back to the filename
    if manifest.identity.name.is_empty() {
        if let Some(file_name) = path.file_name().and_then(|n| n.to_str()) {
            if let Some(identity) = identity_from_filename(file_name) {
                debug!(
                    "parsed identity from filename: {}",
                    identity.short_identity()
                );
                manifest.identity = identity;
            }
        }
    }

    Ok(manifest)
}

/// Parse what we can out of the XML content; missing pieces are left at
/// their defaults and covered by the filename fallbacks.
fn parse_xml(content: &str, path: &Path) -> ComponentManifest {
    let mut manifest = ComponentManifest {
        identity: PackageIdentity::new("", "", Architecture::Neutral),
        dependencies: Vec::new(),
        supersedes: Vec::new(),
        component_type: ComponentType::Component,
        restart_required: false,
        source_path: path.to_path_buf(),
    };

    let mut reader = Reader::from_reader(content.as_bytes());
    let mut buf = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut saw_package = false;
    let mut saw_assembly = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let name = local_name(e.name().as_ref());
                note_element(&name, &mut saw_package, &mut saw_assembly);
                handle_identity_element(&e, &stack, &mut manifest);
                check_restart_attr(&e, &mut manifest);
                stack.push(name);
            }
            Ok(Event::Empty(e)) => {
                let name = local_name(e.name().as_ref());
                note_element(&name, &mut saw_package, &mut saw_assembly);
                handle_identity_element(&e, &stack, &mut manifest);
                check_restart_attr(&e, &mut manifest);
            }
            Ok(Event::End(_)) => {
                stack.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                // Not XML (binary catalogs land here); the caller falls
                // back to filename parsing.
                debug!("XML parse stopped for {}: {}", path.display(), e);
                break;
            }
            _ => {}
        }
        buf.clear();
    }

    manifest.component_type = if saw_package {
        ComponentType::Package
    } else if saw_assembly {
        ComponentType::Assembly
    } else {
        ComponentType::Component
    };

    manifest
}

fn local_name(qname: &[u8]) -> String {
    let name = qname.rsplit(|&b| b == b':').next().unwrap_or(qname);
    String::from_utf8_lossy(name).to_ascii_lowercase()
}

fn note_element(name: &str, saw_package: &mut bool, saw_assembly: &mut bool) {
    match name {
        "package" => *saw_package = true,
        "assembly" => *saw_assembly = true,
        _ => {}
    }
}

/// Identity-bearing elements carry both `name` and `version` attributes
/// (assemblyIdentity and friends). Where the element sits in the document
/// decides whether it is the package identity, a dependency, or a
/// supersedence target.
fn handle_identity_element(
    e: &quick_xml::events::BytesStart<'_>,
    stack: &[String],
    manifest: &mut ComponentManifest,
) {
    let Some(identity) = identity_from_attributes(e) else {
        return;
    };

    let in_context = |needles: &[&str]| {
        stack
            .iter()
            .any(|el| needles.iter().any(|n| el.as_str() == *n))
    };

    if in_context(&["supersedes", "replaces", "applicable"]) {
        debug!("found superseded package: {}", identity.short_identity());
        manifest.supersedes.push(identity);
    } else if in_context(&["dependency", "dependentassembly", "dependencies"]) {
        debug!("found dependency: {}", identity.short_identity());
        manifest.dependencies.push(identity);
    } else if manifest.identity.name.is_empty() {
        manifest.identity = identity;
    }
}

/// Build an identity from element attributes; returns None when the
/// element is not identity-bearing or the entry is malformed (malformed
/// dependency entries are skipped, not fatal).
fn identity_from_attributes(e: &quick_xml::events::BytesStart<'_>) -> Option<PackageIdentity> {
    let mut name = String::new();
    let mut version = String::new();
    let mut arch_str = String::new();
    let mut language = String::new();
    let mut token = String::new();

    for attr in e.attributes().flatten() {
        let key = local_name(attr.key.as_ref());
        let Ok(value) = attr.unescape_value() else {
            continue;
        };
        match key.as_str() {
            "name" => name = value.into_owned(),
            "version" => version = value.into_owned(),
            "processorarchitecture" => arch_str = value.into_owned(),
            "language" => language = value.into_owned(),
            "publickeytoken" => token = value.into_owned(),
            _ => {}
        }
    }

    if name.is_empty() || version.is_empty() {
        return None;
    }

    let Some(architecture) = Architecture::parse(&arch_str) else {
        warn!("skipping identity with unsupported architecture '{}'", arch_str);
        return None;
    };

    Some(PackageIdentity {
        name,
        version,
        architecture,
        language: if language.is_empty() {
            "neutral".to_string()
        } else {
            language
        },
        public_key_token: token,
    })
}

fn check_restart_attr(e: &quick_xml::events::BytesStart<'_>, manifest: &mut ComponentManifest) {
    for attr in e.attributes().flatten() {
        if local_name(attr.key.as_ref()) == "restartrequired" {
            if let Ok(value) = attr.unescape_value() {
                let v = value.to_ascii_lowercase();
                if v != "false" && v != "no" && v != "none" {
                    manifest.restart_required = true;
                }
            }
        }
    }
}

/// Parse a package identity out of a filename following the
/// `Name~Token~Arch~Language~Version.ext` convention, falling back to a
/// `KB\d+` update-identifier match.
pub fn identity_from_filename(file_name: &str) -> Option<PackageIdentity> {
    let stem = match file_name.rfind('.') {
        Some(pos) => &file_name[..pos],
        None => file_name,
    };

    let parts: Vec<&str> = stem.split('~').collect();
    if parts.len() >= 5 {
        let mut name = parts[0].to_string();
        if let Some(stripped) = name.strip_prefix("Package_for_") {
            name = stripped.to_string();
        }

        let architecture = Architecture::parse(parts[2])?;
        let language = if parts[3].is_empty() {
            "neutral".to_string()
        } else {
            parts[3].to_string()
        };

        let identity = PackageIdentity {
            name,
            version: parts[4].to_string(),
            architecture,
            language,
            public_key_token: parts[1].to_string(),
        };

        if !identity.name.is_empty() && !identity.version.is_empty() {
            return Some(identity);
        }
    }

    // Last resort: KB update identifier with a default version
    if let Some(caps) = kb_pattern().captures(stem) {
        return Some(PackageIdentity::new(
            format!("KB{}", &caps[1]),
            "1.0.0.0",
            Architecture::Neutral,
        ));
    }

    None
}
