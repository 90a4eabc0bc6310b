// src/store/mod.rs

//! Package state catalog and supersedence database
//!
//! `PackageCatalog` owns the two registries the install decision engine
//! queries: the per-identity state cache and the supersedence edge list.
//! Both are rebuilt deterministically by `scan()` from a set of parsed
//! manifests; installed state observed from a previous run is overlaid
//! from the persisted component store.
//!
//! Supersedence is never inferred transitively: A supersedes B and
//! B supersedes C does not imply A supersedes C.

use crate::error::Result;
use crate::identity::PackageIdentity;
use crate::manifest::ComponentManifest;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Installation state of one known package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallState {
    NotPresent,
    Staged,
    Installed,
    PartiallyInstalled,
    Superseded,
    Pending,
    Failed,
    Corrupted,
    Unknown,
}

/// State record for one package identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageState {
    pub identity: PackageIdentity,
    pub state: InstallState,
    pub last_state_change: DateTime<Utc>,
    pub error_description: Option<String>,
}

impl PackageState {
    fn new(identity: PackageIdentity, state: InstallState) -> Self {
        Self {
            identity,
            state,
            last_state_change: Utc::now(),
            error_description: None,
        }
    }
}

/// One supersedence edge: `superseding` replaces `superseded`
#[derive(Debug, Clone)]
pub struct SupersedenceInfo {
    pub superseding: PackageIdentity,
    pub superseded: PackageIdentity,
    /// Declared directly in a manifest (the only kind we record; kept so
    /// callers can distinguish if inference is ever added)
    pub is_direct: bool,
}

/// The catalog of known packages: state cache + supersedence database
#[derive(Default)]
pub struct PackageCatalog {
    states: HashMap<String, PackageState>,
    manifests: HashMap<String, ComponentManifest>,
    supersedence: Vec<SupersedenceInfo>,
}

impl PackageCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild both registries from a set of parsed manifests. Previous
    /// contents are discarded; persisted install state must be overlaid
    /// with [`load_states`](Self::load_states) afterwards.
    pub fn scan(&mut self, manifests: &[ComponentManifest]) {
        self.states.clear();
        self.manifests.clear();
        self.supersedence.clear();

        for manifest in manifests {
            let key = manifest.identity.full_identity();
            self.states.entry(key.clone()).or_insert_with(|| {
                PackageState::new(manifest.identity.clone(), InstallState::NotPresent)
            });
            self.manifests.insert(key, manifest.clone());

            for superseded in &manifest.supersedes {
                self.supersedence.push(SupersedenceInfo {
                    superseding: manifest.identity.clone(),
                    superseded: superseded.clone(),
                    is_direct: true,
                });
            }
        }

        debug!(
            "catalog scan complete: {} packages, {} supersedence edges",
            self.states.len(),
            self.supersedence.len()
        );
    }

    pub fn package_count(&self) -> usize {
        self.states.len()
    }

    /// Current state of a package; identities the catalog has never seen
    /// report `NotPresent`.
    pub fn get_state(&self, identity: &PackageIdentity) -> PackageState {
        self.states
            .get(&identity.full_identity())
            .cloned()
            .unwrap_or_else(|| PackageState::new(identity.clone(), InstallState::NotPresent))
    }

    /// Record a state change for a package, typically after an install
    /// attempt completes. Never called mid-transaction.
    pub fn set_state(
        &mut self,
        identity: &PackageIdentity,
        state: InstallState,
        error_description: Option<String>,
    ) {
        let record = self
            .states
            .entry(identity.full_identity())
            .or_insert_with(|| PackageState::new(identity.clone(), state));
        record.state = state;
        record.last_state_change = Utc::now();
        record.error_description = error_description;
    }

    /// Manifest for an identity, when one was seen during the last scan
    pub fn manifest_for(&self, identity: &PackageIdentity) -> Option<&ComponentManifest> {
        self.manifests.get(&identity.full_identity())
    }

    /// All direct supersedence edges pointing at the given package,
    /// sorted newest superseding version first.
    pub fn find_superseding(&self, package: &PackageIdentity) -> Vec<SupersedenceInfo> {
        let target = package.full_identity();
        let mut found: Vec<SupersedenceInfo> = self
            .supersedence
            .iter()
            .filter(|info| info.superseded.full_identity() == target)
            .cloned()
            .collect();

        found.sort_by(|a, b| {
            crate::version::compare(&b.superseding.version, &a.superseding.version)
        });
        found
    }

    /// Whether any package that directly supersedes this one is already
    /// installed or staged.
    pub fn is_superseded(&self, package: &PackageIdentity) -> bool {
        self.find_superseding(package).iter().any(|info| {
            matches!(
                self.get_state(&info.superseding).state,
                InstallState::Installed | InstallState::Staged
            )
        })
    }

    /// Known identities with the same name and a strictly newer version,
    /// newest first.
    pub fn newer_versions_of(&self, package: &PackageIdentity) -> Vec<PackageIdentity> {
        let mut newer: Vec<PackageIdentity> = self
            .states
            .values()
            .map(|s| &s.identity)
            .filter(|candidate| candidate.is_newer_than(package))
            .cloned()
            .collect();

        newer.sort_by(|a, b| crate::version::compare(&b.version, &a.version));
        newer
    }

    /// All known package states in a given install state
    pub fn packages_in_state(&self, state: InstallState) -> Vec<PackageState> {
        self.states
            .values()
            .filter(|s| s.state == state)
            .cloned()
            .collect()
    }

    /// Persist the state cache to the component store file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut records: Vec<&PackageState> = self.states.values().collect();
        records.sort_by(|a, b| a.identity.full_identity().cmp(&b.identity.full_identity()));
        let json = serde_json::to_string_pretty(&records).map_err(|e| {
            crate::Error::StoreUpdateFailed(format!("failed to serialize component store: {}", e))
        })?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Overlay previously persisted state records onto the catalog.
    /// Returns the number of records applied; a missing store file is not
    /// an error (first run).
    pub fn load_states(&mut self, path: &Path) -> Result<usize> {
        if !path.exists() {
            return Ok(0);
        }
        let json = fs::read_to_string(path)?;
        let records: Vec<PackageState> = serde_json::from_str(&json).map_err(|e| {
            crate::Error::StoreUpdateFailed(format!("failed to parse component store: {}", e))
        })?;
        let count = records.len();
        for record in records {
            self.states
                .insert(record.identity.full_identity(), record);
        }
        Ok(count)
    }
}
