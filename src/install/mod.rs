// src/install/mod.rs

//! Install orchestration
//!
//! `InstallOrchestrator` drives one package install end to end:
//! extraction into a staging directory, manifest analysis, dependency
//! validation, applicability, then a transactional two-pass copy into
//! the target tree (metadata first, payload second), component
//! registration, store update and commit.
//!
//! A failed commit deliberately leaves already-copied files in place;
//! staged installs prefer moving forward over undoing partial progress.

use crate::decision::{InstallDecisionEngine, InstallRecommendation};
use crate::error::{Error, Result};
use crate::extract::{self, ExtractionChain};
use crate::fsutil;
use crate::identity::{Architecture, PackageIdentity};
use crate::manifest::{self, ComponentManifest, ManifestParser};
use crate::oplog::OperationLog;
use crate::store::{InstallState, PackageCatalog};
use crate::transaction::TransactionManager;
use crate::verify::{AllowAllVerifier, HashCatalogVerifier, SignatureVerifier};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Relative location of the persisted component store under a target root
pub const COMPONENT_STORE_PATH: &str = "Windows/servicing/packages.json";

/// Manifest extensions the analysis step considers
const MANIFEST_EXTENSIONS: &[&str] = &["mum", "cat", "xml"];

/// Orchestrator configuration
pub struct InstallerConfig {
    /// Working directory for transaction journals, locks and the
    /// operation log
    pub work_dir: PathBuf,
    /// Base directory for staging; system temp when unset
    pub staging_base: Option<PathBuf>,
    /// Treat signature verification failures as fatal
    pub strict_verification: bool,
    /// Architecture of the target system
    pub system_arch: Architecture,
}

impl InstallerConfig {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            staging_base: None,
            strict_verification: false,
            system_arch: Architecture::current(),
        }
    }
}

/// Outcome of one install attempt. Partial results are populated even
/// when the overall operation fails.
#[derive(Debug, Default)]
pub struct InstallResult {
    pub success: bool,
    pub installed_components: Vec<String>,
    pub failed_components: Vec<String>,
    pub needs_restart: bool,
    pub error_description: Option<String>,
    pub error_code: Option<&'static str>,
}

impl InstallResult {
    fn fail(&mut self, error: &Error) {
        self.success = false;
        self.error_description = Some(error.to_string());
        self.error_code = Some(error.code());
    }
}

/// Post-commit notification hook for online target systems
pub trait ServicingNotifier {
    fn notify(&self, package: &PackageIdentity) -> Result<()>;
}

/// Notifier that only logs; used for offline trees and tests
pub struct NullNotifier;

impl ServicingNotifier for NullNotifier {
    fn notify(&self, package: &PackageIdentity) -> Result<()> {
        debug!("servicing notification suppressed for {}", package);
        Ok(())
    }
}

struct CopyCounters {
    copied: usize,
    failed: usize,
}

pub struct InstallOrchestrator {
    config: InstallerConfig,
    parser: ManifestParser,
    catalog: PackageCatalog,
    known_manifests: Vec<ComponentManifest>,
    transactions: TransactionManager,
    chain: ExtractionChain,
    verifier: Box<dyn SignatureVerifier>,
    catalog_digests: HashCatalogVerifier,
    notifier: Box<dyn ServicingNotifier>,
    oplog: OperationLog,
}

impl InstallOrchestrator {
    pub fn new(config: InstallerConfig) -> Result<Self> {
        let oplog = OperationLog::open(&config.work_dir.join("operations.log"))?;
        let transactions = TransactionManager::new(config.work_dir.join("txn"));

        for journal in transactions.incomplete_journals()? {
            warn!(
                "incomplete transaction journal from a previous run: {}",
                journal.display()
            );
        }

        Ok(Self {
            config,
            parser: ManifestParser::new(),
            catalog: PackageCatalog::new(),
            known_manifests: Vec::new(),
            transactions,
            chain: ExtractionChain::new(),
            verifier: Box::new(AllowAllVerifier),
            catalog_digests: HashCatalogVerifier::new(),
            notifier: Box::new(NullNotifier),
            oplog,
        })
    }

    /// Replace the signature backend
    pub fn with_verifier(mut self, verifier: Box<dyn SignatureVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    /// Replace the servicing notification hook
    pub fn with_notifier(mut self, notifier: Box<dyn ServicingNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn catalog(&self) -> &PackageCatalog {
        &self.catalog
    }

    /// Parse every manifest under a directory and rebuild the catalog
    /// from the result. Unparsable files are skipped with a warning.
    pub fn scan_directory_for_packages(&mut self, dir: &Path) -> Result<usize> {
        if !dir.is_dir() {
            return Err(Error::PackageNotFound(format!(
                "manifest directory does not exist: {}",
                dir.display()
            )));
        }

        let mut manifests = Vec::new();
        for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() || !has_manifest_extension(entry.path()) {
                continue;
            }
            match self.parser.parse(entry.path()) {
                Ok(m) => manifests.push(m),
                Err(e) => warn!("skipping {}: {}", entry.path().display(), e),
            }
        }

        let count = manifests.len();
        self.known_manifests = manifests;
        self.catalog.scan(&self.known_manifests);
        self.oplog
            .record("scan", &format!("{}: {} manifests", dir.display(), count))?;
        Ok(count)
    }

    /// Overlay persisted install state for a target root onto the catalog
    pub fn load_component_store(&mut self, target_root: &Path) -> Result<usize> {
        self.catalog
            .load_states(&target_root.join(COMPONENT_STORE_PATH))
    }

    /// Analyze a package by manifest path or identity-bearing filename
    pub fn analyze_package_install(&mut self, package: &str) -> Result<InstallRecommendation> {
        let path = Path::new(package);
        let identity = if path.is_file() && has_manifest_extension(path) {
            self.parser.parse(path)?.identity
        } else {
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or(package);
            manifest::identity_from_filename(file_name).ok_or_else(|| {
                Error::ManifestInvalid(format!("no identity derivable from '{}'", package))
            })?
        };

        let engine = InstallDecisionEngine::with_system_arch(&self.catalog, self.config.system_arch);
        let rec = engine.analyze(&identity);
        self.oplog.record(
            "analyze",
            &format!("{}: {:?}", identity.short_identity(), rec.decision),
        )?;
        Ok(rec)
    }

    /// Install one package file into the target tree
    pub fn install_package(
        &mut self,
        package_path: &Path,
        target_root: &Path,
        online: bool,
    ) -> InstallResult {
        let mut result = InstallResult::default();
        match self.run_install(package_path, target_root, online, &mut result) {
            Ok(()) => {}
            Err(e) => {
                warn!("install of {} failed: {}", package_path.display(), e);
                result.fail(&e);
            }
        }
        let outcome = if result.success { "succeeded" } else { "failed" };
        let _ = self.oplog.record(
            "install",
            &format!("{} {}", package_path.display(), outcome),
        );
        result
    }

    fn run_install(
        &mut self,
        package_path: &Path,
        target_root: &Path,
        online: bool,
        result: &mut InstallResult,
    ) -> Result<()> {
        // 1. source must exist
        if !package_path.exists() {
            return Err(Error::PackageNotFound(
                package_path.display().to_string(),
            ));
        }

        // 2. extract into fresh staging; TempDir cleans up on all exits
        let staging = self.create_staging()?;
        self.chain.extract(package_path, staging.path())?;

        // 3. merge manifests, synthesizing from the filename if none parse
        let components = self.collect_components(package_path, staging.path())?;
        info!(
            "{} components in {}",
            components.len(),
            package_path.display()
        );

        // 4. pre-flight dependency check within the extracted set
        validate_dependencies(&components)?;

        // 5. best-effort verification + applicability
        self.check_applicability(package_path, &components)?;

        // rebuild the catalog so extracted components are known to it
        let mut all_manifests = self.known_manifests.clone();
        all_manifests.extend(components.values().cloned());
        self.catalog.scan(&all_manifests);
        self.catalog
            .load_states(&target_root.join(COMPONENT_STORE_PATH))?;

        let primary = primary_identity(&components);

        // 6. open the transaction
        self.transactions
            .begin(&primary.full_identity(), target_root)?;

        // 7-8. two-pass copy: metadata first, then payload
        let files = extract::list_files(staging.path());
        let meta = self.copy_pass(staging.path(), &files, target_root, true);
        let payload = self.copy_pass(staging.path(), &files, target_root, false);
        info!(
            "copy passes done: {} metadata, {} payload ({} failed)",
            meta.copied, payload.copied, payload.failed
        );

        // A payload pass that delivered nothing is unrecoverable: pull the
        // copied metadata back out and remember the components as failed so
        // a retry is not told they are already installed.
        if payload.failed > 0 && payload.copied == 0 {
            self.transactions
                .rollback("payload pass delivered no files")?;
            for component in components.values() {
                self.catalog.set_state(
                    &component.identity,
                    InstallState::Failed,
                    Some("payload copy failed".to_string()),
                );
                result
                    .failed_components
                    .push(component.identity.name.clone());
            }
            result.failed_components.sort();
            result.failed_components.dedup();
            if let Err(e) = self.catalog.save(&target_root.join(COMPONENT_STORE_PATH)) {
                warn!("could not persist failed component states: {}", e);
            }
            return Err(Error::IoError(
                "no payload file could be copied to the target".to_string(),
            ));
        }

        if let Err(e) = self.transactions.stage() {
            let _ = self.transactions.fail(&e.to_string());
            return Err(e);
        }

        // 9. register components
        for component in components.values() {
            self.catalog
                .set_state(&component.identity, InstallState::Installed, None);
            result
                .installed_components
                .push(component.identity.name.clone());
            if component.restart_required {
                result.needs_restart = true;
            }
        }
        result.installed_components.sort();
        result.installed_components.dedup();

        // 10. persist the component store; failure rolls everything back
        if let Err(e) = self.catalog.save(&target_root.join(COMPONENT_STORE_PATH)) {
            self.transactions.rollback(&e.to_string())?;
            result.installed_components.clear();
            return Err(Error::StoreUpdateFailed(e.to_string()));
        }

        // 11. commit; copied files stay in place even if this fails
        self.transactions
            .commit()
            .map_err(|e| Error::CommitFailed(e.to_string()))?;

        // 12. notify the live servicing stack when installing online
        if online {
            if let Err(e) = self.notifier.notify(&primary) {
                warn!("servicing notification failed: {}", e);
            }
        }

        // 13. partial payload failures are tolerated once anything landed;
        // a pass that delivered nothing was already rolled back above
        result.success = true;

        staging.close()?;
        Ok(())
    }

    fn create_staging(&self) -> Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("cabstack-stage-");
        let staging = match &self.config.staging_base {
            Some(base) => {
                fs::create_dir_all(base)?;
                builder.tempdir_in(base)?
            }
            None => builder.tempdir()?,
        };
        Ok(staging)
    }

    /// Parse every manifest-like file under staging into a component set
    /// keyed by identity. Falls back to a single component synthesized
    /// from the package filename.
    fn collect_components(
        &mut self,
        package_path: &Path,
        staging: &Path,
    ) -> Result<HashMap<String, ComponentManifest>> {
        let mut components = HashMap::new();

        for entry in WalkDir::new(staging).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() || !has_manifest_extension(entry.path()) {
                continue;
            }
            match self.parser.parse(entry.path()) {
                Ok(m) => {
                    components.insert(m.identity.full_identity(), m);
                }
                Err(e) => debug!("not a component manifest: {}: {}", entry.path().display(), e),
            }
        }

        if components.is_empty() {
            let file_name = package_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            let identity = manifest::identity_from_filename(file_name).ok_or_else(|| {
                Error::ManifestInvalid(format!(
                    "no manifests found and no identity derivable from '{}'",
                    file_name
                ))
            })?;
            debug!("synthesized default component {}", identity);
            components.insert(
                identity.full_identity(),
                ComponentManifest {
                    identity,
                    dependencies: Vec::new(),
                    supersedes: Vec::new(),
                    component_type: crate::manifest::ComponentType::Package,
                    restart_required: false,
                    source_path: package_path.to_path_buf(),
                },
            );
        }

        Ok(components)
    }

    /// Signature verification (non-fatal unless strict) and architecture
    /// applicability.
    fn check_applicability(
        &self,
        package_path: &Path,
        components: &HashMap<String, ComponentManifest>,
    ) -> Result<()> {
        if !self.verifier.verify(package_path) {
            let msg = format!(
                "signature verification ({}) rejected {}",
                self.verifier.name(),
                package_path.display()
            );
            if self.config.strict_verification {
                return Err(Error::NotApplicable(msg));
            }
            warn!("{}", msg);
        }

        let applicable = components
            .values()
            .any(|c| c.identity.runs_on(self.config.system_arch));
        if !applicable {
            return Err(Error::NotApplicable(format!(
                "no component runs on {} systems",
                self.config.system_arch
            )));
        }
        Ok(())
    }

    /// One copy pass over the staged file list. `metadata` selects the
    /// .mum/.cat pass; the payload pass takes everything else.
    fn copy_pass(
        &mut self,
        staging: &Path,
        files: &[PathBuf],
        target_root: &Path,
        metadata: bool,
    ) -> CopyCounters {
        let mut counters = CopyCounters {
            copied: 0,
            failed: 0,
        };

        for relative in files {
            // Archives built on Windows can carry backslash entry names
            let entry = fsutil::normalize_entry_path(&relative.to_string_lossy());
            if fsutil::is_metadata_file(&entry) != metadata {
                continue;
            }

            let dest = fsutil::classify_destination(&entry, target_root);
            if !fsutil::is_under_root(&dest, target_root) {
                warn!(
                    "destination {} escapes the target root, not copying",
                    dest.display()
                );
                counters.failed += 1;
                continue;
            }

            let source = staging.join(relative);
            if let Err(e) = copy_with_dirs(&source, &dest) {
                warn!("copy of {} failed: {}", relative.display(), e);
                counters.failed += 1;
                continue;
            }
            if let Err(e) = self.transactions.record_copied(&dest) {
                warn!("journal write failed for {}: {}", dest.display(), e);
            }
            counters.copied += 1;

            if metadata && fsutil::is_catalog_file(&dest) {
                if !self.verifier.verify(&dest) {
                    warn!("catalog {} failed verification", dest.display());
                }
                if let Err(e) = self.catalog_digests.register_catalog(&dest) {
                    warn!("catalog registration failed for {}: {}", dest.display(), e);
                }
            }
        }

        counters
    }
}

/// Copy one file, creating the destination directory chain, overwriting
/// any existing file.
fn copy_with_dirs(source: &Path, dest: &Path) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::copy(source, dest)?;
    Ok(())
}

fn has_manifest_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .is_some_and(|e| MANIFEST_EXTENSIONS.contains(&e.as_str()))
}

/// Every non-empty dependency of every component must be satisfiable
/// from the extracted set itself.
fn validate_dependencies(components: &HashMap<String, ComponentManifest>) -> Result<()> {
    let identities: Vec<&PackageIdentity> = components.values().map(|c| &c.identity).collect();
    let mut missing = Vec::new();

    for component in components.values() {
        for dep in &component.dependencies {
            if dep.name.is_empty() {
                continue;
            }
            let satisfied = identities.iter().any(|candidate| {
                candidate.name.eq_ignore_ascii_case(&dep.name)
                    && candidate.is_compatible_with(dep)
                    && crate::version::compare(&candidate.version, &dep.version)
                        != std::cmp::Ordering::Less
            });
            if !satisfied {
                missing.push(dep.short_identity());
            }
        }
    }

    if missing.is_empty() {
        Ok(())
    } else {
        missing.sort();
        missing.dedup();
        Err(Error::DependencyMissing(missing.join(", ")))
    }
}

/// The component whose identity labels the transaction: highest version
/// wins, name as the tie-breaker for determinism.
fn primary_identity(components: &HashMap<String, ComponentManifest>) -> PackageIdentity {
    let mut identities: Vec<&PackageIdentity> =
        components.values().map(|c| &c.identity).collect();
    identities.sort_by(|a, b| {
        crate::version::compare(&b.version, &a.version).then_with(|| a.name.cmp(&b.name))
    });
    identities
        .first()
        .map(|i| (*i).clone())
        .unwrap_or_else(|| PackageIdentity::new("unknown", "0.0.0.0", Architecture::Neutral))
}
