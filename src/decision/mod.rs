// src/decision/mod.rs

//! Install decision engine
//!
//! Given a candidate package identity and the current catalog, produce an
//! `InstallRecommendation`. Checks run in strict priority order and the
//! first match wins; the reasoning string records which rule fired.

use crate::identity::{Architecture, PackageIdentity};
use crate::store::{InstallState, PackageCatalog};
use serde::Serialize;
use tracing::debug;

/// Outcome of analyzing one candidate package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum InstallDecision {
    Install,
    SkipAlreadyInstalled,
    SkipSuperseded,
    SkipNewerExists,
    SkipIncompatible,
    SkipFailed,
    RepairCorrupted,
    UpdateAvailable,
    DowngradeBlocked,
}

impl InstallDecision {
    /// Decisions that mean the install should proceed
    pub fn should_install(&self) -> bool {
        matches!(
            self,
            Self::Install | Self::RepairCorrupted | Self::UpdateAvailable
        )
    }
}

/// Full recommendation for one candidate, built fresh per analyze call
#[derive(Debug, Clone)]
pub struct InstallRecommendation {
    pub target_package: PackageIdentity,
    pub decision: InstallDecision,
    pub reasoning: String,
    pub requires_restart: bool,
    pub prerequisite_packages: Vec<PackageIdentity>,
    pub conflicting_packages: Vec<PackageIdentity>,
}

impl InstallRecommendation {
    fn new(
        target: PackageIdentity,
        decision: InstallDecision,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            target_package: target,
            decision,
            reasoning: reasoning.into(),
            requires_restart: false,
            prerequisite_packages: Vec::new(),
            conflicting_packages: Vec::new(),
        }
    }
}

/// Decision engine over a scanned catalog
pub struct InstallDecisionEngine<'a> {
    catalog: &'a PackageCatalog,
    system_arch: Architecture,
}

impl<'a> InstallDecisionEngine<'a> {
    pub fn new(catalog: &'a PackageCatalog) -> Self {
        Self {
            catalog,
            system_arch: Architecture::current(),
        }
    }

    /// Build an engine pinned to a specific system architecture, for
    /// analyzing packages targeting a tree other than the running host.
    pub fn with_system_arch(catalog: &'a PackageCatalog, system_arch: Architecture) -> Self {
        Self {
            catalog,
            system_arch,
        }
    }

    /// Analyze one candidate. Checks run in priority order; the first
    /// matching rule produces the recommendation.
    pub fn analyze(&self, package: &PackageIdentity) -> InstallRecommendation {
        if !package.is_valid() {
            return InstallRecommendation::new(
                package.clone(),
                InstallDecision::SkipIncompatible,
                "package identity is invalid (empty name or malformed version)",
            );
        }

        let state = self.catalog.get_state(package).state;
        match state {
            InstallState::Installed => {
                return InstallRecommendation::new(
                    package.clone(),
                    InstallDecision::SkipAlreadyInstalled,
                    format!("{} is already installed", package.short_identity()),
                );
            }
            InstallState::Corrupted => {
                return InstallRecommendation::new(
                    package.clone(),
                    InstallDecision::RepairCorrupted,
                    format!(
                        "{} is installed but corrupted; reinstall will repair it",
                        package.short_identity()
                    ),
                );
            }
            InstallState::Failed => {
                return InstallRecommendation::new(
                    package.clone(),
                    InstallDecision::SkipFailed,
                    format!(
                        "{} failed a previous install attempt; clear the failure before retrying",
                        package.short_identity()
                    ),
                );
            }
            // Resumable; remaining checks still apply
            InstallState::PartiallyInstalled => {}
            _ => {}
        }

        let superseding = self.catalog.find_superseding(package);
        for info in &superseding {
            let sup_state = self.catalog.get_state(&info.superseding).state;
            if matches!(sup_state, InstallState::Installed | InstallState::Staged) {
                return InstallRecommendation::new(
                    package.clone(),
                    InstallDecision::SkipSuperseded,
                    format!(
                        "{} is superseded by {}",
                        package.short_identity(),
                        info.superseding.short_identity()
                    ),
                );
            }
        }

        let newer = self.catalog.newer_versions_of(package);
        if let Some(rec) = self.check_newer_versions(package, &newer) {
            return rec;
        }

        if !package.runs_on(self.system_arch) {
            return InstallRecommendation::new(
                package.clone(),
                InstallDecision::SkipIncompatible,
                format!(
                    "{} does not run on {} systems",
                    package.short_identity(),
                    self.system_arch
                ),
            );
        }

        let reasoning = if state == InstallState::PartiallyInstalled {
            format!(
                "{} is partially installed; resuming installation",
                package.short_identity()
            )
        } else {
            format!("{} is ready to install", package.short_identity())
        };
        let mut rec = InstallRecommendation::new(package.clone(), InstallDecision::Install, reasoning);
        self.fill_details(&mut rec);
        rec
    }

    /// Newer-version rules: a newer installed version of the same package
    /// blocks a downgrade; a newer installed package with the same name
    /// but a different key still skips; a newer version that is merely
    /// known retargets the recommendation to it.
    fn check_newer_versions(
        &self,
        package: &PackageIdentity,
        newer: &[PackageIdentity],
    ) -> Option<InstallRecommendation> {
        for candidate in newer {
            let candidate_state = self.catalog.get_state(candidate).state;
            if candidate_state == InstallState::Installed {
                if candidate.same_package(package) {
                    return Some(InstallRecommendation::new(
                        package.clone(),
                        InstallDecision::DowngradeBlocked,
                        format!(
                            "installed version {} is newer than candidate {}",
                            candidate.version, package.version
                        ),
                    ));
                }
                return Some(InstallRecommendation::new(
                    package.clone(),
                    InstallDecision::SkipNewerExists,
                    format!(
                        "a newer package {} is already installed",
                        candidate.short_identity()
                    ),
                ));
            }
        }

        // Newest known-but-not-installed version becomes the new target
        if let Some(best) = newer.first() {
            debug!(
                "retargeting {} to newer available {}",
                package.short_identity(),
                best.short_identity()
            );
            let mut rec = InstallRecommendation::new(
                best.clone(),
                InstallDecision::UpdateAvailable,
                format!(
                    "newer version {} is available; installing it instead of {}",
                    best.version, package.version
                ),
            );
            self.fill_details(&mut rec);
            return Some(rec);
        }

        None
    }

    /// Populate restart flag, prerequisites and conflicts from manifests
    fn fill_details(&self, rec: &mut InstallRecommendation) {
        if let Some(manifest) = self.catalog.manifest_for(&rec.target_package) {
            rec.requires_restart = manifest.restart_required;
            rec.prerequisite_packages = manifest.dependencies.clone();

            for dep in &manifest.dependencies {
                if let Some(dep_manifest) = self.catalog.manifest_for(dep) {
                    if dep_manifest.restart_required {
                        rec.requires_restart = true;
                    }
                }
            }
        }

        rec.conflicting_packages = self
            .catalog
            .packages_in_state(InstallState::Installed)
            .into_iter()
            .map(|s| s.identity)
            .filter(|installed| {
                installed.name.eq_ignore_ascii_case(&rec.target_package.name)
                    && !installed.is_compatible_with(&rec.target_package)
            })
            .collect();
    }

    /// Analyze each candidate independently
    pub fn analyze_multiple(&self, packages: &[PackageIdentity]) -> Vec<InstallRecommendation> {
        packages.iter().map(|p| self.analyze(p)).collect()
    }
}
