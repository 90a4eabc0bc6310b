// src/lib.rs

//! cabstack: transactional OS component package installer
//!
//! Installs versioned, signed component packages (cabinet/update bundles)
//! onto a target filesystem tree. The library decides whether a package
//! should be installed (identity, current state, supersedence) and then
//! performs the install as an atomic, two-phase, rollback-capable
//! operation.
//!
//! # Architecture
//!
//! - Identity-first: every component is named by (name, version,
//!   architecture, language, key token)
//! - Catalog: package states and supersedence edges, rebuilt by scan
//! - Decision engine: strict-priority rules produce a recommendation
//! - Transactional copy: journaled two-pass copy (metadata, then
//!   payload) with commit/rollback

pub mod decision;
mod error;
pub mod extract;
pub mod fsutil;
pub mod identity;
pub mod install;
pub mod manifest;
pub mod oplog;
pub mod store;
pub mod transaction;
pub mod verify;
pub mod version;

pub use decision::{InstallDecision, InstallDecisionEngine, InstallRecommendation};
pub use error::{Error, Result};
pub use identity::{Architecture, PackageIdentity};
pub use install::{InstallOrchestrator, InstallResult, InstallerConfig, ServicingNotifier};
pub use manifest::{ComponentManifest, ComponentType, ManifestParser};
pub use store::{InstallState, PackageCatalog, PackageState, SupersedenceInfo};
pub use transaction::{TransactionManager, TransactionState};
pub use verify::{AllowAllVerifier, HashCatalogVerifier, SignatureVerifier};
