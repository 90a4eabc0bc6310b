// tests/install_flow.rs

//! End-to-end install scenarios against a sandboxed target tree

mod common;

use cabstack::install::{InstallOrchestrator, InstallerConfig, COMPONENT_STORE_PATH};
use cabstack::{InstallDecision, InstallState, PackageIdentity};
use common::{build_package, mum_xml, mum_xml_with_dependency};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct Sandbox {
    _dir: TempDir,
    target: PathBuf,
    work: PathBuf,
    packages: PathBuf,
}

impl Sandbox {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("target");
        let work = dir.path().join("work");
        let packages = dir.path().join("packages");
        fs::create_dir_all(&target).unwrap();
        fs::create_dir_all(&packages).unwrap();
        Self {
            _dir: dir,
            target,
            work,
            packages,
        }
    }

    fn orchestrator(&self) -> InstallOrchestrator {
        InstallOrchestrator::new(InstallerConfig::new(&self.work)).unwrap()
    }

    fn store_path(&self) -> PathBuf {
        self.target.join(COMPONENT_STORE_PATH)
    }
}

fn foo_identity(version: &str) -> PackageIdentity {
    let mut id = PackageIdentity::new("Foo", version, cabstack::Architecture::Neutral);
    id.public_key_token = "31bf3856ad364e35".to_string();
    id
}

#[test]
fn install_copies_payload_and_registers_component() {
    let sandbox = Sandbox::new();
    let pkg = sandbox.packages.join("Foo~31bf3856ad364e35~neutral~~2.0.0.0.cab");
    build_package(
        &pkg,
        &[
            (
                "Foo~31bf3856ad364e35~neutral~~2.0.0.0.mum",
                mum_xml("Foo", "2.0.0.0", "neutral").as_bytes(),
            ),
            ("Windows/System32/Foo.dll", b"payload bytes"),
        ],
    );

    let mut orch = sandbox.orchestrator();
    let result = orch.install_package(&pkg, &sandbox.target, false);

    assert!(result.success, "error: {:?}", result.error_description);
    assert_eq!(result.installed_components, vec!["Foo".to_string()]);
    assert!(!result.needs_restart);

    // Payload mirrors its recognized top-level path
    let dll = sandbox.target.join("Windows/System32/Foo.dll");
    assert_eq!(fs::read(&dll).unwrap(), b"payload bytes");

    // Metadata lands in the package store
    assert!(sandbox
        .target
        .join("Windows/servicing/Packages/Foo~31bf3856ad364e35~neutral~~2.0.0.0.mum")
        .exists());

    // Component store records the installed state
    let store = fs::read_to_string(sandbox.store_path()).unwrap();
    assert!(store.contains("Foo"));
    assert!(store.contains("Installed"));
}

#[test]
fn missing_dependency_fails_with_empty_install_list() {
    let sandbox = Sandbox::new();
    let pkg = sandbox.packages.join("needs-ghost.cab");
    build_package(
        &pkg,
        &[
            (
                "app.mum",
                mum_xml_with_dependency("App", "1.0.0.0", "Ghost", "1.0.0.0").as_bytes(),
            ),
            ("payload.dll", b"x"),
        ],
    );

    let mut orch = sandbox.orchestrator();
    let result = orch.install_package(&pkg, &sandbox.target, false);

    assert!(!result.success);
    assert_eq!(result.error_code, Some("E_DEPENDENCY_MISSING"));
    assert!(result.error_description.unwrap().contains("Ghost"));
    assert!(result.installed_components.is_empty());

    // Nothing copied before the pre-flight check failed
    assert!(!sandbox.target.join("Windows").exists());
}

#[test]
fn dependency_satisfied_within_package() {
    let sandbox = Sandbox::new();
    let pkg = sandbox.packages.join("bundle.cab");
    build_package(
        &pkg,
        &[
            ("base.mum", mum_xml("Base", "1.0.0.0", "neutral").as_bytes()),
            (
                "app.mum",
                mum_xml_with_dependency("App", "1.0.0.0", "Base", "1.0.0.0").as_bytes(),
            ),
            ("Windows/app.exe", b"app"),
        ],
    );

    let mut orch = sandbox.orchestrator();
    let result = orch.install_package(&pkg, &sandbox.target, false);
    assert!(result.success, "error: {:?}", result.error_description);
    assert_eq!(
        result.installed_components,
        vec!["App".to_string(), "Base".to_string()]
    );
}

#[test]
fn payload_only_package_synthesizes_identity_from_filename() {
    let sandbox = Sandbox::new();
    let pkg = sandbox.packages.join("Windows-KB5005033.cab");
    build_package(&pkg, &[("hotfix.dll", b"fix")]);

    let mut orch = sandbox.orchestrator();
    let result = orch.install_package(&pkg, &sandbox.target, false);

    assert!(result.success, "error: {:?}", result.error_description);
    assert_eq!(result.installed_components, vec!["KB5005033".to_string()]);
    // Unrecognized relative paths land under Windows
    assert!(sandbox.target.join("Windows/hotfix.dll").exists());
}

#[test]
fn reinstall_analysis_is_idempotent_skip() {
    let sandbox = Sandbox::new();
    let pkg = sandbox.packages.join("foo-2.cab");
    let mum_name = "Foo~31bf3856ad364e35~neutral~~2.0.0.0.mum";
    build_package(
        &pkg,
        &[
            (mum_name, mum_xml("Foo", "2.0.0.0", "neutral").as_bytes()),
            ("Windows/System32/Foo.dll", b"v2"),
        ],
    );

    let mut orch = sandbox.orchestrator();
    assert!(orch.install_package(&pkg, &sandbox.target, false).success);

    // A fresh orchestrator rebuilds its view from the target tree
    let mut fresh = sandbox.orchestrator();
    let store_dir = sandbox.target.join("Windows/servicing/Packages");
    fresh.scan_directory_for_packages(&store_dir).unwrap();
    fresh.load_component_store(&sandbox.target).unwrap();

    let mum_path = store_dir.join(mum_name);
    for _ in 0..2 {
        let rec = fresh
            .analyze_package_install(mum_path.to_str().unwrap())
            .unwrap();
        assert_eq!(rec.decision, InstallDecision::SkipAlreadyInstalled);
    }

    // Analysis never mutates persisted state
    let state = fresh.catalog().get_state(&foo_identity("2.0.0.0"));
    assert_eq!(state.state, InstallState::Installed);
}

#[test]
fn older_version_blocked_when_newer_installed() {
    let sandbox = Sandbox::new();

    let v3 = sandbox.packages.join("foo-3.cab");
    build_package(
        &v3,
        &[
            (
                "Foo~31bf3856ad364e35~neutral~~3.0.0.0.mum",
                mum_xml("Foo", "3.0.0.0", "neutral").as_bytes(),
            ),
            ("Windows/System32/Foo.dll", b"v3"),
        ],
    );
    let mut orch = sandbox.orchestrator();
    assert!(orch.install_package(&v3, &sandbox.target, false).success);

    // An older manifest shows up for analysis
    let old_mum = sandbox.packages.join("Foo~31bf3856ad364e35~neutral~~2.0.0.0.mum");
    fs::write(&old_mum, mum_xml("Foo", "2.0.0.0", "neutral")).unwrap();

    let mut fresh = sandbox.orchestrator();
    fresh
        .scan_directory_for_packages(sandbox.packages.parent().unwrap())
        .unwrap();
    fresh.load_component_store(&sandbox.target).unwrap();

    let rec = fresh
        .analyze_package_install(old_mum.to_str().unwrap())
        .unwrap();
    assert_eq!(rec.decision, InstallDecision::DowngradeBlocked);
    assert!(!rec.decision.should_install());
}

#[test]
#[cfg(unix)]
fn escaping_destination_counts_as_failure() {
    let sandbox = Sandbox::new();

    // Windows in the target tree is a symlink pointing outside of it
    let outside = sandbox.target.parent().unwrap().join("outside");
    fs::create_dir_all(&outside).unwrap();
    fs::write(outside.join("hotfix.dll"), b"precious").unwrap();
    std::os::unix::fs::symlink(&outside, sandbox.target.join("Windows")).unwrap();

    let pkg = sandbox.packages.join("Windows-KB5005100.cab");
    build_package(&pkg, &[("hotfix.dll", b"evil")]);

    let mut orch = sandbox.orchestrator();
    let result = orch.install_package(&pkg, &sandbox.target, false);

    assert!(!result.success);
    assert_eq!(result.error_code, Some("E_IO"));
    assert!(result.installed_components.is_empty());
    assert_eq!(result.failed_components, vec!["KB5005100".to_string()]);

    // The file behind the symlink was never touched
    assert_eq!(fs::read(outside.join("hotfix.dll")).unwrap(), b"precious");
}

#[test]
fn undeliverable_payload_rolls_back_and_records_failure() {
    let sandbox = Sandbox::new();
    let mum_name = "Foo~31bf3856ad364e35~neutral~~2.0.0.0.mum";
    let pkg = sandbox.packages.join("Foo~31bf3856ad364e35~neutral~~2.0.0.0.cab");
    build_package(
        &pkg,
        &[
            (mum_name, mum_xml("Foo", "2.0.0.0", "neutral").as_bytes()),
            ("Windows/System32/Foo.dll", b"v2"),
        ],
    );

    // A directory squatting on the payload destination makes the copy fail
    fs::create_dir_all(sandbox.target.join("Windows/System32/Foo.dll")).unwrap();

    let mut orch = sandbox.orchestrator();
    let result = orch.install_package(&pkg, &sandbox.target, false);

    assert!(!result.success);
    assert_eq!(result.error_code, Some("E_IO"));
    assert!(result.installed_components.is_empty());
    assert_eq!(result.failed_components, vec!["Foo".to_string()]);

    // The copied manifest was rolled back out of the target tree
    assert!(!sandbox
        .target
        .join("Windows/servicing/Packages")
        .join(mum_name)
        .exists());

    // The store remembers the failure, so a retry sees SkipFailed rather
    // than SkipAlreadyInstalled
    let store = fs::read_to_string(sandbox.store_path()).unwrap();
    assert!(store.contains("Failed"));
    assert!(!store.contains("\"Installed\""));

    let rec = orch.analyze_package_install(pkg.to_str().unwrap()).unwrap();
    assert_eq!(rec.decision, InstallDecision::SkipFailed);
}

#[test]
fn unextractable_package_reports_extraction_failure() {
    let sandbox = Sandbox::new();
    let pkg = sandbox.packages.join("garbage.cab");
    fs::write(&pkg, vec![0u8; 4096]).unwrap();

    let mut orch = sandbox.orchestrator();
    let result = orch.install_package(&pkg, &sandbox.target, false);
    assert!(!result.success);
    assert_eq!(result.error_code, Some("E_EXTRACTION_FAILED"));
}

#[test]
fn operation_log_records_install() {
    let sandbox = Sandbox::new();
    let pkg = sandbox.packages.join("Windows-KB5000001.cab");
    build_package(&pkg, &[("a.dll", b"a")]);

    let mut orch = sandbox.orchestrator();
    assert!(orch.install_package(&pkg, &sandbox.target, false).success);

    let log = fs::read_to_string(sandbox.work.join("operations.log")).unwrap();
    assert!(log.contains("[install]"));
    assert!(log.contains("succeeded"));
}

#[test]
fn commit_archives_transaction_journal() {
    let sandbox = Sandbox::new();
    let pkg = sandbox.packages.join("Windows-KB5000002.cab");
    build_package(&pkg, &[("b.dll", b"b")]);

    let mut orch = sandbox.orchestrator();
    assert!(orch.install_package(&pkg, &sandbox.target, false).success);

    let archive = sandbox.work.join("txn/journal/archive");
    assert_eq!(fs::read_dir(archive).unwrap().count(), 1);
}

#[test]
fn scan_directory_counts_manifests() {
    let sandbox = Sandbox::new();
    let dir = sandbox.packages.join("manifests");
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("a.mum"), mum_xml("A", "1.0.0.0", "neutral")).unwrap();
    fs::write(dir.join("b.mum"), mum_xml("B", "2.0.0.0", "neutral")).unwrap();
    fs::write(dir.join("notes.txt"), "not a manifest").unwrap();

    let mut orch = sandbox.orchestrator();
    assert_eq!(orch.scan_directory_for_packages(&dir).unwrap(), 2);
    assert_eq!(orch.catalog().package_count(), 2);
}

#[test]
fn scan_missing_directory_is_an_error() {
    let sandbox = Sandbox::new();
    let mut orch = sandbox.orchestrator();
    assert!(orch
        .scan_directory_for_packages(Path::new("/definitely/not/here"))
        .is_err());
}
