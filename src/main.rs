// src/main.rs

use anyhow::Result;
use cabstack::install::{InstallOrchestrator, InstallerConfig};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

#[derive(Parser)]
#[command(name = "cabstack")]
#[command(author, version, about = "Transactional OS component package installer", long_about = None)]
struct Cli {
    /// Working directory for journals, locks and the operation log
    #[arg(long, default_value = "/var/lib/cabstack")]
    work_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install a package into a target tree
    Install {
        /// Path to the package file (.cab/.msu/update bundle)
        package: PathBuf,
        /// Target root directory
        #[arg(short, long, default_value = "/")]
        target: PathBuf,
        /// Notify the live servicing stack after commit
        #[arg(long)]
        online: bool,
        /// Directory of known manifests to pre-scan
        #[arg(long)]
        manifest_dir: Option<PathBuf>,
    },
    /// Analyze whether a package should be installed
    Analyze {
        /// Manifest path or identity-bearing package filename
        package: String,
        /// Directory of known manifests to scan first
        #[arg(long)]
        manifest_dir: Option<PathBuf>,
        /// Target root whose component store should be consulted
        #[arg(short, long)]
        target: Option<PathBuf>,
    },
    /// Scan a directory of manifests and report the catalog contents
    Scan {
        /// Directory containing .mum/.xml manifests
        dir: PathBuf,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run() {
        Ok(success) if success => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<bool> {
    let cli = Cli::parse();
    let mut orchestrator = InstallOrchestrator::new(InstallerConfig::new(&cli.work_dir))?;

    match cli.command {
        Commands::Install {
            package,
            target,
            online,
            manifest_dir,
        } => {
            if let Some(dir) = manifest_dir {
                let count = orchestrator.scan_directory_for_packages(&dir)?;
                info!("pre-scanned {} manifests from {}", count, dir.display());
            }

            let result = orchestrator.install_package(&package, &target, online);
            for name in &result.installed_components {
                println!("installed: {}", name);
            }
            for name in &result.failed_components {
                println!("failed: {}", name);
            }
            if result.needs_restart {
                println!("restart required");
            }
            if let Some(desc) = &result.error_description {
                eprintln!(
                    "error [{}]: {}",
                    result.error_code.unwrap_or("E_UNKNOWN"),
                    desc
                );
            }
            Ok(result.success)
        }
        Commands::Analyze {
            package,
            manifest_dir,
            target,
        } => {
            if let Some(dir) = manifest_dir {
                orchestrator.scan_directory_for_packages(&dir)?;
            }
            if let Some(root) = target {
                orchestrator.load_component_store(&root)?;
            }

            let rec = orchestrator.analyze_package_install(&package)?;
            println!("package:  {}", rec.target_package.short_identity());
            println!("decision: {:?}", rec.decision);
            println!("reason:   {}", rec.reasoning);
            if rec.requires_restart {
                println!("restart required");
            }
            for dep in &rec.prerequisite_packages {
                println!("requires: {}", dep.short_identity());
            }
            for conflict in &rec.conflicting_packages {
                println!("conflicts: {}", conflict.short_identity());
            }
            Ok(true)
        }
        Commands::Scan { dir } => {
            let count = orchestrator.scan_directory_for_packages(&dir)?;
            println!("{} packages known", count);
            for state in orchestrator
                .catalog()
                .packages_in_state(cabstack::InstallState::NotPresent)
            {
                println!("  {}", state.identity.short_identity());
            }
            Ok(true)
        }
    }
}
