//! LastLook - command-line driver for verified media offload.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use lastlook::{
    config::EngineConfig,
    copier::NativeCopier,
    file_ops::{list_entries, CopyOptions},
    journal::{FsManifestStore, ManifestJournal},
    logging,
    metrics::{format_duration, format_size},
    orchestrator::{BatchReport, StartOutcome, TransferEvent, TransferOrchestrator},
    safety::{delete_source_files, deletion_candidates, run_safety_check, DeletePlan, SafetyStatus},
    selection::Selected,
    Resolution,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Copy and verify files from SOURCE into DEST
    Transfer {
        source: PathBuf,
        dest: PathBuf,
        /// File names to transfer (default: every file in SOURCE)
        files: Vec<String>,
        /// What to do with files that already exist at DEST
        #[arg(long, value_enum, default_value_t = ConflictMode::Smart)]
        on_conflict: ConflictMode,
    },
    /// Show the manifest journal of DEST
    Status { dest: PathBuf },
    /// Delete source files that DEST's journal proves were verified
    Prune {
        source: PathBuf,
        dest: PathBuf,
        files: Vec<String>,
        /// Skip the presence check on DEST
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ConflictMode {
    Smart,
    Force,
    Skip,
    Cancel,
}

impl From<ConflictMode> for Resolution {
    fn from(mode: ConflictMode) -> Self {
        match mode {
            ConflictMode::Smart => Resolution::OverwriteSmart,
            ConflictMode::Force => Resolution::ForceOverwrite,
            ConflictMode::Skip => Resolution::SkipExisting,
            ConflictMode::Cancel => Resolution::Cancel,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => EngineConfig::from_file(path)?,
        None => EngineConfig::load()?,
    };

    let log_level = args.log_level.as_deref().unwrap_or(&config.log_level);
    logging::init(log_level)?;

    tracing::info!("Starting {}", config.app_version());

    match args.command {
        Command::Transfer {
            source,
            dest,
            files,
            on_conflict,
        } => transfer(config, &source, &dest, files, on_conflict.into()).await,
        Command::Status { dest } => status(&dest).await,
        Command::Prune {
            source,
            dest,
            files,
            force,
        } => prune(&source, &dest, files, force).await,
    }
}

async fn transfer(
    config: EngineConfig,
    source: &Path,
    dest: &Path,
    files: Vec<String>,
    resolution: Resolution,
) -> Result<()> {
    let copier = NativeCopier::new(CopyOptions {
        buffer_size: config.copy_buffer_size,
        preserve_mtime: true,
        algorithm: config.hash_algorithm,
    });
    let (tx, rx) = mpsc::unbounded_channel();
    let orchestrator = Arc::new(
        TransferOrchestrator::new(config, Arc::new(copier)).with_events(tx),
    );

    orchestrator.set_source(source)?;
    orchestrator.mount_destination(dest).await?;

    let files = if files.is_empty() {
        top_level_files(source)?
    } else {
        files
    };

    let printer = tokio::spawn(print_events(rx));
    let canceller = orchestrator.clone();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancelling after the current file...");
            canceller.cancel();
        }
    });

    let outcome = match orchestrator.start(files).await? {
        StartOutcome::AwaitingResolution(conflicts) => {
            println!(
                "{} file(s) already at destination, resolving with {:?}",
                conflicts.len(),
                resolution
            );
            orchestrator.resolve(resolution).await?
        }
        other => other,
    };
    ctrl_c.abort();
    drop(orchestrator);
    let _ = printer.await;

    match outcome {
        StartOutcome::Finished(report) => print_report(&report),
        StartOutcome::Aborted => println!("Transfer cancelled; nothing was copied."),
        StartOutcome::Ignored => println!("Nothing to transfer."),
        StartOutcome::AwaitingResolution(_) => {}
    }
    Ok(())
}

fn top_level_files(source: &Path) -> Result<Vec<String>> {
    Ok(list_entries(source)
        .with_context(|| format!("listing {}", source.display()))?
        .into_iter()
        .filter(|e| !e.is_dir)
        .map(|e| e.name)
        .collect())
}

async fn print_events(mut rx: mpsc::UnboundedReceiver<TransferEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            TransferEvent::FileVerified { filename, copied } => {
                let how = if copied { "copied" } else { "identical" };
                println!("  ok    {} ({})", filename, how);
            }
            TransferEvent::FileSkipped { filename } => println!("  skip  {}", filename),
            TransferEvent::FileFailed { filename, error } => {
                println!("  FAIL  {}: {}", filename, error)
            }
            _ => {}
        }
    }
}

fn print_report(report: &BatchReport) {
    let elapsed = Duration::from_millis(report.duration_ms);
    println!(
        "Transfer {:?}: {} verified ({} copied, {} identical), {} skipped, {} failed",
        report.outcome,
        report.verified_count(),
        report.copied.len(),
        report.identical.len(),
        report.skipped.len(),
        report.failed.len()
    );
    println!(
        "{} of {} in {}",
        format_size(report.completed_bytes as f64),
        format_size(report.total_bytes as f64),
        format_duration(elapsed)
    );
}

async fn status(dest: &Path) -> Result<()> {
    let journal = ManifestJournal::new(dest, Arc::new(FsManifestStore));
    let mut entries: Vec<_> = journal.load().await.into_values().collect();
    if entries.is_empty() {
        println!("No manifest at {}", journal.path().display());
        return Ok(());
    }
    entries.sort_by(|a, b| a.filename.cmp(&b.filename));

    if let Some(manifest) = journal.manifest() {
        println!(
            "{} (written by {} on {}, {})",
            journal.path().display(),
            manifest.app_version,
            manifest.machine_name,
            manifest.system_os
        );
    }
    for entry in entries {
        println!(
            "{:<9} {:>10}  {}:{}  {}",
            format!("{:?}", entry.status).to_lowercase(),
            format_size(entry.size_bytes as f64),
            entry.hash_type,
            entry.hash_value,
            entry.filename
        );
    }
    Ok(())
}

async fn prune(source: &Path, dest: &Path, files: Vec<String>, force: bool) -> Result<()> {
    let files = if files.is_empty() {
        top_level_files(source)?
    } else {
        files
    };
    let selection: Vec<Selected> = files.into_iter().map(Selected::source).collect();

    let journal = ManifestJournal::new(dest, Arc::new(FsManifestStore));
    let entries = journal.load().await;
    let candidates = deletion_candidates(&selection, &entries);
    if candidates.is_empty() {
        println!("No selected file is verified in {}", journal.path().display());
        return Ok(());
    }

    let plan = if force {
        DeletePlan::Unchecked(candidates)
    } else {
        let results = run_safety_check(dest, &candidates).await;
        for (name, status) in &results {
            if *status == SafetyStatus::Missing {
                println!("  keep  {} (missing from destination)", name);
            }
        }
        DeletePlan::checked(&results)
    };

    let outcomes = delete_source_files(source, &plan, force).await;
    for outcome in &outcomes {
        match &outcome.error {
            None => println!("  del   {}", outcome.name),
            Some(e) => println!("  FAIL  {}: {}", outcome.name, e),
        }
    }
    println!(
        "Deleted {} of {} file(s)",
        outcomes.iter().filter(|o| o.deleted).count(),
        outcomes.len()
    );
    Ok(())
}
