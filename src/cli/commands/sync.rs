//! Sync command implementations (markdown folder mirror).
//!
//! Every command that touches the folder restores the remembered session
//! first, which imports edits made since the last run before anything is
//! written. One-shot commands then close the session without forgetting
//! the folder; only `disconnect` forgets it.

use crate::cli::SyncCommands;
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::storage::SqliteStorage;
use crate::sync::{
    get_sync_status, print_status, ExportStats, FolderSync, NativeHost, PollStats,
};
use colored::Colorize;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::existing_db_path;

#[derive(Serialize)]
struct ConnectOutput {
    folder: String,
    export: ExportStats,
}

#[derive(Serialize)]
struct RunOutput {
    folder: String,
    poll: PollStats,
    export: ExportStats,
}

/// Execute sync commands.
pub fn execute(command: &SyncCommands, db_path: Option<&PathBuf>, json: bool) -> Result<()> {
    let db_path = existing_db_path(db_path)?;

    match command {
        SyncCommands::Connect { dir } => connect(&db_path, dir, json),
        SyncCommands::Disconnect => disconnect(&db_path, json),
        SyncCommands::Status => status(&db_path, json),
        SyncCommands::Export => run_once(&db_path, Report::Export, json),
        SyncCommands::Pull => run_once(&db_path, Report::Pull, json),
        SyncCommands::Watch => watch(&db_path, json),
    }
}

/// Which half of a sync round a one-shot command reports.
#[derive(Clone, Copy)]
enum Report {
    Export,
    Pull,
}

fn folder_sync(db_path: &Path, picked: Option<&Path>) -> Result<FolderSync<SqliteStorage>> {
    let storage = SqliteStorage::open(db_path)?;
    let host = NativeHost::new(picked.map(Path::to_path_buf));
    Ok(FolderSync::new(
        Arc::new(Mutex::new(storage)),
        Arc::new(host),
        SyncConfig::from_env()?,
    ))
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    Ok(tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?)
}

fn connect(db_path: &Path, dir: &Path, json: bool) -> Result<()> {
    let mut sync = folder_sync(db_path, Some(dir))?;

    let export = runtime()?.block_on(async {
        let stats = sync.connect().await;
        sync.close();
        stats
    })?;
    let folder = dir.display().to_string();

    if json {
        let output = ConnectOutput { folder, export };
        println!("{}", serde_json::to_string(&output)?);
    } else {
        println!("Connected: {folder}");
        println!("  Written: {} documents", export.written);
        if export.failed > 0 {
            println!("  {}", format!("Failed: {} documents", export.failed).red());
        }
    }
    Ok(())
}

fn disconnect(db_path: &Path, json: bool) -> Result<()> {
    let mut sync = folder_sync(db_path, None)?;
    sync.disconnect()?;

    if json {
        println!("{}", serde_json::json!({ "disconnected": true }));
    } else {
        println!("Disconnected. Documents in the folder were left in place.");
    }
    Ok(())
}

fn status(db_path: &Path, json: bool) -> Result<()> {
    let storage = SqliteStorage::open(db_path)?;
    let sync_status = get_sync_status(&storage)?;

    if json {
        println!("{}", serde_json::to_string(&sync_status)?);
    } else {
        print_status(&sync_status);
    }
    Ok(())
}

fn run_once(db_path: &Path, report: Report, json: bool) -> Result<()> {
    let mut sync = folder_sync(db_path, None)?;

    let (folder, result) = runtime()?.block_on(async {
        let result = sync.restore_from_persisted().await;
        let folder = sync.folder_name().unwrap_or_default();
        sync.close();
        (folder, result)
    });
    let result = result?;

    if json {
        let output = RunOutput {
            folder,
            poll: result.poll,
            export: result.export,
        };
        println!("{}", serde_json::to_string(&output)?);
        return Ok(());
    }

    match report {
        Report::Export => print_export(&result.export),
        Report::Pull => print_poll(&result.poll),
    }
    Ok(())
}

fn watch(db_path: &Path, json: bool) -> Result<()> {
    let mut sync = folder_sync(db_path, None)?;

    runtime()?.block_on(async {
        let report = sync.restore_from_persisted().await?;
        let folder = sync.folder_name().unwrap_or_default();

        if json {
            let output = RunOutput {
                folder,
                poll: report.poll,
                export: report.export,
            };
            println!("{}", serde_json::to_string(&output)?);
        } else {
            print_poll(&report.poll);
            println!("Watching {folder}. Press Ctrl-C to stop.");
        }

        let stopped = tokio::signal::ctrl_c().await;
        sync.close();
        stopped?;
        Ok::<(), Error>(())
    })
}

fn print_export(stats: &ExportStats) {
    if stats.is_empty() && stats.failed == 0 {
        println!("All documents up to date.");
        return;
    }
    println!("Written: {} documents ({} unchanged)", stats.written, stats.unchanged);
    if stats.failed > 0 {
        println!("{}", format!("Failed: {} documents", stats.failed).red());
    }
}

fn print_poll(stats: &PollStats) {
    if stats.import.total() == 0 && stats.discovered == 0 {
        println!("No outside edits.");
    } else {
        println!(
            "Imported: {} created, {} updated, {} deleted",
            stats.import.created, stats.import.updated, stats.import.deleted
        );
        if stats.discovered > 0 {
            println!("  New documents: {}", stats.discovered);
        }
    }
    if stats.diagnostics > 0 {
        println!(
            "{}",
            format!("Skipped {} unreadable lines (run with -vv for details)", stats.diagnostics)
                .yellow()
        );
    }
    if stats.failed > 0 || stats.import.failed > 0 {
        println!(
            "{}",
            format!("Failed: {} files, {} changes", stats.failed, stats.import.failed).red()
        );
    }
}
