use std::{path::Path, sync::Arc};

use anyhow::Result;
use blobsnap_archive::library::{
    DirectorySource,
    archive::{calculate_total_size, restore},
};
use blobsnap_library::{BackupAgent, DeleteFailure, ObjectBlobStore, RetentionPolicy};
use clap::Parser;
use console::style;
use indicatif::HumanBytes;
use inquire::Confirm;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::library::{
    cli::{Cli, Commands},
    config::Config,
    logging::init_tracing,
    progress::{create_progress_bar, create_spinner, track_progress},
    table::print_snapshot_table,
};

pub async fn run() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.verbose);

    let mut config = Config::load(args.config.as_deref())?;

    if let Some(store_path) = args.store_path {
        config.override_store_path(store_path);
    }
    if let Some(prefix) = args.prefix {
        config.prefix = prefix;
    }

    config.validate()?;

    debug!(?config, "loaded configuration");

    let cancel = CancellationToken::new();
    spawn_ctrl_c_handler(cancel.clone());

    let agent = |retention: Option<usize>| -> Result<BackupAgent> {
        let store = Arc::new(ObjectBlobStore::from_config(&config.store)?);
        let policy = RetentionPolicy::new(retention.unwrap_or(config.retention))?;

        Ok(BackupAgent::new(store, policy)
            .with_prefix(&config.prefix)?
            .with_prune_concurrency(config.prune_concurrency)
            .with_cancellation(cancel.clone()))
    };

    match args.command {
        Commands::Backup {
            source_path,
            retention,
            compress,
        } => backup(&agent(retention)?, &source_path, compress || config.compress).await?,
        Commands::List { json } => list(&agent(None)?, json).await?,
        Commands::Restore {
            snapshot,
            restore_path,
        } => restore_snapshot(&agent(None)?, &snapshot, &restore_path).await?,
        Commands::Delete { snapshot, yes } => delete(&agent(None)?, &snapshot, yes).await?,
        Commands::Prune { retention } => prune(&agent(retention)?).await?,
    }

    Ok(())
}

fn spawn_ctrl_c_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, cancelling");
            cancel.cancel();
        }
    });
}

async fn backup(agent: &BackupAgent, source_path: &Path, compress: bool) -> Result<()> {
    let total_size = calculate_total_size(source_path.to_path_buf()).await?;
    let pb = create_progress_bar(total_size, "Archiving".to_string())?;

    let (sender, receiver) = mpsc::unbounded_channel();
    let listener = track_progress(pb.clone(), receiver);

    let source = DirectorySource::new(source_path, compress).with_progress(sender);
    let result = agent.run(&source).await;

    drop(source);
    listener.await?;
    pb.finish_and_clear();

    let summary = result?;

    println!(
        "{} {} ({})",
        style("Created").green().bold(),
        summary.key,
        HumanBytes(summary.size_bytes)
    );

    for key in &summary.pruned {
        println!("{} {}", style("Pruned").yellow().bold(), key);
    }

    print_failures(&summary.failures);

    Ok(())
}

async fn list(agent: &BackupAgent, json: bool) -> Result<()> {
    let snapshots = agent.snapshots().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
        return Ok(());
    }

    if snapshots.is_empty() {
        println!("No snapshots under {}", style(agent.prefix()).bold());
        return Ok(());
    }

    print_snapshot_table(&snapshots)
}

async fn restore_snapshot(
    agent: &BackupAgent,
    snapshot: &str,
    restore_path: &Path,
) -> Result<()> {
    let key = agent.resolve_key(snapshot)?;

    let spinner = create_spinner(format!("Opening {}", key))?;
    let download = agent.restore(&key).await;
    spinner.finish_and_clear();
    let download = download?;

    let pb = create_progress_bar(download.size, "Restoring".to_string())?;
    let (sender, receiver) = mpsc::unbounded_channel();
    let listener = track_progress(pb.clone(), receiver);

    let result = restore(download.stream, restore_path, Some(sender)).await;

    listener.await?;
    pb.finish_and_clear();
    result?;

    println!(
        "{} {} into {}",
        style("Restored").green().bold(),
        key,
        restore_path.display()
    );

    Ok(())
}

async fn delete(agent: &BackupAgent, snapshot: &str, yes: bool) -> Result<()> {
    let key = agent.resolve_key(snapshot)?;

    if !yes {
        let confirmed = Confirm::new(&format!("Delete snapshot {}?", key))
            .with_default(false)
            .prompt()?;

        if !confirmed {
            println!("Aborted");
            return Ok(());
        }
    }

    agent.delete(&key).await?;

    println!("{} {}", style("Deleted").green().bold(), key);

    Ok(())
}

async fn prune(agent: &BackupAgent) -> Result<()> {
    let spinner = create_spinner(format!(
        "Pruning to {} snapshots",
        agent.policy().max_snapshots()
    ))?;
    let report = agent.prune().await;
    spinner.finish_and_clear();
    let report = report?;

    if report.pruned.is_empty() && report.failures.is_empty() {
        println!("Nothing to prune");
    }

    for key in &report.pruned {
        println!("{} {}", style("Pruned").yellow().bold(), key);
    }

    print_failures(&report.failures);

    Ok(())
}

fn print_failures(failures: &[DeleteFailure]) {
    for failure in failures {
        eprintln!(
            "{} {}: {}",
            style("Failed to delete").red().bold(),
            failure.key,
            failure.error
        );
    }
}
