use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

/// Back up directories into blob storage, keeping the most recent snapshots.
#[derive(Parser, Debug)]
#[command(name = "blobsnap", version)]
#[command(about = "Blob Storage Snapshot Tool", long_about = None)]
pub struct Cli {
    /// TOML configuration file.
    #[arg(long, short, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Use a local disk store at this directory.
    #[arg(long, global = true, value_name = "DIR")]
    pub store_path: Option<String>,

    /// Key prefix under which snapshots are stored.
    #[arg(long, global = true)]
    pub prefix: Option<String>,

    /// Raise log verbosity (-v info, -vv debug).
    #[arg(long, short, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Snapshot a directory and prune the oldest snapshots.
    Backup {
        /// Directory to back up.
        source_path: PathBuf,

        /// Number of snapshots to keep.
        #[arg(long, short)]
        retention: Option<usize>,

        /// Compress the archive with zstd.
        #[arg(long, short = 'z', default_value_t = false)]
        compress: bool,
    },
    /// List all snapshots, oldest first.
    List {
        /// Print JSON instead of a table.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Restore a snapshot into a directory.
    Restore {
        /// Snapshot name or full key.
        snapshot: String,

        restore_path: PathBuf,
    },
    /// Delete a snapshot.
    Delete {
        /// Snapshot name or full key.
        snapshot: String,

        /// Skip the confirmation prompt.
        #[arg(long, short, default_value_t = false)]
        yes: bool,
    },
    /// Delete the oldest snapshots beyond the retention count without
    /// creating a new one.
    Prune {
        #[arg(long, short)]
        retention: Option<usize>,
    },
}
