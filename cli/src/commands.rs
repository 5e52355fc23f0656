use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Keeper - per-file version tracking
#[derive(Debug, Parser)]
#[command(name = "keeper")]
#[command(version)]
#[command(about = "Keep full-copy versions of individual files", long_about = None)]
pub struct Cli {
    /// Data directory holding the database and backups
    #[arg(long, global = true, value_name = "PATH")]
    pub data_dir: Option<PathBuf>,

    /// Directory that receives pinned copies
    #[arg(long, global = true, value_name = "PATH")]
    pub pin_dir: Option<PathBuf>,

    /// Suppress job progress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Files are addressed by id or by path.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Start tracking a file
    Add {
        path: PathBuf,

        #[arg(short, long, default_value = "Initial version")]
        message: String,

        /// Display name (defaults to the file name)
        #[arg(long)]
        name: Option<String>,
    },

    /// Snapshot the current content as a new version
    Commit {
        file: String,

        #[arg(short, long)]
        message: String,
    },

    /// List tracked files
    Status {
        /// Include archived files
        #[arg(long)]
        all: bool,

        /// Only files with this tag
        #[arg(long, conflicts_with = "project")]
        tag: Option<String>,

        /// Only files in this project
        #[arg(long)]
        project: Option<String>,
    },

    /// Check one file, or every file in a background job
    Verify { file: Option<String> },

    /// List the versions of a file
    Log { file: String },

    /// Copy a version back over the live file
    Restore { file: String, version: i64 },

    /// Copy a version into pin storage
    Pin { file: String, version: i64 },

    /// Remove a pinned copy
    Unpin { file: String, version: i64 },

    /// Stop tracking a file and delete its backups
    Rm { file: String },

    /// Find missing files under a directory
    Relink {
        root: PathBuf,

        /// Confirm candidates by content hash
        #[arg(long)]
        hash: bool,

        /// Extensions to consider, comma separated
        #[arg(long, value_delimiter = ',')]
        ext: Vec<String>,

        #[arg(long, value_name = "MB")]
        max_size_mb: Option<u64>,

        #[arg(long, value_name = "DAYS")]
        within_days: Option<u64>,
    },

    /// Manage tags
    Tag {
        #[command(subcommand)]
        action: TagCommand,
    },

    /// Manage projects
    Project {
        #[command(subcommand)]
        action: ProjectCommand,
    },

    /// Show the event log of a file
    Events {
        file: String,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Check backup artifacts against their stored hashes
    Integrity { file: String, version: Option<i64> },

    /// Upgrade legacy backup names and fill in missing latest backups
    Migrate,

    /// Change the display name of a file
    Rename { file: String, name: String },

    /// Toggle the favorite flag
    Favorite { file: String },

    /// Archive a file, or restore it with --undo
    Archive {
        file: String,

        #[arg(long)]
        undo: bool,
    },

    /// Show stored metadata, or re-extract it with --refresh
    Meta {
        file: String,

        #[arg(long)]
        refresh: bool,
    },

    /// Open a file or version with the system handler
    Open {
        file: String,
        version: Option<i64>,

        /// Reveal in the file browser instead
        #[arg(long)]
        reveal: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum TagCommand {
    Add { file: String, name: String },
    Rm { file: String, name: String },
    /// List all tags, or the tags of one file
    Ls { file: Option<String> },
}

#[derive(Debug, Subcommand)]
pub enum ProjectCommand {
    Add {
        name: String,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        color: Option<String>,
    },
    Ls,
    Rm { id: String },
    /// Assign a file to a project, or unassign it when no project is given
    Assign { file: String, project: Option<String> },
}
