use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "coderadar", version, about = "Project-local semantic code search")]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Build or refresh the search index for a project.
    Index {
        /// Project root to index.
        #[arg(default_value = ".")]
        path: PathBuf,

        /// Reindex every file, ignoring unchanged hashes.
        #[arg(long)]
        force: bool,

        /// Remove index entries for files no longer present on disk.
        #[arg(long)]
        prune: bool,

        #[arg(long, short)]
        verbose: bool,

        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Show index statistics without reindexing.
    IndexStatus {
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Delete the on-disk index.
    IndexClear {
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Query the search index.
    Search {
        /// Search query text.
        query: String,

        #[arg(long, default_value = ".")]
        path: PathBuf,

        #[arg(long, short, default_value_t = 10)]
        limit: usize,

        /// Force hybrid (vector + lexical) fusion regardless of config.
        #[arg(long)]
        hybrid: bool,

        /// Emit results as JSON.
        #[arg(long)]
        json: bool,

        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Run an initial index pass, then watch the project and keep the index in sync.
    Watch {
        #[arg(default_value = ".")]
        path: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,

        /// PID file guarding against a second daemon for the same project.
        #[arg(long)]
        pid_file: Option<PathBuf>,
    },
}
