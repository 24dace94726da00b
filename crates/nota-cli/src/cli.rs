use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "nota")]
#[command(about = "Offline-first notes that follow you across devices")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to the local replica database
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Sync server base URL (or NOTA_SERVER_URL)
    #[arg(long, global = true, value_name = "URL")]
    pub server_url: Option<String>,

    /// Bearer token for the sync server (or NOTA_TOKEN)
    #[arg(long, global = true, value_name = "TOKEN")]
    pub token: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new note
    #[command(alias = "new")]
    Add {
        /// Note title
        title: String,
        /// Note content
        content: Vec<String>,
        /// Note color
        #[arg(long, value_name = "COLOR")]
        color: Option<String>,
    },
    /// List notes, most recently updated first
    List {
        /// Include archived notes
        #[arg(long)]
        archived: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit an existing note
    Edit {
        /// Note ID or unique ID prefix
        id: String,
        /// New title
        #[arg(long)]
        title: Option<String>,
        /// New content
        #[arg(long)]
        content: Option<String>,
        /// New color
        #[arg(long, value_name = "COLOR")]
        color: Option<String>,
    },
    /// Delete an existing note
    Delete {
        /// Note ID or unique ID prefix
        id: String,
    },
    /// Archive a note
    Archive {
        /// Note ID or unique ID prefix
        id: String,
    },
    /// Unarchive a note
    Unarchive {
        /// Note ID or unique ID prefix
        id: String,
    },
    /// Pin a note
    Pin {
        /// Note ID or unique ID prefix
        id: String,
    },
    /// Unpin a note
    Unpin {
        /// Note ID or unique ID prefix
        id: String,
    },
    /// Run one sync cycle against the server
    Sync {
        /// Retry entries that exhausted their automatic attempts
        #[arg(long)]
        force: bool,
    },
    /// Show pending changes and the last sync checkpoint
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recently resolved sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Keep syncing and applying realtime changes until interrupted
    Watch {
        /// Periodic sync interval in seconds
        #[arg(long, default_value = "30")]
        interval: u64,
    },
}
