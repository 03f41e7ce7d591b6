//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Fitness session tracker.
///
/// Turns heart-rate and cadence streams from shared sensors into per-person
/// coins, zone timelines and group participation checks.
#[derive(Debug, Parser)]
#[command(name = "ft", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Replay a recorded message log (JSON lines) through a session.
    Replay {
        /// The message log to replay.
        file: PathBuf,

        /// Print the summary as JSON.
        #[arg(long)]
        json: bool,

        /// Don't store the session in the database.
        #[arg(long)]
        no_save: bool,
    },

    /// Track a live session from JSON lines on stdin.
    Run {
        /// Print snapshots and the summary as JSON lines.
        #[arg(long)]
        json: bool,

        /// Don't store the session in the database.
        #[arg(long)]
        no_save: bool,
    },

    /// List stored sessions.
    Sessions {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show a stored session.
    Show {
        /// The session ID.
        session_id: String,

        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Delete a stored session and its timeline.
    Delete {
        /// The session ID.
        session_id: String,
    },

    /// Show configuration and storage status.
    Status,
}
