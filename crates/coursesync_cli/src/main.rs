//! coursesync CLI
//!
//! Command-line tools for syncing course outlines into a state directory.
//!
//! # Commands
//!
//! - `diff` - Show the change set between two outline documents
//! - `sync` - Sync courses from a directory of outlines
//! - `inspect` - Display a synced course and its mastery records
//! - `record-mastery` - Record a learner's progress on a topic

mod commands;

use clap::{Parser, Subcommand};
use coursesync_model::{MasteryStatus, RemovalPolicy};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// coursesync command-line tools.
#[derive(Parser)]
#[command(name = "coursesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the state directory
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the change set between two outline documents
    Diff {
        /// Outline before the change
        old: PathBuf,

        /// Outline after the change
        new: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Sync courses from a directory of `<course_id>.json` outlines, with
    /// IDs percent-encoded as in the state directory
    Sync {
        /// Directory holding the outlines
        #[arg(short, long)]
        outlines: PathBuf,

        /// Courses to sync
        #[arg(required = true)]
        courses: Vec<String>,

        /// Number of workers
        #[arg(short, long, default_value = "2")]
        workers: usize,

        /// What happens to progress on removed topics (archive, delete)
        #[arg(long, default_value = "archive")]
        removal_policy: RemovalPolicy,

        /// Lease time-to-live in seconds
        #[arg(long, default_value = "120")]
        lease_ttl: u64,

        /// Storage timeout in seconds
        #[arg(long, default_value = "30")]
        storage_timeout: u64,

        /// Attempts per notification before giving up
        #[arg(long, default_value = "5")]
        max_attempts: u32,
    },

    /// Display a synced course and its mastery records
    Inspect {
        /// Course to show; lists synced courses if omitted
        course: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Record a learner's progress on a topic
    RecordMastery {
        /// The course
        course: String,

        /// The learner
        user: String,

        /// The topic's external ID
        topic: String,

        /// Progress (not_started, in_progress, mastered)
        status: MasteryStatus,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Diff { old, new, format } => {
            commands::diff::run(&old, &new, &format)?;
        }
        Commands::Sync {
            outlines,
            courses,
            workers,
            removal_policy,
            lease_ttl,
            storage_timeout,
            max_attempts,
        } => {
            let path = cli.path.ok_or("State path required for sync")?;
            let options = commands::sync::SyncOptions {
                workers,
                removal_policy,
                lease_ttl,
                storage_timeout,
                max_attempts,
            };
            let failed = commands::sync::run(&path, &outlines, &courses, &options)?;
            if failed > 0 {
                return Err(format!("{failed} course(s) failed to sync").into());
            }
        }
        Commands::Inspect { course, format } => {
            let path = cli.path.ok_or("State path required for inspect")?;
            commands::inspect::run(&path, course.as_deref(), &format)?;
        }
        Commands::RecordMastery {
            course,
            user,
            topic,
            status,
        } => {
            let path = cli.path.ok_or("State path required for record-mastery")?;
            commands::record_mastery::run(&path, &course, &user, &topic, status)?;
        }
        Commands::Version => {
            println!("coursesync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
