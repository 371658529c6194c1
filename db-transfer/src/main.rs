//! db-transfer - Main entry point

use anyhow::Result;
use clap::{Parser, Subcommand};
use db_transfer::db::{render_backups, Db, ImportOptions};
use db_transfer::prompts::TerminalPrompts;
use db_transfer::{config::Config, utils};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (falls back to DB_TRANSFER_* variables and .env)
    #[arg(short, long, value_name = "FILE", env = "DB_TRANSFER_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Hide the transfer progress line
    #[arg(long)]
    no_progress: bool,

    /// Answer yes to every confirmation
    #[arg(short, long)]
    yes: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new backup
    Backup {
        database: String,
        /// Return as soon as the backup job is started
        #[arg(short, long)]
        skip_poll: bool,
    },
    /// Download an existing backup to a local file
    Download {
        database: String,
        backup_id: String,
        file: PathBuf,
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Take a fresh backup and download it to a local file
    Export {
        database: String,
        file: PathBuf,
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Encrypt, upload and import a local dump
    Import {
        database: String,
        file: PathBuf,
        /// Mongo database to import into
        #[arg(short = 'd', long)]
        mongo_database: Option<String>,
        /// Mongo collection to import into
        #[arg(short = 'c', long)]
        mongo_collection: Option<String>,
        /// Do not back the database up before importing
        #[arg(long)]
        skip_backup: bool,
    },
    /// Restore an existing backup in place
    Restore {
        database: String,
        backup_id: String,
        /// Mongo database to restore into
        #[arg(short = 'd', long)]
        mongo_database: Option<String>,
    },
    /// List backups of a database
    List {
        database: String,
        #[arg(short, long, default_value_t = 1)]
        page: u32,
        #[arg(short = 'n', long, default_value_t = 10)]
        page_size: u32,
    },
    /// Print the logs of a backup or restore job
    Logs { database: String, job_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    if args.no_progress {
        config.progress.enabled = false;
    }

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::debug!(
        "db-transfer v{} against {}",
        env!("CARGO_PKG_VERSION"),
        config.base_url()
    );

    let prompts = Arc::new(TerminalPrompts::new().assume_yes(args.yes));
    let db = Db::new(config, prompts)?;

    match args.command {
        Command::Backup {
            database,
            skip_poll,
        } => {
            db.cmd_backup(&database, skip_poll).await?;
        }
        Command::Download {
            database,
            backup_id,
            file,
            force,
        } => {
            db.cmd_download(&database, &backup_id, &file, force).await?;
        }
        Command::Export {
            database,
            file,
            force,
        } => {
            db.cmd_export(&database, &file, force).await?;
        }
        Command::Import {
            database,
            file,
            mongo_database,
            mongo_collection,
            skip_backup,
        } => {
            let options = ImportOptions {
                database: mongo_database,
                collection: mongo_collection,
                skip_backup,
            };
            db.cmd_import(&database, &file, &options).await?;
        }
        Command::Restore {
            database,
            backup_id,
            mongo_database,
        } => {
            db.cmd_restore(&database, &backup_id, mongo_database, args.yes)
                .await?;
        }
        Command::List {
            database,
            page,
            page_size,
        } => {
            let jobs = db.cmd_list(&database, page, page_size).await?;
            print!("{}", render_backups(&jobs, page_size));
        }
        Command::Logs { database, job_id } => {
            db.cmd_logs(&database, &job_id).await?;
        }
    }

    Ok(())
}
