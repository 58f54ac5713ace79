//! csvflow CLI - Main entry point

use std::process;
use std::thread;

use clap::Parser;
use log::{error, info, warn};
use tokio::sync::broadcast::error::RecvError;

use csvflow::db::{user_repo, Database};
use csvflow::logging::{init_logging, DEFAULT_FILTER};
use csvflow::{
    load_settings, Cli, Commands, ConfigError, CsvflowError, IngestService, JobState, Settings,
};

fn main() {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "csvflow=debug"
    } else {
        DEFAULT_FILTER
    };
    if let Err(e) = init_logging(cli.log_format, filter) {
        eprintln!("Warning: {}", e);
    }

    match run(&cli) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            error!("Command failed: {}", e);
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

/// Runs the selected command. `Ok(false)` means it ran but did not succeed.
fn run(cli: &Cli) -> csvflow::Result<bool> {
    let mut settings = match &cli.settings {
        Some(path) => load_settings(path)?,
        None => Settings::default(),
    };
    if let Some(database) = &cli.database {
        settings.database_path = Some(database.clone());
    }

    match &cli.command {
        Commands::Ingest { file } => {
            let content = std::fs::read(file).map_err(|e| CsvflowError::ReadInput {
                path: file.clone(),
                source: e,
            })?;
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| file.display().to_string());

            let service = IngestService::start(settings)?;

            let mut events = service.subscribe();
            let reporter = thread::spawn(move || loop {
                match events.blocking_recv() {
                    Ok(event) => info!(
                        "[{}] {} ({:.1}%)",
                        event.job_id, event.message, event.progress
                    ),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Progress reporter skipped {} events", skipped)
                    }
                    Err(RecvError::Closed) => break,
                }
            });

            let status = service.ingest(content, &filename)?.wait()?;
            service.shutdown();
            if reporter.join().is_err() {
                warn!("Progress reporter panicked");
            }

            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(status.state == JobState::Completed)
        }
        Commands::Users { page, limit } => {
            let database = open_database(&settings)?;
            let page = user_repo::list_page(&database, *page, *limit)?;

            println!("{}", serde_json::to_string_pretty(&page)?);
            Ok(true)
        }
        Commands::User { id } => {
            let database = open_database(&settings)?;
            let user = user_repo::find_by_id(&database, *id)?
                .ok_or(CsvflowError::UserNotFound(*id))?;

            println!("{}", serde_json::to_string_pretty(&user)?);
            Ok(true)
        }
    }
}

fn open_database(settings: &Settings) -> csvflow::Result<Database> {
    let path = settings
        .resolved_database_path()
        .ok_or_else(|| ConfigError::Validation {
            message: "No databasePath configured and no home directory found".to_string(),
        })?;
    Ok(Database::open(&path)?)
}
