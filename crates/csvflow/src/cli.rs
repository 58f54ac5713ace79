//! Command-line interface definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::logging::LogFormat;

#[derive(Parser, Debug)]
#[command(name = "csvflow")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// JSON settings file
    #[arg(short, long, env = "CSVFLOW_SETTINGS", global = true)]
    pub settings: Option<PathBuf>,

    /// SQLite database file, overriding the settings
    #[arg(long, env = "CSVFLOW_DATABASE", global = true)]
    pub database: Option<PathBuf>,

    /// Log output format (pretty or json)
    #[arg(long, env = "LOG_FORMAT", default_value = "pretty", global = true)]
    pub log_format: LogFormat,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest a CSV file of users and wait for it to finish
    Ingest {
        /// CSV file with FirstName, LastName, Age and Email columns
        file: PathBuf,
    },

    /// List persisted users
    Users {
        /// Page number, starting at 1
        #[arg(short, long, default_value_t = 1)]
        page: u64,

        /// Users per page (1 to 100)
        #[arg(short, long, default_value_t = 10)]
        limit: u64,
    },

    /// Show one persisted user
    User {
        /// Row id of the user
        id: i64,
    },
}
