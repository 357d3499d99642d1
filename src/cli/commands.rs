//! CLI command definitions.

use super::output::OutputFormat;
use clap::{Args, Parser, Subcommand};

/// canvass CLI - survey authoring and CSV analytics backend.
#[derive(Parser)]
#[command(name = "canvass")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format
    #[arg(long, short = 'f', global = true, default_value = "table")]
    pub format: OutputFormat,

    /// Verbose output
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Top-level commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Show version information
    Version,

    /// Run the HTTP API server
    Serve(ServeArgs),

    /// Organization management commands
    #[command(subcommand)]
    Org(OrgCommands),

    /// Survey inspection commands
    #[command(subcommand)]
    Survey(SurveyCommands),

    /// State maintenance commands
    #[command(subcommand)]
    Db(DbCommands),
}

#[derive(Args)]
pub struct ServeArgs {
    /// Host to bind
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Port to bind
    #[arg(long, default_value_t = 8000)]
    pub port: u16,
}

/// Organization subcommands.
#[derive(Subcommand)]
pub enum OrgCommands {
    /// Add one or more organizations by name
    Add(OrgAddArgs),
    /// List all organizations
    List,
}

#[derive(Args)]
pub struct OrgAddArgs {
    /// Organization names to create
    #[arg(required = true)]
    pub names: Vec<String>,
}

/// Survey subcommands.
#[derive(Subcommand)]
pub enum SurveyCommands {
    /// List all surveys across every creator
    List,
}

/// State maintenance subcommands.
#[derive(Subcommand)]
pub enum DbCommands {
    /// Delete all application state (surveys, users, analyses, sessions)
    Clear(DbClearArgs),
}

#[derive(Args)]
pub struct DbClearArgs {
    /// Confirm the deletion
    #[arg(long)]
    pub yes: bool,
}
