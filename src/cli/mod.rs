//! CLI commands and argument parsing.
//!
//! This module provides the command-line interface for canvass, built
//! on [`clap`](https://docs.rs/clap). The HTTP server is started from
//! here (`canvass serve`); the remaining commands are operator tasks
//! that act on the state snapshot directly.
//!
//! # Output Formats
//!
//! Commands support multiple output formats via the `-f`/`--format`
//! flag: `table` (default), `json`, and `yaml`.
//!
//! # Example
//!
//! ```bash,no_run
//! # Seed organizations
//! canvass org add "Acme Corp" "Globex"
//!
//! # List surveys in JSON format
//! canvass survey list -f json
//!
//! # Start the HTTP server
//! canvass serve --port 8000
//! ```

pub mod commands;
pub mod output;
