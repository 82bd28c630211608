//! CLI interface for gigya-proxy
//!
//! ```text
//! cli/
//! ├── commands/     # serve, decode
//! └── error.rs      # User-friendly error display
//! ```

pub mod commands;
pub mod error;

use std::io::IsTerminal;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::config::parse_truthy;
use crate::error::ProxyResult;

/// gigya-proxy - OIDC proxy in front of SAP Gigya
#[derive(Parser, Debug)]
#[command(
    name = "gigya-proxy",
    version,
    about = "OIDC proxy for SAP Gigya - hides IdP credentials and enforces PKCE",
    author
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: commands::Command,

    /// Enable verbose logging (-v, -vv, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Debug logging (same as -vv)
    #[arg(
        long,
        env = "DEBUG",
        global = true,
        value_parser = parse_truthy,
        default_value = "false",
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    pub debug: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

impl Cli {
    /// Execute the CLI command
    ///
    /// # Errors
    ///
    /// Returns `ProxyError` if command execution fails.
    pub async fn execute(self) -> ProxyResult<()> {
        self.init_tracing();

        if self.no_color || !std::io::stderr().is_terminal() {
            colored::control::set_override(false);
        }

        self.command.execute(self.debug).await
    }

    /// Log filter directive for the chosen verbosity
    pub fn log_level(&self) -> &'static str {
        if self.quiet {
            return "error";
        }
        match self.verbose {
            0 if !self.debug => "info",
            0 | 1 => "debug",
            _ => "trace",
        }
    }

    /// Initialize tracing; `RUST_LOG` overrides the flags
    fn init_tracing(&self) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.log_level()));

        // A subscriber may already be installed (tests)
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_writer(std::io::stderr)
            .try_init();
    }
}
