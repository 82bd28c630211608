//! CLI command implementations

pub mod decode;
pub mod serve;

use clap::Subcommand;

use crate::error::ProxyResult;

/// All available CLI commands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the proxy HTTP server
    #[command(visible_alias = "s")]
    Serve(serve::ServeCommand),

    /// Decode (and optionally verify) an ID token
    #[command(visible_alias = "d")]
    Decode(decode::DecodeCommand),
}

impl Command {
    /// Execute the command
    ///
    /// # Errors
    ///
    /// Returns `ProxyError` if the command fails.
    pub async fn execute(self, debug: bool) -> ProxyResult<()> {
        match self {
            Command::Serve(cmd) => cmd.execute(debug).await,
            Command::Decode(cmd) => cmd.execute().await,
        }
    }
}
