//! gigya-proxy CLI entry point

#![warn(clippy::all)]

use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = gigya_proxy::cli::Cli::parse();

    if let Err(e) = cli.execute().await {
        let exit_code = gigya_proxy::cli::error::display_error(&e);
        std::process::exit(exit_code);
    }
}
