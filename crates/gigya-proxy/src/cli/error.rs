//! User-friendly error formatting for CLI
//!
//! Converts errors into short messages with a suggestion.

use colored::Colorize;

use crate::error::ProxyError;

/// Format an error for CLI display
#[must_use]
pub fn format_error(error: &ProxyError) -> String {
    let (title, detail, suggestion) = match error {
        ProxyError::Configuration { message, key } => (
            "Configuration error",
            message.clone(),
            match key {
                Some(key) => format!("Check the value of {key}, or run with --help"),
                None => "Run with --help to see all available options".to_string(),
            },
        ),
        ProxyError::Upstream { message, .. } => (
            "Upstream error",
            message.clone(),
            "Check that the IdP base URL is reachable from this host".to_string(),
        ),
        ProxyError::Auth(err) => (
            "Token error",
            err.to_string(),
            "Check the token, and that its issuer publishes /.well-known/jwks.json over HTTPS"
                .to_string(),
        ),
        ProxyError::Io(err) => (
            "I/O error",
            err.to_string(),
            "Check that the bind address is free and permitted".to_string(),
        ),
        _ => return format!("{} {}", "✗".red().bold(), error),
    };

    format!(
        "{} {}\n  {}\n\n{}\n  {}",
        "✗".red().bold(),
        title,
        detail,
        "Suggestion:".yellow(),
        suggestion
    )
}

/// Display an error to stderr and return exit code
#[must_use]
pub fn display_error(error: &ProxyError) -> i32 {
    eprintln!("{}", format_error(error));
    match error {
        ProxyError::Configuration { .. } => 2,
        _ => 1,
    }
}
