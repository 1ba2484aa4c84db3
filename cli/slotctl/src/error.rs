//! Error handling and display for the CLI.

use colored::Colorize;
use slotsync_engine::SyncError;
use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("Not authenticated. Run `slotctl auth login` to authenticate.")]
    NotAuthenticated,

    #[error("Invalid attribute `{0}`: expected key=value")]
    InvalidAttribute(String),

    #[error("Attribute key `{0}` is reserved")]
    ReservedAttribute(String),
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    if let Some(sync_err) = err.downcast_ref::<SyncError>() {
        eprintln!("  {} {}", "Code:".dimmed(), sync_err.code());
        if let Some(hint) = sync_hint(sync_err) {
            eprintln!("\n{}", format!("Hint: {hint}").yellow());
        }
        return;
    }

    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        match cli_err {
            CliError::NotAuthenticated => {
                eprintln!(
                    "\n{}",
                    "Hint: Run `slotctl auth login` to authenticate.".yellow()
                );
            }
            CliError::InvalidAttribute(_) | CliError::ReservedAttribute(_) => {
                eprintln!(
                    "\n{}",
                    "Hint: Pass attributes as `--attr name=Dana --attr dept=Ops`.".yellow()
                );
            }
        }
    }
}

fn sync_hint(err: &SyncError) -> Option<&'static str> {
    match err {
        SyncError::AuthExpired(_) => Some("Run `slotctl auth login` to start a new session."),
        SyncError::CapacityExceeded { .. } => {
            Some("Free spaces with `slotctl unassign` or grow the pool with `slotctl resize`.")
        }
        SyncError::RemoteUnavailable(_) => Some(
            "Local state was kept. Run `slotctl retry` once the label service is reachable.",
        ),
        SyncError::NotFound(_) => Some("List ids with `slotctl entities` or `slotctl lists ls`."),
        SyncError::Validation(_) | SyncError::Storage(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hints_cover_recoverable_errors() {
        assert!(sync_hint(&SyncError::AuthExpired("expired".into())).is_some());
        assert!(sync_hint(&SyncError::CapacityExceeded {
            requested: 2,
            available: 1
        })
        .is_some());
        assert!(sync_hint(&SyncError::validation("bad")).is_none());
    }
}
