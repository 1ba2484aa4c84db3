//! Session commands.
//!
//! The session is stored in the local state database, where the daemon
//! picks it up on its next start.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use colored::Colorize;
use slotsync_engine::Session;

use crate::output::{print_info, print_success};

use super::CommandContext;

/// Session commands.
#[derive(Debug, Args)]
pub struct AuthCommand {
    #[command(subcommand)]
    command: AuthSubcommand,
}

#[derive(Debug, Subcommand)]
enum AuthSubcommand {
    /// Store a session for the label service.
    Login(LoginArgs),

    /// Forget the stored session.
    Logout,

    /// Show the stored session.
    Status,
}

#[derive(Debug, Args)]
struct LoginArgs {
    /// Access token.
    #[arg(long, env = "SLOTSYNC_TOKEN")]
    token: String,

    /// Refresh token.
    #[arg(long, env = "SLOTSYNC_REFRESH_TOKEN")]
    refresh_token: String,

    /// Access token expiry (RFC 3339). When omitted the token is refreshed
    /// on the next command.
    #[arg(long)]
    expires_at: Option<DateTime<Utc>>,
}

impl AuthCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        match self.command {
            AuthSubcommand::Login(args) => login(ctx, args),
            AuthSubcommand::Logout => logout(ctx),
            AuthSubcommand::Status => status(ctx),
        }
    }
}

fn login(ctx: CommandContext, args: LoginArgs) -> Result<()> {
    let session = Session {
        access_token: args.token,
        refresh_token: args.refresh_token,
        expires_at: args.expires_at.unwrap_or_else(Utc::now),
    };
    ctx.state()?.save_session(Some(&session))?;
    print_success("Session stored.");
    Ok(())
}

fn logout(ctx: CommandContext) -> Result<()> {
    ctx.state()?.save_session(None)?;
    print_success("Logged out.");
    Ok(())
}

fn status(ctx: CommandContext) -> Result<()> {
    match ctx.state()?.load_session()? {
        Some(session) => {
            println!("{} Authenticated", "Status:".green().bold());
            println!("  Remote: {}", ctx.config.remote_url);
            if session.is_expired(Utc::now()) {
                println!(
                    "  {} Access token expired at {}. It is refreshed on the next command.",
                    "Warning:".yellow(),
                    session.expires_at.to_rfc3339()
                );
            } else {
                println!("  Expires: {}", session.expires_at.to_rfc3339());
            }
        }
        None => {
            println!("{} Not authenticated", "Status:".red().bold());
            print_info("Run `slotctl auth login --token <t> --refresh-token <r>`.");
        }
    }
    Ok(())
}
