//! CLI commands.

mod assign;
mod auth;
mod entities;
mod lists;
mod pool;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use slotsync_engine::token::RefreshOutcome;
use slotsync_engine::{
    AssignmentController, EngineConfig, EngineState, HttpAuthClient, HttpLabelClient, SqliteKv,
    TokenManager, TokenPhase,
};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::CliError;
use crate::output::OutputFormat;

/// slotctl - assign spaces to people and keep the label service in step.
#[derive(Debug, Parser)]
#[command(name = "slotctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (table or json).
    #[arg(long, global = true, default_value = "table")]
    format: String,

    /// Remote label service URL.
    #[arg(long, global = true, env = "SLOTSYNC_REMOTE_URL")]
    remote_url: Option<String>,

    /// Local state directory.
    #[arg(long, global = true, env = "SLOTSYNC_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Manage the remote session.
    Auth(auth::AuthCommand),

    /// Replace local entities with a full pull from the label service.
    Pull,

    /// Re-issue failed blanks and re-push entities whose last push failed.
    Retry,

    /// Show pool capacity and sync status.
    Status,

    /// Change the number of physical spaces.
    Resize(pool::ResizeArgs),

    /// List entities.
    Entities,

    /// Create an entity.
    Add(entities::AddArgs),

    /// Delete an entity and vacate its space.
    Remove(entities::RemoveArgs),

    /// Assign a space to an entity.
    Assign(assign::AssignArgs),

    /// Vacate an entity's space.
    Unassign(assign::UnassignArgs),

    /// Give each entity the lowest free space.
    AutoAssign(assign::AutoAssignArgs),

    /// Vacate every assigned space.
    CancelAll,

    /// Manage saved lists.
    Lists(lists::ListsCommand),

    /// Show CLI version.
    Version,
}

impl Cli {
    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        let mut config = Config::load()?;
        if let Some(url) = self.remote_url {
            config.remote_url = url;
        }
        if let Some(dir) = self.data_dir {
            config.data_dir = Some(dir);
        }

        let ctx = CommandContext {
            config,
            format: OutputFormat::parse(&self.format),
        };

        match self.command {
            Commands::Auth(cmd) => cmd.run(ctx).await,
            Commands::Pull => entities::pull(ctx).await,
            Commands::Retry => entities::retry(ctx).await,
            Commands::Status => pool::status(ctx).await,
            Commands::Resize(args) => pool::resize(ctx, args).await,
            Commands::Entities => entities::list(ctx).await,
            Commands::Add(args) => entities::add(ctx, args).await,
            Commands::Remove(args) => entities::remove(ctx, args).await,
            Commands::Assign(args) => assign::assign(ctx, args).await,
            Commands::Unassign(args) => assign::unassign(ctx, args).await,
            Commands::AutoAssign(args) => assign::auto_assign(ctx, args).await,
            Commands::CancelAll => assign::cancel_all(ctx).await,
            Commands::Lists(cmd) => cmd.run(ctx).await,
            Commands::Version => {
                println!("slotctl {}", env!("CARGO_PKG_VERSION"));
                Ok(())
            }
        }
    }
}

/// Shared command context.
pub struct CommandContext {
    pub config: Config,
    pub format: OutputFormat,
}

impl CommandContext {
    fn engine_config(&self) -> Result<EngineConfig> {
        self.config.engine()
    }

    /// Open the local state database.
    pub fn state(&self) -> Result<EngineState> {
        let engine = self.engine_config()?;
        std::fs::create_dir_all(&engine.data_dir)
            .with_context(|| format!("Failed to create data dir {}", engine.data_dir))?;
        let kv = SqliteKv::open(engine.state_path())
            .with_context(|| format!("Failed to open {:?}", engine.state_path()))?;
        Ok(EngineState::new(Arc::new(kv)))
    }

    /// Restore the engine from local state. A stored session close to expiry
    /// is refreshed and written back before any remote call.
    pub async fn engine(&self) -> Result<Engine> {
        let config = self.engine_config()?;
        let state = self.state()?;
        let remote = config.remote();

        let tokens = Arc::new(TokenManager::new(
            Arc::new(HttpAuthClient::new(&remote)?),
            config.token_refresh_threshold(),
        ));
        if let Some(session) = state.load_session()? {
            tokens.connect(session).await;
            match tokens.check_and_refresh(Utc::now()).await {
                RefreshOutcome::Skipped => {}
                RefreshOutcome::Refreshed { expires_at } => {
                    debug!(expires_at = %expires_at, "Session refreshed");
                    state.save_session(tokens.session().await.as_ref())?;
                }
                RefreshOutcome::Disconnected { reason } => {
                    warn!(reason = %reason, "Stored session could not be refreshed");
                    state.save_session(None)?;
                }
            }
        }

        let client = Arc::new(HttpLabelClient::new(&remote, Arc::clone(&tokens))?);
        let controller = AssignmentController::restore(client, config.controller(), state)?;

        Ok(Engine { controller, tokens })
    }
}

/// A restored controller plus the session it talks with.
pub struct Engine {
    pub controller: AssignmentController,
    tokens: Arc<TokenManager>,
}

impl Engine {
    /// Fail early when there is no usable session.
    pub async fn require_session(&self) -> Result<()> {
        if self.tokens.phase().await == TokenPhase::Disconnected {
            return Err(CliError::NotAuthenticated.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parses_assign() {
        let cli = Cli::try_parse_from([
            "slotctl",
            "assign",
            "ent_01HV4Z2WQXKJNM8GPQY6VBKC3D",
            "12",
            "--local",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.format, "json");
        assert!(matches!(cli.command, Commands::Assign(_)));
    }

    #[test]
    fn test_rejects_malformed_entity_id() {
        assert!(Cli::try_parse_from(["slotctl", "unassign", "lst_01HV4Z2WQXKJNM8GPQY6VBKC3D"]).is_err());
    }
}
