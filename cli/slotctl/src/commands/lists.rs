//! Saved list commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use slotsync_engine::ListId;

use crate::output::{print_cleanup, print_output, print_single, print_success, ListRow};

use super::CommandContext;

/// Saved list commands.
#[derive(Debug, Args)]
pub struct ListsCommand {
    #[command(subcommand)]
    command: ListsSubcommand,
}

#[derive(Debug, Subcommand)]
enum ListsSubcommand {
    /// Show saved lists.
    Ls,

    /// Snapshot the current entities under a new name.
    Save {
        /// Display name, at most 20 characters.
        name: String,
    },

    /// Overwrite a list with the current entities.
    Update { list: ListId },

    /// Delete a list and vacate the spaces only it used.
    Delete { list: ListId },

    /// Make a list the active entity set.
    Load { list: ListId },
}

impl ListsCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let engine = ctx.engine().await?;
        let controller = &engine.controller;

        match self.command {
            ListsSubcommand::Ls => {
                let active = controller.active_list_id().await;
                let rows: Vec<ListRow> = controller
                    .lists()
                    .await
                    .iter()
                    .map(|l| ListRow::new(l, Some(l.id) == active))
                    .collect();
                print_output(&rows, ctx.format);
            }
            ListsSubcommand::Save { name } => {
                let list = controller.save_list(&name).await?;
                print_single(&ListRow::new(&list, true), ctx.format);
            }
            ListsSubcommand::Update { list } => {
                let list = controller.update_list(list).await?;
                let active = controller.active_list_id().await == Some(list.id);
                print_single(&ListRow::new(&list, active), ctx.format);
            }
            ListsSubcommand::Delete { list } => {
                controller.delete_list(list).await?;
                print_success(&format!("Deleted list {list}"));
            }
            ListsSubcommand::Load { list } => {
                let outcome = controller.load_list(list).await?;
                print_cleanup(&outcome.cleanup);
                print_success(&format!(
                    "Loaded list {list}: cleared {}, pushed {}",
                    outcome.plan.to_clear.len(),
                    outcome.pushed
                ));
            }
        }
        Ok(())
    }
}
