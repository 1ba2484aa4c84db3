//! Assignment commands.

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use slotsync_engine::{EntityId, SpaceId};
use tabled::Tabled;

use crate::output::{print_cleanup, print_output, print_single, print_success, EntityRow};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct AssignArgs {
    /// Entity ID.
    entity: EntityId,

    /// Space to assign.
    space: String,

    /// Change local state only; nothing is sent to the label service.
    #[arg(long)]
    local: bool,
}

#[derive(Debug, Args)]
pub struct UnassignArgs {
    /// Entity ID.
    entity: EntityId,

    /// Change local state only.
    #[arg(long)]
    local: bool,
}

#[derive(Debug, Args)]
pub struct AutoAssignArgs {
    /// Entities to place, in order.
    #[arg(required = true)]
    entities: Vec<EntityId>,

    /// Change local state only.
    #[arg(long)]
    local: bool,
}

#[derive(Debug, Serialize, Tabled)]
struct PlacementRow {
    #[tabled(rename = "Entity")]
    entity: String,
    #[tabled(rename = "Space")]
    space: String,
}

pub async fn assign(ctx: CommandContext, args: AssignArgs) -> Result<()> {
    let engine = ctx.engine().await?;
    let outcome = engine
        .controller
        .assign_space_to_person(args.entity, SpaceId::new(args.space), !args.local)
        .await?;
    print_cleanup(&outcome.cleanup);
    print_single(&EntityRow::from(&outcome.entity), ctx.format);
    Ok(())
}

pub async fn unassign(ctx: CommandContext, args: UnassignArgs) -> Result<()> {
    let engine = ctx.engine().await?;
    let cleanup = engine
        .controller
        .unassign_space(args.entity, !args.local)
        .await?;
    print_cleanup(&cleanup);
    print_success(&format!("Vacated space of {}", args.entity));
    Ok(())
}

pub async fn auto_assign(ctx: CommandContext, args: AutoAssignArgs) -> Result<()> {
    let engine = ctx.engine().await?;
    let outcome = engine
        .controller
        .assign_next_available(&args.entities, !args.local)
        .await?;
    print_cleanup(&outcome.cleanup);

    let rows: Vec<PlacementRow> = outcome
        .assigned
        .iter()
        .map(|(id, space)| PlacementRow {
            entity: id.to_string(),
            space: space.to_string(),
        })
        .collect();
    print_output(&rows, ctx.format);
    Ok(())
}

pub async fn cancel_all(ctx: CommandContext) -> Result<()> {
    let engine = ctx.engine().await?;
    let cleanup = engine.controller.cancel_all_assignments().await?;
    print_cleanup(&cleanup);
    print_success("All assignments cancelled");
    Ok(())
}
