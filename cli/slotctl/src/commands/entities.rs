//! Entity and pull commands.

use anyhow::Result;
use clap::Args;
use slotsync_engine::client::fields;
use slotsync_engine::{Attributes, EntityId};

use crate::error::CliError;
use crate::output::{print_cleanup, print_output, print_single, print_success, EntityRow};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct AddArgs {
    /// Attribute as key=value; repeat for more.
    #[arg(long = "attr", value_name = "KEY=VALUE", required = true)]
    attributes: Vec<String>,
}

#[derive(Debug, Args)]
pub struct RemoveArgs {
    /// Entity ID.
    entity: EntityId,
}

fn parse_attributes(raw: &[String]) -> Result<Attributes, CliError> {
    let mut attributes = Attributes::new();
    for pair in raw {
        let (key, value) = pair
            .split_once('=')
            .filter(|(k, _)| !k.trim().is_empty())
            .ok_or_else(|| CliError::InvalidAttribute(pair.clone()))?;
        let key = key.trim();
        if fields::RESERVED.contains(&key) {
            return Err(CliError::ReservedAttribute(key.to_string()));
        }
        attributes.insert(key.to_string(), value.to_string());
    }
    Ok(attributes)
}

pub async fn list(ctx: CommandContext) -> Result<()> {
    let engine = ctx.engine().await?;
    let rows: Vec<EntityRow> = engine
        .controller
        .entities()
        .await
        .iter()
        .map(EntityRow::from)
        .collect();
    print_output(&rows, ctx.format);
    Ok(())
}

pub async fn add(ctx: CommandContext, args: AddArgs) -> Result<()> {
    let attributes = parse_attributes(&args.attributes)?;
    let engine = ctx.engine().await?;
    let entity = engine.controller.add_entity(attributes).await;
    print_single(&EntityRow::from(&entity), ctx.format);
    Ok(())
}

pub async fn remove(ctx: CommandContext, args: RemoveArgs) -> Result<()> {
    let engine = ctx.engine().await?;
    let cleanup = engine.controller.delete_entity(args.entity).await?;
    print_cleanup(&cleanup);
    print_success(&format!("Removed {}", args.entity));
    Ok(())
}

pub async fn pull(ctx: CommandContext) -> Result<()> {
    let engine = ctx.engine().await?;
    engine.require_session().await?;
    let count = engine.controller.sync_from_remote().await?;
    print_success(&format!("Pulled {count} entities"));
    Ok(())
}

pub async fn retry(ctx: CommandContext) -> Result<()> {
    let engine = ctx.engine().await?;
    let count = engine.controller.retry_failed().await?;
    print_success(&format!("Retried {count} entities"));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_attributes() {
        let attributes = parse_attributes(&strings(&["name=Dana", "note=a=b"])).unwrap();
        assert_eq!(attributes["name"], "Dana");
        assert_eq!(attributes["note"], "a=b");
    }

    #[test]
    fn test_parse_attributes_rejects_bad_input() {
        assert!(matches!(
            parse_attributes(&strings(&["nameDana"])),
            Err(CliError::InvalidAttribute(_))
        ));
        assert!(matches!(
            parse_attributes(&strings(&["=Dana"])),
            Err(CliError::InvalidAttribute(_))
        ));
        assert!(matches!(
            parse_attributes(&strings(&["space_id=4"])),
            Err(CliError::ReservedAttribute(_))
        ));
    }
}
