//! Capacity commands.

use std::collections::BTreeMap;

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use slotsync_engine::{PoolSnapshot, SyncStatus};

use crate::output::{print_success, OutputFormat};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct ResizeArgs {
    /// New number of physical spaces.
    total_spaces: u32,
}

#[derive(Debug, Serialize)]
struct StatusReport {
    #[serde(flatten)]
    capacity: PoolSnapshot,
    entities: usize,
    sync: BTreeMap<String, usize>,
    /// Spaces whose remote blank has not gone through.
    pending_clears: Vec<String>,
    active_list: Option<String>,
}

pub async fn status(ctx: CommandContext) -> Result<()> {
    let engine = ctx.engine().await?;
    let controller = &engine.controller;

    let counts = controller.status_counts().await;
    let sync: BTreeMap<String, usize> = [
        SyncStatus::Unsynced,
        SyncStatus::Pending,
        SyncStatus::Synced,
        SyncStatus::Error,
    ]
    .into_iter()
    .map(|s| (s.to_string(), counts.get(&s).copied().unwrap_or(0)))
    .collect();

    let active_list = match controller.active_list_id().await {
        Some(id) => controller
            .lists()
            .await
            .into_iter()
            .find(|l| l.id == id)
            .map(|l| l.display_name),
        None => None,
    };

    let report = StatusReport {
        capacity: controller.capacity().await,
        entities: counts.values().sum(),
        sync,
        pending_clears: controller
            .pending_clears()
            .await
            .iter()
            .map(|s| s.to_string())
            .collect(),
        active_list,
    };

    match ctx.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Table => print_status(&report),
    }
    Ok(())
}

fn print_status(report: &StatusReport) {
    let capacity = &report.capacity;
    println!("{}", "Capacity".bold());
    println!("  Total:     {}", capacity.total_spaces);
    println!("  Assigned:  {}", capacity.assigned_spaces);
    println!("  Available: {}", capacity.available_spaces);
    println!("{}", "Entities".bold());
    println!("  Total:     {}", report.entities);
    for (status, count) in &report.sync {
        let line = format!("  {:<10} {}", format!("{status}:"), count);
        if status == "error" && *count > 0 {
            println!("{}", line.red());
        } else {
            println!("{line}");
        }
    }
    if !report.pending_clears.is_empty() {
        println!(
            "{} {} (run `slotctl retry`)",
            "Pending clears:".yellow().bold(),
            report.pending_clears.join(", ")
        );
    }
    if let Some(list) = &report.active_list {
        println!("{} {}", "Active list:".bold(), list);
    }
}

pub async fn resize(mut ctx: CommandContext, args: ResizeArgs) -> Result<()> {
    let engine = ctx.engine().await?;
    let snapshot = engine.controller.set_total_spaces(args.total_spaces).await?;

    ctx.config.total_spaces = snapshot.total_spaces;
    ctx.config.save()?;

    print_success(&format!(
        "Pool resized to {} spaces ({} available)",
        snapshot.total_spaces, snapshot.available_spaces
    ));
    Ok(())
}
