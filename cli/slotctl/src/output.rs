//! Output formatting for CLI commands.

use colored::Colorize;
use serde::Serialize;
use slotsync_engine::{CleanupReport, Entity, SavedList};
use tabled::{Table, Tabled};

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format.
    #[default]
    Table,
    /// JSON format.
    Json,
}

impl OutputFormat {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "json" => Self::Json,
            _ => Self::Table,
        }
    }
}

/// Print data in the specified format.
pub fn print_output<T: Serialize + Tabled>(data: &[T], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            if data.is_empty() {
                println!("{}", "No items found.".dimmed());
            } else {
                println!("{}", Table::new(data));
            }
        }
        OutputFormat::Json => println!("{}", format_json(data, "[]")),
    }
}

/// Print a single item in the specified format.
pub fn print_single<T: Serialize + Tabled>(data: &T, format: OutputFormat) {
    match format {
        OutputFormat::Table => println!("{}", Table::new([data])),
        OutputFormat::Json => println!("{}", format_json(data, "{}")),
    }
}

fn format_json<T: Serialize + ?Sized>(data: &T, fallback: &str) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|_| fallback.to_string())
}

/// Print a success message.
pub fn print_success(message: &str) {
    println!("{} {}", "Success:".green().bold(), message);
}

/// Print an info message.
pub fn print_info(message: &str) {
    println!("{} {}", "Info:".blue().bold(), message);
}

/// Print best-effort cleanup failures. These go to stderr so JSON output
/// stays parseable.
pub fn print_cleanup(report: &CleanupReport) {
    for warning in report.warnings() {
        let spaces = warning
            .spaces
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        eprintln!(
            "{} {} [{}]: {}",
            "Warning:".yellow().bold(),
            warning.step.as_str(),
            spaces,
            warning.message
        );
    }
}

fn display_option(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| "-".to_string())
}

/// Table row for an entity.
#[derive(Debug, Clone, Serialize, Tabled)]
pub struct EntityRow {
    #[tabled(rename = "ID")]
    pub id: String,

    #[tabled(rename = "Attributes")]
    #[serde(skip)]
    pub summary: String,

    #[tabled(skip)]
    pub attributes: slotsync_engine::Attributes,

    #[tabled(rename = "Space", display = "display_option")]
    pub space: Option<String>,

    #[tabled(rename = "Pool", display = "display_option")]
    pub pool: Option<String>,

    #[tabled(rename = "Status")]
    pub status: String,

    #[tabled(rename = "Lists")]
    pub lists: String,

    #[tabled(rename = "Last Synced", display = "display_option")]
    pub last_synced_at: Option<String>,
}

impl From<&Entity> for EntityRow {
    fn from(entity: &Entity) -> Self {
        Self {
            id: entity.id.to_string(),
            summary: summarize_attributes(entity),
            attributes: entity.attributes.clone(),
            space: entity.assigned_space_id.as_ref().map(ToString::to_string),
            pool: entity.virtual_pool_id.clone(),
            status: entity.sync_status.to_string(),
            lists: entity
                .memberships()
                .iter()
                .map(|m| m.list_name.as_str())
                .collect::<Vec<_>>()
                .join(","),
            last_synced_at: entity.last_synced_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// `key=value` pairs, comma separated.
fn summarize_attributes(entity: &Entity) -> String {
    entity
        .attributes
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Table row for a saved list.
#[derive(Debug, Clone, Serialize, Tabled)]
pub struct ListRow {
    #[tabled(rename = "ID")]
    pub id: String,

    #[tabled(rename = "Name")]
    pub name: String,

    #[tabled(rename = "Storage Name")]
    pub storage_name: String,

    #[tabled(rename = "Entities")]
    pub entities: usize,

    #[tabled(rename = "Assigned")]
    pub assigned: usize,

    #[tabled(rename = "Active")]
    pub active: bool,

    #[tabled(rename = "Updated")]
    pub updated_at: String,
}

impl ListRow {
    pub fn new(list: &SavedList, active: bool) -> Self {
        Self {
            id: list.id.to_string(),
            name: list.display_name.clone(),
            storage_name: list.storage_name.clone(),
            entities: list.entities.len(),
            assigned: list.assigned_spaces().count(),
            active,
            updated_at: list.updated_at.unwrap_or(list.created_at).to_rfc3339(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotsync_engine::{Attributes, SpaceId};

    #[test]
    fn test_output_format_parse() {
        assert_eq!(OutputFormat::parse("json"), OutputFormat::Json);
        assert_eq!(OutputFormat::parse("table"), OutputFormat::Table);
        assert_eq!(OutputFormat::parse("yaml"), OutputFormat::Table);
    }

    #[test]
    fn test_entity_row() {
        let mut attributes = Attributes::new();
        attributes.insert("name".to_string(), "Dana".to_string());
        attributes.insert("dept".to_string(), "Ops".to_string());
        let entity = Entity::new(attributes).assigned_to(SpaceId::from(4u32));

        let row = EntityRow::from(&entity);
        assert_eq!(row.summary, "dept=Ops, name=Dana");
        assert_eq!(row.space.as_deref(), Some("4"));
        assert_eq!(row.status, "unsynced");
        assert!(row.last_synced_at.is_none());

        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["attributes"]["name"], "Dana");
        assert!(json.get("summary").is_none());
    }

    #[test]
    fn test_display_option() {
        assert_eq!(display_option(&None), "-");
        assert_eq!(display_option(&Some("7".to_string())), "7");
    }
}
