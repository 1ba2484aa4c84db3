//! Saved entity lists.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use slotsync_id::ListId;
use slotsync_reconcile::SpaceId;

use crate::error::SyncError;
use crate::model::Entity;

/// Maximum list name length in characters.
pub const MAX_LIST_NAME_CHARS: usize = 20;

/// A named snapshot of an entity set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedList {
    pub id: ListId,
    pub display_name: String,
    /// Display name with spaces replaced by underscores.
    pub storage_name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub entities: Vec<Entity>,
}

impl SavedList {
    /// Build a list from a validated name and an entity snapshot.
    pub fn new(
        display_name: &str,
        entities: Vec<Entity>,
        now: DateTime<Utc>,
    ) -> Result<Self, SyncError> {
        let display_name = validate_list_name(display_name)?;
        Ok(Self {
            id: ListId::new(),
            storage_name: storage_name(&display_name),
            display_name,
            created_at: now,
            updated_at: None,
            entities,
        })
    }

    /// Spaces the list's entities hold.
    pub fn assigned_spaces(&self) -> impl Iterator<Item = SpaceId> + '_ {
        self.entities
            .iter()
            .filter_map(|e| e.assigned_space_id.clone())
    }
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphabetic() || c.is_ascii_digit() || c == ' ' || ('\u{0590}'..='\u{05FF}').contains(&c)
}

/// Check a list name and return it trimmed.
///
/// Names may contain Latin and Hebrew letters, ASCII digits and spaces, and
/// are at most [`MAX_LIST_NAME_CHARS`] characters long.
pub fn validate_list_name(name: &str) -> Result<String, SyncError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(SyncError::validation("list name must not be empty"));
    }
    if trimmed.chars().count() > MAX_LIST_NAME_CHARS {
        return Err(SyncError::validation(format!(
            "list name must be at most {MAX_LIST_NAME_CHARS} characters"
        )));
    }
    if let Some(bad) = trimmed.chars().find(|c| !is_allowed(*c)) {
        return Err(SyncError::validation(format!(
            "list name contains unsupported character {bad:?}"
        )));
    }
    Ok(trimmed.to_string())
}

pub fn storage_name(display_name: &str) -> String {
    display_name.replace(' ', "_")
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("Morning shift")]
    #[case("Floor 2")]
    #[case("משמרת בוקר")]
    #[case("  padded  ")]
    #[case("abcdefghijklmnopqrst")]
    fn test_valid_names(#[case] name: &str) {
        assert!(validate_list_name(name).is_ok());
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("abcdefghijklmnopqrstu")]
    #[case("night/shift")]
    #[case("team-a")]
    #[case("émigré")]
    fn test_invalid_names(#[case] name: &str) {
        let err = validate_list_name(name).unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[test]
    fn test_storage_name_uses_underscores() {
        let list = SavedList::new(" Floor 2 east ", Vec::new(), Utc::now()).unwrap();
        assert_eq!(list.display_name, "Floor 2 east");
        assert_eq!(list.storage_name, "Floor_2_east");
        assert!(list.updated_at.is_none());
    }
}
