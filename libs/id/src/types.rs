//! Typed ID definitions.

use crate::define_id;

define_id!(EntityId, "ent");
define_id!(ListId, "lst");

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_entity_id_roundtrip() {
        let id = EntityId::new();
        let parsed: EntityId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!(id.to_string().starts_with("ent_"));
    }

    #[test]
    fn test_list_id_rejects_entity_prefix() {
        let entity = EntityId::new().to_string();
        let err = entity.parse::<ListId>().unwrap_err();
        assert!(err.is_prefix_error());
    }

    #[test]
    fn test_missing_separator() {
        let result: Result<EntityId, _> = "ent01HV4Z2WQXKJNM8GPQY6VBKC3D".parse();
        assert_eq!(result.unwrap_err(), crate::IdError::MissingSeparator);
    }

    #[test]
    fn test_empty() {
        let result: Result<ListId, _> = "".parse();
        assert_eq!(result.unwrap_err(), crate::IdError::Empty);
    }

    #[test]
    fn test_invalid_ulid() {
        let result: Result<EntityId, _> = "ent_not-a-ulid".parse();
        assert!(matches!(result.unwrap_err(), crate::IdError::InvalidUlid(_)));
    }

    #[test]
    fn test_json_is_canonical_string() {
        let id = ListId::new();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{id}\""));
        let parsed: ListId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_entity_ids_sort_by_creation() {
        let first = EntityId::new();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = EntityId::new();
        assert!(first < second);
    }

    proptest! {
        #[test]
        fn prop_parse_never_panics(s in "\\PC*") {
            let _ = s.parse::<EntityId>();
        }

        #[test]
        fn prop_from_ulid_roundtrips(raw in any::<u128>()) {
            let id = EntityId::from_ulid(crate::Ulid(raw));
            prop_assert_eq!(id.to_string().parse::<EntityId>().unwrap(), id);
        }
    }
}
