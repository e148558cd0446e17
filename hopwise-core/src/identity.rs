//! Identity types for HOPWISE entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Entity identifier using UUIDv7 for timestamp-sortable IDs.
/// UUIDv7 embeds a Unix timestamp, making IDs naturally sortable by creation time.
pub type EntityId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}

/// Common behavior of the strongly-typed entity identifiers.
pub trait EntityIdType: Copy + Eq + std::hash::Hash + fmt::Display {
    /// Entity type discriminator for this identifier.
    const ENTITY_TYPE: EntityType;

    /// Wrap a raw UUID.
    fn new(uuid: Uuid) -> Self;

    /// Access the raw UUID.
    fn as_uuid(&self) -> Uuid;

    /// Generate a fresh timestamp-sortable identifier.
    fn now_v7() -> Self {
        Self::new(Uuid::now_v7())
    }

    /// The nil identifier (all zeros).
    fn nil() -> Self {
        Self::new(Uuid::nil())
    }
}

/// Entity type discriminator for polymorphic references and error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Mission,
    Hop,
    ToolStep,
    Asset,
}

impl EntityType {
    /// Lowercase name used in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Mission => "mission",
            EntityType::Hop => "hop",
            EntityType::ToolStep => "tool_step",
            EntityType::Asset => "asset",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! define_entity_id {
    ($(#[$meta:meta])* $name:ident, $entity:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl EntityIdType for $name {
            const ENTITY_TYPE: EntityType = $entity;

            fn new(uuid: Uuid) -> Self {
                Self(uuid)
            }

            fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

define_entity_id!(
    /// Identifier of a Mission (root aggregate).
    MissionId,
    EntityType::Mission
);
define_entity_id!(
    /// Identifier of a Hop within a Mission.
    HopId,
    EntityType::Hop
);
define_entity_id!(
    /// Identifier of a single ToolStep invocation.
    ToolStepId,
    EntityType::ToolStep
);
define_entity_id!(
    /// Identity of an Asset record, independent of the scope key it is stored under.
    AssetId,
    EntityType::Asset
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entity_id_is_v7() {
        let id = new_entity_id();
        assert_eq!(id.get_version_num(), 7);
    }

    #[test]
    fn test_typed_ids_are_sortable() {
        let id1 = HopId::now_v7();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let id2 = HopId::now_v7();
        assert!(id1 < id2);
    }

    #[test]
    fn test_typed_id_display_and_parse() {
        let id = MissionId::now_v7();
        let parsed: MissionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert_eq!(MissionId::ENTITY_TYPE, EntityType::Mission);
    }

    #[test]
    fn test_typed_id_serializes_as_plain_uuid() {
        let id = ToolStepId::nil();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"00000000-0000-0000-0000-000000000000\"");
    }
}
