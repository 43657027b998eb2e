//! Identity types for hub entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new entity identifier (UUIDv7 rendered as a string).
/// UUIDv7 embeds a Unix timestamp, so ids sort by creation time.
pub fn new_entity_id() -> String {
    Uuid::now_v7().to_string()
}

/// Address of one entity: its own id plus the owner id for entities that
/// live in another entity's partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub owner_id: Option<String>,
    pub id: String,
}

impl Identity {
    /// Identity of an entity that owns its partition.
    pub fn standalone(id: impl Into<String>) -> Self {
        Self {
            owner_id: None,
            id: id.into(),
        }
    }

    /// Identity of an entity stored under its owner's partition.
    pub fn owned(owner_id: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            id: id.into(),
        }
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner_id.as_deref()
    }
}
