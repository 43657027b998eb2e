//! Entity type discriminator

use serde::{Deserialize, Serialize};
use std::fmt;

/// Entity type tag stored on every record. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EntityType {
    User,
    Contact,
}

impl EntityType {
    /// Every entity kind the table holds.
    pub const ALL: [EntityType; 2] = [EntityType::User, EntityType::Contact];

    /// Upper-case tag used in partition/sort keys and the type index.
    pub fn tag(self) -> &'static str {
        match self {
            EntityType::User => "USER",
            EntityType::Contact => "CONTACT",
        }
    }

    /// Lower-case namespace used for cache keys.
    pub fn cache_namespace(self) -> &'static str {
        match self {
            EntityType::User => "user",
            EntityType::Contact => "contact",
        }
    }

    /// The entity kind whose partition this kind lives in, if any.
    pub fn owner(self) -> Option<EntityType> {
        match self {
            EntityType::User => None,
            EntityType::Contact => Some(EntityType::User),
        }
    }

    /// Entity kinds stored in this kind's partition.
    pub fn children(self) -> Vec<EntityType> {
        Self::ALL
            .into_iter()
            .filter(|t| t.owner() == Some(self))
            .collect()
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.tag() == tag)
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_round_trip() {
        for entity_type in EntityType::ALL {
            assert_eq!(EntityType::from_tag(entity_type.tag()), Some(entity_type));
        }
        assert_eq!(EntityType::from_tag("ORDER"), None);
    }

    #[test]
    fn test_ownership() {
        assert_eq!(EntityType::Contact.owner(), Some(EntityType::User));
        assert_eq!(EntityType::User.owner(), None);
        assert_eq!(EntityType::User.children(), vec![EntityType::Contact]);
        assert!(EntityType::Contact.children().is_empty());
    }

    #[test]
    fn test_serde_uses_tag() {
        let json = serde_json::to_string(&EntityType::Contact).unwrap();
        assert_eq!(json, "\"CONTACT\"");
    }
}
