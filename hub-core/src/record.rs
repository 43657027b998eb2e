//! Stored record shape shared by every entity type

use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::{EntityType, ItemKey, KeySet, Timestamp};

/// Type-specific attributes of a record, ordered by name.
pub type AttributeMap = BTreeMap<String, Value>;

/// Attribute names owned by the record envelope rather than the entity.
pub const RESERVED_ATTRIBUTES: &[&str] = &[
    "PK",
    "SK",
    "GSI1PK",
    "GSI1SK",
    "entity_type",
    "created_at",
    "updated_at",
];

/// One row of the table.
///
/// `(pk, sk)` is the unique identity of the row and never changes.
/// `(gsi1_pk, gsi1_sk)` only orders and groups rows for index scans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "PK")]
    pub pk: String,
    #[serde(rename = "SK")]
    pub sk: String,
    #[serde(rename = "GSI1PK")]
    pub gsi1_pk: String,
    #[serde(rename = "GSI1SK")]
    pub gsi1_sk: String,
    pub entity_type: EntityType,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    #[serde(default)]
    pub attributes: AttributeMap,
}

impl Record {
    /// Build a record whose `created_at` and `updated_at` are both `now`.
    pub fn new(
        entity_type: EntityType,
        keys: KeySet,
        attributes: AttributeMap,
        now: Timestamp,
    ) -> Self {
        Self {
            pk: keys.pk,
            sk: keys.sk,
            gsi1_pk: keys.gsi1_pk,
            gsi1_sk: keys.gsi1_sk,
            entity_type,
            created_at: now,
            updated_at: now,
            attributes,
        }
    }

    pub fn key(&self) -> ItemKey {
        ItemKey::new(self.pk.clone(), self.sk.clone())
    }

    /// Look up an attribute by name. `entity_type` resolves to the tag so
    /// filters can select on it.
    pub fn attribute(&self, name: &str) -> Option<Value> {
        match name {
            "entity_type" => Some(Value::String(self.entity_type.tag().to_string())),
            _ => self.attributes.get(name).cloned(),
        }
    }

    /// Merge the named attributes and advance `updated_at`.
    /// Attributes not named in `changes` are left untouched.
    pub fn apply_changes(&mut self, changes: &AttributeMap, now: Timestamp) {
        for (name, value) in changes {
            self.attributes.insert(name.clone(), value.clone());
        }
        self.touch(now);
    }

    /// Advance `updated_at`, strictly past its previous value.
    pub fn touch(&mut self, now: Timestamp) {
        self.updated_at = next_update_timestamp(self.updated_at, now);
    }
}

/// `now`, or one microsecond past `previous` when the clock has not moved.
pub fn next_update_timestamp(previous: Timestamp, now: Timestamp) -> Timestamp {
    if now > previous {
        now
    } else {
        previous + ChronoDuration::microseconds(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{encode, Identity};
    use chrono::Utc;
    use serde_json::json;

    fn make_record() -> Record {
        let mut attributes = AttributeMap::new();
        attributes.insert("name".to_string(), json!("Ada"));
        attributes.insert("is_favorite".to_string(), json!(false));
        Record::new(
            EntityType::Contact,
            encode(EntityType::Contact, &Identity::owned("u1", "c1")),
            attributes,
            Utc::now(),
        )
    }

    #[test]
    fn test_apply_changes_merges_named_attributes_only() {
        let mut record = make_record();
        let before = record.clone();

        let mut changes = AttributeMap::new();
        changes.insert("is_favorite".to_string(), json!(true));
        record.apply_changes(&changes, before.updated_at);

        assert_eq!(record.attributes["is_favorite"], json!(true));
        assert_eq!(record.attributes["name"], before.attributes["name"]);
        assert_eq!(record.created_at, before.created_at);
        assert!(record.updated_at > before.updated_at);
    }

    #[test]
    fn test_next_update_timestamp_is_strictly_increasing() {
        let now = Utc::now();
        assert!(next_update_timestamp(now, now) > now);
        let later = now + ChronoDuration::seconds(1);
        assert_eq!(next_update_timestamp(now, later), later);
    }

    #[test]
    fn test_entity_type_is_addressable_as_attribute() {
        let record = make_record();
        assert_eq!(record.attribute("entity_type"), Some(json!("CONTACT")));
        assert_eq!(record.attribute("missing"), None);
    }

    #[test]
    fn test_serialized_envelope_field_names() {
        let record = make_record();
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["PK"], json!("USER#u1"));
        assert_eq!(value["SK"], json!("CONTACT#c1"));
        assert_eq!(value["GSI1PK"], json!("CONTACT"));
        assert_eq!(value["entity_type"], json!("CONTACT"));
    }
}
