//! Entity kinds stored in the hub table
//!
//! Each kind knows how to derive its keys and how to move between its typed
//! struct and the generic [`Record`] envelope. Decoding is explicit, field by
//! field, so a stored row with a missing or mistyped attribute is reported
//! instead of silently defaulted.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::validation::{
    validate_email, validate_identifier, validate_identity, validate_required, AttributeKind,
};
use crate::{
    encode, new_entity_id, AttributeMap, EntityType, HubResult, Identity, KeySet, ListFilter,
    Record, StorageError, Timestamp, ValidationError,
};

/// Attributes no update may touch, whatever the entity kind.
pub const IMMUTABLE_ATTRIBUTES: &[&str] = &[
    "PK",
    "SK",
    "GSI1PK",
    "GSI1SK",
    "entity_type",
    "id",
    "user_id",
    "created_at",
    "updated_at",
];

/// Capability every stored entity kind implements.
pub trait Entity: Sized + Send + Sync + 'static {
    const ENTITY_TYPE: EntityType;

    /// Attributes a partial update may name, with their expected shape.
    const UPDATABLE: &'static [(&'static str, AttributeKind)];

    fn identity(&self) -> Identity;

    fn keys(&self) -> KeySet {
        encode(Self::ENTITY_TYPE, &self.identity())
    }

    /// Type-specific attributes, excluding the key envelope.
    fn attributes(&self) -> AttributeMap;

    fn created_at(&self) -> Timestamp;

    fn to_record(&self) -> Record {
        Record::new(
            Self::ENTITY_TYPE,
            self.keys(),
            self.attributes(),
            self.created_at(),
        )
    }

    fn from_record(record: &Record) -> HubResult<Self>;

    /// Check identifiers and required attributes before any I/O.
    fn validate(&self) -> Result<(), ValidationError>;

    /// Check a partial update against the whitelist of this kind.
    fn validate_changes(changes: &AttributeMap) -> Result<(), ValidationError> {
        if changes.is_empty() {
            return Err(ValidationError::InvalidValue {
                field: "changes".to_string(),
                reason: "no attributes to update".to_string(),
            });
        }
        for (field, value) in changes {
            if IMMUTABLE_ATTRIBUTES.contains(&field.as_str()) {
                return Err(ValidationError::ImmutableAttribute {
                    field: field.clone(),
                });
            }
            let kind = Self::UPDATABLE
                .iter()
                .find(|(name, _)| *name == field.as_str())
                .map(|(_, kind)| *kind)
                .ok_or_else(|| ValidationError::UnknownAttribute {
                    entity_type: Self::ENTITY_TYPE,
                    field: field.clone(),
                })?;
            kind.check(field, value)?;
        }
        Ok(())
    }

    /// Named filtered views this kind is listed under.
    fn supported_filters() -> &'static [ListFilter] {
        &[]
    }

    /// Filtered views whose membership includes `record`.
    fn matching_filters(record: &Record) -> Vec<ListFilter> {
        Self::supported_filters()
            .iter()
            .copied()
            .filter(|f| f.predicate().matches(record))
            .collect()
    }
}

fn decode_error(record: &Record, reason: impl Into<String>) -> StorageError {
    StorageError::Serialization {
        reason: format!("{}/{}: {}", record.pk, record.sk, reason.into()),
    }
}

fn required_string(record: &Record, name: &str) -> HubResult<String> {
    match record.attributes.get(name) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(decode_error(record, format!("{} is not a string", name)).into()),
        None => Err(decode_error(record, format!("{} is missing", name)).into()),
    }
}

fn optional_string(record: &Record, name: &str) -> HubResult<Option<String>> {
    match record.attributes.get(name) {
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Null) | None => Ok(None),
        Some(_) => Err(decode_error(record, format!("{} is not a string", name)).into()),
    }
}

fn expect_type(record: &Record, entity_type: EntityType) -> HubResult<()> {
    if record.entity_type != entity_type {
        return Err(decode_error(
            record,
            format!("expected {} row, found {}", entity_type, record.entity_type),
        )
        .into());
    }
    Ok(())
}

fn put_optional(attributes: &mut AttributeMap, name: &str, value: &Option<String>) {
    if let Some(v) = value {
        attributes.insert(name.to_string(), Value::String(v.clone()));
    }
}

// ============================================================================
// USER
// ============================================================================

/// Account owning a partition of contacts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl User {
    pub fn new(
        email: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: new_entity_id(),
            email: email.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

impl Entity for User {
    const ENTITY_TYPE: EntityType = EntityType::User;

    const UPDATABLE: &'static [(&'static str, AttributeKind)] = &[
        ("email", AttributeKind::Email),
        ("first_name", AttributeKind::RequiredString),
        ("last_name", AttributeKind::RequiredString),
    ];

    fn identity(&self) -> Identity {
        Identity::standalone(self.id.clone())
    }

    fn attributes(&self) -> AttributeMap {
        let mut attributes = AttributeMap::new();
        attributes.insert("id".to_string(), Value::String(self.id.clone()));
        attributes.insert("email".to_string(), Value::String(self.email.clone()));
        attributes.insert(
            "first_name".to_string(),
            Value::String(self.first_name.clone()),
        );
        attributes.insert(
            "last_name".to_string(),
            Value::String(self.last_name.clone()),
        );
        attributes
    }

    fn created_at(&self) -> Timestamp {
        self.created_at
    }

    fn from_record(record: &Record) -> HubResult<Self> {
        expect_type(record, EntityType::User)?;
        Ok(Self {
            id: required_string(record, "id")?,
            email: required_string(record, "email")?,
            first_name: required_string(record, "first_name")?,
            last_name: required_string(record, "last_name")?,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        validate_identity(Self::ENTITY_TYPE, &self.identity())?;
        validate_email("email", &self.email)?;
        validate_required("first_name", &self.first_name)?;
        validate_required("last_name", &self.last_name)
    }
}

// ============================================================================
// CONTACT
// ============================================================================

/// Address-book entry stored in its owner's partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub job_title: Option<String>,
    pub address: Option<String>,
    pub notes: Option<String>,
    pub is_favorite: bool,
    pub tags: Vec<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Contact {
    pub fn new(
        user_id: impl Into<String>,
        name: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: new_entity_id(),
            user_id: user_id.into(),
            name: name.into(),
            email: email.into(),
            phone: None,
            company: None,
            job_title: None,
            address: None,
            notes: None,
            is_favorite: false,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_favorite(mut self, is_favorite: bool) -> Self {
        self.is_favorite = is_favorite;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_company(mut self, company: impl Into<String>) -> Self {
        self.company = Some(company.into());
        self
    }
}

impl Entity for Contact {
    const ENTITY_TYPE: EntityType = EntityType::Contact;

    const UPDATABLE: &'static [(&'static str, AttributeKind)] = &[
        ("name", AttributeKind::RequiredString),
        ("email", AttributeKind::Email),
        ("phone", AttributeKind::String),
        ("company", AttributeKind::String),
        ("job_title", AttributeKind::String),
        ("address", AttributeKind::String),
        ("notes", AttributeKind::String),
        ("is_favorite", AttributeKind::Bool),
        ("tags", AttributeKind::StringList),
    ];

    fn identity(&self) -> Identity {
        Identity::owned(self.user_id.clone(), self.id.clone())
    }

    fn attributes(&self) -> AttributeMap {
        let mut attributes = AttributeMap::new();
        attributes.insert("id".to_string(), Value::String(self.id.clone()));
        attributes.insert("user_id".to_string(), Value::String(self.user_id.clone()));
        attributes.insert("name".to_string(), Value::String(self.name.clone()));
        attributes.insert("email".to_string(), Value::String(self.email.clone()));
        put_optional(&mut attributes, "phone", &self.phone);
        put_optional(&mut attributes, "company", &self.company);
        put_optional(&mut attributes, "job_title", &self.job_title);
        put_optional(&mut attributes, "address", &self.address);
        put_optional(&mut attributes, "notes", &self.notes);
        attributes.insert("is_favorite".to_string(), Value::Bool(self.is_favorite));
        attributes.insert(
            "tags".to_string(),
            Value::Array(self.tags.iter().cloned().map(Value::String).collect()),
        );
        attributes
    }

    fn created_at(&self) -> Timestamp {
        self.created_at
    }

    fn from_record(record: &Record) -> HubResult<Self> {
        expect_type(record, EntityType::Contact)?;
        let is_favorite = match record.attributes.get("is_favorite") {
            Some(Value::Bool(b)) => *b,
            None => false,
            Some(_) => return Err(decode_error(record, "is_favorite is not a bool").into()),
        };
        let tags = match record.attributes.get("tags") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| decode_error(record, "tags holds a non-string"))
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(Value::Null) | None => Vec::new(),
            Some(_) => return Err(decode_error(record, "tags is not a list").into()),
        };

        Ok(Self {
            id: required_string(record, "id")?,
            user_id: required_string(record, "user_id")?,
            name: required_string(record, "name")?,
            email: required_string(record, "email")?,
            phone: optional_string(record, "phone")?,
            company: optional_string(record, "company")?,
            job_title: optional_string(record, "job_title")?,
            address: optional_string(record, "address")?,
            notes: optional_string(record, "notes")?,
            is_favorite,
            tags,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }

    fn validate(&self) -> Result<(), ValidationError> {
        validate_identifier("user_id", &self.user_id)?;
        validate_identity(Self::ENTITY_TYPE, &self.identity())?;
        validate_required("name", &self.name)?;
        validate_email("email", &self.email)
    }

    fn supported_filters() -> &'static [ListFilter] {
        &ListFilter::ALL
    }
}
