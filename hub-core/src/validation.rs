//! Input validation performed before any store or cache I/O.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::keys::{CACHE_KEY_SEPARATOR, KEY_SEPARATOR};
use crate::{EntityType, Identity, ValidationError};

/// Identifiers that would make a point cache key collide with a list or
/// aggregate key.
pub const RESERVED_IDENTIFIERS: &[&str] = &["list", "dashboard"];

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid")
});

/// Reject identifiers that are empty, reserved, or contain a key separator
/// or control character.
pub fn validate_identifier(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: field.to_string(),
        });
    }
    if value.contains(KEY_SEPARATOR) || value.contains(CACHE_KEY_SEPARATOR) {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            reason: format!(
                "must not contain '{}' or '{}'",
                KEY_SEPARATOR, CACHE_KEY_SEPARATOR
            ),
        });
    }
    if value.chars().any(char::is_control) {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            reason: "must not contain control characters".to_string(),
        });
    }
    if RESERVED_IDENTIFIERS.contains(&value) {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            reason: format!("'{}' is reserved", value),
        });
    }
    Ok(())
}

/// Check that an identity has exactly the parts its entity type needs.
pub fn validate_identity(
    entity_type: EntityType,
    identity: &Identity,
) -> Result<(), ValidationError> {
    validate_identifier("id", &identity.id)?;
    match (entity_type.owner(), identity.owner()) {
        (Some(_), Some(owner)) => validate_identifier("owner_id", owner),
        (Some(_), None) => Err(ValidationError::RequiredFieldMissing {
            field: "owner_id".to_string(),
        }),
        (None, Some(_)) => Err(ValidationError::InvalidValue {
            field: "owner_id".to_string(),
            reason: format!("{} entities have no owner", entity_type),
        }),
        (None, None) => Ok(()),
    }
}

pub fn validate_email(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: field.to_string(),
        });
    }
    if !EMAIL_RE.is_match(value) {
        return Err(ValidationError::InvalidValue {
            field: field.to_string(),
            reason: "not a valid email address".to_string(),
        });
    }
    Ok(())
}

pub fn validate_required(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Expected JSON shape of an updatable attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    String,
    /// A string that may not be blank.
    RequiredString,
    Email,
    Bool,
    StringList,
}

impl AttributeKind {
    pub fn check(self, field: &str, value: &Value) -> Result<(), ValidationError> {
        let ok = match (self, value) {
            (AttributeKind::String, Value::String(_)) => true,
            (AttributeKind::RequiredString, Value::String(s)) => {
                return validate_required(field, s)
            }
            (AttributeKind::Email, Value::String(s)) => return validate_email(field, s),
            (AttributeKind::Bool, Value::Bool(_)) => true,
            (AttributeKind::StringList, Value::Array(items)) => items.iter().all(Value::is_string),
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(ValidationError::InvalidValue {
                field: field.to_string(),
                reason: format!("expected {:?}", self),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_identifier_rules() {
        assert!(validate_identifier("id", "abc-123").is_ok());
        assert!(matches!(
            validate_identifier("id", ""),
            Err(ValidationError::RequiredFieldMissing { .. })
        ));
        assert!(validate_identifier("id", "a#b").is_err());
        assert!(validate_identifier("id", "a:b").is_err());
        assert!(validate_identifier("id", "a\nb").is_err());
        assert!(validate_identifier("id", "list").is_err());
        assert!(validate_identifier("id", "dashboard").is_err());
    }

    #[test]
    fn test_identity_shape_per_type() {
        assert!(validate_identity(EntityType::User, &Identity::standalone("u1")).is_ok());
        assert!(validate_identity(EntityType::User, &Identity::owned("x", "u1")).is_err());
        assert!(validate_identity(EntityType::Contact, &Identity::owned("u1", "c1")).is_ok());
        assert!(matches!(
            validate_identity(EntityType::Contact, &Identity::standalone("c1")),
            Err(ValidationError::RequiredFieldMissing { .. })
        ));
    }

    #[test]
    fn test_email() {
        assert!(validate_email("email", "ada@example.com").is_ok());
        assert!(validate_email("email", "not-an-email").is_err());
        assert!(validate_email("email", "").is_err());
    }

    #[test]
    fn test_attribute_kinds() {
        assert!(AttributeKind::Bool.check("is_favorite", &json!(true)).is_ok());
        assert!(AttributeKind::Bool.check("is_favorite", &json!("yes")).is_err());
        assert!(AttributeKind::StringList.check("tags", &json!(["a", "b"])).is_ok());
        assert!(AttributeKind::StringList.check("tags", &json!(["a", 1])).is_err());
        assert!(AttributeKind::Email.check("email", &json!("bad")).is_err());
        assert!(AttributeKind::RequiredString.check("name", &json!("Ada")).is_ok());
        assert!(matches!(
            AttributeKind::RequiredString.check("name", &json!("  ")),
            Err(ValidationError::RequiredFieldMissing { .. })
        ));
        assert!(AttributeKind::RequiredString.check("name", &json!(3)).is_err());
    }
}
