//! Attribute filter expressions evaluated by the store during scans
//!
//! A [`Predicate`] is handed to the store together with the key condition and
//! is applied to each key-matching row inside the backend, the way a
//! server-side filter expression is.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;

use crate::Record;

/// Filter operator for attribute comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    /// Equal to
    Eq,
    /// Not equal to
    Ne,
    /// Greater than
    Gt,
    /// Less than
    Lt,
    /// Greater than or equal
    Gte,
    /// Less than or equal
    Lte,
    /// Substring (strings) or element (arrays)
    Contains,
    /// String prefix
    BeginsWith,
    /// Attribute is present
    Exists,
    /// Attribute is absent
    NotExists,
}

/// Single attribute comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterExpr {
    /// Attribute to filter on
    pub field: String,
    /// Operator to apply
    pub operator: FilterOperator,
    /// Value to compare against; ignored by `Exists` / `NotExists`
    pub value: Value,
}

impl FilterExpr {
    /// Create a new filter expression.
    pub fn new(field: impl Into<String>, operator: FilterOperator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// Create an equality filter.
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FilterOperator::Eq, value)
    }

    /// Create a contains filter.
    pub fn contains(field: impl Into<String>, value: Value) -> Self {
        Self::new(field, FilterOperator::Contains, value)
    }

    /// Create a prefix filter.
    pub fn begins_with(field: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::new(field, FilterOperator::BeginsWith, Value::String(prefix.into()))
    }

    pub fn exists(field: impl Into<String>) -> Self {
        Self::new(field, FilterOperator::Exists, Value::Null)
    }

    /// Evaluate against one record.
    pub fn matches(&self, record: &Record) -> bool {
        let actual = record.attribute(&self.field);
        match self.operator {
            FilterOperator::Exists => actual.is_some(),
            FilterOperator::NotExists => actual.is_none(),
            FilterOperator::Eq => actual.as_ref() == Some(&self.value),
            FilterOperator::Ne => actual.as_ref() != Some(&self.value),
            FilterOperator::Gt => compare(actual.as_ref(), &self.value) == Some(Ordering::Greater),
            FilterOperator::Lt => compare(actual.as_ref(), &self.value) == Some(Ordering::Less),
            FilterOperator::Gte => matches!(
                compare(actual.as_ref(), &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOperator::Lte => matches!(
                compare(actual.as_ref(), &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOperator::Contains => match (actual, &self.value) {
                (Some(Value::String(s)), Value::String(needle)) => s.contains(needle.as_str()),
                (Some(Value::Array(items)), needle) => items.contains(needle),
                _ => false,
            },
            FilterOperator::BeginsWith => match (actual, &self.value) {
                (Some(Value::String(s)), Value::String(prefix)) => s.starts_with(prefix.as_str()),
                _ => false,
            },
        }
    }
}

/// Order two JSON scalars of the same kind; mixed kinds do not compare.
fn compare(actual: Option<&Value>, expected: &Value) -> Option<Ordering> {
    match (actual?, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Boolean combination of filter expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Expr(FilterExpr),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Predicate::Expr(expr) => expr.matches(record),
            Predicate::And(parts) => parts.iter().all(|p| p.matches(record)),
            Predicate::Or(parts) => parts.iter().any(|p| p.matches(record)),
            Predicate::Not(inner) => !inner.matches(record),
        }
    }

    pub fn and(self, other: Predicate) -> Predicate {
        match self {
            Predicate::And(mut parts) => {
                parts.push(other);
                Predicate::And(parts)
            }
            first => Predicate::And(vec![first, other]),
        }
    }
}

impl From<FilterExpr> for Predicate {
    fn from(expr: FilterExpr) -> Self {
        Predicate::Expr(expr)
    }
}

/// Named filtered views that get their own cached list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListFilter {
    /// Contacts flagged `is_favorite = true`.
    Favorites,
}

impl ListFilter {
    pub const ALL: [ListFilter; 1] = [ListFilter::Favorites];

    /// Segment used in the cache key of the filtered list.
    pub fn name(self) -> &'static str {
        match self {
            ListFilter::Favorites => "favorites",
        }
    }

    pub fn predicate(self) -> Predicate {
        match self {
            ListFilter::Favorites => FilterExpr::eq("is_favorite", Value::Bool(true)).into(),
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{encode, AttributeMap, EntityType, Identity};
    use chrono::Utc;
    use serde_json::json;

    fn contact(attrs: Value) -> Record {
        let attributes: AttributeMap = serde_json::from_value(attrs).unwrap();
        Record::new(
            EntityType::Contact,
            encode(EntityType::Contact, &Identity::owned("u1", "c1")),
            attributes,
            Utc::now(),
        )
    }

    #[test]
    fn test_equality_and_existence() {
        let record = contact(json!({"is_favorite": true, "company": "Acme"}));
        assert!(FilterExpr::eq("is_favorite", json!(true)).matches(&record));
        assert!(!FilterExpr::eq("is_favorite", json!(false)).matches(&record));
        assert!(FilterExpr::exists("company").matches(&record));
        assert!(FilterExpr::new("phone", FilterOperator::NotExists, Value::Null).matches(&record));
        assert!(FilterExpr::new("phone", FilterOperator::Ne, json!("555")).matches(&record));
    }

    #[test]
    fn test_ordering_operators() {
        let record = contact(json!({"score": 7, "name": "m"}));
        assert!(FilterExpr::new("score", FilterOperator::Gt, json!(3)).matches(&record));
        assert!(FilterExpr::new("score", FilterOperator::Lte, json!(7)).matches(&record));
        assert!(!FilterExpr::new("score", FilterOperator::Lt, json!(7)).matches(&record));
        assert!(FilterExpr::new("name", FilterOperator::Gte, json!("a")).matches(&record));
        // Mixed kinds never compare.
        assert!(!FilterExpr::new("score", FilterOperator::Gt, json!("3")).matches(&record));
    }

    #[test]
    fn test_contains_and_prefix() {
        let record = contact(json!({"tags": ["work", "vip"], "email": "ada@example.com"}));
        assert!(FilterExpr::contains("tags", json!("vip")).matches(&record));
        assert!(FilterExpr::contains("email", json!("example")).matches(&record));
        assert!(FilterExpr::begins_with("email", "ada@").matches(&record));
        assert!(!FilterExpr::begins_with("tags", "w").matches(&record));
    }

    #[test]
    fn test_predicate_combinators() {
        let record = contact(json!({"is_favorite": true, "company": "Acme"}));
        let fav = Predicate::from(FilterExpr::eq("is_favorite", json!(true)));
        let other_co = Predicate::from(FilterExpr::eq("company", json!("Globex")));

        assert!(!fav.clone().and(other_co.clone()).matches(&record));
        assert!(Predicate::Or(vec![fav.clone(), other_co.clone()]).matches(&record));
        assert!(Predicate::Not(Box::new(other_co)).matches(&record));
    }

    #[test]
    fn test_list_filter_favorites() {
        let fav = contact(json!({"is_favorite": true}));
        let plain = contact(json!({"is_favorite": false}));
        assert!(ListFilter::Favorites.predicate().matches(&fav));
        assert!(!ListFilter::Favorites.predicate().matches(&plain));
        assert_eq!(ListFilter::from_name("favorites"), Some(ListFilter::Favorites));
    }
}
