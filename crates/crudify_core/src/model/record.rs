//! Record instance shared by every record type.
//!
//! # Invariants
//! - `id` is `None` until the persistence provider assigns one.
//! - `deleted` defaults to `false` and is the only soft-delete source of truth.
//! - Equality compares type, id, `deleted` and every field value; two records
//!   with the same id but different content are not equal.
//! - A reference stub carries only its identifier; its `deleted` flag and
//!   field values say nothing about the stored row.

use crate::model::value::Value;
use std::collections::BTreeMap;

/// Name of the identifier base field.
pub const ID_FIELD: &str = "id";
/// Name of the soft-delete base field.
pub const DELETED_FIELD: &str = "deleted";

/// Stored or to-be-stored instance of one record type.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    type_name: String,
    id: Option<i64>,
    deleted: bool,
    stub: bool,
    values: BTreeMap<String, Value>,
}

impl Record {
    /// Creates an empty, not yet persisted record.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            id: None,
            deleted: false,
            stub: false,
            values: BTreeMap::new(),
        }
    }

    /// Creates a reference stub that only carries an identifier.
    ///
    /// Used for relation input such as `{ "id": n }` and for relations left
    /// unresolved on load.
    pub fn reference(type_name: impl Into<String>, id: i64) -> Self {
        let mut record = Self::stored(type_name, id);
        record.stub = true;
        record
    }

    /// Creates an empty record for the stored row `id`.
    pub fn stored(type_name: impl Into<String>, id: i64) -> Self {
        let mut record = Self::new(type_name);
        record.id = Some(id);
        record
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn set_id(&mut self, id: Option<i64>) {
        self.id = id;
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn set_deleted(&mut self, deleted: bool) {
        self.deleted = deleted;
    }

    /// Marks this record as archived.
    pub fn soft_delete(&mut self) {
        self.deleted = true;
    }

    /// Clears the archive marker.
    pub fn restore(&mut self) {
        self.deleted = false;
    }

    pub fn is_active(&self) -> bool {
        !self.deleted
    }

    /// Whether this is an id-only reference whose row was not loaded.
    pub fn is_stub(&self) -> bool {
        self.stub
    }

    /// Returns a field value, `Value::Null` when unset.
    ///
    /// The base fields `id` and `deleted` are served from their dedicated
    /// slots.
    pub fn get(&self, field: &str) -> Value {
        match field {
            ID_FIELD => self.id.map_or(Value::Null, Value::Int),
            DELETED_FIELD => Value::Bool(self.deleted),
            _ => self.values.get(field).cloned().unwrap_or(Value::Null),
        }
    }

    /// Borrows a non-base field value.
    pub fn value(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Assigns a field value.
    ///
    /// Base fields only accept their own shape (`Int`/`Null` for `id`,
    /// `Bool` for `deleted`); anything else is ignored for them and reported
    /// as `false`.
    pub fn set(&mut self, field: &str, value: Value) -> bool {
        match field {
            ID_FIELD => match value {
                Value::Int(id) => {
                    self.id = Some(id);
                    true
                }
                Value::Null => {
                    self.id = None;
                    true
                }
                _ => false,
            },
            DELETED_FIELD => match value {
                Value::Bool(deleted) => {
                    self.deleted = deleted;
                    true
                }
                _ => false,
            },
            _ => {
                self.values.insert(field.to_string(), value);
                true
            }
        }
    }

    /// Builder-style variant of [`Record::set`] for non-base fields.
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set(field, value.into());
        self
    }

    /// Removes a non-base field value.
    pub fn unset(&mut self, field: &str) -> Option<Value> {
        self.values.remove(field)
    }

    /// Iterates non-base field values in name order.
    pub fn values(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Copies every non-null value of `other` onto `self`.
    ///
    /// Null never overwrites an existing value. The identifier and the
    /// `deleted` flag of `self` are kept.
    pub fn merge_non_null(&mut self, other: &Record) {
        for (name, value) in other.values() {
            if !value.is_null() {
                self.values.insert(name.to_string(), value.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Record;
    use crate::model::value::Value;

    #[test]
    fn new_record_is_active_without_id() {
        let record = Record::new("person");
        assert_eq!(record.id(), None);
        assert!(record.is_active());
        assert_eq!(record.get("id"), Value::Null);
        assert_eq!(record.get("deleted"), Value::Bool(false));
    }

    #[test]
    fn soft_delete_and_restore_flip_marker() {
        let mut record = Record::new("person");
        record.soft_delete();
        assert!(record.is_deleted());
        record.restore();
        assert!(record.is_active());
    }

    #[test]
    fn equality_covers_id_and_content() {
        let a = Record::stored("person", 1).with("name", "Ada");
        let b = Record::stored("person", 1).with("name", "Ada");
        let c = Record::stored("person", 1).with("name", "Grace");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(!a.is_stub());
        assert!(Record::reference("person", 1).is_stub());
    }

    #[test]
    fn base_fields_only_accept_their_shape() {
        let mut record = Record::new("person");
        assert!(record.set("id", Value::Int(7)));
        assert!(!record.set("id", Value::Text("7".to_string())));
        assert!(!record.set("deleted", Value::Int(1)));
        assert_eq!(record.id(), Some(7));
        assert!(record.value("id").is_none());
    }

    #[test]
    fn merge_non_null_never_overwrites_with_null() {
        let mut stored = Record::stored("person", 3)
            .with("name", "Ada")
            .with("age", 36);
        let patch = Record::new("person")
            .with("name", Value::Null)
            .with("age", 37);

        stored.merge_non_null(&patch);
        assert_eq!(stored.get("name"), Value::from("Ada"));
        assert_eq!(stored.get("age"), Value::Int(37));
        assert_eq!(stored.id(), Some(3));
    }
}
