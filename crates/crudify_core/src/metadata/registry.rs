//! Process-wide record-type registry.

use crate::error::{CrudError, CrudResult};
use crate::metadata::descriptor::RecordMetadata;
use crate::metadata::MetadataError;
use log::info;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Immutable lookup of record metadata by type name.
///
/// Populate it at startup, then share it behind an `Arc`.
#[derive(Debug, Default)]
pub struct EntityRegistry {
    types: BTreeMap<String, Arc<RecordMetadata>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a record type. A type name can be registered once.
    pub fn register(&mut self, metadata: RecordMetadata) -> Result<Arc<RecordMetadata>, MetadataError> {
        let type_name = metadata.type_name().to_string();
        if self.types.contains_key(&type_name) {
            return Err(MetadataError::DuplicateType(type_name));
        }

        let metadata = Arc::new(metadata);
        info!(
            "event=metadata_register module=metadata status=ok type={} fields={} hooks={}",
            type_name,
            metadata.fields().len(),
            metadata.hooks().len()
        );
        self.types.insert(type_name, Arc::clone(&metadata));
        Ok(metadata)
    }

    /// Builder-style variant of [`EntityRegistry::register`].
    pub fn with(mut self, metadata: RecordMetadata) -> Result<Self, MetadataError> {
        self.register(metadata)?;
        Ok(self)
    }

    /// Returns the metadata of `type_name`.
    ///
    /// # Errors
    /// - `NotFound` when the type was never registered.
    pub fn describe(&self, type_name: &str) -> CrudResult<Arc<RecordMetadata>> {
        self.types.get(type_name).cloned().ok_or_else(|| {
            CrudError::not_found("Entity {} is not registered").with_arg(type_name)
        })
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.types.contains_key(type_name)
    }

    /// Registered types in name order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<RecordMetadata>> {
        self.types.values()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::EntityRegistry;
    use crate::error::ErrorKind;
    use crate::metadata::{FieldDescriptor, MetadataError, RecordMetadata};
    use std::sync::Arc;

    fn person() -> RecordMetadata {
        RecordMetadata::builder("person")
            .field(FieldDescriptor::text("name"))
            .build()
            .expect("person metadata should build")
    }

    #[test]
    fn describe_returns_shared_metadata() {
        let mut registry = EntityRegistry::new();
        let registered = registry.register(person()).expect("register person");
        let described = registry.describe("person").expect("describe person");
        assert!(Arc::ptr_eq(&registered, &described));
    }

    #[test]
    fn unknown_type_is_not_found() {
        let registry = EntityRegistry::new();
        let err = registry.describe("ghost").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.message().contains("ghost"));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let registry = EntityRegistry::new().with(person()).expect("first register");
        let err = registry.with(person()).unwrap_err();
        assert_eq!(err, MetadataError::DuplicateType("person".to_string()));
    }
}
