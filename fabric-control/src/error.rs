//! Bridges [`fabric_metadata::MetadataError`] into [`CoordinatorError`].
//!
//! Neither type is local to this crate, so a blanket `From` impl would
//! violate the orphan rule; a small extension trait on `Result` gets the
//! same `?`-friendly ergonomics at every call site (`.await.fab()?`).

use fabric_core::error::CoordinatorError;
use fabric_metadata::MetadataError;

pub(crate) trait MetaResultExt<T> {
    fn fab(self) -> Result<T, CoordinatorError>;
}

impl<T> MetaResultExt<T> for Result<T, MetadataError> {
    fn fab(self) -> Result<T, CoordinatorError> {
        self.map_err(|e| match e {
            MetadataError::NotFound(s) => CoordinatorError::NotFound(s),
            MetadataError::Invalid(s) => CoordinatorError::InvalidInput(s),
            MetadataError::Database(e) => CoordinatorError::Database(e.to_string()),
            MetadataError::Cache(e) => CoordinatorError::Cache(e.to_string()),
        })
    }
}
