use thiserror::Error;

use crate::store::StoreError;

/// Failure kinds surfaced by the membership and reminder services.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Invalid: {0}")]
    Invalid(String),
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    /// Stable machine-readable code for API responses
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => "not_found",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::Forbidden(_) => "forbidden",
            ServiceError::Invalid(_) => "invalid",
            ServiceError::StorageUnavailable(_) => "storage_unavailable",
        }
    }

    /// Only storage outages are worth retrying as-is
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::StorageUnavailable(_))
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        if err.is_constraint_violation() {
            return ServiceError::Conflict(err.to_string());
        }
        match err {
            StoreError::NotFound(what) => ServiceError::NotFound(what),
            other => ServiceError::StorageUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_service_kinds() {
        let not_found: ServiceError = StoreError::NotFound("Space s1".to_string()).into();
        assert_eq!(not_found.kind(), "not_found");

        let outage: ServiceError = StoreError::Unavailable("lock poisoned".to_string()).into();
        assert_eq!(outage.kind(), "storage_unavailable");
        assert!(outage.is_retryable());

        let constraint = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE),
            Some("UNIQUE constraint failed: spaces.invite_code".to_string()),
        );
        let conflict: ServiceError = StoreError::Database(constraint).into();
        assert_eq!(conflict.kind(), "conflict");
        assert!(!conflict.is_retryable());
    }
}
