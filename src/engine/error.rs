use thiserror::Error;
use ulid::Ulid;

use crate::model::TimeSpanKind;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid interval: start must be before end")]
    InvalidInterval,
    #[error("resource not found: {0}")]
    ResourceNotFound(Ulid),
    #[error("capacity {0} exceeded: all slots occupied")]
    CapacityExceeded(u32),
    #[error("not authorized")]
    NotAuthorized,
    #[error("only the owner or an administrator may modify timespan {0}")]
    Forbidden(Ulid),
    #[error("not found: {0}")]
    NotFound(Ulid),
    #[error("already exists: {0}")]
    AlreadyExists(Ulid),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("{0} is not an absence kind")]
    InvalidKind(TimeSpanKind),
    #[error("invalid patch: {0}")]
    InvalidPatch(&'static str),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl EngineError {
    /// Only a store outage is worth retrying; the retry re-runs admission.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::StoreUnavailable(_))
    }

    /// Low-cardinality label for metrics.
    pub fn reason_label(&self) -> &'static str {
        match self {
            EngineError::InvalidInterval => "invalid_interval",
            EngineError::ResourceNotFound(_) => "resource_not_found",
            EngineError::CapacityExceeded(_) => "capacity_exceeded",
            EngineError::NotAuthorized => "not_authorized",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::NotFound(_) => "not_found",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::InvalidKind(_) => "invalid_kind",
            EngineError::InvalidPatch(_) => "invalid_patch",
            EngineError::StoreUnavailable(_) => "store_unavailable",
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate(id) => EngineError::AlreadyExists(id),
            StoreError::Unavailable(msg) => EngineError::StoreUnavailable(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_store_outage_is_retryable() {
        assert!(EngineError::StoreUnavailable("timeout".into()).is_retryable());
        assert!(!EngineError::CapacityExceeded(1).is_retryable());
        assert!(!EngineError::NotAuthorized.is_retryable());
    }

    #[test]
    fn store_errors_convert() {
        let id = Ulid::new();
        assert!(matches!(
            EngineError::from(StoreError::Duplicate(id)),
            EngineError::AlreadyExists(x) if x == id
        ));
        assert!(EngineError::from(StoreError::Unavailable("disk".into())).is_retryable());
    }

    #[test]
    fn display_messages() {
        assert_eq!(EngineError::NotAuthorized.to_string(), "not authorized");
        assert_eq!(
            EngineError::CapacityExceeded(2).to_string(),
            "capacity 2 exceeded: all slots occupied"
        );
    }
}
