use thiserror::Error;

/// Errors from store operations (used by trait definitions in agentloom-core).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("storage error: {0}")]
    Storage(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let err = StoreError::Conflict("version mismatch".to_string());
        assert_eq!(err.to_string(), "conflict: version mismatch");
        assert_eq!(StoreError::NotFound.to_string(), "entity not found");
    }
}
