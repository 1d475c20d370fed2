use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("webhook signature: {0}")]
    WebhookSignature(String),

    /// Remote resource does not exist (or belongs to another environment).
    #[error("not found: {0}")]
    NotFound(String),

    /// Timeout, 5xx, rate limiting. The sender should redeliver.
    #[error("transient: {0}")]
    Transient(String),

    /// Gateway answered with a shape or status we do not recognise.
    #[error("gateway decode: {0}")]
    GatewayDecode(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("lock unavailable: {0}")]
    LockUnavailable(String),

    #[error("configuration: {0}")]
    Configuration(String),
}

impl PipelineError {
    /// Whether the caller should ask the sender to redeliver.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transient(_) | Self::Database(_) | Self::LockUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_infrastructure_failures_are_retryable() {
        assert!(PipelineError::Transient("timeout".into()).is_retryable());
        assert!(PipelineError::LockUnavailable("x".into()).is_retryable());
        assert!(!PipelineError::NotFound("123".into()).is_retryable());
        assert!(!PipelineError::InvalidTransition("a → b".into()).is_retryable());
        assert!(!PipelineError::GatewayDecode("bad".into()).is_retryable());
        assert!(!PipelineError::Validation("empty".into()).is_retryable());
    }
}
