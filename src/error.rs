use thiserror::Error;

/// Custom error types for the lab gateway
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Authentication errors
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Token has expired")]
    TokenExpired,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("No student profile for user {0}")]
    ProfileNotFound(i64),

    /// Presence store errors
    #[error("Student {0} not found")]
    StudentNotFound(i64),

    /// Messaging errors
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Invalid group name: {0}")]
    InvalidGroup(String),

    #[error("Failed to serialize message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Delivery to connection {0} failed")]
    Delivery(String),

    /// Outbox errors
    #[error("Event outbox is full")]
    QueueFull,

    #[error("Event outbox is closed")]
    QueueClosed,

    /// Configuration errors
    #[error("Failed to load roster: {0}")]
    RosterLoad(String),

    /// Generic errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results using GatewayError
pub type Result<T> = std::result::Result<T, GatewayError>;

impl GatewayError {
    /// Helper to create Internal errors with context
    pub fn internal(msg: impl Into<String>) -> Self {
        GatewayError::Internal(msg.into())
    }

    /// Helper to create Unauthorized errors
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        GatewayError::Unauthorized(msg.into())
    }

    /// Helper to create malformed message errors
    pub fn malformed(msg: impl Into<String>) -> Self {
        GatewayError::MalformedMessage(msg.into())
    }

    /// True for every error that rejects a connection attempt
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            GatewayError::MissingToken
                | GatewayError::TokenExpired
                | GatewayError::Unauthorized(_)
                | GatewayError::ProfileNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GatewayError::StudentNotFound(42);
        assert_eq!(err.to_string(), "Student 42 not found");

        let err = GatewayError::ProfileNotFound(7);
        assert_eq!(err.to_string(), "No student profile for user 7");
    }

    #[test]
    fn test_error_helpers() {
        let err = GatewayError::internal("Something went wrong");
        assert!(matches!(err, GatewayError::Internal(_)));

        let err = GatewayError::malformed("not json");
        assert!(matches!(err, GatewayError::MalformedMessage(_)));
    }

    #[test]
    fn test_auth_classification() {
        assert!(GatewayError::MissingToken.is_auth_error());
        assert!(GatewayError::TokenExpired.is_auth_error());
        assert!(GatewayError::unauthorized("bad signature").is_auth_error());
        assert!(GatewayError::ProfileNotFound(1).is_auth_error());
        assert!(!GatewayError::StudentNotFound(1).is_auth_error());
        assert!(!GatewayError::Timeout("snapshot".into()).is_auth_error());
    }

    #[test]
    fn test_serde_error_conversion() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("not json");
        let err: GatewayError = parse.unwrap_err().into();
        assert!(matches!(err, GatewayError::Serialization(_)));
    }
}
