//! Error taxonomy shared across the workspace.

use uuid::Uuid;

/// Main error type for conveyor
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Bad input: invalid cron expression, unknown job type, malformed payload
    #[error("Validation error: {0}")]
    Validation(String),

    /// Entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Attempted illegal state transition
    #[error("Invalid transition: job {job_id} is {status}, cannot {attempted}")]
    InvalidTransition {
        job_id: Uuid,
        status: String,
        attempted: String,
    },

    /// Database errors (SQLx wrapped)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Broker errors (connection, publish, consume)
    #[error("Broker error: {0}")]
    Broker(String),

    /// Status cache errors
    #[error("Cache error: {0}")]
    Cache(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with description
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl From<lapin::Error> for Error {
    fn from(error: lapin::Error) -> Self {
        Error::Broker(error.to_string())
    }
}

impl From<redis::RedisError> for Error {
    fn from(error: redis::RedisError) -> Self {
        Error::Cache(error.to_string())
    }
}

// Common error constructors
impl Error {
    /// Create a new validation error
    pub fn validation<T: Into<String>>(msg: T) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a new not found error
    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create a new configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        Error::Config(msg.into())
    }

    /// Create a new broker error
    pub fn broker<T: Into<String>>(msg: T) -> Self {
        Error::Broker(msg.into())
    }
}

impl Error {
    /// Get HTTP status code for error
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::InvalidTransition { .. } => 400,
            Error::NotFound(_) => 404,
            Error::Database(sqlx::Error::RowNotFound) => 404,
            Error::Database(_) => 500,
            Error::Broker(_) => 503,
            Error::Cache(_) => 500,
            Error::Config(_) => 500,
            Error::Serialization(_) => 500,
            Error::Io(_) => 500,
            Error::Other(_) => 500,
        }
    }

    /// Get error category for monitoring
    pub fn category(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::NotFound(_) => "not_found",
            Error::Database(_) => "database",
            Error::Broker(_) => "broker",
            Error::Cache(_) => "cache",
            Error::Config(_) => "config",
            Error::Serialization(_) => "serialization",
            Error::Io(_) => "io",
            Error::Other(_) => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::validation("bad cron").status_code(), 400);
        assert_eq!(Error::not_found("job").status_code(), 404);
        assert_eq!(Error::broker("down").status_code(), 503);

        let err = Error::InvalidTransition {
            job_id: Uuid::new_v4(),
            status: "completed".to_string(),
            attempted: "cancel".to_string(),
        };
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.category(), "invalid_transition");
    }

    #[test]
    fn test_error_display() {
        let err = Error::validation("invalid cron expression");
        assert!(err.to_string().contains("invalid cron expression"));
        assert_eq!(err.category(), "validation");
    }
}
