use std::fmt;

/// Application-specific error types for the risk engine.
///
/// Expected business outcomes (a failed payment, a missing funding source)
/// are data, not errors; these variants cover storage faults, collaborator
/// faults and genuinely invalid input.
#[derive(Debug)]
pub enum RiskError {
    /// Database-related errors.
    DatabaseError(sqlx::Error),
    /// Resource not found error.
    NotFound(String),
    /// Invalid input (bad state transition request, self-vouch, etc.).
    InvalidInput(String),
    /// Error interacting with the Payments Gateway or notifier.
    GatewayError(String),
    /// Internal error.
    InternalError(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<RiskError>,
        /// Additional context message.
        context: String,
    },
}

impl fmt::Display for RiskError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskError::DatabaseError(e) => write!(f, "Database error: {}", e),
            RiskError::NotFound(msg) => write!(f, "Not found: {}", msg),
            RiskError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            RiskError::GatewayError(msg) => write!(f, "Gateway error: {}", msg),
            RiskError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            RiskError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for RiskError {}

// Make RiskError cloneable for WithContext variant
impl Clone for RiskError {
    /// Clones the error.
    ///
    /// Note: `sqlx::Error` is not cloneable, so `DatabaseError` is simplified to `RowNotFound` during cloning.
    fn clone(&self) -> Self {
        match self {
            RiskError::DatabaseError(_e) => RiskError::DatabaseError(sqlx::Error::RowNotFound), // Simplified clone
            RiskError::NotFound(msg) => RiskError::NotFound(msg.clone()),
            RiskError::InvalidInput(msg) => RiskError::InvalidInput(msg.clone()),
            RiskError::GatewayError(msg) => RiskError::GatewayError(msg.clone()),
            RiskError::InternalError(msg) => RiskError::InternalError(msg.clone()),
            RiskError::WithContext { source, context } => RiskError::WithContext {
                source: source.clone(),
                context: context.clone(),
            },
        }
    }
}

impl From<sqlx::Error> for RiskError {
    /// Converts a `sqlx::Error` into a `RiskError`.
    fn from(err: sqlx::Error) -> Self {
        RiskError::DatabaseError(err)
    }
}

impl From<reqwest::Error> for RiskError {
    /// Converts a `reqwest::Error` into a `RiskError`.
    fn from(err: reqwest::Error) -> Self {
        RiskError::GatewayError(err.to_string())
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `RiskError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    ///
    /// # Arguments
    ///
    /// * `context` - The context message to add.
    fn context(self, context: impl Into<String>) -> Result<T, RiskError>;

    /// Add context lazily (only evaluated on error).
    ///
    /// # Arguments
    ///
    /// * `f` - A closure that produces the context message.
    #[allow(dead_code)]
    fn with_context<F>(self, f: F) -> Result<T, RiskError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, RiskError> {
    fn context(self, context: impl Into<String>) -> Result<T, RiskError> {
        self.map_err(|e| RiskError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, RiskError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| RiskError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}

/// Extension for sqlx::Error to add context
impl<T> ResultExt<T> for Result<T, sqlx::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, RiskError> {
        self.map_err(|e| RiskError::WithContext {
            source: Box::new(RiskError::DatabaseError(e)),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, RiskError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| RiskError::WithContext {
            source: Box::new(RiskError::DatabaseError(e)),
            context: f(),
        })
    }
}
