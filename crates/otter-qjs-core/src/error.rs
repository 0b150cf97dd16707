//! Error types for bridge operations
//!
//! Engine exceptions are carried with their JavaScript error type, message
//! and stack so callers can report them without touching the engine again.
//! Plain type mismatches during marshalling are not errors at all (they
//! surface as `None`); `TypeError` is only produced where the caller asked
//! for a `Result`.

use thiserror::Error;

/// Result type alias for bridge operations
pub type QjsResult<T> = Result<T, QjsError>;

/// Structured error types for bridge operations
#[derive(Debug, Error)]
pub enum QjsError {
    /// Failed to create the engine runtime or context
    #[error("Context creation failed: {message}")]
    ContextCreation { message: String },

    /// JavaScript syntax error raised while compiling script text
    #[error("Syntax error: {message}")]
    SyntaxError {
        message: String,
        stack: Option<String>,
    },

    /// JavaScript runtime error (throw, TypeError, etc.)
    #[error("{error_type}: {message}")]
    ScriptError {
        error_type: String,
        message: String,
        stack: Option<String>,
    },

    /// Type conversion error
    #[error("Type error: expected {expected}, got {actual}")]
    TypeError { expected: String, actual: String },

    /// The handle's context has already been torn down
    #[error("Context is no longer alive")]
    NoContext,

    /// Evaluation was interrupted by the configured timeout
    #[error("Script execution timed out after {0}ms")]
    Timeout(u64),

    /// String cannot be handed to the engine
    #[error("String encoding error: {0}")]
    StringEncoding(String),

    /// A host function returned an error to script
    #[error("Host function error: {0}")]
    HostFunction(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Internal/unexpected error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl QjsError {
    /// Create a script error from error type and message
    pub fn script_error(error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ScriptError {
            error_type: error_type.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// Create a script error carrying a stack trace
    pub fn script_error_with_stack(
        error_type: impl Into<String>,
        message: impl Into<String>,
        stack: Option<String>,
    ) -> Self {
        Self::ScriptError {
            error_type: error_type.into(),
            message: message.into(),
            stack,
        }
    }

    /// Create a syntax error
    pub fn syntax_error(message: impl Into<String>) -> Self {
        Self::SyntaxError {
            message: message.into(),
            stack: None,
        }
    }

    /// Create a type error
    pub fn type_error(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::TypeError {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a context creation error
    pub fn context_creation(message: impl Into<String>) -> Self {
        Self::ContextCreation {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error came from script code
    pub fn is_script_error(&self) -> bool {
        matches!(
            self,
            Self::ScriptError { .. } | Self::SyntaxError { .. } | Self::Timeout(_)
        )
    }

    /// Get the stack trace if available
    pub fn stack_trace(&self) -> Option<&str> {
        match self {
            Self::ScriptError { stack, .. } | Self::SyntaxError { stack, .. } => stack.as_deref(),
            _ => None,
        }
    }

    /// Get the message without the error type prefix
    pub fn message(&self) -> String {
        match self {
            Self::ScriptError { message, .. } | Self::SyntaxError { message, .. } => {
                message.clone()
            }
            other => other.to_string(),
        }
    }

    /// Get the error type name (e.g., "TypeError", "ReferenceError")
    pub fn error_type(&self) -> &str {
        match self {
            Self::ScriptError { error_type, .. } => error_type,
            Self::SyntaxError { .. } => "SyntaxError",
            Self::TypeError { .. } => "TypeError",
            Self::ContextCreation { .. } => "ContextError",
            Self::NoContext => "ContextError",
            Self::Timeout(_) => "TimeoutError",
            Self::StringEncoding(_) => "EncodingError",
            Self::HostFunction(_) => "HostFunctionError",
            Self::JsonError(_) => "JsonError",
            Self::Internal(_) => "InternalError",
        }
    }
}
