use thiserror::Error;

pub type Result<T> = std::result::Result<T, InterpretError>;

/// Failures raised while turning a request into a response.
///
/// Every variant is scoped to the request that produced it.
#[derive(Debug, Error)]
pub enum InterpretError {
    /// A snippet failed to parse or raised at runtime.
    #[error("evaluation failed for `{code}`: {message}")]
    Evaluation { code: String, message: String },

    /// A command descriptor is missing a required field or has the wrong shape.
    #[error("malformed {command} descriptor: {message}")]
    MalformedTemplate { command: String, message: String },

    /// A response or data file does not exist.
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// A file exists but could not be read.
    #[error("failed to read {path}: {message}")]
    Read { path: String, message: String },

    /// No candidate rule matched the request.
    #[error("no rule matched {method} {path}")]
    UnresolvedRule { method: String, path: String },
}

impl InterpretError {
    pub fn evaluation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Evaluation {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn malformed(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedTemplate {
            command: command.into(),
            message: message.into(),
        }
    }

    /// True for failures that map to a plain "not found" response.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::FileNotFound(_) | Self::UnresolvedRule { .. })
    }
}

/// Failures raised while loading a service definition.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service definition must be a JSON object")]
    NotAnObject,

    #[error("route {path}: methods must be declared in an object")]
    InvalidRoute { path: String },

    #[error("route {path} {method}: {message}")]
    InvalidRule {
        path: String,
        method: String,
        message: String,
    },

    #[error("invalid service JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Source(#[from] InterpretError),
}
