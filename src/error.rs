//! Error types shared across the evaluator.

/// Errors surfaced by the tensor evaluator and its backend facade.
#[derive(Debug, Clone)]
pub enum EvalError {
    /// Invalid parameter or shape configuration
    InvalidParams(String),
    /// Ciphertext and plaintext levels don't match
    LevelMismatch { expected: usize, actual: usize },
    /// Remaining multiplicative budget exhausted
    LevelExhausted { needed: usize, remaining: usize },
    /// Rotation invoked without its automorphism key loaded
    MissingRotationKey(i32),
    /// Summation keys not loaded
    MissingSumKeys,
    /// Required key material not attached to the context
    MissingKey(&'static str),
    /// Weight or dataset file problem
    Io(String),
    /// Malformed serialized key or ciphertext
    Deserialize(String),
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EvalError::InvalidParams(msg) => write!(f, "Invalid parameters: {}", msg),
            EvalError::LevelMismatch { expected, actual } => {
                write!(f, "Level mismatch: expected {}, got {}", expected, actual)
            }
            EvalError::LevelExhausted { needed, remaining } => {
                write!(f, "Level budget exhausted: need {}, {} remaining", needed, remaining)
            }
            EvalError::MissingRotationKey(k) => {
                write!(f, "Rotation key for offset {} not loaded", k)
            }
            EvalError::MissingSumKeys => write!(f, "Summation keys not loaded"),
            EvalError::MissingKey(which) => write!(f, "{} not attached to context", which),
            EvalError::Io(msg) => write!(f, "IO error: {}", msg),
            EvalError::Deserialize(msg) => write!(f, "Deserialization error: {}", msg),
        }
    }
}

impl std::error::Error for EvalError {}

impl From<std::io::Error> for EvalError {
    fn from(e: std::io::Error) -> Self {
        EvalError::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EvalError>;
