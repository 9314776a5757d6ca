use thiserror::Error;

/// Main error type for the Sweepline system
#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Training error: {0}")]
    Training(#[from] TrainingError),

    #[error("Evaluation error: {0}")]
    Evaluation(#[from] EvaluationError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Dataset loading errors
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Data source not found: {0}")]
    SourceNotFound(String),

    #[error("Column {column} not found in {path}")]
    ColumnNotFound { column: String, path: String },

    #[error("Null value in column {column} at row {row}")]
    NullValue { column: String, row: usize },

    #[error("Unsupported data format: {message}")]
    UnsupportedFormat { message: String },

    #[error("Invalid data format: {message}")]
    InvalidFormat { message: String },

    #[error("Data loading failed: {message}")]
    LoadingFailed { message: String },

    #[error("Data parsing error: {message}")]
    ParseError { message: String },
}

/// Trial ledger and study store errors
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Timed out after {waited_ms} ms waiting for lock {path}")]
    LockTimeout { path: String, waited_ms: u64 },

    #[error("Invalid ledger header in {path}: {header}")]
    InvalidHeader { path: String, header: String },

    #[error("Invalid ledger record at line {line}: {message}")]
    InvalidRecord { line: u64, message: String },

    #[error("Ledger write failed: {message}")]
    WriteFailed { message: String },

    #[error("Study store corrupted: {message}")]
    StudyCorruption { message: String },

    #[error("Unknown study trial: {number}")]
    UnknownStudyTrial { number: u64 },
}

/// Failures raised by the trainable-classifier capability
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrainingError {
    #[error("Trainer could not be launched: {message}")]
    Launch { message: String },

    #[error("Training failed: {message}")]
    Failed { message: String },

    #[error("Trainer exited with status {status}: {stderr}")]
    NonZeroExit { status: i32, stderr: String },

    #[error("Invalid trainer response: {message}")]
    InvalidResponse { message: String },
}

/// Failures computing validation metrics
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EvaluationError {
    #[error("Validation set is empty after restricting to training labels")]
    EmptyValidationSet,

    #[error("Prediction count mismatch: expected {expected}, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Label {label} is not among the model classes")]
    UnknownLabel { label: i64 },

    #[error("Model reported no classes")]
    NoClasses,
}

/// Result type alias for Sweepline operations
pub type SweepResult<T> = Result<T, SweepError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::SweepError::Validation(format!($($arg)*))
    };
}

/// Macro for creating internal errors
#[macro_export]
macro_rules! internal_error {
    ($($arg:tt)*) => {
        $crate::SweepError::Internal(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::SweepError::Config(format!($($arg)*))
    };
}
