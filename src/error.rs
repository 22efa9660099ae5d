use thiserror::Error;

/// Errors surfaced by the decomposition and synchronization scenarios.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConcurrencyError {
    #[error("Cannot multiply: left operand has {left_cols} columns but right operand has {right_rows} rows")]
    DimensionMismatch { left_cols: usize, right_rows: usize },

    #[error("Row {row} has {actual} columns, expected {expected}")]
    RaggedMatrix {
        row: usize,
        expected: usize,
        actual: usize,
    },

    #[error("At least one worker is required")]
    ZeroWorkers,

    #[error("Key {key} not found in any partition")]
    NotFound { key: String },

    #[error("Worker '{worker}' panicked: {message}")]
    WorkerPanicked { worker: String, message: String },

    #[error("Worker '{worker}' could not be started: {message}")]
    SpawnFailed { worker: String, message: String },

    #[error("Totals for '{scenario}' do not fit in a 64-bit value")]
    Overflow { scenario: String },

    #[error("Worker '{worker}' was interrupted before finishing")]
    Interrupted { worker: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Problems found while loading or validating a configuration file.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Failed to read {path}: {message}")]
    Io { path: String, message: String },

    #[error("Failed to parse configuration: {message}")]
    Parse { message: String },

    #[error("Invalid configuration: {}", problems.join("; "))]
    Invalid { problems: Vec<String> },
}

impl ConcurrencyError {
    pub fn not_found(key: impl ToString) -> Self {
        Self::NotFound {
            key: key.to_string(),
        }
    }

    pub fn worker_panicked(worker: impl Into<String>, message: impl Into<String>) -> Self {
        Self::WorkerPanicked {
            worker: worker.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(err: toml::de::Error) -> Self {
        ConfigError::Parse {
            message: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConcurrencyError>;
