use thiserror::Error;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Datastore unavailable: {message}")]
    DatastoreUnavailable { message: String },

    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Invalid value for '{field}' ({value}): {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Experiment not found: {id}")]
    ExperimentNotFound { id: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Datastore,
    Configuration,
    Data,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl TelemetryError {
    pub fn datastore(message: impl Into<String>) -> Self {
        Self::DatastoreUnavailable {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::DatastoreUnavailable { .. } | Self::ApiError(_) => ErrorCategory::Datastore,
            Self::ConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. } => ErrorCategory::Configuration,
            Self::CsvError(_)
            | Self::SerializationError(_)
            | Self::ExperimentNotFound { .. }
            | Self::ProcessingError { .. } => ErrorCategory::Data,
            Self::IoError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        // 找不到實驗只是查詢結果為空
        if matches!(self, Self::ExperimentNotFound { .. }) {
            return ErrorSeverity::Low;
        }

        match self.category() {
            ErrorCategory::Datastore => ErrorSeverity::Medium,
            ErrorCategory::Configuration | ErrorCategory::Data => ErrorSeverity::High,
            ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::DatastoreUnavailable { .. } | Self::ApiError(_) => {
                "Check network access, the datastore base_url and the access token, then retry"
            }
            Self::ConfigError { .. }
            | Self::InvalidConfigValueError { .. }
            | Self::MissingConfigError { .. } => "Fix the configuration file or CLI flags",
            Self::ExperimentNotFound { .. } => "Run `list` to see the available experiment ids",
            Self::CsvError(_) | Self::SerializationError(_) | Self::ProcessingError { .. } => {
                "Inspect the source documents for unexpected field types"
            }
            Self::IoError(_) => "Check that the output directory exists and is writable",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            Self::DatastoreUnavailable { .. } | Self::ApiError(_) => {
                format!("Error loading datastore data: {}", self)
            }
            Self::ExperimentNotFound { id } => format!("No data found for experiment {}", id),
            other => other.to_string(),
        }
    }

    /// CLI 結束碼，任何錯誤都不為 0
    pub fn exit_code(&self) -> i32 {
        match self.severity() {
            ErrorSeverity::Low | ErrorSeverity::High => 1,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::Critical => 3,
        }
    }
}

pub type Result<T> = std::result::Result<T, TelemetryError>;
