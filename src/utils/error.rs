use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Zip operation failed: {0}")]
    ZipError(#[from] zip::result::ZipError),

    #[error("CSV processing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid glob pattern: {0}")]
    GlobError(#[from] glob::PatternError),

    #[error("Configuration error in '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required setting: {field}")]
    MissingConfigError { field: String },

    #[error("No files match pattern '{pattern}'")]
    NoMatchingFiles { pattern: String },

    #[error("Invalid CmdStan output {path} (line {line}): {message}")]
    OutputParseError {
        path: String,
        line: usize,
        message: String,
    },

    #[error("Invalid R dump data for '{variable}': {message}")]
    RdumpError { variable: String, message: String },

    #[error("Shape error for '{variable}': {message}")]
    ShapeError { variable: String, message: String },

    #[error("Data processing error: {message}")]
    ProcessingError { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Input,
    Data,
    Output,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl ConvertError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            ConvertError::ConfigValidationError { .. }
            | ConvertError::InvalidConfigValueError { .. }
            | ConvertError::MissingConfigError { .. }
            | ConvertError::GlobError(_) => ErrorCategory::Configuration,
            ConvertError::NoMatchingFiles { .. }
            | ConvertError::OutputParseError { .. }
            | ConvertError::RdumpError { .. }
            | ConvertError::CsvError(_) => ErrorCategory::Input,
            ConvertError::ShapeError { .. } | ConvertError::ProcessingError { .. } => {
                ErrorCategory::Data
            }
            ConvertError::ZipError(_) | ConvertError::SerializationError(_) => {
                ErrorCategory::Output
            }
            ConvertError::IoError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Configuration | ErrorCategory::Input | ErrorCategory::Data => {
                ErrorSeverity::High
            }
            ErrorCategory::Output => ErrorSeverity::Medium,
            ErrorCategory::System => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            ConvertError::NoMatchingFiles { pattern } => {
                format!("Check that the pattern '{}' points at existing CmdStan CSV files", pattern)
            }
            ConvertError::MissingConfigError { field } => {
                format!("Provide a value for '{}' on the command line or in the job file", field)
            }
            ConvertError::InvalidConfigValueError { field, .. }
            | ConvertError::ConfigValidationError { field, .. } => {
                format!("Fix the '{}' setting and run again", field)
            }
            ConvertError::OutputParseError { path, .. } => format!(
                "Make sure '{}' is an unmodified CmdStan output file (or chains concatenated with cat)",
                path
            ),
            ConvertError::RdumpError { .. } => {
                "Check the observed data file is in R dump format (name <- value)".to_string()
            }
            ConvertError::ShapeError { .. } => {
                "Check that dims and coords match the variable shapes".to_string()
            }
            ConvertError::IoError(_) => {
                "Check file permissions and that the output directory is writable".to_string()
            }
            _ => "Re-run with --verbose for more details".to_string(),
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self.category() {
            ErrorCategory::Configuration => format!("Configuration problem: {}", self),
            ErrorCategory::Input => format!("Could not read input: {}", self),
            ErrorCategory::Data => format!("Could not convert data: {}", self),
            ErrorCategory::Output => format!("Could not write output: {}", self),
            ErrorCategory::System => format!("System error: {}", self),
        }
    }

    pub(crate) fn parse(path: &str, line: usize, message: impl Into<String>) -> Self {
        ConvertError::OutputParseError {
            path: path.to_string(),
            line,
            message: message.into(),
        }
    }

    pub(crate) fn shape(variable: &str, message: impl Into<String>) -> Self {
        ConvertError::ShapeError {
            variable: variable.to_string(),
            message: message.into(),
        }
    }
}

impl ErrorSeverity {
    /// Process exit status for a failed run. Every failure exits non-zero.
    pub fn exit_code(self) -> i32 {
        match self {
            ErrorSeverity::Low | ErrorSeverity::High => 1,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::Critical => 3,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConvertError>;
