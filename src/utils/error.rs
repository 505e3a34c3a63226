use thiserror::Error;

#[derive(Error, Debug)]
pub enum DeployError {
    #[error("Bundle operation failed: {0}")]
    BundleError(#[from] zip::result::ZipError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error in '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Failed to render {artifact}: {message}")]
    TemplateError { artifact: String, message: String },

    #[error("Parse error in {artifact} at line {line}: {message}")]
    ParseError {
        artifact: String,
        line: usize,
        message: String,
    },

    #[error("Artifact already exists: {path}")]
    ArtifactExists { path: String },

    #[error("Consistency check failed with {} violation(s)", .violations.len())]
    ConsistencyError { violations: Vec<String> },

    #[error("Unsupported requirement line: {line}")]
    UnsupportedRequirement { line: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Io,
    Template,
    Consistency,
    Manifest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl DeployError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            DeployError::ConfigValidationError { .. }
            | DeployError::InvalidConfigValueError { .. }
            | DeployError::MissingConfigError { .. } => ErrorCategory::Configuration,
            DeployError::IoError(_)
            | DeployError::BundleError(_)
            | DeployError::SerializationError(_)
            | DeployError::ArtifactExists { .. } => ErrorCategory::Io,
            DeployError::TemplateError { .. } => ErrorCategory::Template,
            DeployError::ParseError { .. } | DeployError::ConsistencyError { .. } => {
                ErrorCategory::Consistency
            }
            DeployError::UnsupportedRequirement { .. } => ErrorCategory::Manifest,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            DeployError::ArtifactExists { .. } => ErrorSeverity::Medium,
            DeployError::IoError(_) | DeployError::BundleError(_) => ErrorSeverity::Medium,
            DeployError::TemplateError { .. } | DeployError::SerializationError(_) => {
                ErrorSeverity::Critical
            }
            _ => ErrorSeverity::High,
        }
    }

    /// Process exit code for this error, 0 is never returned.
    pub fn exit_code(&self) -> i32 {
        match self.severity() {
            ErrorSeverity::Low | ErrorSeverity::High => 1,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::Critical => 3,
        }
    }

    pub fn recovery_suggestion(&self) -> String {
        match self {
            DeployError::ConfigValidationError { field, .. } => {
                format!("Check the '{}' section of your deploy config", field)
            }
            DeployError::InvalidConfigValueError { field, .. } => {
                format!("Fix the value of '{}' and run again", field)
            }
            DeployError::MissingConfigError { field } => {
                format!("Add '{}' to your deploy config", field)
            }
            DeployError::ArtifactExists { .. } => {
                "Pass --force to overwrite, or render into an empty directory".to_string()
            }
            DeployError::IoError(_) | DeployError::BundleError(_) => {
                "Check that the paths exist and are writable".to_string()
            }
            DeployError::ParseError { artifact, .. } => {
                format!("Inspect {} for hand edits that broke its syntax", artifact)
            }
            DeployError::ConsistencyError { .. } => {
                "Re-render the artifacts from one config so they share the same names".to_string()
            }
            DeployError::UnsupportedRequirement { .. } => {
                "Use a flat 'pip freeze' output with name==version lines".to_string()
            }
            DeployError::TemplateError { .. } | DeployError::SerializationError(_) => {
                "This is a bug, please report it with the config that triggered it".to_string()
            }
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            DeployError::ConsistencyError { violations } => {
                let mut message = format!("{} consistency violation(s):", violations.len());
                for violation in violations {
                    message.push_str("\n  - ");
                    message.push_str(violation);
                }
                message
            }
            DeployError::IoError(e) => format!("File operation failed: {}", e),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;
