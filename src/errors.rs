use std::fmt;
use std::path::PathBuf;

/// Stage of the `process()` pipeline, used to report where a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Setup,
    Extract,
    Send,
    Sweep,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Setup => "setup",
            PipelineStage::Extract => "extract",
            PipelineStage::Send => "send",
            PipelineStage::Sweep => "sweep",
        };
        f.write_str(name)
    }
}

/// Application-specific error types.
#[derive(Debug)]
pub enum AppError {
    /// Malformed or missing configuration.
    Configuration(String),
    /// Missing, invalid or expired credential.
    Credential {
        /// Which credential (ad platform or CRM).
        which: &'static str,
        /// What went wrong.
        message: String,
    },
    /// Transport or auth failure while extracting leads.
    Extraction(String),
    /// A single lead could not be written to the CRM.
    Delivery {
        /// Identifier of the lead that failed.
        lead_id: String,
        /// What went wrong.
        message: String,
    },
    /// A staging file could not be deleted.
    Retention {
        /// Path of the file that survived the sweep.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },
    /// Unrecognized cadence or unusable schedule.
    Scheduling(String),
    /// Staging file missing, unreadable or not publishable.
    Staging {
        /// Affected staging path.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },
    /// Error interacting with an external API.
    ExternalApi(String),
    /// File system error.
    Io(std::io::Error),
    /// JSON encoding or decoding error.
    Serialization(serde_json::Error),
    /// A `process()` stage failed; carries partial counts when there are any.
    Pipeline {
        /// Stage that failed.
        stage: PipelineStage,
        /// Leads extracted before the failure, if extraction completed.
        extracted: Option<usize>,
        /// The underlying error.
        source: Box<AppError>,
    },
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Credential { which, message } => {
                write!(f, "Credential error ({}): {}", which, message)
            }
            AppError::Extraction(msg) => write!(f, "Extraction error: {}", msg),
            AppError::Delivery { lead_id, message } => {
                write!(f, "Delivery error for lead {}: {}", lead_id, message)
            }
            AppError::Retention { path, message } => {
                write!(f, "Retention error for {}: {}", path.display(), message)
            }
            AppError::Scheduling(msg) => write!(f, "Scheduling error: {}", msg),
            AppError::Staging { path, message } => {
                write!(f, "Staging error for {}: {}", path.display(), message)
            }
            AppError::ExternalApi(msg) => write!(f, "External API error: {}", msg),
            AppError::Io(e) => write!(f, "I/O error: {}", e),
            AppError::Serialization(e) => write!(f, "Serialization error: {}", e),
            AppError::Pipeline {
                stage,
                extracted,
                source,
            } => match extracted {
                Some(count) => write!(
                    f,
                    "Pipeline failed at {} stage ({} leads extracted): {}",
                    stage, count, source
                ),
                None => write!(f, "Pipeline failed at {} stage: {}", stage, source),
            },
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Io(e) => Some(e),
            AppError::Serialization(e) => Some(e),
            AppError::Pipeline { source, .. } | AppError::WithContext { source, .. } => {
                Some(source.as_ref())
            }
            _ => None,
        }
    }
}

impl AppError {
    /// Shorthand for a credential error.
    pub fn credential(which: &'static str, message: impl Into<String>) -> Self {
        AppError::Credential {
            which,
            message: message.into(),
        }
    }

    /// Shorthand for a staging error.
    pub fn staging(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        AppError::Staging {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Wraps `self` as a failure of the given pipeline stage.
    pub fn at_stage(self, stage: PipelineStage, extracted: Option<usize>) -> Self {
        AppError::Pipeline {
            stage,
            extracted,
            source: Box::new(self),
        }
    }

    /// Returns the pipeline stage this error was reported at, if any.
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            AppError::Pipeline { stage, .. } => Some(*stage),
            AppError::WithContext { source, .. } => source.stage(),
            _ => None,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err)
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::ExternalApi(err.to_string())
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;

    /// Add context lazily (only evaluated on error).
    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: f(),
        })
    }
}

/// Extension for std::io::Error to add context
impl<T> ResultExt<T> for Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::Io(e)),
            context: context.into(),
        })
    }

    fn with_context<F>(self, f: F) -> Result<T, AppError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(AppError::Io(e)),
            context: f(),
        })
    }
}
