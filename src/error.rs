//! Error types for the knowledge-base pipeline

use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::Stage;

/// Result type for knowledge-base operations
pub type Result<T> = std::result::Result<T, KbError>;

/// Knowledge-base errors
#[derive(Error, Debug)]
pub enum KbError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Missing companion file for {stage}: {what}")]
    MissingCompanion { stage: &'static str, what: String },

    #[error("Invalid dump fragment {path}: {reason}")]
    InvalidFragment { path: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] config_crate::ConfigError),

    #[error("Invalid identifier pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Failed to keep temporary file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

impl KbError {
    pub fn configuration(message: impl Into<String>) -> Self {
        KbError::Configuration(message.into())
    }

    /// Misuse detected before any I/O started
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            KbError::Configuration(_) | KbError::MissingCompanion { .. } | KbError::Pattern(_)
        )
    }
}

/// A failure that aborted a pipeline run, tagged with the stage it happened in
#[derive(Error, Debug)]
#[error("{stage} failed: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    /// Whether the final output had already received records
    pub partial_output: bool,
    /// Spool files left behind because cleanup is disabled
    pub kept_temp_files: Vec<PathBuf>,
    #[source]
    pub source: KbError,
}

impl PipelineError {
    pub fn new(stage: Stage, source: KbError) -> Self {
        Self {
            stage,
            partial_output: false,
            kept_temp_files: Vec::new(),
            source,
        }
    }

    pub fn with_partial_output(mut self, partial: bool) -> Self {
        self.partial_output = partial;
        self
    }

    pub fn with_kept_temp_files(mut self, files: Vec<PathBuf>) -> Self {
        self.kept_temp_files = files;
        self
    }

    /// Process exit status for this failure
    pub fn exit_code(&self) -> i32 {
        if self.source.is_configuration() {
            2
        } else {
            self.stage.exit_code()
        }
    }
}
