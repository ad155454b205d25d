use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScoreTallyError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Intake error: {0}")]
    Intake(#[from] IntakeError),

    #[error("Export error: {0}")]
    Export(#[from] ExportError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

/// Failures of a single extraction call.
///
/// Every variant is contained at the job level: the scheduler turns it into
/// an `Error` state on the job that produced it and keeps going.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("request timed out")]
    Timeout,

    #[error("{0}")]
    Transport(String),

    #[error("extraction service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("no response from AI")]
    EmptyResponse,

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("image unavailable: {0}")]
    Image(String),
}

impl GatewayError {
    /// Message attached to a failed job.
    pub fn job_message(&self) -> String {
        let message = self.to_string();
        if message.trim().is_empty() {
            "analysis failed".to_string()
        } else {
            message
        }
    }
}

#[derive(Error, Debug)]
pub enum IntakeError {
    #[error("Directory scan failed for '{path}': {source}")]
    ScanFailed {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Failed to read image '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("Failed to write CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("Failed to write export file '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ScoreTallyError>;
