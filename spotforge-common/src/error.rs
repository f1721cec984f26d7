//! Common error types for spotforge
//!
//! One error enum shared by every stage of the pipeline. Each variant maps
//! to a wire-level kind string (persisted on jobs and productions) and to a
//! retryability class that the job queue consults when deciding whether a
//! failed job rejoins its queue.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Common result type for spotforge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds across the production pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// Rejected input (bad request, malformed blueprint JSON, out-of-range setting)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Provider rejected our credentials
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Provider quota exhausted (HTTP 429 and friends)
    #[error("Quota exhausted: {0}")]
    Quota(String),

    /// A provider call or stage exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Provider-side failure expected to clear on retry
    #[error("Transient provider error: {0}")]
    TransientProvider(String),

    /// Music analysis could not produce a downbeat grid
    #[error("Music analysis failed: {0}")]
    AnalysisFailed(String),

    /// No voice entry point satisfies the post-roll constraint
    #[error("Alignment infeasible: {0}")]
    AlignmentInfeasible(String),

    /// Requested time-scale ratio falls outside the natural-sounding clamp
    #[error("Time scaling refused: {0}")]
    ScalingRefused(String),

    /// Loudness measurement failed; the first mix is kept as-is
    #[error("Loudness measurement failed: {0}")]
    LoudnessMeasureFailed(String),

    /// A stage timed out twice in a row; retrying further is pointless
    #[error("Stage stuck: {0}")]
    StageStuck(String),

    /// A required secret or setting is absent from the environment
    #[error("Missing configuration: {0}")]
    ConfigMissing(String),

    /// TTS character alignment is shorter than the script text
    #[error("Alignment mismatch: {0}")]
    AlignmentMismatch(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable kind tags, persisted on jobs and productions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    Auth,
    Quota,
    Timeout,
    TransientProvider,
    AnalysisFailed,
    AlignmentInfeasible,
    ScalingRefused,
    LoudnessMeasureFailed,
    StageStuck,
    ConfigMissing,
    AlignmentMismatch,
    NotFound,
    Database,
    Io,
    Serde,
    Internal,
}

impl ErrorKind {
    /// Canonical tag string, used in job rows and status output
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::Auth => "AUTH",
            ErrorKind::Quota => "QUOTA",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::TransientProvider => "TRANSIENT_PROVIDER",
            ErrorKind::AnalysisFailed => "ANALYSIS_FAILED",
            ErrorKind::AlignmentInfeasible => "ALIGNMENT_INFEASIBLE",
            ErrorKind::ScalingRefused => "SCALING_REFUSED",
            ErrorKind::LoudnessMeasureFailed => "LOUDNESS_MEASURE_FAILED",
            ErrorKind::StageStuck => "STAGE_STUCK",
            ErrorKind::ConfigMissing => "CONFIG_MISSING",
            ErrorKind::AlignmentMismatch => "ALIGNMENT_MISMATCH",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Database => "DATABASE",
            ErrorKind::Io => "IO",
            ErrorKind::Serde => "SERDE",
            ErrorKind::Internal => "INTERNAL",
        }
    }

    /// Parse a persisted tag back into a kind
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "VALIDATION" => Some(ErrorKind::Validation),
            "AUTH" => Some(ErrorKind::Auth),
            "QUOTA" => Some(ErrorKind::Quota),
            "TIMEOUT" => Some(ErrorKind::Timeout),
            "TRANSIENT_PROVIDER" => Some(ErrorKind::TransientProvider),
            "ANALYSIS_FAILED" => Some(ErrorKind::AnalysisFailed),
            "ALIGNMENT_INFEASIBLE" => Some(ErrorKind::AlignmentInfeasible),
            "SCALING_REFUSED" => Some(ErrorKind::ScalingRefused),
            "LOUDNESS_MEASURE_FAILED" => Some(ErrorKind::LoudnessMeasureFailed),
            "STAGE_STUCK" => Some(ErrorKind::StageStuck),
            "CONFIG_MISSING" => Some(ErrorKind::ConfigMissing),
            "ALIGNMENT_MISMATCH" => Some(ErrorKind::AlignmentMismatch),
            "NOT_FOUND" => Some(ErrorKind::NotFound),
            "DATABASE" => Some(ErrorKind::Database),
            "IO" => Some(ErrorKind::Io),
            "SERDE" => Some(ErrorKind::Serde),
            "INTERNAL" => Some(ErrorKind::Internal),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Error {
    /// The persisted kind tag for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Auth(_) => ErrorKind::Auth,
            Error::Quota(_) => ErrorKind::Quota,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::TransientProvider(_) => ErrorKind::TransientProvider,
            Error::AnalysisFailed(_) => ErrorKind::AnalysisFailed,
            Error::AlignmentInfeasible(_) => ErrorKind::AlignmentInfeasible,
            Error::ScalingRefused(_) => ErrorKind::ScalingRefused,
            Error::LoudnessMeasureFailed(_) => ErrorKind::LoudnessMeasureFailed,
            Error::StageStuck(_) => ErrorKind::StageStuck,
            Error::ConfigMissing(_) => ErrorKind::ConfigMissing,
            Error::AlignmentMismatch(_) => ErrorKind::AlignmentMismatch,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Database(_) => ErrorKind::Database,
            Error::Io(_) => ErrorKind::Io,
            Error::Serde(_) => ErrorKind::Serde,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the queue may re-enqueue a job that failed with this error.
    ///
    /// Timeouts and transient provider or infrastructure failures retry;
    /// everything else fails the job immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Timeout(_)
                | Error::TransientProvider(_)
                | Error::Database(_)
                | Error::Io(_)
        )
    }

    /// Whether this error forces the whole production into FAILED
    /// (as opposed to a stage-local graceful degradation).
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Auth(_) | Error::StageStuck(_) | Error::ConfigMissing(_)
        )
    }
}
