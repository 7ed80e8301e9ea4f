use elset_protocol::ParseError;
use elset_types::prelude::CatalogId;
use serde::Serialize;
use std::fmt;

/// Stable error tags reported to callers
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    NotFoundInStore,
    SourceUnavailable,
    InvalidFormat,
    PropagationFailure,
    TooManySteps,
    InvalidStepConfig,
    StorageFailure,
    InvalidRequest,
    Abandoned,
    WorkerFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        use ErrorKind::*;
        match self {
            NotFoundInStore => "not-found-in-store",
            SourceUnavailable => "source-unavailable",
            InvalidFormat => "invalid-format",
            PropagationFailure => "propagation-failure",
            TooManySteps => "too-many-steps",
            InvalidStepConfig => "invalid-step-config",
            StorageFailure => "storage-failure",
            InvalidRequest => "invalid-request",
            Abandoned => "abandoned",
            WorkerFailure => "worker-failure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the core can fail with.
///
/// Cloneable so that a single in-flight fetch can hand the same outcome to
/// every caller waiting on it.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("No element set for object {0} in the store")]
    NotFoundInStore(CatalogId),
    #[error("Element set source unavailable for object {object_id}: {reason}")]
    SourceUnavailable { object_id: CatalogId, reason: String },
    #[error("Element set group '{group}' unavailable: {reason}")]
    GroupUnavailable { group: String, reason: String },
    #[error("Invalid element set format: {0}")]
    InvalidFormat(String),
    #[error("Propagation failed for object {object_id}: {reason}")]
    PropagationFailure { object_id: CatalogId, reason: String },
    #[error("Requested {steps} steps, the limit is {max_steps}; raise the step or shorten the duration")]
    TooManySteps { steps: u64, max_steps: u64 },
    #[error("Invalid step configuration: duration {duration_sec}s, step {step_sec}s; {reason}")]
    InvalidStepConfig {
        duration_sec: i64,
        step_sec: i64,
        reason: &'static str,
    },
    #[error("Storage failure: {0}")]
    StorageFailure(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Work for object {0} was abandoned at the batch deadline")]
    Abandoned(CatalogId),
    #[error("Batch worker for object {object_id} failed: {reason}")]
    WorkerFailure { object_id: CatalogId, reason: String },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        use Error::*;
        match self {
            NotFoundInStore(_) => ErrorKind::NotFoundInStore,
            SourceUnavailable { .. } | GroupUnavailable { .. } => ErrorKind::SourceUnavailable,
            InvalidFormat(_) => ErrorKind::InvalidFormat,
            PropagationFailure { .. } => ErrorKind::PropagationFailure,
            TooManySteps { .. } => ErrorKind::TooManySteps,
            InvalidStepConfig { .. } => ErrorKind::InvalidStepConfig,
            StorageFailure(_) => ErrorKind::StorageFailure,
            InvalidRequest(_) => ErrorKind::InvalidRequest,
            Abandoned(_) => ErrorKind::Abandoned,
            WorkerFailure { .. } => ErrorKind::WorkerFailure,
        }
    }

    /// Fetch failures that may be papered over with a stale stored value
    pub fn is_fetch_failure(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::SourceUnavailable | ErrorKind::InvalidFormat
        )
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::InvalidFormat(e.to_string())
    }
}

/// Parse a caller-supplied catalog number
pub fn parse_object_id(s: &str) -> Result<CatalogId, Error> {
    match s.trim().parse::<CatalogId>() {
        Ok(0) | Err(_) => Err(Error::InvalidRequest(format!(
            "object id must be a positive integer, got '{}'",
            elset_protocol::snippet(s, 16)
        ))),
        Ok(id) => Ok(id),
    }
}
