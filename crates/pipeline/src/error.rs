use thiserror::Error;

/// Failures the pipeline can report for one request. None of these escape
/// the request task; they are logged and turned into a notice for the
/// requester.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The worker exited non-zero.
    #[error("worker failed: {0}")]
    WorkerFailure(String),

    /// The worker exceeded its wall-clock budget and was terminated.
    #[error("worker timed out")]
    WorkerTimeout,

    /// Worker stdout did not parse as a lookup result.
    #[error("malformed worker output: {0}")]
    MalformedResult(String),

    /// The artifact file was not on disk when the upload started.
    #[error("artifact file missing: {0}")]
    ArtifactMissing(String),

    /// Reading the artifact from the store failed.
    #[error("artifact read failed")]
    ArtifactRead(#[source] std::io::Error),

    /// The document upload itself failed.
    #[error("upload failed: {0}")]
    Upload(#[source] apkrelay_transport::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
