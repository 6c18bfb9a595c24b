//! Per-request lookup pipeline.
//!
//! One inbound command runs end to end here: spawn the external worker
//! under a hard timeout, validate its structured result, enforce the size
//! policy, try a best-effort preview, upload the artifact, and reclaim the
//! file afterwards no matter how the request ended.

pub mod error;
pub mod pipeline;
pub mod preview;
pub mod result;
pub mod store;
pub mod worker;

pub use {
    error::{PipelineError, Result},
    pipeline::Pipeline,
    result::{AppArtifact, ArtifactKind, LookupOutcome, parse_lookup},
    store::ArtifactStore,
    worker::{WorkerRun, WorkerSpec, run_worker},
};
