use std::{path::PathBuf, process::Stdio, time::Duration};

use {
    tokio::process::Command,
    tracing::{debug, warn},
};

use apkrelay_config::WorkerConfig;

/// Invocation parameters for the external lookup worker.
#[derive(Debug, Clone)]
pub struct WorkerSpec {
    pub program: String,
    pub script: PathBuf,
    pub timeout: Duration,
}

impl WorkerSpec {
    #[must_use]
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            program: config.program.clone(),
            script: config.script.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }
}

/// Outcome of one worker invocation.
#[derive(Debug)]
pub enum WorkerRun {
    /// Exit 0; stdout carries the structured result.
    Success { stdout: String },
    /// The budget elapsed; the process was terminated.
    Timeout,
    /// Non-zero exit or spawn failure.
    Failure { message: String },
}

/// Run the worker for one query under a hard wall-clock budget.
pub async fn run_worker(spec: &WorkerSpec, query: &str) -> WorkerRun {
    debug!(
        query,
        timeout_ms = spec.timeout.as_millis() as u64,
        "spawning lookup worker"
    );

    let mut cmd = Command::new(&spec.program);
    cmd.arg(&spec.script)
        .arg(query)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        // The timeout path drops the child; that drop must kill it.
        .kill_on_drop(true);

    let child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            return WorkerRun::Failure {
                message: format!("failed to spawn worker: {e}"),
            };
        },
    };

    match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            if !stderr.is_empty() {
                // The worker narrates progress on stderr.
                debug!(stderr, "worker stderr");
            }
            if !output.status.success() {
                let message = if stderr.is_empty() {
                    "worker failed".to_string()
                } else {
                    stderr.to_string()
                };
                return WorkerRun::Failure { message };
            }
            WorkerRun::Success {
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            }
        },
        Ok(Err(e)) => WorkerRun::Failure {
            message: format!("failed to run worker: {e}"),
        },
        Err(_) => {
            warn!(query, "worker timed out, terminating");
            WorkerRun::Timeout
        },
    }
}
