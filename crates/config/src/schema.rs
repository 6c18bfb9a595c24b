use std::path::PathBuf;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize, Serializer},
};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Phone number used for pairing, with country code. Prompted
    /// interactively when absent and pairing is required.
    #[serde(serialize_with = "serialize_secret_opt")]
    pub phone_number: Option<Secret<String>>,

    /// Directory the worker drops artifacts into.
    pub downloads_dir: PathBuf,

    /// Messages answered with the static welcome text, matched
    /// case-insensitively against the whole body.
    pub greetings: Vec<String>,

    pub worker: WorkerConfig,
    pub limits: LimitsConfig,
    pub reconnect: ReconnectConfig,
    pub attribution: AttributionConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            phone_number: None,
            downloads_dir: PathBuf::from("downloads"),
            greetings: vec!["hi".into(), "hello".into(), "hey".into(), "salaam".into()],
            worker: WorkerConfig::default(),
            limits: LimitsConfig::default(),
            reconnect: ReconnectConfig::default(),
            attribution: AttributionConfig::default(),
        }
    }
}

/// External lookup worker invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Interpreter or executable to run.
    pub program: String,
    /// Script passed as the first argument.
    pub script: PathBuf,
    /// Hard wall-clock budget for one lookup, in milliseconds.
    pub timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: "python3".into(),
            script: PathBuf::from("scraper.py"),
            timeout_ms: 120_000,
        }
    }
}

/// Artifact and preview limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Artifacts above this size are rejected without an upload attempt.
    pub max_artifact_mb: f64,
    /// Budget for fetching the preview image, in milliseconds.
    pub preview_timeout_ms: u64,
    /// Grace period before a consumed artifact is removed, in milliseconds.
    pub cleanup_delay_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_artifact_mb: 2048.0,
            preview_timeout_ms: 10_000,
            cleanup_delay_ms: 5_000,
        }
    }
}

/// Bounded-backoff reconnection schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Attempts before the schedule switches to the cooldown.
    pub max_attempts: u32,
    /// Per-attempt delay increment, in milliseconds.
    pub base_delay_ms: u64,
    /// Ceiling on the per-attempt delay, in milliseconds.
    pub cap_delay_ms: u64,
    /// Delay between retries once the attempt budget is exhausted.
    pub cooldown_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            base_delay_ms: 3_000,
            cap_delay_ms: 15_000,
            cooldown_ms: 30_000,
        }
    }
}

/// Operator attribution appended to user-facing messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributionConfig {
    pub name: String,
    pub instagram: String,
    pub contact: String,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            name: "apkrelay".into(),
            instagram: String::new(),
            contact: "@apkrelay".into(),
        }
    }
}

fn serialize_secret_opt<S>(secret: &Option<Secret<String>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match secret {
        Some(value) => serializer.serialize_some(value.expose_secret()),
        None => serializer.serialize_none(),
    }
}
