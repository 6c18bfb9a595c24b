//! Configuration schema and loader for the relay.

pub mod loader;
pub mod schema;

pub use {
    loader::{config_dir, discover_and_load, load_config},
    schema::{AttributionConfig, LimitsConfig, ReconnectConfig, RelayConfig, WorkerConfig},
};
