use std::{path::PathBuf, sync::Arc};

use {
    anyhow::Context,
    clap::{Parser, ValueEnum},
    secrecy::Secret,
    tokio_util::sync::CancellationToken,
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    apkrelay_pipeline::{ArtifactStore, Pipeline},
    apkrelay_session::{MessageRouter, SessionHandle, SessionManager},
    apkrelay_transport::{Transport, console::ConsoleTransport},
};

#[derive(Parser)]
#[command(
    name = "apkrelay",
    about = "Chat relay that fetches app installers on demand"
)]
struct Cli {
    /// Log level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    /// Config file path (overrides standard discovery).
    #[arg(long, env = "APKRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Phone number for pairing (overrides the config value).
    #[arg(long, env = "APKRELAY_PHONE_NUMBER")]
    phone_number: Option<String>,

    /// Transport backend to run against.
    #[arg(long, value_enum, default_value = "console")]
    transport: TransportKind,
}

#[derive(Clone, Copy, ValueEnum)]
enum TransportKind {
    /// Development shell: stdin lines in, payload dumps out.
    Console,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli);

    let mut config = match &cli.config {
        Some(path) => apkrelay_config::load_config(path)?,
        None => apkrelay_config::discover_and_load(),
    };
    if let Some(phone) = cli.phone_number.clone() {
        config.phone_number = Some(Secret::new(phone));
    }

    let store = ArtifactStore::new(&config.downloads_dir);
    store.ensure_dir().await.with_context(|| {
        format!(
            "failed to create downloads dir {}",
            config.downloads_dir.display()
        )
    })?;

    let transport: Arc<dyn Transport> = match cli.transport {
        TransportKind::Console => Arc::new(ConsoleTransport::new()),
    };

    let session = Arc::new(SessionHandle::new());
    let pipeline = Arc::new(Pipeline::new(Arc::clone(&session), store, &config));
    let router = Arc::new(MessageRouter::new(Arc::clone(&session), pipeline, &config));
    let mut manager = SessionManager::new(transport, Arc::clone(&session), router, &config);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            interrupt.cancel();
        }
    });

    info!("starting session");
    manager.run(cancel).await?;
    // Reached on confirmed logout or interrupt; both exit clean.
    info!("session ended");
    Ok(())
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}
