use anyhow::Context as _;
use clap::Parser;
use incident_core::config::SenseiConfig;
use incident_core::stream::{StopOutcome, DEFAULT_STOP_TIMEOUT};
use incident_server::api::{self, AppState};
use std::path::PathBuf;
use tracing::{info, warn};

/// Incident enrichment service: datadog webhook in, narrated incidents out.
#[derive(Parser)]
#[command(name = "incident-server", version)]
struct Args {
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8000")]
    bind: String,

    /// Served under /static; narration is written to its audio/ subdirectory
    #[arg(long, env = "STATIC_DIR", default_value = "app/static")]
    static_dir: PathBuf,

    /// Prefix for audio URLs handed to clients
    #[arg(long, env = "PUBLIC_BASE_URL", default_value = "http://localhost:8000")]
    public_base_url: String,

    /// Dashboard origins allowed by CORS
    #[arg(
        long = "cors-origin",
        default_values_t = [
            "http://localhost:5173".to_string(),
            "http://localhost:3000".to_string(),
        ]
    )]
    cors_origins: Vec<String>,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = SenseiConfig::from_env();
    let audio_dir = args.static_dir.join("audio");
    std::fs::create_dir_all(&audio_dir)
        .with_context(|| format!("create audio dir {}", audio_dir.display()))?;

    let components = incident_core::build(&config, &audio_dir, &args.public_base_url)
        .context("build pipeline")?;
    components.consumer.start();

    let state = AppState {
        app_name: config.app_name.clone(),
        pipeline: components.pipeline,
        store: components.store,
    };
    let app = api::router(state, &args.static_dir, &args.cors_origins);

    let listener = tokio::net::TcpListener::bind(&args.bind)
        .await
        .with_context(|| format!("bind {}", args.bind))?;
    info!(addr = %args.bind, app = %config.app_name, "incident-server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve")?;

    match components.consumer.stop(DEFAULT_STOP_TIMEOUT).await {
        StopOutcome::TimedOut => warn!("stream consumer shutdown timed out"),
        outcome => info!(?outcome, "stream consumer shut down"),
    }
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
