use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use keygate::{
    router, AdmissionGate, AppState, CapabilityRegistry, GatePolicy, GatewayConfig,
    JsonFileKeyStore, PhrasePicker, PostalCodeLookup, VideoLinkResolver,
};

/// Metered HTTP gateway guarded by API keys.
#[derive(Debug, Parser)]
#[command(name = "keygate", version, about)]
struct Args {
    /// TOML config file. Defaults apply when omitted.
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,
    /// Listen address, overriding the config file.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("keygate=info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => GatewayConfig::load(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(bind) = args.bind {
        config = config.bind(bind);
        config.validate()?;
    }

    let store = JsonFileKeyStore::new(&config.keys_path).with_timeout(config.storage_timeout());
    let gate = AdmissionGate::new(store).with_handler_timeout(config.handler_timeout());

    let capabilities = CapabilityRegistry::new()
        .with(PhrasePicker::new(&config.phrases_path))
        .with(PostalCodeLookup::new(&config.postal.base_url, config.handler_timeout())?)
        .with(VideoLinkResolver::new(&config.video.program, &config.video.format))
        .with_alias("frases", "phrases");

    let app = router(
        AppState::new(gate, capabilities),
        GatePolicy::new(config.open_paths.iter().cloned()),
    );

    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        addr = %listener.local_addr()?,
        keys = %config.keys_path.display(),
        "keygate listening"
    );

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    info!("keygate stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // No signal handler; run until killed.
        std::future::pending::<()>().await;
    }
}
