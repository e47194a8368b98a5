use std::error::Error;
use std::net::SocketAddr;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mailotp::config::{Cli, Command, RelayArgs, ServeArgs};
use mailotp::server::{build_relay_router, build_router, AppState, RelayState};
use mailotp::storage::code_store::CodeStore;
use mailotp::storage::overflow_log::OverflowLog;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&cli.log_filter))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Relay(args) => relay(args).await,
    }
}

async fn serve(args: ServeArgs) -> Result<(), Box<dyn Error>> {
    let store = CodeStore::new(args.store_config());
    let overflow = OverflowLog::new(args.overflow_config());
    tracing::info!(
        store = %store.path().display(),
        overflow = %overflow.path().display(),
        ttl_secs = store.ttl().num_seconds(),
        "Starting webhook service"
    );

    let app = build_router(AppState::new(store, overflow));
    run(args.bind, app).await
}

async fn relay(args: RelayArgs) -> Result<(), Box<dyn Error>> {
    let relay = RelayState::new(&args.relay_config())?;
    tracing::info!(target_url = %relay.target(), "Starting relay");

    run(args.bind, build_relay_router(relay)).await
}

async fn run(addr: SocketAddr, app: axum::Router) -> Result<(), Box<dyn Error>> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;
    Ok(())
}
