use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use nx_domain::config::Config;
use nx_gateway::api;
use nx_gateway::runtime::channels::ChannelDispatcher;
use nx_gateway::runtime::cron::{seed_default_job, CronScheduler};
use nx_gateway::runtime::Engine;
use nx_gateway::state::{AppState, AuthMode};
use nx_store::StateStore;
use nx_tools::{ToolConfig, ToolRegistry};

#[derive(Parser)]
#[command(name = "nextai", about = "Conversational agent gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Start the gateway server (default).
    Serve,
    /// Print the version and exit.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            run_server(Config::from_env()).await
        }
        Some(Command::Version) => {
            println!("nextai {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,nx_gateway=debug")),
        )
        .init();
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "nextai starting");
    let config = Arc::new(config);

    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("creating data dir {}", config.data_dir.display()))?;

    // ── State store ──────────────────────────────────────────────────
    let store = Arc::new(
        StateStore::open(config.state_path()).context("opening state store")?,
    );

    // ── Default cron job ─────────────────────────────────────────────
    seed_default_job(&store).context("seeding default cron job")?;

    // ── Tools ────────────────────────────────────────────────────────
    let tools = Arc::new(ToolRegistry::with_builtins(ToolConfig {
        shell_enabled: config.enable_shell_tool,
        search: config.search.clone(),
        ..ToolConfig::default()
    }));
    tracing::info!(
        shell_enabled = config.enable_shell_tool,
        tools = tools.definitions().len(),
        "tool registry ready"
    );

    // ── Engine + channels ────────────────────────────────────────────
    let engine = Arc::new(Engine::new(config.clone(), store.clone(), tools));
    let channels = Arc::new(ChannelDispatcher::new(engine.clone()));

    // ── Cron scheduler ───────────────────────────────────────────────
    let shutdown = CancellationToken::new();
    let cron = Arc::new(CronScheduler::new(
        engine.clone(),
        channels.clone(),
        config.leases_path(),
        shutdown.clone(),
    ));
    let tick_handle = cron.clone().spawn_tick_loop();
    tracing::info!("cron scheduler running");

    // ── Auth ─────────────────────────────────────────────────────────
    let auth = api::auth::auth_mode(&config.api_key, config.allow_insecure_no_api_key);
    match &auth {
        AuthMode::Required(_) => tracing::info!("API key auth enabled"),
        AuthMode::Disabled => {
            tracing::warn!("running WITHOUT authentication (insecure bypass enabled)")
        }
        AuthMode::Locked => tracing::error!(
            "no API key configured — all protected requests will be refused; \
             set NEXTAI_API_KEY or NEXTAI_ALLOW_INSECURE_NO_API_KEY"
        ),
    }

    let state = AppState {
        config: config.clone(),
        store,
        engine,
        channels,
        cron,
        auth,
    };

    let app = api::router(state.clone()).with_state(state);

    // ── Serve ────────────────────────────────────────────────────────
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(addr = %addr, "listening");

    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
            server_shutdown.cancel();
        })
        .await
        .context("server error")?;

    // The tick loop observes the same token; wait for it to wind down.
    shutdown.cancel();
    let _ = tick_handle.await;
    tracing::info!("nextai stopped");
    Ok(())
}
