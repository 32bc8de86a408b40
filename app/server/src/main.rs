use clap::Parser;
use std::path::PathBuf;

use carebot_server::{app_router, build_state, init_tracing, load_config, spawn_session_sweeper};

#[derive(Parser)]
#[command(name = "carebot-server")]
#[command(about = "Healthcare chatbot with retrieval chains, an agent and evaluation")]
struct Cli {
    /// JSON config file; environment variables override it
    #[arg(short, long, env = "CAREBOT_CONFIG")]
    config: Option<PathBuf>,

    /// Address to bind (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let state = build_state(config).await?;
    spawn_session_sweeper(state.clone());
    let router = app_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Carebot listening on http://{}", addr);
    axum::serve(listener, router).await?;

    Ok(())
}
