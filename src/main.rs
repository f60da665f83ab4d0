use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gateway::auth::{TokenService, UserProfile};
use gateway::{api, cli, config, jobs, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cfg = config::load()?;
    let args = cli::Cli::parse();

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::Token { command }) => handle_token_command(&cfg, command),
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

/// Human-readable output in development, JSON lines elsewhere.
fn init_tracing() {
    let development = std::env::var("APP_ENV")
        .or_else(|_| std::env::var("NODE_ENV"))
        .map(|v| config::Environment::parse(&v).is_development())
        .unwrap_or(true);
    let default_filter = if development {
        "gateway=debug,tower_http=info"
    } else {
        "gateway=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry().with(filter);
    if development {
        registry.with(tracing_subscriber::fmt::layer()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    }
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    if cfg.upstream_url.is_none() {
        tracing::warn!("GAS_URL is not set; upstream calls will fail until it is configured");
    }

    let state = Arc::new(AppState::from_config(cfg).context("failed to build gateway state")?);

    jobs::sweeper::spawn(state.clone(), jobs::sweeper::SWEEP_INTERVAL);
    tracing::info!(
        every_secs = jobs::sweeper::SWEEP_INTERVAL.as_secs(),
        "background sweeper started"
    );

    let app = api::router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Logiss gateway listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn handle_token_command(cfg: &config::Config, cmd: cli::TokenCommands) -> anyhow::Result<()> {
    let tokens = TokenService::new(&cfg.jwt_secret)?;
    match cmd {
        cli::TokenCommands::Issue {
            email,
            name,
            role,
            branch,
        } => {
            let profile = UserProfile {
                email,
                full_name: name,
                role,
                branch,
            };
            let token = tokens
                .issue(&profile)
                .map_err(|e| anyhow::anyhow!("failed to issue token: {}", e))?;
            println!(
                "Token issued for {} ({}), valid 24h:\n  Use:   Authorization: Bearer {}",
                profile.email, profile.branch, token
            );
        }
        cli::TokenCommands::Inspect { token } => match tokens.verify(&token) {
            Some(claims) => println!("{}", serde_json::to_string_pretty(&claims)?),
            None => println!("invalid"),
        },
    }
    Ok(())
}
