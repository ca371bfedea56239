use clap::Parser;
use epsilon_core::EpsilonConfig;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

use epsilon_server::server;
use epsilon_server::subsystems::ask::ask;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "epsilon.toml")]
    config: String,

    /// Check the analytical store and exit
    #[arg(long)]
    health: bool,

    /// Answer a single question on stdout instead of serving HTTP
    #[arg(long)]
    ask: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match EpsilonConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // RUST_LOG wins; otherwise the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.service.log_level));
    fmt().with_env_filter(filter).init();

    if args.health {
        let pool = match epsilon_core::db::create_pool(&config.database).await {
            Ok(p) => p,
            Err(e) => {
                eprintln!("Failed to open database: {}", e);
                std::process::exit(1);
            }
        };
        match epsilon_core::db::health_check(&pool).await {
            Ok(v) => println!("✅ SQLite connected: {}", v),
            Err(e) => {
                println!("❌ SQLite connection failed: {}", e);
                std::process::exit(1);
            }
        }
        match epsilon_core::db::count_tables(&pool).await {
            Ok(n) => println!("✅ Tables: {}", n),
            Err(e) => {
                println!("❌ Table lookup failed: {}", e);
                std::process::exit(1);
            }
        }
        println!("✅ Epsilon store health check passed");
        return Ok(());
    }

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        signal.cancel();
    });

    let state = match server::build_state(&config, shutdown.clone()).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to start: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(question) = args.ask {
        let outcome = ask(
            &state.agent,
            &state.sessions,
            state.policy.as_ref(),
            None,
            &question,
            &shutdown,
        )
        .await;
        println!("{}", outcome.result.output_or_error());
        if !outcome.result.success {
            std::process::exit(2);
        }
        return Ok(());
    }

    if !config.http.enabled {
        tracing::warn!("HTTP API disabled in config; nothing to serve");
        return Ok(());
    }

    epsilon_server::http::start_http_server(state, &config.http).await?;
    Ok(())
}
