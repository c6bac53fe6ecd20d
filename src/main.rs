//! chatrelay - streaming chat relay
//!
//! Accepts chat requests over HTTP and streams the upstream model's output
//! back to the caller as Server-Sent Events.

use std::path::Path;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chatrelay::config::{self, Config, KeySource};

#[derive(Parser)]
#[command(name = "chatrelay")]
#[command(about = "Streaming chat relay that forwards model output as Server-Sent Events")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the relay server
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "chatrelay.toml")]
        config: String,

        /// Override listen address
        #[arg(short, long)]
        listen: Option<String>,
    },

    /// Validate configuration and show what the relay would use
    Check {
        /// Path to configuration file
        #[arg(short, long, default_value = "chatrelay.toml")]
        config: String,
    },
}

fn init_tracing(level: &str) {
    let default_filter = format!("chatrelay={level},tower_http={level}");
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn log_key_source(source: &KeySource) {
    match source {
        KeySource::None => {
            tracing::warn!("No API key configured - relay will reject all chat requests")
        }
        other => tracing::info!(source = %other, "API key resolved"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    config::load_dotenv_files();

    match cli.command {
        Commands::Serve { config, listen } => {
            let (mut cfg, key_source) = Config::from_file_with_env(&config)?;
            init_tracing(&cfg.logging.level);

            tracing::info!(
                config = %config,
                found = Path::new(&config).exists(),
                "Loaded configuration"
            );
            log_key_source(&key_source);

            if let Some(addr) = listen {
                tracing::info!(listen = %addr, "Override listen address");
                cfg.server.listen = addr;
            }

            tracing::info!(
                upstream = %cfg.upstream.base_url,
                default_model = %cfg.upstream.default_model,
                "Relay upstream"
            );

            chatrelay::proxy::run_server(cfg).await
        }

        Commands::Check { config } => {
            let (cfg, key_source) = Config::from_file_with_env(&config)?;
            init_tracing(&cfg.logging.level);

            println!("config:          {}", config);
            println!("listen:          {}", cfg.server.listen);
            println!("upstream:        {}", cfg.upstream.completions_url());
            println!("default model:   {}", cfg.upstream.default_model);
            println!("api key:         {}", key_source);
            println!(
                "bearer token:    {}",
                cfg.auth.token_env.as_deref().unwrap_or("api key")
            );
            println!(
                "error detail:    {}",
                if cfg.errors.expose_upstream_detail {
                    "verbatim"
                } else {
                    "sanitized"
                }
            );

            log_key_source(&key_source);
            Ok(())
        }
    }
}
