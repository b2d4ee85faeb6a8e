use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tracing::{info, warn};

use scenewire::agent::{Agent, HttpAgent};
use scenewire::config::Config;
use scenewire::speech::{HttpSpeechToText, SpeechToText};
use scenewire::{routes, AppState, Gateway, SessionPolicy};

/// WebSocket session server for the 3D-scene assistant.
#[derive(Parser)]
#[command(name = "scenewire", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP/WS server (default when no subcommand given).
    Serve {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
    },
    /// Load and validate the configuration, then exit.
    CheckConfig {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::CheckConfig { config }) => {
            let config = load_config(config.as_deref());
            println!("{config:#?}");
        }
        Some(Commands::Serve { config }) => run_server(config.as_deref()).await,
        None => run_server(None).await,
    }
}

fn load_config(path: Option<&str>) -> Config {
    match Config::load(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("scenewire: {e}");
            std::process::exit(1);
        }
    }
}

async fn run_server(config_path: Option<&str>) {
    let config = load_config(config_path);

    // Initialize tracing
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("scenewire v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Listening on {}", config.server.listen);

    let agent = HttpAgent::new(&config.agent).map(|agent| {
        info!("Agent endpoint: {}", agent.url());
        Arc::new(agent) as Arc<dyn Agent>
    });

    let speech = match config.speech.url {
        None => None,
        Some(_) => match HttpSpeechToText::new(&config.speech) {
            Ok(speech) => Some(Arc::new(speech) as Arc<dyn SpeechToText>),
            Err(e) => {
                warn!("Speech-to-text disabled: {e}");
                None
            }
        },
    };

    let gateway = Gateway::new(
        agent,
        speech,
        SessionPolicy::from_config(&config.session),
        config.server.shutdown_grace(),
    );

    let listener = TcpListener::bind(&config.server.listen)
        .await
        .expect("Failed to bind");
    let state = AppState::new(config, gateway);

    info!("Server ready");

    // Graceful shutdown
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to register SIGTERM");
            tokio::select! {
                _ = ctrl_c => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("Received SIGINT");
        }
    };

    routes::serve(listener, state, shutdown)
        .await
        .expect("Server error");

    info!("Goodbye");
}
