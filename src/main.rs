mod cli;

use std::fs::File;
use std::sync::Arc;

use clap::Parser;
use cli::{Cli, Command};
use magnetplay::{
    BackendClient, Config, ConfigError, PlaybackController, ProcessPlayerFactory, TeardownPolicy,
    doctor, shell,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn init_logging() {
    // log to a file so tracing output doesn't interleave with the prompt
    let log_file = File::create(std::env::temp_dir().join("magnetplay.log")).ok();

    if let Some(file) = log_file {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_target(false)
            .with_ansi(false)
            .with_writer(file)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn load_config(backend: Option<&str>) -> Config {
    let config = Config::load().and_then(|config| match backend {
        Some(url) => config.with_backend_url(url),
        None => Ok(config),
    });

    match config {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            if let ConfigError::ParseError(_) | ConfigError::ValidationError(_) = &e
                && let Ok(path) = Config::config_path()
            {
                eprintln!("\nCheck the config file at: {}", path.display());
                eprintln!("\nExample config.toml:");
                eprintln!(
                    r#"
[backend]
url = "http://localhost:64621"

[player]
command = "mpv"

[teardown]
remove_policy = "backend_atomic"
"#
                );
            }
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    init_logging();

    let cli = Cli::parse();
    let config = load_config(cli.backend.as_deref());

    if let Some(Command::Doctor) = cli.command {
        let results = doctor::run_checks(&config).await;
        doctor::print_results(&results);
        if doctor::has_errors(&results) {
            std::process::exit(1);
        }
        return;
    }

    // clap requires the magnet when no subcommand is given
    let Some(magnet) = cli.magnet else {
        return;
    };

    info!(backend = %config.backend.url, player = %config.player.command, "starting");

    let controller = Arc::new(PlaybackController::with_policy(
        BackendClient::new(&config.backend),
        ProcessPlayerFactory::new(&config.player),
        magnet,
        TeardownPolicy::with_remove_policy(config.teardown.remove_policy),
    ));

    if let Err(e) = shell::run(controller).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
