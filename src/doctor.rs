use crate::backend::{Backend, BackendClient};
use crate::config::Config;

pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl CheckResult {
    fn ok(name: &str, message: &str) -> Self {
        Self::new(name, CheckStatus::Ok, message)
    }

    fn warning(name: &str, message: &str) -> Self {
        Self::new(name, CheckStatus::Warning, message)
    }

    fn error(name: &str, message: &str) -> Self {
        Self::new(name, CheckStatus::Error, message)
    }

    fn new(name: &str, status: CheckStatus, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.to_string(),
        }
    }

    pub fn icon(&self) -> &'static str {
        match self.status {
            CheckStatus::Ok => "✓",
            CheckStatus::Warning => "⚠",
            CheckStatus::Error => "✗",
        }
    }

    pub fn color(&self) -> &'static str {
        match self.status {
            CheckStatus::Ok => "\x1b[32m",
            CheckStatus::Warning => "\x1b[33m",
            CheckStatus::Error => "\x1b[31m",
        }
    }
}

/// Run every check against an already loaded config.
pub async fn run_checks(config: &Config) -> Vec<CheckResult> {
    let mut results = Vec::new();

    results.push(check_config(config));
    results.push(check_backend(config).await);
    results.push(check_player(config));

    results
}

fn check_config(config: &Config) -> CheckResult {
    let location = Config::config_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "no config directory".to_string());

    match config.validate() {
        Ok(()) => CheckResult::ok("Config", &format!("Loaded ({})", location)),
        Err(e) => CheckResult::error("Config", &e.to_string()),
    }
}

async fn check_backend(config: &Config) -> CheckResult {
    let client = BackendClient::new(&config.backend);

    match client.ping().await {
        Ok(()) => CheckResult::ok("Backend", &format!("Reachable at {}", config.backend.url)),
        Err(e) => CheckResult::error(
            "Backend",
            &format!("{} is not reachable: {}", config.backend.url, e),
        ),
    }
}

fn check_player(config: &Config) -> CheckResult {
    let player = &config.player.command;

    match which::which(player) {
        Ok(path) => CheckResult::ok("Player", &format!("{} found at {}", player, path.display())),
        Err(_) => CheckResult::warning(
            "Player",
            &format!(
                "'{}' not found in PATH. Embedded playback disabled, external playback still works.",
                player
            ),
        ),
    }
}

pub fn print_results(results: &[CheckResult]) {
    let reset = "\x1b[0m";

    println!("\nmagnetplay doctor\n");

    for result in results {
        println!(
            "  {}{} {}{}  {}",
            result.color(),
            result.icon(),
            result.name,
            reset,
            result.message
        );
    }

    println!();

    let errors = count(results, CheckStatus::Error);
    let warnings = count(results, CheckStatus::Warning);

    if errors > 0 {
        println!("  {} error(s), {} warning(s)", errors, warnings);
        println!("  Fix errors above to use magnetplay.\n");
    } else if warnings > 0 {
        println!(
            "  {} warning(s) - magnetplay will work with limited features.\n",
            warnings
        );
    } else {
        println!("  All checks passed!\n");
    }
}

pub fn has_errors(results: &[CheckResult]) -> bool {
    count(results, CheckStatus::Error) > 0
}

fn count(results: &[CheckResult], status: CheckStatus) -> usize {
    results.iter().filter(|r| r.status == status).count()
}
