// Only compile UI module when TUI feature is enabled
#[cfg(feature = "tui")]
mod ui;

mod cli;

use anyhow::{Context, Result};
use cashbacks::{open_database, telemetry, AppConfig, CashbackService};
use clap::Parser;
use tracing::{info, warn};

use cli::{Cli, Command};

fn main() -> Result<()> {
    let args = Cli::parse();

    let mut config = AppConfig::load().context("failed to load configuration")?;
    if let Some(db) = args.db.clone() {
        config.database_path = db;
    }
    telemetry::init(&config.telemetry).context("failed to initialise logging")?;

    let conn = open_database(&config.database_path)
        .with_context(|| format!("failed to open database at {}", config.database_path.display()))?;
    info!(path = %config.database_path.display(), "database ready");
    let service = CashbackService::new(conn);

    match args.command.unwrap_or(Command::Ui) {
        Command::Ui => run_ui_mode(&service, &config),
        command => cli::execute(command, &service, &config, args.json),
    }
}

#[cfg(feature = "tui")]
fn run_ui_mode(service: &CashbackService, config: &AppConfig) -> Result<()> {
    // Catch up on jobs before drawing, like a fresh app start would
    let scheduler = cashbacks::JobScheduler::new(service.clone(), config.update_url.clone());
    let report = scheduler.run_due(chrono::Utc::now());
    if report.has_failures() {
        warn!(?report, "some startup jobs failed");
    }

    ui::run_ui(service)
}

#[cfg(not(feature = "tui"))]
fn run_ui_mode(_service: &CashbackService, _config: &AppConfig) -> Result<()> {
    warn!("terminal UI requested in a build without the `tui` feature");
    eprintln!("TUI mode not available!");
    eprintln!("   Rebuild with: cargo build --features tui");
    eprintln!("   Or use the server: cargo run --bin cashbacks-server --features server");
    std::process::exit(1);
}
