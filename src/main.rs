use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use zenith_core::{Config, Controller, OpenAIClient, Transcript, UnicodeTypesetter};

mod app;
mod handler;
mod tui;
mod ui;

use app::App;
use tui::EventHandler;

#[derive(Parser, Debug)]
#[command(name = "zenith")]
#[command(version, about = "Terminal chat client for OpenAI-compatible completion endpoints")]
struct Cli {
    /// Chat completions URL (overrides config and ZENITH_ENDPOINT)
    #[arg(long)]
    endpoint: Option<String>,

    /// Model name sent with every request (overrides config and ZENITH_MODEL)
    #[arg(long)]
    model: Option<String>,

    /// Request timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Log file (defaults to zenith.log in the config directory)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Write the resolved settings to the config file and exit
    #[arg(long)]
    save_config: bool,
}

impl Cli {
    fn resolve(&self, config: Config) -> Config {
        let mut config = config.with_env_overrides();
        if let Some(endpoint) = &self.endpoint {
            config.endpoint = endpoint.clone();
        }
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
        if let Some(timeout) = self.timeout {
            config.timeout_secs = timeout;
        }
        config
    }
}

fn init_logging(path: Option<PathBuf>) -> Result<PathBuf> {
    let path = match path {
        Some(path) => path,
        None => Config::config_path()?
            .parent()
            .map(|dir| dir.join("zenith.log"))
            .ok_or_else(|| anyhow!("Could not determine log directory"))?,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;

    // The terminal belongs to the TUI, so logs go to a file
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(Arc::new(file))
        .with_ansi(false)
        .init();

    Ok(path)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve(Config::load()?);

    if cli.save_config {
        config.save()?;
        println!("Saved settings to {}", Config::config_path()?.display());
        return Ok(());
    }

    let log_path = init_logging(cli.log_file.clone())?;
    tracing::info!(
        endpoint = %config.endpoint,
        model = %config.model,
        log = %log_path.display(),
        "starting zenith"
    );

    let client = OpenAIClient::new(&config.endpoint, &config.model, config.timeout())?;
    let controller = Controller::new(
        Arc::new(client),
        Transcript::new(config.welcome_message.clone()),
    )
    .with_typesetter(Box::new(UnicodeTypesetter));
    let mut app = App::new(controller, config.model.clone());

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let result = run(&mut terminal, &mut app).await;
    tui::restore()?;

    if let Err(e) = &result {
        tracing::error!("zenith exited with error: {:#}", e);
    }
    result
}

async fn run(terminal: &mut tui::Tui, app: &mut App) -> Result<()> {
    let mut events = EventHandler::new(Duration::from_millis(300));
    let sender = events.sender();

    while !app.should_quit {
        terminal.draw(|frame| ui::render(app, frame))?;

        match events.next().await {
            Some(event) => handler::handle_event(app, event, &sender),
            None => break,
        }
    }

    Ok(())
}
