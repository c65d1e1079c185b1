use std::fs;
use std::path::Path;

use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use memoir_config::AppConfig;
use memoir_session::{InteractionMode, SessionEngine};

#[derive(Debug, Parser)]
#[command(
    name = "memoir",
    version,
    about = "Multi-session interview engine that builds a cited biography"
)]
struct Cli {
    /// Interaction mode.
    #[arg(long, value_enum, default_value = "terminal")]
    mode: CliMode,

    /// User identifier (required in terminal mode).
    #[arg(long = "user_id")]
    user_id: Option<String>,

    /// Capture answers by voice instead of the keyboard.
    #[arg(long = "voice_input")]
    voice_input: bool,

    /// Speak interviewer questions aloud.
    #[arg(long = "voice_output")]
    voice_output: bool,

    /// Let a simulated user agent answer instead of a human.
    #[arg(long = "user_agent")]
    user_agent: bool,

    /// Purge all stored data for the user before starting.
    #[arg(long)]
    restart: bool,

    /// Maximum number of user turns before the session ends.
    #[arg(long = "max_turns")]
    max_turns: Option<usize>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliMode {
    Terminal,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let mut config = AppConfig::from_env();
    if cli.max_turns.is_some() {
        config.session.max_turns = cli.max_turns;
    }

    let CliMode::Terminal = cli.mode;
    let Some(user_id) = cli.user_id.clone() else {
        bail!("--user_id is required for terminal mode");
    };

    if cli.restart {
        purge_dir(&config.user_data_dir(&user_id))?;
        purge_dir(&config.user_logs_dir(&user_id))?;
        println!("Cleared data for user {user_id}");
    }

    let _log_guard = init_logging(&config, &user_id)?;

    if cli.voice_input || cli.voice_output {
        // No audio backend is compiled in; the speech seams degrade to text.
        tracing::warn!("voice features requested but no audio backend is available; continuing with text");
    }

    let mode = if cli.user_agent {
        InteractionMode::Simulated
    } else {
        InteractionMode::Terminal
    };

    let engine = SessionEngine::new(config, &user_id, mode)?;
    engine.run().await
}

/// File-based session logging under the user's logs directory, with the
/// usual `RUST_LOG` override. Returns the appender guard that must stay
/// alive for the process.
fn init_logging(
    config: &AppConfig,
    user_id: &str,
) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let log_dir = config.user_logs_dir(user_id);
    fs::create_dir_all(&log_dir)?;
    let appender = tracing_appender::rolling::never(&log_dir, "execution.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(guard)
}

fn purge_dir(dir: &str) -> Result<()> {
    let path = Path::new(dir);
    if path.exists() {
        fs::remove_dir_all(path)?;
    }
    Ok(())
}
