//! Live Chat Console
//!
//! Talk to the live model from the terminal. Type `start` to open a session,
//! `stop` to end it and `quit` to exit.
//!
//! ```text
//! live-chat [--config <path>] [--transcript <path>]
//! live-chat devices
//! live-chat init-config [--config <path>]
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use live_voice::{
    audio::{list_devices, CpalInput, CpalOutput},
    config::AppConfig,
    connection::GeminiConnector,
    session::{LiveSession, SessionBackends, SessionState, SessionUpdate},
};

#[derive(Parser)]
#[command(name = "live-chat")]
#[command(author, version, about = "Live voice chat with a hosted audio model")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Configuration file (defaults to the per-user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Write the finalized transcript as JSON here on exit
    #[arg(long)]
    transcript: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// List audio devices and their capabilities
    Devices,
    /// Write the default configuration file
    InitConfig,
}

fn print_devices() {
    println!("\n=== Available Audio Devices ===");
    for device in list_devices() {
        let device_type = match (device.is_input, device.is_output) {
            (true, true) => "Input/Output",
            (true, false) => "Input",
            (false, true) => "Output",
            _ => "Unknown",
        };
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {} ({}){}:", device.name, device_type, default_marker);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
    println!();
}

fn print_update(update: &SessionUpdate) {
    match update {
        SessionUpdate::StateChanged(status) if status.message.is_empty() => {
            println!("[{}]", status.state)
        }
        SessionUpdate::StateChanged(status) => println!("[{}] {}", status.state, status.message),
        SessionUpdate::InterimTranscript(turn) => {
            tracing::debug!("interim: user={:?} model={:?}", turn.user, turn.model)
        }
        SessionUpdate::TurnCompleted(entry) => {
            if !entry.turn.user.is_empty() {
                println!("you:   {}", entry.turn.user);
            }
            if !entry.turn.model.is_empty() {
                println!("model: {}", entry.turn.model);
            }
        }
        SessionUpdate::Interrupted { stopped } => {
            tracing::debug!("Model interrupted, {} source(s) stopped", stopped)
        }
        SessionUpdate::AudioScheduled(_)
        | SessionUpdate::PlaybackFinished(_)
        | SessionUpdate::ChunkSkipped(_) => {}
    }
}

fn write_transcript(session: &LiveSession, path: &Path) -> Result<()> {
    let json = session.transcript().to_json()?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write transcript to {}", path.display()))?;
    tracing::info!(
        "Wrote {} turn(s) to {}",
        session.transcript().entries().len(),
        path.display()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    match args.command {
        Some(Command::Devices) => {
            print_devices();
            return Ok(());
        }
        Some(Command::InitConfig) => {
            let path = args
                .config
                .or_else(AppConfig::default_path)
                .context("no config directory available, pass --config")?;
            AppConfig::default().save(&path)?;
            println!("Wrote default config to {}", path.display());
            return Ok(());
        }
        None => {}
    }

    let config = AppConfig::load(args.config.as_deref())?;
    config.validate()?;
    let config = Arc::new(config);

    tracing::info!("Starting live chat with model {}", config.api.model);

    let backends = SessionBackends::new(
        Arc::new(CpalInput::new(config.audio.input_device.clone())),
        Arc::new(CpalOutput::new(config.audio.output_device.clone())),
        Arc::new(GeminiConnector::new(config.clone())),
    );
    let mut session = LiveSession::new(config, backends);

    println!("Commands: start, stop, status, quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "start" => {
                        // Leave the error state first
                        if session.state() == SessionState::Error {
                            session.stop();
                        }
                        if let Err(e) = session.start() {
                            println!("{}", e);
                        }
                    }
                    "stop" => session.stop(),
                    "status" => {
                        let stats = session.stats();
                        println!(
                            "[{}] sent {} frames ({} dropped), played {} chunks",
                            session.state(),
                            stats.frames_sent,
                            stats.frames_dropped,
                            stats.chunks_scheduled
                        );
                    }
                    "quit" | "exit" => break,
                    "" => {}
                    other => println!("Unknown command: {}", other),
                }
            }
            update = session.next_update() => print_update(&update),
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    if session.state() != SessionState::Idle {
        session.stop();
    }
    if let Some(path) = &args.transcript {
        write_transcript(&session, path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_flags_and_subcommands() {
        let args = Args::try_parse_from(["live-chat", "--transcript", "turns.json"]).unwrap();
        assert!(args.command.is_none());
        assert_eq!(args.transcript, Some(PathBuf::from("turns.json")));

        let args = Args::try_parse_from(["live-chat", "init-config", "--config", "c.toml"]).unwrap();
        assert!(matches!(args.command, Some(Command::InitConfig)));
        assert_eq!(args.config, Some(PathBuf::from("c.toml")));

        let args = Args::try_parse_from(["live-chat", "devices"]).unwrap();
        assert!(matches!(args.command, Some(Command::Devices)));

        assert!(Args::try_parse_from(["live-chat", "bogus"]).is_err());
        assert!(Args::try_parse_from(["live-chat", "--config"]).is_err());
    }
}
