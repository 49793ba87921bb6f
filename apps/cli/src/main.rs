//! talkmee: talk with a live voice tutor, or drill pronunciation one
//! sentence at a time, from the terminal.

mod console;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use talkmee_application::{
    AudioEngine, Command, ConversationController, DrillController, SessionHost, SessionSettings,
};
use talkmee_audio::{CpalMicrophone, CpalOutput};
use talkmee_coach::{Accent, FeedbackLanguage, GeminiClient};
use talkmee_events::{EventBusRef, PracticeKind, SessionMode};
use talkmee_live::{LiveConnector, WebSocketConnector};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use crate::console::ConsoleEventBus;

#[derive(Parser)]
#[command(name = "talkmee", about = "Speaking practice with a live voice coach", version)]
struct Cli {
    /// Gemini API key.
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true, global = true)]
    api_key: Option<String>,
    /// JSON settings file. Missing fields keep their defaults.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    /// Input device id (see `talkmee devices`).
    #[arg(long, global = true)]
    input: Option<String>,
    /// Output device id.
    #[arg(long, global = true)]
    output: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List audio devices.
    Devices,
    /// Free conversation with the tutor.
    Conversation,
    /// Pronunciation drill with scoring.
    Drill {
        #[arg(long, value_enum)]
        accent: Option<AccentArg>,
        #[arg(long, value_enum)]
        kind: Option<KindArg>,
        /// Language of the coach's feedback.
        #[arg(long, value_enum)]
        feedback: Option<FeedbackArg>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum AccentArg {
    Us,
    Uk,
}

impl From<AccentArg> for Accent {
    fn from(arg: AccentArg) -> Self {
        match arg {
            AccentArg::Us => Accent::Us,
            AccentArg::Uk => Accent::Uk,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Sentence,
    Vocabulary,
}

impl From<KindArg> for PracticeKind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Sentence => PracticeKind::Sentence,
            KindArg::Vocabulary => PracticeKind::Vocabulary,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum FeedbackArg {
    Th,
    En,
}

impl From<FeedbackArg> for FeedbackLanguage {
    fn from(arg: FeedbackArg) -> Self {
        match arg {
            FeedbackArg::Th => FeedbackLanguage::Thai,
            FeedbackArg::En => FeedbackLanguage::English,
        }
    }
}

const HELP: &str =
    "Enter: start/stop   n: next   c <text>: custom   g <topic>: new words   gs <topic>: new sentences   q: quit";

/// Map one line of terminal input to a command.
fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    let (word, rest) = match line.split_once(' ') {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    match word {
        "" => Some(Command::Toggle),
        "s" | "stop" => Some(Command::Stop),
        "n" | "next" => Some(Command::Next),
        "q" | "quit" => Some(Command::Quit),
        "c" | "custom" if !rest.is_empty() => Some(Command::Custom(rest.to_string())),
        "g" | "generate" if !rest.is_empty() => Some(Command::Generate(rest.to_string())),
        "gs" | "sentences" if !rest.is_empty() => Some(Command::GenerateSentences(rest.to_string())),
        _ => None,
    }
}

/// Forward terminal lines and Ctrl-C to the host. End of input quits.
fn spawn_command_reader(commands: mpsc::Sender<Command>) {
    let interrupt = commands.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = interrupt.send(Command::Quit).await;
        }
    });

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    let _ = commands.send(Command::Quit).await;
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read terminal input");
                    break;
                }
            };
            let Some(command) = parse_command(&line) else {
                println!("{HELP}");
                continue;
            };
            let quit = command == Command::Quit;
            if commands.send(command).await.is_err() || quit {
                break;
            }
        }
    });
}

fn load_settings(path: Option<&Path>) -> anyhow::Result<SessionSettings> {
    match path {
        Some(path) => SessionSettings::from_json_file(path)
            .with_context(|| format!("failed to load settings from {}", path.display())),
        None => Ok(SessionSettings::default()),
    }
}

fn list_devices() -> anyhow::Result<()> {
    let inputs = talkmee_audio::list_input_devices().context("failed to list input devices")?;
    let outputs = talkmee_audio::list_output_devices().context("failed to list output devices")?;
    for device in inputs.iter().chain(outputs.iter()) {
        let marker = if device.is_default { "*" } else { " " };
        println!("{marker} {:?}\t{}\t{}", device.direction, device.id, device.name);
    }
    Ok(())
}

struct Audio {
    microphone: CpalMicrophone,
    output: CpalOutput,
    connector: Arc<dyn LiveConnector>,
    events: EventBusRef,
}

fn open_audio(cli: &Cli) -> anyhow::Result<(Audio, String)> {
    let api_key = cli
        .api_key
        .clone()
        .context("no API key: pass --api-key or set GEMINI_API_KEY")?;

    let mut microphone = CpalMicrophone::new();
    if let Some(id) = &cli.input {
        microphone = microphone.with_device(id.clone());
    }
    let output = CpalOutput::open(cli.output.as_deref()).context("failed to open output device")?;
    tracing::info!(rate = output.device_rate(), "Output device ready");

    let audio = Audio {
        microphone,
        output,
        connector: Arc::new(WebSocketConnector::new(api_key.clone())),
        events: Arc::new(ConsoleEventBus),
    };
    Ok((audio, api_key))
}

async fn run_conversation(cli: &Cli, settings: SessionSettings) -> anyhow::Result<()> {
    let (audio, _) = open_audio(cli)?;
    let engine = AudioEngine::from_settings(
        SessionMode::Conversation,
        audio.microphone,
        audio.output,
        audio.connector,
        &settings,
    )
    .with_events(audio.events);
    let controller = ConversationController::new(engine, &settings);

    let (host, commands) = SessionHost::new(controller, settings.tick_interval());
    println!("Conversation mode. Enter to start or stop talking, q to quit.");
    spawn_command_reader(commands);
    let controller = host.run().await;
    println!("{} turns.", controller.turns().len() / 2);
    Ok(())
}

async fn run_drill(cli: &Cli, settings: SessionSettings) -> anyhow::Result<()> {
    let (audio, api_key) = open_audio(cli)?;
    let coach = Arc::new(GeminiClient::new(api_key));
    let engine = AudioEngine::from_settings(
        SessionMode::Drill,
        audio.microphone,
        audio.output,
        audio.connector,
        &settings,
    )
    .with_events(audio.events);
    let tick = settings.tick_interval();
    let controller = DrillController::new(engine, coach.clone(), coach, settings);

    let (host, commands) = SessionHost::new(controller, tick);
    println!("Drill mode. {HELP}");
    spawn_command_reader(commands);
    host.run().await;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,talkmee=debug")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut settings = load_settings(cli.settings.as_deref())?;

    match &cli.command {
        Commands::Devices => list_devices(),
        Commands::Conversation => run_conversation(&cli, settings).await,
        Commands::Drill {
            accent,
            kind,
            feedback,
        } => {
            if let Some(accent) = accent {
                settings.accent = (*accent).into();
            }
            if let Some(kind) = kind {
                settings.practice_kind = (*kind).into();
            }
            if let Some(feedback) = feedback {
                settings.feedback_language = (*feedback).into();
            }
            run_drill(&cli, settings).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command(""), Some(Command::Toggle));
        assert_eq!(parse_command("  n "), Some(Command::Next));
        assert_eq!(parse_command("q"), Some(Command::Quit));
        assert_eq!(
            parse_command("c I would like a coffee"),
            Some(Command::Custom("I would like a coffee".to_string()))
        );
        assert_eq!(
            parse_command("g  kitchen "),
            Some(Command::Generate("kitchen".to_string()))
        );
        assert_eq!(
            parse_command("gs travel"),
            Some(Command::GenerateSentences("travel".to_string()))
        );
    }

    #[test]
    fn test_parse_command_rejects_unknown_and_empty_args() {
        assert_eq!(parse_command("c"), None);
        assert_eq!(parse_command("g   "), None);
        assert_eq!(parse_command("gs"), None);
        assert_eq!(parse_command("hello"), None);
    }

    #[test]
    fn test_cli_parses_drill_flags() {
        let cli = Cli::try_parse_from([
            "talkmee", "drill", "--accent", "uk", "--kind", "vocabulary", "--feedback", "en",
        ])
        .unwrap();
        match cli.command {
            Commands::Drill {
                accent: Some(AccentArg::Uk),
                kind: Some(KindArg::Vocabulary),
                feedback: Some(FeedbackArg::En),
            } => {}
            _ => panic!("drill flags not parsed"),
        }
    }
}
