//! AI Polisher CLI
//!
//! Embeds the polisher service around a conversation loaded from a JSON transcript:
//! - `polisher polish <transcript.json>` - rewrite one assistant message, streaming it to stdout
//! - `polisher models` - fetch the provider's model list
//! - `polisher config ...` - inspect and edit settings

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use polisher_ai_adapters::OpenAICompatClient;
use polisher_core::config::DEFAULT_SYSTEM_PROMPT;
use polisher_core::{
    ChatMessage, HostBridge, InMemoryChat, MessageStore, PolishError, PolishReport,
    PolisherService, PolisherSettings, SettingsHandle,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

mod host;
mod logging;
mod settings_file;

use host::{TerminalEvents, TerminalStatus, TerminalView};
use settings_file::{default_settings_path, SettingsFile};

/// AI Polisher - streaming second-pass rewrite of assistant messages
#[derive(Parser)]
#[command(name = "polisher")]
#[command(version)]
#[command(about = "Rewrite assistant chat messages through a second LLM pass", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (defaults to the user configuration directory)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Polish one assistant message of a transcript
    Polish {
        /// JSON array of chat messages
        transcript: PathBuf,

        /// Message index to polish (defaults to the last message)
        #[arg(long)]
        index: Option<usize>,

        /// Write the updated transcript here
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Use a single blocking completion instead of streaming
        #[arg(long)]
        no_stream: bool,
    },

    /// Fetch and store the provider's model list
    Models,

    /// Inspect or edit settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the current settings (API key masked)
    Show,

    /// Set one setting by its key, e.g. `set maxTokens 2048`
    Set {
        key: String,
        /// JSON value; bare words are taken as strings
        value: String,
    },

    /// Restore the default system prompt
    ResetPrompt,
}

fn load_settings(cli_path: Option<&Path>) -> Result<(SettingsFile, PolisherSettings)> {
    let path = match cli_path {
        Some(path) => path.to_path_buf(),
        None => default_settings_path()?,
    };
    let file = SettingsFile::new(path);
    let settings = file.load()?;
    Ok((file, settings))
}

fn load_transcript(path: &Path) -> Result<Vec<ChatMessage>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read transcript {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("Transcript {} is not a JSON array of messages", path.display()))
}

fn masked_key(key: &str) -> String {
    let visible: String = key.chars().take(4).collect();
    if key.chars().count() <= 8 {
        "*".repeat(key.chars().count())
    } else {
        format!("{}…", visible)
    }
}

fn parse_setting_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

async fn run_polish(
    file: SettingsFile,
    settings: PolisherSettings,
    transcript: &Path,
    index: Option<usize>,
    output: Option<&Path>,
    no_stream: bool,
) -> Result<()> {
    let messages = load_transcript(transcript)?;
    if messages.is_empty() {
        bail!("Transcript {} has no messages", transcript.display());
    }
    let index = index.unwrap_or(messages.len() - 1);
    if index >= messages.len() {
        bail!(
            "Message index {} is out of range (transcript has {} messages)",
            index,
            messages.len()
        );
    }

    let settings = PolisherSettings {
        stream_enabled: settings.stream_enabled && !no_stream,
        ..settings
    };
    let auto = settings.enabled;

    let chat = Arc::new(InMemoryChat::new(messages));
    let view = Arc::new(TerminalView::new(index));
    let host = HostBridge {
        store: chat.clone(),
        view: view.clone(),
        events: Arc::new(TerminalEvents),
        status: Arc::new(TerminalStatus),
    };
    let service = PolisherService::new(
        Arc::new(OpenAICompatClient::new()),
        SettingsHandle::new(settings, Arc::new(file)),
        host,
    );

    let attempt = async {
        if auto {
            service.handle_new_message(index).await
        } else {
            info!("Auto-polish is disabled, polishing manually: message_index={}", index);
            service.polish_message(index).await.map(Some)
        }
    };
    tokio::pin!(attempt);

    // Keep listening: the first interrupt may land before the attempt holds the slot.
    let result: Result<Option<PolishReport>, PolishError> = loop {
        tokio::select! {
            result = &mut attempt => break result,
            _ = tokio::signal::ctrl_c() => {
                let stopped = service.stop();
                warn!("Interrupt received, stopping polish: stopped={}", stopped);
            }
        }
    };
    view.finish();

    if let Some(path) = output {
        let body = serde_json::to_string_pretty(&chat.messages())?;
        std::fs::write(path, body)
            .with_context(|| format!("Failed to write transcript {}", path.display()))?;
        info!("Transcript written: path={}", path.display());
    }

    match result {
        Ok(Some(report)) => {
            info!(
                "Polished message {} in {} ms ({} snapshots)",
                report.message_index,
                report.duration_ms(),
                report.snapshot_count
            );
            Ok(())
        }
        Ok(None) => {
            eprintln!("[polisher] Message {} was not eligible for polishing", index);
            Ok(())
        }
        Err(PolishError::Cancelled) => Ok(()),
        Err(err) => Err(err).context("Polish failed"),
    }
}

async fn run_models(file: SettingsFile, settings: PolisherSettings) -> Result<()> {
    let chat = Arc::new(InMemoryChat::default());
    let host = HostBridge {
        store: chat,
        view: Arc::new(TerminalView::new(usize::MAX)),
        events: Arc::new(TerminalEvents),
        status: Arc::new(TerminalStatus),
    };
    let service = PolisherService::new(
        Arc::new(OpenAICompatClient::new()),
        SettingsHandle::new(settings, Arc::new(file)),
        host,
    );

    let models = service.fetch_models().await.context("Model listing failed")?;
    let selected = service.settings().snapshot().model;
    for model in models {
        let marker = if model == selected { "*" } else { " " };
        println!("{} {}", marker, model);
    }
    Ok(())
}

fn run_config(file: SettingsFile, settings: PolisherSettings, action: ConfigAction) -> Result<()> {
    let path = file.path().to_path_buf();
    let handle = SettingsHandle::new(settings, Arc::new(file));

    match action {
        ConfigAction::Show => {
            let mut shown = handle.snapshot();
            if !shown.api_key.is_empty() {
                shown.api_key = masked_key(&shown.api_key);
            }
            println!("# {}", path.display());
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
        ConfigAction::Set { key, value } => {
            let updated = handle
                .apply_field(&key, parse_setting_value(&value))
                .with_context(|| format!("Cannot set {}", key))?;
            let value = serde_json::to_value(&updated)?
                .get(&key)
                .cloned()
                .unwrap_or(Value::Null);
            let shown = if key == "apiKey" {
                Value::String(masked_key(&updated.api_key))
            } else {
                value
            };
            println!("{} = {}", key, shown);
        }
        ConfigAction::ResetPrompt => {
            handle.update(|s| s.system_prompt = DEFAULT_SYSTEM_PROMPT.to_string());
            println!("System prompt reset to default");
        }
    }
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = logging::LogConfig::new(cli.verbose);
    logging::init_logging(&log_config)?;

    let (file, settings) = load_settings(cli.settings.as_deref())?;

    match cli.command {
        Commands::Polish {
            transcript,
            index,
            output,
            no_stream,
        } => {
            run_polish(
                file,
                settings,
                &transcript,
                index,
                output.as_deref(),
                no_stream,
            )
            .await
        }
        Commands::Models => run_models(file, settings).await,
        Commands::Config { action } => run_config(file, settings, action),
    }
}
