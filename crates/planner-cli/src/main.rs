use std::future::Future;
use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Context;
use chat_core::paths::{config_json_path, load_config_json, save_config_json};
use chat_core::{Config, ConfigError};
use clap::{Parser, Subcommand};
use colored::Colorize;
use conversation_client::{
    ConversationSession, ConversationState, Credentials, HttpConversationBackend,
    RecoveryManager, SessionCallbacks, SessionConfig, TurnOutcome,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "planner-cli")]
#[command(about = "Talk to the planning assistant from the terminal")]
#[command(version)]
struct Cli {
    /// Backend API base URL, overrides the config file
    #[arg(long)]
    api_base: Option<String>,

    /// Enable debug logging
    #[arg(long, short, default_value = "false")]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a message and stream the reply
    Send {
        /// Message content
        message: String,
        /// Wizard stage the conversation belongs to
        #[arg(long, default_value = "idea")]
        stage: String,
        /// Stage context as a JSON object
        #[arg(long)]
        context: Option<String>,
    },
    /// Resume an interrupted conversation
    Resume {
        conversation_id: String,
        #[arg(long, default_value = "idea")]
        stage: String,
    },
    /// Print the state recoverable from stored tokens
    Recover { conversation_id: String },
    /// Show the backend status of a conversation
    Status { conversation_id: String },
    /// Save an access token to the config file
    Login { token: String },
    /// Remove the saved access token
    Logout,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let mut config = Config::new();
    if let Some(api_base) = cli.api_base {
        config.api_base = Some(api_base);
    }
    tracing::debug!("Using API base {}", config.api_base());

    match cli.command {
        Commands::Send {
            message,
            stage,
            context,
        } => send(&config, &stage, message, context.as_deref()).await,
        Commands::Resume {
            conversation_id,
            stage,
        } => resume(&config, &stage, conversation_id).await,
        Commands::Recover { conversation_id } => recover(&config, &conversation_id).await,
        Commands::Status { conversation_id } => status(&config, &conversation_id).await,
        Commands::Login { token } => store_token(Some(token)),
        Commands::Logout => store_token(None),
    }
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_target(debug)
                .with_line_number(debug),
        )
        .init();
}

fn build_backend(config: &Config) -> anyhow::Result<(Arc<HttpConversationBackend>, Credentials)> {
    let credentials = Credentials::new(config.access_token.clone());
    let backend = HttpConversationBackend::new(config, credentials.clone())
        .context("Failed to build HTTP client")?;
    Ok((Arc::new(backend), credentials))
}

struct Terminal {
    session: ConversationSession,
    printer: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
}

impl Terminal {
    fn open(config: &Config, stage: &str) -> anyhow::Result<Self> {
        let (backend, credentials) = build_backend(config)?;
        let (session, events) = ConversationSession::new(
            backend.clone(),
            backend,
            credentials,
            SessionConfig::from_config(stage, config),
        );

        let dispatcher = SessionCallbacks::new()
            .on_auto_fill(|data| {
                println!("{}", format!("📝 Auto-fill: {}", data).cyan());
            })
            .on_stage_complete(|| println!("{}", "🎉 Stage complete".green()))
            .spawn(events);
        let printer = spawn_printer(session.subscribe());

        Ok(Self {
            session,
            printer,
            dispatcher,
        })
    }

    /// Drive one turn; Ctrl-C cancels it.
    async fn run<F>(self, turn: F) -> anyhow::Result<()>
    where
        F: Future<Output = TurnOutcome>,
    {
        let outcome = tokio::select! {
            outcome = turn => outcome,
            _ = tokio::signal::ctrl_c() => {
                self.session.cancel();
                TurnOutcome::Cancelled
            }
        };

        // Dropping the session closes both channels so the tasks drain and exit.
        drop(self.session);
        self.printer.await.ok();
        self.dispatcher.await.ok();
        println!();
        report(outcome)
    }
}

/// Print content as it grows. A replacement that is not an extension of
/// what was shown (a retry or recovery) is printed on a fresh line.
fn spawn_printer(mut updates: watch::Receiver<ConversationState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut printed = String::new();
        let mut phase = updates.borrow().phase.clone();
        while updates.changed().await.is_ok() {
            let (content, next_phase) = {
                let state = updates.borrow_and_update();
                (state.content.clone(), state.phase.clone())
            };
            if next_phase != phase {
                tracing::debug!("{}", next_phase.description());
                phase = next_phase;
            }
            if content == printed || content.is_empty() {
                continue;
            }

            let mut stdout = io::stdout();
            let written = match content.strip_prefix(printed.as_str()) {
                Some(rest) => write!(stdout, "{}", rest),
                None => write!(stdout, "\n{}", content),
            };
            if written.and_then(|_| stdout.flush()).is_err() {
                break;
            }
            printed = content;
        }
    })
}

fn report(outcome: TurnOutcome) -> anyhow::Result<()> {
    match outcome {
        TurnOutcome::Completed(turn) => {
            if !turn.suggestions.is_empty() {
                println!("{}", "💡 Suggestions:".yellow());
                for suggestion in &turn.suggestions {
                    println!("  • {}", suggestion);
                }
            }
            println!(
                "{}",
                format!("✅ Conversation {}", turn.conversation_id).green()
            );
            Ok(())
        }
        TurnOutcome::Restored(result) => {
            let label = if result.is_complete {
                "✅ Restored complete response"
            } else {
                "⏸ Restored partial response; the agent is no longer producing it"
            };
            println!("{}", label.green());
            Ok(())
        }
        TurnOutcome::RecoveryFailed(error) => anyhow::bail!("Recovery failed: {}", error),
        TurnOutcome::Cancelled => {
            println!("{}", "⏹ Cancelled".yellow());
            Ok(())
        }
        TurnOutcome::Failed(err) => anyhow::bail!("{}", err.user_message()),
    }
}

async fn send(
    config: &Config,
    stage: &str,
    message: String,
    context: Option<&str>,
) -> anyhow::Result<()> {
    let terminal = Terminal::open(config, stage)?;
    if let Some(context) = context {
        let context: serde_json::Value =
            serde_json::from_str(context).context("--context must be valid JSON")?;
        terminal.session.set_stage_context(context);
    }

    println!("{}", format!("🚀 Sending message: {}", message).cyan());
    let session = terminal.session.clone();
    terminal
        .run(async move { session.send_message(message).await })
        .await
}

async fn resume(config: &Config, stage: &str, conversation_id: String) -> anyhow::Result<()> {
    let terminal = Terminal::open(config, stage)?;

    println!(
        "{}",
        format!("🔄 Resuming conversation {}", conversation_id).cyan()
    );
    let session = terminal.session.clone();
    terminal
        .run(async move { session.resume(conversation_id).await })
        .await
}

async fn recover(config: &Config, conversation_id: &str) -> anyhow::Result<()> {
    let (backend, _) = build_backend(config)?;
    let result = RecoveryManager::new(backend)
        .recover_conversation(conversation_id)
        .await;

    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        anyhow::bail!(
            "Recovery failed: {}",
            result.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }
    Ok(())
}

async fn status(config: &Config, conversation_id: &str) -> anyhow::Result<()> {
    let (backend, _) = build_backend(config)?;
    let status = RecoveryManager::new(backend)
        .conversation_status(conversation_id)
        .await
        .with_context(|| format!("Failed to read status of {}", conversation_id))?;

    println!("{} {:?}", "Status:".bold(), status);
    if status.is_resumable() {
        println!(
            "{}",
            format!("Run `planner-cli resume {}` to continue it", conversation_id).yellow()
        );
    }
    Ok(())
}

fn store_token(token: Option<String>) -> anyhow::Result<()> {
    let path = config_json_path();
    let mut config: Config = match load_config_json(&path) {
        Ok(config) => config,
        Err(ConfigError::NotFound(_)) => Config::default(),
        Err(err) => {
            return Err(err).with_context(|| format!("Failed to read {}", path.display()))
        }
    };

    let token = token.map(|token| token.trim().to_string());
    if token.as_deref() == Some("") {
        anyhow::bail!("Access token must not be empty");
    }
    let signed_in = token.is_some();
    config.access_token = token;

    save_config_json(&path, &config)
        .with_context(|| format!("Failed to write {}", path.display()))?;

    if signed_in {
        println!("{}", format!("🔑 Token saved to {}", path.display()).green());
    } else {
        println!("{}", format!("🔒 Token removed from {}", path.display()).green());
    }
    Ok(())
}
