use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cognitive_battery::battery::{OutcomeReport, ResponseInput, TestCatalog, TestKind, KEY_BEGIN, KEY_STOP};
use cognitive_battery::config::{Config, LogFormat};
use cognitive_battery::dispatch::{Dispatcher, StartOutcome, UserAction};
use cognitive_battery::error::{AppError, DispatchError};
use cognitive_battery::session::{ChatId, Profile, SessionStore};
use cognitive_battery::stimulus::{CatalogProvider, ResourceCatalog};
use cognitive_battery::storage::{ResultSink, SqliteResultSink};
use cognitive_battery::transport::ConsoleTransport;

/// Console shell for the cognitive test battery
#[derive(Parser, Debug)]
#[command(name = "cognitive-battery", version, about)]
struct Cli {
    /// Override the SQLite database path from the environment
    #[arg(long)]
    database: Option<PathBuf>,
}

// The console shell is a single conversation.
const CONSOLE_CHAT: ChatId = ChatId(0);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(path) = cli.database {
        config.database.path = path;
    }

    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Cognitive battery starting..."
    );

    let sink = match SqliteResultSink::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            Arc::new(s)
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };

    let provider = CatalogProvider::new(ResourceCatalog::builtin(), config.battery.clone());
    let (dispatcher, mut reports) = Dispatcher::new(
        TestCatalog::standard(&config.battery),
        SessionStore::new(),
        Arc::new(provider),
        Arc::clone(&sink) as Arc<dyn ResultSink>,
        Arc::new(ConsoleTransport::new()),
    );
    let dispatcher = Arc::new(dispatcher);

    // Finished runs come back as plain data; the shell owns all menu output.
    tokio::spawn(async move {
        while let Some(report) = reports.recv().await {
            print_report(&report);
        }
    });

    println!("Cognitive battery console.");
    print_menu();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if let Err(e) = handle_line(&dispatcher, line).await {
            println!("{}", e);
        }
    }

    info!("Shell exiting");
    Ok(())
}

async fn handle_line(dispatcher: &Arc<Dispatcher>, line: &str) -> Result<(), AppError> {
    let mut parts = line.split_whitespace();
    let head = parts.next().unwrap_or_default();

    match head {
        "/register" => {
            let unique_id = parts.next();
            let name = parts.next();
            let age = parts.next().and_then(|a| a.parse::<u32>().ok());
            match (unique_id, name, age) {
                (Some(unique_id), Some(name), Some(age)) => {
                    dispatcher
                        .register(
                            CONSOLE_CHAT,
                            Profile {
                                unique_id: unique_id.to_string(),
                                display_name: name.to_string(),
                                age,
                                external_user_id: 0,
                            },
                        )
                        .await?;
                    println!("Registered {}. Pick a test:", name);
                    print_menu();
                }
                _ => println!("Usage: /register <id> <name> <age>"),
            }
        }
        "/start" => {
            let kind = match parts.next().map(TestKind::from_str) {
                Some(Ok(kind)) => kind,
                _ => {
                    println!("Usage: /start <test> [force]");
                    print_menu();
                    return Ok(());
                }
            };
            let force = parts.next() == Some("force");
            match dispatcher.start_test(CONSOLE_CHAT, kind, force).await? {
                StartOutcome::Started => {}
                StartOutcome::NeedsOverwriteConfirm => {
                    println!(
                        "You already have saved results for {}. \
                         Run `/start {} force` to replace them.",
                        kind, kind
                    );
                }
            }
        }
        "/stop" => {
            if !dispatcher.stop_active(CONSOLE_CHAT).await {
                return Err(DispatchError::NoActiveTest.into());
            }
        }
        "/reset" => {
            dispatcher.reset(CONSOLE_CHAT).await;
            println!("Profile cleared. Start over with /register.");
        }
        "/results" => {
            let profile = dispatcher
                .profile(CONSOLE_CHAT)
                .await
                .ok_or(DispatchError::NoProfile)?;
            print_results(dispatcher, &profile).await?;
        }
        "/menu" => print_menu(),
        _ => {
            // Bare lines go to the active run: keyboard words act as key
            // presses, everything else is free text.
            let action = match head {
                KEY_BEGIN => UserAction::Acknowledge,
                KEY_STOP => UserAction::Stop,
                key if line == key && is_key_word(key) => {
                    UserAction::Input(ResponseInput::Key(key.to_string()))
                }
                _ => UserAction::Input(ResponseInput::Text(line.to_string())),
            };
            dispatcher.dispatch(CONSOLE_CHAT, action).await?;
        }
    }
    Ok(())
}

// Single digits are option keys (rotation, matrices); longer digit runs are
// typed sequence answers and must stay free text.
fn is_key_word(word: &str) -> bool {
    matches!(word, "retry" | "press" | "red" | "green" | "blue" | "yellow")
        || (word.len() == 1 && word.chars().all(|c| c.is_ascii_digit()))
}

async fn print_results(dispatcher: &Arc<Dispatcher>, profile: &Profile) -> Result<(), AppError> {
    let record = dispatcher.fetch_record(&profile.unique_id).await?;
    match record {
        Some(record) => {
            println!("Results for {}:", profile.display_name);
            for kind in TestKind::ALL {
                let mark = if record.has_result(kind) { "done" } else { "-" };
                println!("  {:<10} {}", kind.to_string(), mark);
            }
        }
        None => println!("No results saved yet."),
    }
    Ok(())
}

fn print_report(report: &OutcomeReport) {
    println!();
    println!("=== {} finished ===", report.test_name);
    println!("{}", report.summary);
    if report.profile_active {
        print_menu();
    } else {
        println!("Register with /register <id> <name> <age> to continue.");
    }
}

fn print_menu() {
    println!("Tests: corsi, stroop, reaction, fluency, rotation, raven");
    println!("Commands: /start <test>, /stop, /results, /reset, /menu, /quit");
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_digits_and_option_words_are_keys() {
        for word in ["1", "9", "retry", "press", "red", "green", "blue", "yellow"] {
            assert!(is_key_word(word), "{word} should be a key");
        }
    }

    #[test]
    fn test_typed_sequences_and_free_text_are_not_keys() {
        for word in ["12", "345", "cat", "1a", ""] {
            assert!(!is_key_word(word), "{word} should not be a key");
        }
    }
}
