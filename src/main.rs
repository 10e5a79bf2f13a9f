use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;

use palaver::commands::{SlashCommand, get_help_text, parse_slash_command};
use palaver::config::Config;
use palaver::dispatcher::ChatSession;
use palaver::history::segment;
use palaver::message::{MessageKind, Role};
use palaver::provider::HttpBackend;
use palaver::registry::ProviderRegistry;
use palaver::store::ConversationStore;

#[derive(Parser)]
#[command(name = "palaver")]
#[command(version = "0.1.0")]
#[command(about = "Terminal chat client with pluggable AI providers", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List providers and their models
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Some(Commands::Models) => {
            list_models(&config);
            Ok(())
        }
        None => run_repl(config).await,
    }
}

fn list_models(config: &Config) {
    let registry = ProviderRegistry::with_selection(
        config.default_provider.clone(),
        config.default_model.clone(),
    );
    println!("📋 Known providers and models:\n");
    for provider in registry.providers() {
        let mut view = registry.clone();
        view.set_provider(provider.clone());
        println!("  {}", provider);
        for model in view.available_models() {
            println!("    • {}", model);
        }
    }
}

async fn run_repl(config: Config) -> Result<()> {
    let registry = ProviderRegistry::with_selection(
        config.default_provider.clone(),
        config.default_model.clone(),
    );
    let image_test_mode = config.image_test_mode;
    let backend = HttpBackend::new(config)?;
    let store = Arc::new(ConversationStore::new());
    let mut session = ChatSession::new(store, Arc::new(backend), registry, image_test_mode);

    println!("💬 palaver — type a message, /help for commands, /quit to leave");
    print_selection(&session);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("❯ ");
        io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        match parse_slash_command(&line) {
            Some(parsed) => {
                if handle_command(&mut session, parsed.command, parsed.argument()) {
                    break;
                }
            }
            None => {
                print!("🤖 ");
                io::stdout().flush()?;
                // Print deltas as the store changes, so the response appears
                // while the stream is still running.
                let printer = spawn_delta_printer(Arc::clone(session.store()));
                if session.send_message(&line).await {
                    let _ = printer.await;
                    finish_response(&session);
                } else {
                    printer.abort();
                    println!();
                }
            }
        }
    }

    println!("👋 Bye!");
    Ok(())
}

/// Watch the store and print each grown suffix of the trailing assistant
/// message; exits once the dispatch slot goes back to idle
fn spawn_delta_printer(store: Arc<ConversationStore>) -> JoinHandle<()> {
    let mut changes = store.subscribe();
    tokio::spawn(async move {
        let mut printed = String::new();
        loop {
            if changes.changed().await.is_err() {
                break;
            }
            let busy = store.is_busy();
            let latest = store
                .messages()
                .into_iter()
                .rev()
                .find(|m| m.role == Role::Assistant && m.kind == MessageKind::Text);
            if let Some(message) = latest {
                let content = message.content;
                if let Some(suffix) = content.strip_prefix(printed.as_str()) {
                    if !suffix.is_empty() {
                        print!("{suffix}");
                        let _ = io::stdout().flush();
                    }
                } else {
                    // Content was replaced wholesale (stream failure).
                    print!("\n{content}");
                    let _ = io::stdout().flush();
                }
                printed = content;
            }
            if !busy {
                break;
            }
        }
    })
}

/// Handle one REPL command; returns true when the loop should exit
fn handle_command(session: &mut ChatSession, command: SlashCommand, argument: Option<&str>) -> bool {
    match command {
        SlashCommand::Quit => return true,
        SlashCommand::New => {
            session.new_chat();
            println!("🆕 Started a new chat.");
        }
        SlashCommand::Help => println!("{}", get_help_text()),
        SlashCommand::Provider => match argument {
            Some(name) => {
                session.registry_mut().add_custom_provider(name);
                session.registry_mut().set_provider(name.trim());
                print_selection(session);
            }
            None => println!("Usage: /provider <name>"),
        },
        SlashCommand::Model => match argument {
            Some(name) => {
                if !session.registry_mut().add_custom_model(name) {
                    session.registry_mut().set_model(name.trim());
                }
                print_selection(session);
            }
            None => println!("Usage: /model <name>"),
        },
        SlashCommand::Providers => {
            for provider in session.registry().providers() {
                println!("  • {}", provider);
            }
        }
        SlashCommand::Models => {
            let models = session.registry().available_models();
            if models.is_empty() {
                println!("No models known for this provider; add one with /model <name>.");
            } else {
                for model in models {
                    println!("  • {}", model);
                }
            }
        }
        SlashCommand::History => print_history(session),
    }
    false
}

fn print_selection(session: &ChatSession) {
    let registry = session.registry();
    match registry.selected_model() {
        Some(model) => println!("🎯 Provider: {} · Model: {}", registry.provider(), model),
        None => println!(
            "🎯 Provider: {} · Model: (none selected, /models to list)",
            registry.provider()
        ),
    }
}

/// Close out a response after the delta printer has drained: text responses
/// just need the trailing newline, image responses were never streamed
fn finish_response(session: &ChatSession) {
    let messages = session.store().messages();
    let Some(message) = messages.iter().rev().find(|m| m.role == Role::Assistant) else {
        println!();
        return;
    };
    match message.kind {
        MessageKind::Text => println!(),
        MessageKind::Image => println!("🖼️  {}", message.content),
    }
}

fn print_history(session: &ChatSession) {
    let messages = session.store().messages();
    let views = segment(&messages, Utc::now());
    if views.is_empty() {
        println!("No chat history found");
        return;
    }
    for view in views {
        println!("📝 {}", view.title);
        println!("   {}", view.preview);
        println!("   {}", view.started_at.format("%Y-%m-%d %H:%M"));
    }
}
