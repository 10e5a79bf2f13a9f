use std::str::FromStr;

use strum::{AsRefStr, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/// Commands that can be invoked by starting a message with a leading slash.
///
/// `/image` is deliberately absent: it is a message prefix handled by the
/// dispatcher, so it flows through `send_message` untouched.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, AsRefStr, IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum SlashCommand {
    /// Start a new chat, clearing the conversation
    New,
    /// Select a provider, or add it as a custom provider first
    Provider,
    /// Select a model, or add it as a custom model first
    Model,
    /// List known providers
    Providers,
    /// List models for the selected provider
    Models,
    /// Show the chat history grouped by conversation
    History,
    /// Show help
    Help,
    /// Exit the application
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: SlashCommand,
    pub argument: Option<String>,
}

impl ParsedCommand {
    pub fn argument(&self) -> Option<&str> {
        self.argument.as_deref()
    }
}

impl SlashCommand {
    /// User-visible description shown in help.
    pub fn description(self) -> &'static str {
        match self {
            SlashCommand::New => "start a new chat",
            SlashCommand::Provider => "switch to a provider (adds unknown names as custom)",
            SlashCommand::Model => "switch to a model (adds unknown names as custom)",
            SlashCommand::Providers => "list known providers",
            SlashCommand::Models => "list models for the selected provider",
            SlashCommand::History => "show chat history grouped by conversation",
            SlashCommand::Help => "show available commands",
            SlashCommand::Quit => "exit the application",
        }
    }

    /// Command string without the leading '/'.
    pub fn command(self) -> &'static str {
        self.into()
    }
}

/// Return all built-in commands paired with their command string.
pub fn built_in_slash_commands() -> Vec<(&'static str, SlashCommand)> {
    SlashCommand::iter().map(|c| (c.command(), c)).collect()
}

/// Parse a slash command from user input
///
/// Returns None for plain messages and for unknown slash words, which are
/// both sent to the provider as-is (that is how `/image` reaches the
/// dispatcher).
pub fn parse_slash_command(input: &str) -> Option<ParsedCommand> {
    let input = input.trim();
    if !input.starts_with('/') {
        return None;
    }

    let mut parts = input[1..].split_whitespace();
    let head = parts.next()?;
    let rest: Vec<String> = parts.map(|s| s.to_string()).collect();

    let command = SlashCommand::from_str(head)
        .ok()
        .or_else(|| match head.to_lowercase().as_str() {
            "q" | "exit" | "bye" => Some(SlashCommand::Quit),
            "clear" => Some(SlashCommand::New),
            "h" => Some(SlashCommand::Help),
            _ => None,
        })?;

    let argument = if rest.is_empty() {
        None
    } else {
        Some(rest.join(" "))
    };

    Some(ParsedCommand { command, argument })
}

/// Get help text for all available commands
pub fn get_help_text() -> String {
    let mut help = String::from("Available commands:\n\n");
    for (command_str, command) in built_in_slash_commands() {
        help.push_str(&format!("/{} - {}\n", command_str, command.description()));
    }
    help.push_str("\nUse /image <prompt> in a message to generate an image.");
    help
}
