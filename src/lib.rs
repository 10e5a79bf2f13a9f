//! palaver: terminal chat client with pluggable AI providers
//!
//! The core is an in-memory conversation-state manager: the
//! [`store::ConversationStore`] holds the message list and the single-slot
//! dispatch token, the [`dispatcher::ChatSession`] drives provider calls and
//! streams responses into the store, [`history::segment`] derives a grouped
//! chat-history view, and the [`registry::ProviderRegistry`] tracks the
//! selected provider and model.

pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod history;
pub mod message;
pub mod provider;
pub mod registry;
pub mod store;
