use crate::message::{Message, MessageKind, Role};
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Preview text shown when the latest message in a group is an image
pub const IMAGE_PREVIEW: &str = "[generated image]";

const TITLE_LIMIT: usize = 30;
const PREVIEW_LIMIT: usize = 60;

/// Derived, display-only grouping of messages into one user turn
///
/// This is not a persisted conversation: it has no stable identity beyond the
/// message list it was derived from, and is recomputed on every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationView {
    /// Id of the user message that opened the group
    pub id: Uuid,
    pub title: String,
    pub preview: String,
    /// Synthesized timestamp, stepped back one hour per older group
    pub started_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

/// Segment the flat message list into conversation views, most recent first
///
/// Single linear pass: each user-role message closes the previous group and
/// opens a new one; trailing assistant/system messages join the open group
/// and update its preview. Messages before the first user message belong to
/// no group and are skipped. Pure and idempotent given the same reference
/// time.
pub fn segment(messages: &[Message], now: DateTime<Utc>) -> Vec<ConversationView> {
    let mut groups: Vec<ConversationView> = Vec::new();
    let mut open: Option<ConversationView> = None;

    for message in messages {
        match message.role {
            Role::User => {
                if let Some(group) = open.take() {
                    groups.push(group);
                }
                open = Some(ConversationView {
                    id: message.id,
                    title: truncate(&message.content, TITLE_LIMIT),
                    preview: preview_of(message),
                    started_at: now,
                    messages: vec![message.clone()],
                });
            }
            Role::Assistant | Role::System => {
                if let Some(group) = open.as_mut() {
                    group.preview = preview_of(message);
                    group.messages.push(message.clone());
                }
            }
        }
    }
    if let Some(group) = open.take() {
        groups.push(group);
    }

    // Most recent first, with synthesized timestamps stepping back in time.
    groups.reverse();
    for (index, group) in groups.iter_mut().enumerate() {
        group.started_at = now - Duration::hours(index as i64);
    }
    groups
}

fn preview_of(message: &Message) -> String {
    match message.kind {
        MessageKind::Image => IMAGE_PREVIEW.to_string(),
        MessageKind::Text => truncate(&message.content, PREVIEW_LIMIT),
    }
}

/// Truncate to a character prefix, marking the cut with an ellipsis
fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        let prefix: String = text.chars().take(limit).collect();
        format!("{}...", prefix)
    }
}
