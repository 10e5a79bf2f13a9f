use crate::message::Message;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::watch;
use uuid::Uuid;

/// Dispatch state of the conversation
///
/// Exactly one dispatch may be in flight at a time. The state machine replaces
/// a bare busy boolean so re-entrant sends are rejected at one well-defined
/// point instead of relying on the front-end to disable its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Idle,
    Sending,
}

/// Returned when a dispatch is requested while another is in flight
#[derive(Debug, Error, PartialEq, Eq)]
#[error("a message dispatch is already in flight")]
pub struct SendRejected;

struct StoreInner {
    messages: Vec<Message>,
    state: DispatchState,
}

/// In-memory conversation store
///
/// Holds the ordered message list and the dispatch state machine. Shared via
/// `Arc` between the dispatcher and any front-end; every mutation bumps a
/// watch revision so subscribers can redraw on change. Mutations are short
/// synchronous critical sections and the lock is never held across an await.
pub struct ConversationStore {
    inner: Mutex<StoreInner>,
    revision: watch::Sender<u64>,
}

impl ConversationStore {
    pub fn new() -> Self {
        let (revision, _) = watch::channel(0);
        Self {
            inner: Mutex::new(StoreInner {
                messages: Vec::new(),
                state: DispatchState::Idle,
            }),
            revision,
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().expect("conversation store lock poisoned")
    }

    /// Bump the revision counter, waking subscribers
    fn notify(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }

    /// Subscribe to store changes; the value is an opaque revision counter
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.subscribe()
    }

    /// Append a message to the conversation
    pub fn append(&self, message: Message) {
        self.lock().messages.push(message);
        self.notify();
    }

    /// Replace the content of an existing message in place
    ///
    /// Used by the dispatcher to grow the streaming placeholder. Returns
    /// false when no message with the given id exists.
    pub fn replace_content(&self, id: Uuid, new_content: String) -> bool {
        let mut inner = self.lock();
        let Some(message) = inner.messages.iter_mut().find(|m| m.id == id) else {
            return false;
        };
        message.content = new_content;
        drop(inner);
        self.notify();
        true
    }

    /// Remove every message (the new-chat action)
    pub fn clear(&self) {
        self.lock().messages.clear();
        self.notify();
    }

    /// Replace the whole message list
    pub fn restore(&self, messages: Vec<Message>) {
        self.lock().messages = messages;
        self.notify();
    }

    /// Snapshot of the current message list
    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    pub fn message_count(&self) -> usize {
        self.lock().messages.len()
    }

    /// Whether a dispatch is currently in flight
    pub fn is_busy(&self) -> bool {
        self.lock().state == DispatchState::Sending
    }

    /// Claim the single dispatch slot
    ///
    /// Transitions Idle -> Sending, or rejects when a dispatch is already in
    /// flight. The returned guard restores Idle on drop, so the slot is
    /// released on every exit path.
    pub fn begin_dispatch(self: &Arc<Self>) -> Result<DispatchGuard, SendRejected> {
        {
            let mut inner = self.lock();
            if inner.state == DispatchState::Sending {
                return Err(SendRejected);
            }
            inner.state = DispatchState::Sending;
        }
        self.notify();
        Ok(DispatchGuard {
            store: Arc::clone(self),
        })
    }
}

impl Default for ConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Scoped token for the single in-flight dispatch
pub struct DispatchGuard {
    store: Arc<ConversationStore>,
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        self.store.lock().state = DispatchState::Idle;
        self.store.notify();
    }
}
