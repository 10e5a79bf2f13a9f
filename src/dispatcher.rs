use std::sync::Arc;
use tracing::{debug, warn};

use crate::message::{Message, MessageKind};
use crate::provider::{ChatBackend, ChatError, ChatEvent, ChatTurn};
use crate::registry::ProviderRegistry;
use crate::store::ConversationStore;

/// Message prefix that requests image generation instead of a chat reply
pub const IMAGE_COMMAND: &str = "/image";

/// Drives one conversation: takes user input, calls the provider, and applies
/// the response to the store
///
/// All collaborators are handed in explicitly; there is no ambient chat
/// context. Provider failures never escape `send_message`: each one becomes a
/// synthetic assistant message.
pub struct ChatSession {
    store: Arc<ConversationStore>,
    backend: Arc<dyn ChatBackend>,
    registry: ProviderRegistry,
    image_test_mode: bool,
}

impl ChatSession {
    pub fn new(
        store: Arc<ConversationStore>,
        backend: Arc<dyn ChatBackend>,
        registry: ProviderRegistry,
        image_test_mode: bool,
    ) -> Self {
        Self {
            store,
            backend,
            registry,
            image_test_mode,
        }
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ProviderRegistry {
        &mut self.registry
    }

    /// Clear the conversation (the new-chat action)
    pub fn new_chat(&self) {
        self.store.clear();
    }

    /// Send one user message and apply the provider's response
    ///
    /// Whitespace-only input is ignored. A send while another dispatch is in
    /// flight is rejected as a no-op; the input control is expected to be
    /// disabled, so this is a guard against programmatic re-entry, not an
    /// error. Returns whether the message was dispatched.
    pub async fn send_message(&mut self, text: &str) -> bool {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return false;
        }

        // Claim the dispatch slot before mutating anything. The guard puts
        // the store back to Idle on every exit path below.
        let _guard = match self.store.begin_dispatch() {
            Ok(guard) => guard,
            Err(rejected) => {
                warn!(%rejected, "send_message ignored");
                return false;
            }
        };

        // The stored content is the input verbatim; trimming is only for the
        // emptiness check and command detection.
        self.store.append(Message::user(text));

        if let Some(prompt) = image_prompt(trimmed) {
            self.dispatch_image(prompt).await;
        } else {
            self.dispatch_chat().await;
        }
        true
    }

    /// Generate an image for the prompt and append it as an image message
    async fn dispatch_image(&self, prompt: &str) {
        if prompt.is_empty() {
            self.append_error(ChatError::EmptyImagePrompt);
            return;
        }

        let provider = self.registry.provider();
        match self
            .backend
            .generate_image(provider, prompt, self.image_test_mode)
            .await
        {
            Ok(reference) => {
                debug!(prompt, "image generated");
                self.store.append(Message::assistant_image(reference));
            }
            Err(e) => self.append_error(e),
        }
    }

    /// Stream a chat completion into a placeholder assistant message
    async fn dispatch_chat(&self) {
        let history = self.outgoing_history();
        let provider = self.registry.provider().to_string();
        let model = self
            .registry
            .selected_model()
            .unwrap_or_else(|| self.registry.model())
            .to_string();

        let mut rx = match self.backend.chat(&provider, &model, history).await {
            Ok(rx) => rx,
            Err(e) => {
                // The call never started, so there is no placeholder to
                // reuse; surface the failure as its own message.
                self.append_error(e);
                return;
            }
        };

        let placeholder = Message::assistant("");
        let placeholder_id = placeholder.id;
        self.store.append(placeholder);

        // The receiver is consumed sequentially, so deltas land in receipt
        // order and no two updates race.
        let mut content = String::new();
        while let Some(event) = rx.recv().await {
            match event {
                ChatEvent::TextDelta(delta) => {
                    content.push_str(&delta);
                    self.store.replace_content(placeholder_id, content.clone());
                }
                ChatEvent::StreamComplete => break,
                ChatEvent::StreamError(error) => {
                    self.store
                        .replace_content(placeholder_id, error_text(&ChatError::CallFailed(error)));
                    break;
                }
            }
        }
    }

    /// Outgoing history for the chat API: image messages carry opaque
    /// references the provider cannot consume, so they are excluded
    fn outgoing_history(&self) -> Vec<ChatTurn> {
        self.store
            .messages()
            .iter()
            .filter(|m| m.kind == MessageKind::Text)
            .map(|m| ChatTurn {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect()
    }

    fn append_error(&self, error: ChatError) {
        warn!(%error, "provider call failed");
        self.store.append(Message::assistant(error_text(&error)));
    }
}

/// Extract the image prompt when the input is the image command
///
/// Matches `/image` alone or `/image <prompt>`; a longer word sharing the
/// prefix (e.g. `/imagery`) is ordinary chat input.
fn image_prompt(input: &str) -> Option<&str> {
    let rest = input.strip_prefix(IMAGE_COMMAND)?;
    if rest.is_empty() || rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

/// User-visible wording for a recovered provider failure
fn error_text(error: &ChatError) -> String {
    match error {
        // Instructional, not an apology: the user just forgot the prompt.
        ChatError::EmptyImagePrompt => error.to_string(),
        other => format!("Sorry, I encountered an error: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use crate::provider::{ChatBackend, ChatError, ChatEvent, ChatTurn};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// What the scripted backend should do for a chat call
    enum ChatScript {
        Events(Vec<ChatEvent>),
        /// Deliver events from a spawned producer with a short pause before
        /// each one, so the stream stays in flight across await points
        Paced(Vec<ChatEvent>),
        Fail(fn() -> ChatError),
    }

    struct ScriptedBackend {
        chat_script: ChatScript,
        image_result: Result<String, fn() -> ChatError>,
        image_calls: AtomicUsize,
        seen_history: Mutex<Vec<ChatTurn>>,
        seen_image_provider: Mutex<Option<String>>,
    }

    impl ScriptedBackend {
        fn with_script(chat_script: ChatScript) -> Self {
            Self {
                chat_script,
                image_result: Ok("test-image://scripted".to_string()),
                image_calls: AtomicUsize::new(0),
                seen_history: Mutex::new(Vec::new()),
                seen_image_provider: Mutex::new(None),
            }
        }

        fn streaming(events: Vec<ChatEvent>) -> Self {
            Self::with_script(ChatScript::Events(events))
        }

        fn paced(events: Vec<ChatEvent>) -> Self {
            Self::with_script(ChatScript::Paced(events))
        }

        fn chat_unavailable() -> Self {
            Self::with_script(ChatScript::Fail(|| {
                ChatError::Unavailable("puter.js".to_string())
            }))
        }

        fn image_failing() -> Self {
            let mut backend = Self::with_script(ChatScript::Events(Vec::new()));
            backend.image_result = Err(|| ChatError::CallFailed("image service down".to_string()));
            backend
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn chat(
            &self,
            _provider: &str,
            _model: &str,
            history: Vec<ChatTurn>,
        ) -> Result<mpsc::Receiver<ChatEvent>, ChatError> {
            *self.seen_history.lock().unwrap() = history;
            match &self.chat_script {
                ChatScript::Fail(make) => Err(make()),
                ChatScript::Events(events) => {
                    let (tx, rx) = mpsc::channel(100);
                    for event in events.clone() {
                        tx.send(event).await.expect("scripted channel open");
                    }
                    Ok(rx)
                }
                ChatScript::Paced(events) => {
                    let (tx, rx) = mpsc::channel(1);
                    let events = events.clone();
                    tokio::spawn(async move {
                        for event in events {
                            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                    });
                    Ok(rx)
                }
            }
        }

        async fn generate_image(
            &self,
            provider: &str,
            _prompt: &str,
            _test_mode: bool,
        ) -> Result<String, ChatError> {
            self.image_calls.fetch_add(1, Ordering::SeqCst);
            *self.seen_image_provider.lock().unwrap() = Some(provider.to_string());
            match &self.image_result {
                Ok(reference) => Ok(reference.clone()),
                Err(make) => Err(make()),
            }
        }
    }

    fn session_with(backend: ScriptedBackend) -> (ChatSession, Arc<ScriptedBackend>) {
        let backend = Arc::new(backend);
        let session = ChatSession::new(
            Arc::new(ConversationStore::new()),
            Arc::clone(&backend) as Arc<dyn ChatBackend>,
            ProviderRegistry::new(),
            true,
        );
        (session, backend)
    }

    fn hello_stream() -> Vec<ChatEvent> {
        vec![
            ChatEvent::TextDelta("Hel".to_string()),
            ChatEvent::TextDelta("lo".to_string()),
            ChatEvent::StreamComplete,
        ]
    }

    #[tokio::test]
    async fn user_message_is_appended_before_the_response() {
        let (mut session, _) = session_with(ScriptedBackend::streaming(hello_stream()));
        assert!(session.send_message("Hi").await);

        let messages = session.store().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "Hi");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Hello");
    }

    #[tokio::test]
    async fn user_content_is_stored_verbatim() {
        let (mut session, _) = session_with(ScriptedBackend::streaming(hello_stream()));
        session.send_message("  Hi there  ").await;

        let messages = session.store().messages();
        assert_eq!(messages[0].content, "  Hi there  ");
    }

    #[tokio::test]
    async fn subscribers_observe_intermediate_placeholder_content() {
        let (mut session, _) = session_with(ScriptedBackend::paced(hello_stream()));
        let store = Arc::clone(session.store());
        let mut changes = store.subscribe();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_by_watcher = Arc::clone(&seen);
        let watcher_store = Arc::clone(&store);
        let watcher = tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                if let Some(message) = watcher_store
                    .messages()
                    .iter()
                    .rev()
                    .find(|m| m.role == Role::Assistant)
                {
                    seen_by_watcher.lock().unwrap().push(message.content.clone());
                }
                if !watcher_store.is_busy() {
                    break;
                }
            }
        });

        session.send_message("Hi").await;
        watcher.await.expect("watcher task");

        let seen = seen.lock().unwrap();
        assert!(
            seen.iter().any(|content| content == "Hel"),
            "no intermediate content observed: {seen:?}"
        );
        assert_eq!(seen.last().map(String::as_str), Some("Hello"));
    }

    #[tokio::test]
    async fn blank_input_is_a_no_op() {
        let (mut session, _) = session_with(ScriptedBackend::streaming(hello_stream()));
        assert!(!session.send_message("   \n").await);
        assert_eq!(session.store().message_count(), 0);
        assert!(!session.store().is_busy());
    }

    #[tokio::test]
    async fn busy_store_rejects_programmatic_re_entry() {
        let (mut session, _) = session_with(ScriptedBackend::streaming(hello_stream()));
        let guard = session.store().begin_dispatch().expect("claim slot");

        assert!(!session.send_message("Hi").await);
        assert_eq!(session.store().message_count(), 0);

        drop(guard);
        assert!(session.send_message("Hi").await);
        assert_eq!(session.store().message_count(), 2);
    }

    #[tokio::test]
    async fn dispatch_slot_is_released_after_completion_and_failure() {
        let (mut session, _) = session_with(ScriptedBackend::streaming(hello_stream()));
        session.send_message("Hi").await;
        assert!(!session.store().is_busy());

        let (mut session, _) = session_with(ScriptedBackend::chat_unavailable());
        session.send_message("Hi").await;
        assert!(!session.store().is_busy());
    }

    #[tokio::test]
    async fn empty_image_prompt_appends_instruction_without_calling_provider() {
        let (mut session, backend) = session_with(ScriptedBackend::streaming(Vec::new()));
        session.send_message("/image ").await;

        let messages = session.store().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].kind, MessageKind::Text);
        assert_eq!(
            messages[1].content,
            "Please provide a prompt after the /image command."
        );
        assert_eq!(backend.image_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn image_command_appends_an_image_message() {
        let (mut session, backend) = session_with(ScriptedBackend::streaming(Vec::new()));
        session.send_message("/image a cat in a hat").await;

        let messages = session.store().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].kind, MessageKind::Image);
        assert_eq!(messages[1].content, "test-image://scripted");
        assert_eq!(backend.image_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn image_failure_becomes_an_assistant_text_message() {
        let (mut session, _) = session_with(ScriptedBackend::image_failing());
        session.send_message("/image a cat").await;

        let messages = session.store().messages();
        assert_eq!(messages[1].kind, MessageKind::Text);
        assert!(messages[1].content.starts_with("Sorry, I encountered an error:"));
        assert!(messages[1].content.contains("image service down"));
    }

    #[tokio::test]
    async fn unavailable_provider_appends_error_without_placeholder() {
        let (mut session, _) = session_with(ScriptedBackend::chat_unavailable());
        session.send_message("Hi").await;

        let messages = session.store().messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[1].content.starts_with("Sorry, I encountered an error:"));
        assert!(messages[1].content.contains("puter.js"));
    }

    #[tokio::test]
    async fn stream_error_replaces_the_placeholder_content() {
        let (mut session, _) = session_with(ScriptedBackend::streaming(vec![
            ChatEvent::TextDelta("partial".to_string()),
            ChatEvent::StreamError("connection reset".to_string()),
        ]));
        session.send_message("Hi").await;

        let messages = session.store().messages();
        assert_eq!(messages.len(), 2);
        assert!(messages[1].content.contains("connection reset"));
        assert!(!messages[1].content.contains("partial"));
    }

    #[tokio::test]
    async fn outgoing_history_excludes_image_messages() {
        let (mut session, backend) = session_with(ScriptedBackend::streaming(hello_stream()));
        session
            .store()
            .append(Message::assistant_image("test-image://earlier"));

        session.send_message("describe it").await;

        let seen = backend.seen_history.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].role, "user");
        assert_eq!(seen[0].content, "describe it");
    }

    #[tokio::test]
    async fn image_generation_uses_the_selected_provider() {
        let (mut session, backend) = session_with(ScriptedBackend::streaming(Vec::new()));
        session.registry_mut().set_provider("openrouter");

        session.send_message("/image a cat").await;

        assert_eq!(
            backend.seen_image_provider.lock().unwrap().as_deref(),
            Some("openrouter")
        );
    }

    #[tokio::test]
    async fn image_prefix_must_be_a_whole_word() {
        let (mut session, backend) = session_with(ScriptedBackend::streaming(hello_stream()));
        session.send_message("/imagery is a nice word").await;

        assert_eq!(backend.image_calls.load(Ordering::SeqCst), 0);
        let messages = session.store().messages();
        assert_eq!(messages[1].kind, MessageKind::Text);
        assert_eq!(messages[1].content, "Hello");
    }

    #[tokio::test]
    async fn new_chat_clears_the_store() {
        let (mut session, _) = session_with(ScriptedBackend::streaming(hello_stream()));
        session.send_message("Hi").await;
        assert!(session.store().message_count() > 0);

        session.new_chat();
        assert_eq!(session.store().message_count(), 0);
    }
}
