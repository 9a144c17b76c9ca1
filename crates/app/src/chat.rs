//! Chat stream coordination.
//!
//! `send` records the user's message synchronously, then hands the
//! network work to a background task. The task folds each delta into a
//! [`StreamSession`], republishes the whole text so far, and saves the
//! assistant reply only once the stream has ended cleanly.

use providers::CompletionService;
use services::MessageStore;
use shared::agent_api::{ChatMessage, ChatRequest, StreamChunk};
use shared::events::{SessionId, UiUpdate};
use shared::message::Role;
use shared::settings::clamp_temperature;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

use crate::display::UpdateSender;
use crate::task::{Dispatch, TaskSlot};

/// Accumulated reply text for one in-flight request.
pub struct StreamSession {
    id: SessionId,
    text: String,
    chunks: usize,
}

impl StreamSession {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            text: String::new(),
            chunks: 0,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn push(&mut self, delta: &str) {
        self.text.push_str(delta);
        self.chunks += 1;
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

pub struct ChatCoordinator {
    store: MessageStore,
    service: Arc<dyn CompletionService>,
    updates: UpdateSender,
    slot: TaskSlot,
}

impl ChatCoordinator {
    pub fn new(
        store: MessageStore,
        service: Arc<dyn CompletionService>,
        updates: UpdateSender,
        runtime: Handle,
    ) -> Self {
        Self {
            store,
            service,
            updates,
            slot: TaskSlot::new(runtime),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.slot.is_busy()
    }

    /// Submit `user_text`. Returns immediately; progress arrives on the update queue.
    pub fn send(&self, user_text: &str, model_id: &str, temperature: f32) -> Dispatch {
        if user_text.trim().is_empty() {
            return Dispatch::Ignored;
        }
        if self.slot.is_busy() {
            self.updates
                .status("A response is still streaming; wait for it or cancel it first");
            return Dispatch::Busy;
        }

        // The user's own text is saved and shown before any network work.
        if let Err(e) = self.store.append(Role::User, user_text) {
            tracing::warn!("failed to save user message: {:#}", e);
            self.updates.status(format!("Error saving message: {}", e));
        }
        self.updates.send(UiUpdate::MessageAdded {
            role: Role::User,
            content: user_text.to_string(),
        });

        // Each request carries only the latest user message; no history is replayed.
        let request = ChatRequest {
            messages: vec![ChatMessage::user(user_text)],
            model: model_id.to_string(),
            temperature: clamp_temperature(temperature),
        };
        let session = StreamSession::new(SessionId::new());
        let id = session.id();

        let work = run_stream(
            session,
            request,
            self.service.clone(),
            self.store.clone(),
            self.updates.clone(),
        );
        let updates = self.updates.clone();
        let on_abort = move || {
            tracing::info!(session = %id, "chat request cancelled");
            updates.send(UiUpdate::StreamAborted { session: id });
            updates.status("Request cancelled");
        };

        match self.slot.spawn(work, on_abort) {
            Some(handle) => Dispatch::Started(handle),
            None => Dispatch::Busy,
        }
    }

    /// Stop the in-flight request, if any. Nothing is saved for it.
    pub fn cancel(&self) -> bool {
        self.slot.cancel()
    }
}

async fn run_stream(
    mut session: StreamSession,
    request: ChatRequest,
    service: Arc<dyn CompletionService>,
    store: MessageStore,
    updates: UpdateSender,
) {
    let id = session.id();
    tracing::info!(session = %id, model = %request.model, "chat request started");
    updates.send(UiUpdate::StreamStarted { session: id });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let producer = service.stream_chat(request, tx);
    let consumer = async {
        while let Some(chunk) = rx.recv().await {
            match chunk {
                StreamChunk::Text(delta) => {
                    session.push(&delta);
                    updates.send(UiUpdate::StreamText {
                        session: id,
                        text: session.text().to_string(),
                    });
                }
                StreamChunk::Done { stop_reason } => {
                    tracing::debug!(session = %id, ?stop_reason, "stream done");
                    return None;
                }
                StreamChunk::Error(message) => return Some(message),
            }
        }
        None
    };
    let (result, stream_error) = tokio::join!(producer, consumer);

    let failure = match result {
        Err(e) => Some(format!("{:#}", e)),
        Ok(()) => stream_error,
    };
    if let Some(message) = failure {
        tracing::warn!(session = %id, "chat stream failed: {}", message);
        updates.send(UiUpdate::StreamAborted { session: id });
        updates.status(format!("API Error: {}", message));
        return;
    }

    tracing::info!(session = %id, chunks = session.chunks, "chat stream finished");
    if let Err(e) = store.append(Role::Assistant, session.text()) {
        tracing::warn!(session = %id, "failed to save response: {:#}", e);
        updates.status(format!("Error saving response: {}", e));
    }
    updates.send(UiUpdate::StreamFinished { session: id });
}
