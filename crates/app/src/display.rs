//! The single-consumer update queue and the state it drives.
//!
//! Background tasks only ever hold an [`UpdateSender`]. The UI loop owns
//! the [`UpdateQueue`] and is the only code that mutates [`DisplayState`].

use shared::events::{ImageHandle, SessionId, UiUpdate};
use shared::message::{Message, Role};
use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

#[derive(Clone)]
pub struct UpdateSender {
    tx: UnboundedSender<UiUpdate>,
}

impl UpdateSender {
    pub fn send(&self, update: UiUpdate) {
        if self.tx.send(update).is_err() {
            tracing::debug!("update dropped: UI loop has exited");
        }
    }

    pub fn status(&self, message: impl Into<String>) {
        self.send(UiUpdate::status(message));
    }
}

pub struct UpdateQueue {
    rx: UnboundedReceiver<UiUpdate>,
}

impl UpdateQueue {
    pub fn new() -> (UpdateSender, UpdateQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (UpdateSender { tx }, UpdateQueue { rx })
    }

    /// Apply every update that is already queued, without waiting.
    /// Returns how many were applied.
    pub fn drain_into(&mut self, state: &mut DisplayState) -> usize {
        let mut applied = 0;
        while let Some(update) = self.try_next() {
            state.apply(update);
            applied += 1;
        }
        applied
    }

    /// Next queued update, if one is already waiting.
    pub fn try_next(&mut self) -> Option<UiUpdate> {
        match self.rx.try_recv() {
            Ok(update) => Some(update),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    pub async fn recv(&mut self) -> Option<UiUpdate> {
        self.rx.recv().await
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DisplayLine {
    pub role: Role,
    pub content: String,
    /// The reply stopped early and was not saved
    pub interrupted: bool,
}

#[derive(Default)]
pub struct DisplayState {
    pub lines: Vec<DisplayLine>,
    live: Vec<(SessionId, String)>,
    pub status: Option<String>,
    pub image_busy: bool,
    pub image: Option<ImageHandle>,
}

impl DisplayState {
    /// Load the saved conversation at startup.
    pub fn rehydrate(&mut self, history: &[Message]) {
        self.lines.extend(history.iter().map(|m| DisplayLine {
            role: m.role,
            content: m.content.clone(),
            interrupted: false,
        }));
    }

    pub fn is_streaming(&self) -> bool {
        !self.live.is_empty()
    }

    pub fn apply(&mut self, update: UiUpdate) {
        match update {
            UiUpdate::MessageAdded { role, content } => self.lines.push(DisplayLine {
                role,
                content,
                interrupted: false,
            }),
            UiUpdate::StreamStarted { session } => self.set_live(session, String::new()),
            UiUpdate::StreamText { session, text } => self.set_live(session, text),
            UiUpdate::StreamFinished { session } => {
                let text = self.take_live(session).unwrap_or_default();
                self.lines.push(DisplayLine {
                    role: Role::Assistant,
                    content: text,
                    interrupted: false,
                });
            }
            UiUpdate::StreamAborted { session } => {
                if let Some(text) = self.take_live(session).filter(|t| !t.is_empty()) {
                    self.lines.push(DisplayLine {
                        role: Role::Assistant,
                        content: text,
                        interrupted: true,
                    });
                }
            }
            UiUpdate::Status(message) => self.status = Some(message),
            UiUpdate::ImageBusy(busy) => self.image_busy = busy,
            UiUpdate::ImageReady(handle) => self.image = Some(handle),
        }
    }

    fn set_live(&mut self, session: SessionId, text: String) {
        match self.live.iter_mut().find(|(id, _)| *id == session) {
            Some((_, current)) => *current = text,
            None => self.live.push((session, text)),
        }
    }

    fn take_live(&mut self, session: SessionId) -> Option<String> {
        let idx = self.live.iter().position(|(id, _)| *id == session)?;
        Some(self.live.remove(idx).1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_lifecycle() {
        let (tx, mut queue) = UpdateQueue::new();
        let mut state = DisplayState::default();
        let session = SessionId::new();

        tx.send(UiUpdate::MessageAdded {
            role: Role::User,
            content: "Hello".into(),
        });
        tx.send(UiUpdate::StreamStarted { session });
        tx.send(UiUpdate::StreamText {
            session,
            text: "Hi".into(),
        });
        assert_eq!(queue.drain_into(&mut state), 3);
        assert!(state.is_streaming());
        assert_eq!(state.lines.len(), 1);

        tx.send(UiUpdate::StreamText {
            session,
            text: "Hi there".into(),
        });
        tx.send(UiUpdate::StreamFinished { session });
        queue.drain_into(&mut state);

        assert!(!state.is_streaming());
        let contents: Vec<&str> = state.lines.iter().map(|l| l.content.as_str()).collect();
        assert_eq!(contents, vec!["Hello", "Hi there"]);
        assert_eq!(queue.drain_into(&mut state), 0);
    }

    #[test]
    fn test_aborted_stream_keeps_partial_text_marked() {
        let mut state = DisplayState::default();
        let session = SessionId::new();
        state.apply(UiUpdate::StreamStarted { session });
        state.apply(UiUpdate::StreamText {
            session,
            text: "partial".into(),
        });
        state.apply(UiUpdate::StreamAborted { session });

        assert_eq!(state.lines.len(), 1);
        assert!(state.lines[0].interrupted);

        let empty = SessionId::new();
        state.apply(UiUpdate::StreamStarted { session: empty });
        state.apply(UiUpdate::StreamAborted { session: empty });
        assert_eq!(state.lines.len(), 1);
    }

    #[test]
    fn test_status_and_image_flags() {
        let mut state = DisplayState::default();
        state.apply(UiUpdate::ImageBusy(true));
        state.apply(UiUpdate::status("working"));
        assert!(state.image_busy);
        assert_eq!(state.status.as_deref(), Some("working"));
        state.apply(UiUpdate::ImageBusy(false));
        assert!(!state.image_busy);
        assert!(state.image.is_none());
    }

    #[test]
    fn test_drain_after_senders_dropped() {
        let (tx, mut queue) = UpdateQueue::new();
        tx.status("last words");
        drop(tx);
        let mut state = DisplayState::default();
        assert_eq!(queue.drain_into(&mut state), 1);
        assert_eq!(state.status.as_deref(), Some("last words"));
    }
}
