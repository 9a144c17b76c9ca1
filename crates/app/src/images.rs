//! Image generation and export.

use base64::prelude::{Engine as _, BASE64_STANDARD};
use parking_lot::Mutex;
use providers::ImageService;
use services::image_cache::{ensure_png_extension, ImageCache};
use shared::agent_api::ImageRequest;
use shared::events::{ImageHandle, UiUpdate};
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::Handle;

use crate::display::UpdateSender;
use crate::task::{Dispatch, TaskSlot};

/// Where an image request failed. `Display` is the status line shown to the user.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("Image Generation Error: {0:#}")]
    Request(anyhow::Error),

    #[error("Image Decode Error: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("Error creating image: {0}")]
    Render(#[from] image::ImageError),

    #[error("File Error: {0:#}")]
    File(anyhow::Error),

    #[error("Image worker stopped: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("Image generation cancelled")]
    Cancelled,
}

#[derive(Default)]
struct Tickets {
    current: u64,
    committed: u64,
}

/// Orders cache writes against cancel and shutdown. A request writes the
/// cache only while its ticket is current, and the check and the write
/// happen under one lock.
#[derive(Default)]
struct CacheGate {
    tickets: Mutex<Tickets>,
}

impl CacheGate {
    fn issue(&self) -> u64 {
        let mut tickets = self.tickets.lock();
        tickets.current += 1;
        tickets.current
    }

    /// Invalidate the current ticket. False once its image is already cached:
    /// that result is on its way to the display and is not withdrawn.
    fn revoke(&self) -> bool {
        let mut tickets = self.tickets.lock();
        if tickets.committed == tickets.current {
            return false;
        }
        tickets.current += 1;
        true
    }

    fn store(&self, ticket: u64, cache: &ImageCache, bytes: &[u8]) -> Result<(), ImageError> {
        let mut tickets = self.tickets.lock();
        if tickets.current != ticket {
            return Err(ImageError::Cancelled);
        }
        cache.store(bytes).map_err(ImageError::File)?;
        tickets.committed = ticket;
        Ok(())
    }

    /// Invalidate every ticket and remove the cache file.
    fn close(&self, cache: &ImageCache) -> anyhow::Result<()> {
        let mut tickets = self.tickets.lock();
        tickets.current += 1;
        cache.clear()
    }
}

pub struct ImageCoordinator {
    service: Arc<dyn ImageService>,
    cache: Arc<ImageCache>,
    gate: Arc<CacheGate>,
    updates: UpdateSender,
    model: String,
    generation: TaskSlot,
    export: TaskSlot,
}

impl ImageCoordinator {
    pub fn new(
        service: Arc<dyn ImageService>,
        cache: Arc<ImageCache>,
        updates: UpdateSender,
        runtime: Handle,
        model: impl Into<String>,
    ) -> Self {
        Self {
            service,
            cache,
            gate: Arc::default(),
            updates,
            model: model.into(),
            generation: TaskSlot::new(runtime.clone()),
            export: TaskSlot::new(runtime),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.generation.is_busy()
    }

    /// Request one image for `prompt`. The result replaces the cached image
    /// only if every stage succeeds.
    pub fn generate(&self, prompt: &str) -> Dispatch {
        if prompt.trim().is_empty() {
            return Dispatch::Ignored;
        }
        if self.generation.is_busy() {
            self.updates.status("An image is already being generated");
            return Dispatch::Busy;
        }

        self.updates.send(UiUpdate::ImageBusy(true));
        let request = ImageRequest {
            prompt: prompt.to_string(),
            model: self.model.clone(),
        };
        let service = self.service.clone();
        let cache = self.cache.clone();
        let gate = self.gate.clone();
        let ticket = gate.issue();
        let updates = self.updates.clone();
        let work = async move {
            tracing::info!(model = %request.model, "image request started");
            match produce(service, cache, gate, ticket, request).await {
                Ok(handle) => {
                    tracing::info!(width = handle.width, height = handle.height, "image ready");
                    updates.send(UiUpdate::ImageReady(handle));
                    updates.status("Image generated successfully");
                }
                Err(e) => {
                    tracing::warn!("image request failed: {}", e);
                    updates.status(e.to_string());
                }
            }
            updates.send(UiUpdate::ImageBusy(false));
        };

        let updates = self.updates.clone();
        let on_abort = move || {
            updates.send(UiUpdate::ImageBusy(false));
            updates.status("Image generation cancelled");
        };
        match self.generation.spawn(work, on_abort) {
            Some(handle) => Dispatch::Started(handle),
            None => Dispatch::Busy,
        }
    }

    /// Abort the running generation. Returns false when there is none, or
    /// when its image has already replaced the cache.
    pub fn cancel(&self) -> bool {
        if !self.generation.is_busy() || !self.gate.revoke() {
            return false;
        }
        self.generation.cancel()
    }

    /// Copy the cached image to `dest` (`.png` appended if missing).
    pub fn save(&self, dest: &Path) -> Dispatch {
        if dest.as_os_str().is_empty() {
            return Dispatch::Ignored;
        }
        if !self.cache.exists() {
            self.updates.status("No image to save");
            return Dispatch::Ignored;
        }
        if self.export.is_busy() {
            self.updates.status("An image is already being saved");
            return Dispatch::Busy;
        }

        let dest = ensure_png_extension(dest);
        let cache = self.cache.clone();
        let updates = self.updates.clone();
        let work = async move {
            let target = dest.clone();
            let result = tokio::task::spawn_blocking(move || cache.export(&target)).await;
            match result {
                Ok(Ok(saved)) => {
                    tracing::info!("image saved to {:?}", saved);
                    updates.status(format!("Image saved to: {}", saved.display()));
                }
                Ok(Err(e)) => {
                    tracing::warn!("image save to {:?} failed: {:#}", dest, e);
                    updates.status(format!("Error saving image: {:#}", e));
                }
                Err(e) => updates.status(format!("Error saving image: {}", e)),
            }
        };
        match self.export.spawn(work, || {}) {
            Some(handle) => Dispatch::Started(handle),
            None => Dispatch::Busy,
        }
    }

    /// Stop background work and drop the cached image.
    pub fn shutdown(&self) {
        self.generation.cancel();
        if let Err(e) = self.gate.close(&self.cache) {
            tracing::warn!("failed to remove cached image: {:#}", e);
        }
    }
}

async fn produce(
    service: Arc<dyn ImageService>,
    cache: Arc<ImageCache>,
    gate: Arc<CacheGate>,
    ticket: u64,
    request: ImageRequest,
) -> Result<ImageHandle, ImageError> {
    let payload = service
        .generate_image(request)
        .await
        .map_err(ImageError::Request)?;

    // Decoding and the disk write are blocking work. An abort cannot stop
    // this closure, so the gate decides whether its write still lands.
    tokio::task::spawn_blocking(move || -> Result<ImageHandle, ImageError> {
        let bytes = BASE64_STANDARD.decode(payload.trim())?;
        let handle = ImageHandle::from_encoded(bytes)?;
        gate.store(ticket, &cache, &handle.encoded)?;
        Ok(handle)
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::{DisplayState, UpdateQueue};
    use anyhow::{anyhow, Result};
    use std::fs;
    use tempfile::TempDir;
    use tokio::sync::Notify;

    enum Reply {
        Payload(String),
        Fail(&'static str),
        Gated(Arc<Notify>, String),
    }

    struct FakeImages {
        reply: Reply,
    }

    #[async_trait::async_trait]
    impl ImageService for FakeImages {
        async fn generate_image(&self, _request: ImageRequest) -> Result<String> {
            match &self.reply {
                Reply::Payload(p) => Ok(p.clone()),
                Reply::Fail(msg) => Err(anyhow!(*msg)),
                Reply::Gated(gate, p) => {
                    gate.notified().await;
                    Ok(p.clone())
                }
            }
        }
    }

    fn png_base64(width: u32, height: u32) -> String {
        let img = image::RgbaImage::from_pixel(width, height, image::Rgba([0, 128, 255, 255]));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageOutputFormat::Png).unwrap();
        BASE64_STANDARD.encode(out.into_inner())
    }

    fn coordinator(dir: &TempDir, reply: Reply) -> (ImageCoordinator, UpdateQueue) {
        let (tx, queue) = UpdateQueue::new();
        let coordinator = ImageCoordinator::new(
            Arc::new(FakeImages { reply }),
            Arc::new(ImageCache::new(dir.path())),
            tx,
            Handle::current(),
            "dall-e-3",
        );
        (coordinator, queue)
    }

    #[tokio::test]
    async fn test_generate_success() {
        let dir = TempDir::new().unwrap();
        let (images, mut queue) = coordinator(&dir, Reply::Payload(png_base64(4, 2)));

        images.generate("cat").into_handle().unwrap().join().await;

        let mut state = DisplayState::default();
        queue.drain_into(&mut state);
        let handle = state.image.as_ref().unwrap();
        assert_eq!((handle.width, handle.height), (4, 2));
        assert!(!state.image_busy);
        assert_eq!(state.status.as_deref(), Some("Image generated successfully"));
        assert_eq!(fs::read(images.cache.path()).unwrap(), *handle.encoded);
    }

    #[tokio::test]
    async fn test_decode_error_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let (images, mut queue) = coordinator(&dir, Reply::Payload("%%% not base64".into()));

        images.generate("cat").into_handle().unwrap().join().await;

        let mut state = DisplayState::default();
        queue.drain_into(&mut state);
        assert!(state.image.is_none());
        assert!(!state.image_busy);
        assert!(state
            .status
            .as_deref()
            .unwrap()
            .starts_with("Image Decode Error"));
        assert!(!images.cache.exists());
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_image() {
        let dir = TempDir::new().unwrap();
        let (good, mut queue) = coordinator(&dir, Reply::Payload(png_base64(1, 1)));
        good.generate("first").into_handle().unwrap().join().await;
        let before = fs::read(good.cache.path()).unwrap();

        let mut state = DisplayState::default();
        queue.drain_into(&mut state);

        // Valid base64, but not an image.
        let (bad, mut bad_queue) =
            coordinator(&dir, Reply::Payload(BASE64_STANDARD.encode(b"plain text")));
        bad.generate("second").into_handle().unwrap().join().await;
        bad_queue.drain_into(&mut state);

        assert!(state.image.is_some());
        assert!(state
            .status
            .as_deref()
            .unwrap()
            .starts_with("Error creating image"));
        assert_eq!(fs::read(bad.cache.path()).unwrap(), before);
    }

    #[tokio::test]
    async fn test_request_error_status() {
        let dir = TempDir::new().unwrap();
        let (images, mut queue) = coordinator(&dir, Reply::Fail("content policy"));
        images.generate("cat").into_handle().unwrap().join().await;

        let mut state = DisplayState::default();
        queue.drain_into(&mut state);
        assert_eq!(
            state.status.as_deref(),
            Some("Image Generation Error: content policy")
        );
    }

    #[tokio::test]
    async fn test_empty_prompt_ignored() {
        let dir = TempDir::new().unwrap();
        let (images, mut queue) = coordinator(&dir, Reply::Fail("unreachable"));
        assert!(matches!(images.generate(""), Dispatch::Ignored));
        assert!(queue.try_next().is_none());
    }

    #[tokio::test]
    async fn test_cancel_during_request_leaves_cache_alone() {
        let dir = TempDir::new().unwrap();
        let release = Arc::new(Notify::new());
        let (images, mut queue) =
            coordinator(&dir, Reply::Gated(release.clone(), png_base64(1, 1)));

        let handle = images.generate("cat").into_handle().unwrap();
        tokio::task::yield_now().await;
        assert!(images.cancel());
        release.notify_one();
        handle.join().await;

        assert!(!images.cache.exists());
        let mut state = DisplayState::default();
        queue.drain_into(&mut state);
        assert!(state.image.is_none());
        assert!(!state.image_busy);
        assert_eq!(state.status.as_deref(), Some("Image generation cancelled"));
        assert!(!images.cancel());
    }

    #[tokio::test]
    async fn test_revoked_ticket_cannot_write_cache() {
        let dir = TempDir::new().unwrap();
        let (images, _queue) = coordinator(&dir, Reply::Fail("unused"));

        // A decode still running when the request was cancelled.
        let ticket = images.gate.issue();
        assert!(images.gate.revoke());
        let err = images
            .gate
            .store(ticket, &images.cache, b"late bytes")
            .unwrap_err();
        assert!(matches!(err, ImageError::Cancelled));
        assert!(!images.cache.exists());

        // A decode still running at shutdown.
        let ticket = images.gate.issue();
        images.shutdown();
        assert!(images.gate.store(ticket, &images.cache, b"late bytes").is_err());
        assert!(!images.cache.exists());
    }

    #[tokio::test]
    async fn test_cached_result_is_not_revoked() {
        let dir = TempDir::new().unwrap();
        let (images, _queue) = coordinator(&dir, Reply::Fail("unused"));

        let ticket = images.gate.issue();
        images.gate.store(ticket, &images.cache, b"bytes").unwrap();
        assert!(!images.gate.revoke());
        assert_eq!(images.cache.read().unwrap(), b"bytes");
    }

    #[tokio::test]
    async fn test_save_and_shutdown() {
        let dir = TempDir::new().unwrap();
        let (images, mut queue) = coordinator(&dir, Reply::Payload(png_base64(2, 2)));
        let dest = dir.path().join("exports").join("picture");

        assert!(matches!(images.save(&dest), Dispatch::Ignored));
        images.generate("cat").into_handle().unwrap().join().await;
        images.save(&dest).into_handle().unwrap().join().await;

        let saved = dir.path().join("exports").join("picture.png");
        assert_eq!(
            fs::read(&saved).unwrap(),
            fs::read(images.cache.path()).unwrap()
        );
        let mut state = DisplayState::default();
        queue.drain_into(&mut state);
        assert_eq!(
            state.status,
            Some(format!("Image saved to: {}", saved.display()))
        );

        images.shutdown();
        assert!(!images.cache.exists());
        assert!(saved.exists());
    }
}
