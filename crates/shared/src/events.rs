//! Updates posted by background work to the UI loop.

use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::message::Role;

/// Identifies one streaming exchange so the UI can route partial text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A decoded image ready to be drawn, plus the original encoded bytes.
#[derive(Clone)]
pub struct ImageHandle {
    pub width: u32,
    pub height: u32,
    /// RGBA8, row-major
    pub rgba: Arc<Vec<u8>>,
    pub encoded: Arc<Vec<u8>>,
}

impl ImageHandle {
    /// Decode PNG/JPEG bytes into a renderable handle.
    pub fn from_encoded(bytes: Vec<u8>) -> Result<Self, image::ImageError> {
        let decoded = image::load_from_memory(&bytes)?.to_rgba8();
        let (width, height) = decoded.dimensions();
        Ok(Self {
            width,
            height,
            rgba: Arc::new(decoded.into_raw()),
            encoded: Arc::new(bytes),
        })
    }
}

impl fmt::Debug for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageHandle")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("encoded_len", &self.encoded.len())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum UiUpdate {
    /// A complete message to append to the transcript
    MessageAdded { role: Role, content: String },
    /// An assistant reply started streaming
    StreamStarted { session: SessionId },
    /// Full accumulated text of the reply so far
    StreamText { session: SessionId, text: String },
    /// The reply finished; its text is final
    StreamFinished { session: SessionId },
    /// The reply was dropped after an error or cancel
    StreamAborted { session: SessionId },
    Status(String),
    ImageBusy(bool),
    ImageReady(ImageHandle),
}

impl UiUpdate {
    pub fn status(message: impl Into<String>) -> Self {
        UiUpdate::Status(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_png() -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(2, 3, image::Rgba([255, 0, 0, 255]));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageOutputFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_image_handle_from_png() {
        let handle = ImageHandle::from_encoded(tiny_png()).unwrap();
        assert_eq!((handle.width, handle.height), (2, 3));
        assert_eq!(handle.rgba.len(), 2 * 3 * 4);
        assert_eq!(&handle.rgba[..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_image_handle_rejects_garbage() {
        assert!(ImageHandle::from_encoded(b"not an image".to_vec()).is_err());
    }

    #[test]
    fn test_session_ids_are_unique() {
        let session = SessionId::new();
        assert_ne!(SessionId::new(), session);
        assert_eq!(session.to_string().len(), 36);
    }
}
