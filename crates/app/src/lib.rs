//! GPT Desk: streaming chat and image generation over a local message log.

pub mod chat;
pub mod display;
pub mod images;
pub mod shell;
pub mod task;
pub mod utils;

pub use chat::ChatCoordinator;
pub use display::{DisplayState, UpdateQueue, UpdateSender};
pub use images::{ImageCoordinator, ImageError};
pub use task::{Dispatch, RequestHandle};
