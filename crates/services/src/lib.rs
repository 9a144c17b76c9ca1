pub mod credentials;
pub mod image_cache;
pub mod message_store;

pub use credentials::{CredentialStore, KeyringStore, MemoryStore};
pub use image_cache::ImageCache;
pub use message_store::MessageStore;
