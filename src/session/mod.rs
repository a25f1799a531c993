//! Authentication state: token storage, claim decoding and the session manager.

pub mod claims;
pub mod manager;
pub mod token_store;

pub use claims::Claims;
pub use manager::{SessionEvent, SessionManager, SessionState};
pub use token_store::{FileStore, KeyValueStore, MemoryStore, TokenPair, TokenStore};
