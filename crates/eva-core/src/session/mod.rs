//! Session management module
//!
//! Short-lived, process-local conversation state keyed by conversation key.

mod manager;
mod store;
mod types;

pub use manager::SessionManager;
pub use store::{InMemorySessionStore, SessionStore};
pub use types::{Session, SessionInit, SessionState};
