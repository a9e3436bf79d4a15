//! EVA conversational API client
//!
//! Covers the login exchange, `ai/ask`, and the speech endpoints. Every call
//! that carries a bearer token goes through a single bounded auth retry.

mod client;
mod speech;
mod types;

pub use client::{EvaClient, MAX_AUTH_RETRIES, classify_failure};
pub use speech::{SYNTHESIS_LANGUAGE, TRANSCRIPTION_LANGUAGE};
pub use types::{AUTH_EXPIRED_MESSAGE, AskRequest, AskResponse, Template};
