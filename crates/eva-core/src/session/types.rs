//! Session types

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::config::BotConfig;

/// Where a conversation stands with the EVA API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No upstream session id yet, the next exchange uses the greeting template
    Greeting,
    /// Upstream session id assigned, exchanges carry it
    Active,
}

/// Data needed to open a new session
#[derive(Debug, Clone)]
pub struct SessionInit {
    /// WhatsApp number id receiving the conversation (used for delivery)
    pub phone_number_id: String,
    /// Address replies are sent to
    pub reply_address: String,
    /// Tenant configuration captured for the lifetime of the session
    pub config: Arc<BotConfig>,
}

/// One conversation
#[derive(Debug, Clone)]
pub struct Session {
    pub key: String,
    pub phone_number_id: String,
    pub reply_address: String,
    /// Correlation id assigned by the EVA API after the first exchange
    pub upstream_session_id: Option<String>,
    pub config: Arc<BotConfig>,
    pub created_at: DateTime<Utc>,
    pub last_interaction: DateTime<Utc>,
}

impl Session {
    /// Create a session in greeting state
    pub fn new(key: impl Into<String>, init: SessionInit, now: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            phone_number_id: init.phone_number_id,
            reply_address: init.reply_address,
            upstream_session_id: None,
            config: init.config,
            created_at: now,
            last_interaction: now,
        }
    }

    /// Inactivity timeout captured from the tenant configuration
    pub fn timeout(&self) -> chrono::Duration {
        self.config.bot.session_timeout()
    }

    /// Expired once `now - last_interaction >= timeout`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.last_interaction) >= self.timeout()
    }

    pub fn state(&self) -> SessionState {
        if self.upstream_session_id.is_some() {
            SessionState::Active
        } else {
            SessionState::Greeting
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_interaction {
            self.last_interaction = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::init;

    #[test]
    fn test_new_session_is_greeting() {
        let session = Session::new("k", init(600_000), Utc::now());
        assert_eq!(session.state(), SessionState::Greeting);
        assert_eq!(session.created_at, session.last_interaction);
    }

    #[test]
    fn test_expiry_boundary() {
        let t0 = Utc::now();
        let session = Session::new("k", init(1_000), t0);

        assert!(!session.is_expired(t0 + chrono::Duration::milliseconds(999)));
        assert!(session.is_expired(t0 + chrono::Duration::milliseconds(1_000)));
    }

    #[test]
    fn test_touch_never_moves_backwards() {
        let t0 = Utc::now();
        let mut session = Session::new("k", init(1_000), t0);
        session.touch(t0 - chrono::Duration::seconds(5));
        assert_eq!(session.last_interaction, t0);
    }
}
