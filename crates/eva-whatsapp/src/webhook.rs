//! Webhook server for receiving WhatsApp Cloud API notifications

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
};
use eva_core::WhatsAppConfig;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::error::{Result, WhatsAppError};
use crate::queue::{MessageProcessor, QueueEnvelope, WorkQueue, log_result};
use crate::tenant::TenantDirectory;
use crate::types::WebhookPayload;

/// Header carrying the payload signature
pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Where accepted events go
#[derive(Clone)]
pub enum Dispatch {
    /// Processed on a spawned task
    Inline(MessageProcessor),
    /// Handed to the work queue
    Queued(Arc<dyn WorkQueue>),
}

/// Webhook server state
#[derive(Clone)]
pub struct WebhookState {
    pub verify_token: String,
    pub app_secret: Option<String>,
    pub tenants: Arc<dyn TenantDirectory>,
    pub dispatch: Dispatch,
}

/// Webhook server
pub struct WebhookServer {
    addr: SocketAddr,
    state: WebhookState,
}

impl WebhookServer {
    pub fn new(addr: SocketAddr, state: WebhookState) -> Self {
        Self { addr, state }
    }

    /// Serve until `shutdown` resolves
    pub async fn start(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        info!("Starting WhatsApp webhook server on {}", self.addr);

        let app = router(self.state);

        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| WhatsAppError::Config(e.to_string()))?;

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| WhatsAppError::Http(e.to_string()))?;

        info!("Webhook server stopped");
        Ok(())
    }
}

/// Routes: liveness, verification handshake and notifications
pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/webhook", get(handle_verify).post(handle_webhook))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[derive(Debug, Deserialize)]
struct VerifyParams {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

/// Answer the subscription handshake, `None` when it must be refused
pub fn verify_webhook(
    mode: Option<&str>,
    token: Option<&str>,
    challenge: Option<&str>,
    expected_token: &str,
) -> Option<String> {
    let (mode, token) = (mode?, token?);
    if mode == "subscribe" && !expected_token.is_empty() && token == expected_token {
        Some(challenge.unwrap_or_default().to_string())
    } else {
        None
    }
}

async fn handle_verify(
    State(state): State<Arc<WebhookState>>,
    Query(params): Query<VerifyParams>,
) -> impl IntoResponse {
    match verify_webhook(
        params.mode.as_deref(),
        params.token.as_deref(),
        params.challenge.as_deref(),
        &state.verify_token,
    ) {
        Some(challenge) => {
            info!("Webhook verified");
            (StatusCode::OK, challenge)
        }
        None => {
            warn!("Webhook verification refused");
            (StatusCode::FORBIDDEN, String::new())
        }
    }
}

/// Check `X-Hub-Signature-256: sha256=<hex>` against the raw body
pub fn verify_signature(secret: &str, body: &[u8], header: &str) -> bool {
    type HmacSha256 = Hmac<Sha256>;

    let Some(signature) = header
        .strip_prefix("sha256=")
        .and_then(|hex_sig| hex::decode(hex_sig).ok())
    else {
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

/// Whether the tenant's allow/deny lists admit `from`
pub fn admit_sender(wa: &WhatsAppConfig, from: &str) -> bool {
    if !wa.white_list.is_empty() && !wa.white_list.iter().any(|n| n == from) {
        info!("Message skipped because sender is not in the white list: {}", from);
        return false;
    }
    if wa.black_list.iter().any(|n| n == from) {
        info!("Message skipped because sender is in the black list: {}", from);
        return false;
    }
    true
}

/// Handle an incoming notification
///
/// Anything that cannot be processed is acknowledged with 200 so the provider
/// does not redeliver it. Only a broken tenant lookup or a refused enqueue
/// answers 500.
async fn handle_webhook(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if let Some(secret) = &state.app_secret {
        let header = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !verify_signature(secret, &body, header) {
            warn!("{}", WhatsAppError::SignatureVerificationFailed);
            return StatusCode::UNAUTHORIZED;
        }
    }

    let event: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            warn!("Ignoring unparseable webhook body: {}", e);
            return StatusCode::OK;
        }
    };

    let payload: WebhookPayload = match serde_json::from_value(event.clone()) {
        Ok(p) => p,
        Err(e) => {
            warn!("Ignoring malformed webhook payload: {}", e);
            return StatusCode::OK;
        }
    };

    let Some((metadata, message)) = payload.first_message() else {
        debug!("Webhook without messages acknowledged");
        return StatusCode::OK;
    };
    let phone_number_id = metadata.phone_number_id.as_str();
    let from = message.from.as_str();
    let message_id = message.id.clone();

    let config = match state.tenants.resolve(phone_number_id).await {
        Ok(Some(config)) => config,
        Ok(None) => {
            warn!("No bot configured for number {}, dropping message", phone_number_id);
            return StatusCode::OK;
        }
        Err(e) => {
            error!("Tenant lookup failed for {}: {}", phone_number_id, e);
            return StatusCode::INTERNAL_SERVER_ERROR;
        }
    };

    if !admit_sender(&config.whatsapp, from) {
        return StatusCode::OK;
    }

    let envelope = QueueEnvelope {
        message_id: message_id.clone(),
        event,
        bot_config: (*config).clone(),
    };

    match &state.dispatch {
        Dispatch::Inline(processor) => {
            let processor = processor.clone();
            tokio::spawn(async move {
                let result = processor.process_message(envelope).await;
                log_result(&message_id, result);
            });
            StatusCode::OK
        }
        Dispatch::Queued(queue) => match queue.enqueue(envelope).await {
            Ok(()) => {
                info!(message_id = %message_id, "Message queued for {}", phone_number_id);
                StatusCode::OK
            }
            Err(e) => {
                error!(message_id = %message_id, "Failed to enqueue message: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn wa(white: &[&str], black: &[&str]) -> WhatsAppConfig {
        WhatsAppConfig {
            url: "http://graph.test".to_string(),
            version: "v16.0".to_string(),
            token: "t".to_string(),
            white_list: white.iter().map(|s| s.to_string()).collect(),
            black_list: black.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_verify_webhook() {
        assert_eq!(
            verify_webhook(Some("subscribe"), Some("tok"), Some("42"), "tok"),
            Some("42".to_string())
        );
        assert_eq!(verify_webhook(Some("subscribe"), Some("bad"), Some("42"), "tok"), None);
        assert_eq!(verify_webhook(Some("unsubscribe"), Some("tok"), Some("42"), "tok"), None);
        assert_eq!(verify_webhook(None, Some("tok"), Some("42"), "tok"), None);
        assert_eq!(verify_webhook(Some("subscribe"), None, Some("42"), "tok"), None);
    }

    #[test]
    fn test_verify_signature() {
        let body = br#"{"object":"whatsapp_business_account"}"#;
        let header = sign("secret", body);

        assert!(verify_signature("secret", body, &header));
        assert!(!verify_signature("other", body, &header));
        assert!(!verify_signature("secret", b"tampered", &header));
        assert!(!verify_signature("secret", body, "sha256=zz"));
        assert!(!verify_signature("secret", body, ""));
    }

    #[test]
    fn test_admit_sender() {
        assert!(admit_sender(&wa(&[], &[]), "5511"));
        assert!(admit_sender(&wa(&["5511"], &[]), "5511"));
        assert!(!admit_sender(&wa(&["5511"], &[]), "5522"));
        assert!(!admit_sender(&wa(&[], &["5511"]), "5511"));
        assert!(!admit_sender(&wa(&["5511"], &["5511"]), "5511"));
    }
}
