//! Shared fixtures: one mock server plays both the EVA API and the Graph API

#![allow(dead_code)]

use std::path::Path;

use eva_core::{BotConfig, CredentialCache, EvaClient, SessionManager};
use eva_whatsapp::{AudioBridge, GraphClient, InboundMessage, MessageKind, Orchestrator};
use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const PHONE_NUMBER_ID: &str = "100";
pub const SENDER: &str = "5511999990000";

/// Tenant configuration pointing every collaborator at `server`
pub fn bot_config(server: &MockServer, bot: Value) -> BotConfig {
    serde_json::from_value(json!({
        "auth": { "host": server.uri(), "client_id": "42", "password": "pw" },
        "bot": bot,
        "whatsapp": { "url": server.uri(), "version": "v16.0", "token": "graph-token" }
    }))
    .unwrap()
}

pub fn orchestrator(scratch: &Path) -> Orchestrator {
    let eva = EvaClient::new(CredentialCache::new()).unwrap();
    let graph = GraphClient::new().unwrap();
    let audio = AudioBridge::new(eva.clone(), graph.clone()).with_scratch_dir(scratch);
    Orchestrator::new(SessionManager::in_memory(), eva, graph, audio)
}

pub fn inbound(kind: MessageKind, message_id: &str) -> InboundMessage {
    InboundMessage {
        conversation_key: eva_whatsapp::types::conversation_key(PHONE_NUMBER_ID, SENDER),
        phone_number_id: PHONE_NUMBER_ID.to_string(),
        reply_address: SENDER.to_string(),
        message_id: message_id.to_string(),
        kind,
    }
}

/// Webhook notification as sent by the provider
pub fn webhook_event(message: Value) -> Value {
    json!({
        "object": "whatsapp_business_account",
        "entry": [{
            "id": "WABA",
            "changes": [{
                "field": "messages",
                "value": {
                    "messaging_product": "whatsapp",
                    "metadata": { "display_phone_number": "551130000000", "phone_number_id": PHONE_NUMBER_ID },
                    "messages": [message]
                }
            }]
        }]
    })
}

pub fn text_event(message_id: &str, body: &str) -> Value {
    webhook_event(json!({ "from": SENDER, "id": message_id, "type": "text", "text": { "body": body } }))
}

pub async fn mount_login(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/api/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "message": "eva-token" })))
        .mount(server)
        .await;
}

/// Greeting answers with a fresh session id, context answers echo it
pub async fn mount_ask(server: &MockServer, session_id: &str) {
    Mock::given(method("POST"))
        .and(path("/api/ai/ask"))
        .and(body_partial_json(json!({ "template": "template_saudacao" })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "message": "Olá!", "sessionid": session_id })),
        )
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/ai/ask"))
        .and(body_partial_json(json!({ "template": "template_contexto" })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "message": "Como posso ajudar?", "sessionid": session_id })),
        )
        .mount(server)
        .await;
}

pub async fn mount_messages(server: &MockServer, status: u16) {
    Mock::given(method("POST"))
        .and(path(format!("/v16.0/{}/messages", PHONE_NUMBER_ID)))
        .respond_with(ResponseTemplate::new(status).set_body_json(json!({ "messages": [{ "id": "wamid.out" }] })))
        .mount(server)
        .await;
}

/// JSON bodies received on `request_path`, in arrival order
pub async fn bodies(server: &MockServer, request_path: &str) -> Vec<Value> {
    server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == request_path)
        .map(|r| serde_json::from_slice(&r.body).unwrap_or(Value::Null))
        .collect()
}

pub fn messages_path() -> String {
    format!("/v16.0/{}/messages", PHONE_NUMBER_ID)
}

pub fn is_empty_dir(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}
