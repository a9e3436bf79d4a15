//! Inactivity reaper against a mocked Graph API

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::*;
use eva_core::{SessionInit, SessionManager};
use eva_whatsapp::{GraphClient, ReapReport, Reaper};
use serde_json::json;
use wiremock::MockServer;

async fn seed(sessions: &SessionManager, server: &MockServer, key: &str, bot: serde_json::Value) {
    let init = SessionInit {
        phone_number_id: PHONE_NUMBER_ID.to_string(),
        reply_address: SENDER.to_string(),
        config: Arc::new(bot_config(server, bot)),
    };
    sessions.get_or_create(key, init, Utc::now()).await;
}

fn reaper(sessions: &SessionManager) -> Reaper {
    Reaper::new(sessions.clone(), GraphClient::new().unwrap())
}

#[tokio::test]
async fn test_expired_session_gets_one_farewell_and_is_removed() {
    let server = MockServer::start().await;
    mount_messages(&server, 200).await;

    let sessions = SessionManager::in_memory();
    seed(
        &sessions,
        &server,
        "k",
        json!({ "sessionTimeout": 1000, "expiredSessionMessage": "Até logo!" }),
    )
    .await;

    let reaper = reaper(&sessions);
    let later = Utc::now() + chrono::Duration::seconds(2);
    let report = reaper.sweep(later).await;

    assert_eq!(
        report,
        ReapReport {
            expired: 1,
            removed: 1,
            notified: 1,
            failed: 0
        }
    );
    assert!(sessions.is_empty().await);

    // Nothing left to reap, so no second farewell
    assert_eq!(reaper.sweep(later).await, ReapReport::default());

    let farewells = bodies(&server, &messages_path()).await;
    assert_eq!(farewells.len(), 1);
    assert_eq!(farewells[0]["to"], SENDER);
    assert_eq!(farewells[0]["text"]["body"], "Até logo!");
}

#[tokio::test]
async fn test_session_without_farewell_is_removed_silently() {
    let server = MockServer::start().await;
    mount_messages(&server, 200).await;

    let sessions = SessionManager::in_memory();
    seed(&sessions, &server, "k", json!({ "sessionTimeout": 1000 })).await;

    let report = reaper(&sessions)
        .sweep(Utc::now() + chrono::Duration::seconds(2))
        .await;

    assert_eq!(report.removed, 1);
    assert_eq!(report.notified, 0);
    assert!(sessions.is_empty().await);
    assert!(bodies(&server, &messages_path()).await.is_empty());
}

#[tokio::test]
async fn test_live_sessions_are_untouched() {
    let server = MockServer::start().await;
    mount_messages(&server, 200).await;

    let sessions = SessionManager::in_memory();
    seed(
        &sessions,
        &server,
        "k",
        json!({ "sessionTimeout": 600000, "expiredSessionMessage": "Até logo!" }),
    )
    .await;

    let report = reaper(&sessions).sweep(Utc::now()).await;

    assert_eq!(report, ReapReport::default());
    assert_eq!(sessions.len().await, 1);
    assert!(bodies(&server, &messages_path()).await.is_empty());
}

#[tokio::test]
async fn test_failed_farewell_keeps_session_and_spares_others() {
    let server = MockServer::start().await;
    mount_messages(&server, 500).await;

    let sessions = SessionManager::in_memory();
    seed(
        &sessions,
        &server,
        "with-farewell",
        json!({ "sessionTimeout": 1000, "expiredSessionMessage": "Até logo!" }),
    )
    .await;
    seed(&sessions, &server, "silent", json!({ "sessionTimeout": 1000 })).await;

    let report = reaper(&sessions)
        .sweep(Utc::now() + chrono::Duration::seconds(2))
        .await;

    assert_eq!(report.expired, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.removed, 1);
    assert!(sessions.get("with-farewell").await.is_some());
    assert!(sessions.get("silent").await.is_none());
}

#[tokio::test]
async fn test_drop_on_notify_failure_removes_session() {
    let server = MockServer::start().await;
    mount_messages(&server, 500).await;

    let sessions = SessionManager::in_memory();
    seed(
        &sessions,
        &server,
        "k",
        json!({ "sessionTimeout": 1000, "expiredSessionMessage": "Até logo!" }),
    )
    .await;

    let report = reaper(&sessions)
        .drop_on_notify_failure(true)
        .sweep(Utc::now() + chrono::Duration::seconds(2))
        .await;

    assert_eq!(report.failed, 1);
    assert_eq!(report.removed, 1);
    assert!(sessions.is_empty().await);
}

#[tokio::test]
async fn test_spawned_reaper_sweeps_until_stopped() {
    let server = MockServer::start().await;
    mount_messages(&server, 200).await;

    let sessions = SessionManager::in_memory();
    seed(&sessions, &server, "k", json!({ "sessionTimeout": 10 })).await;

    let handle = reaper(&sessions).spawn(Duration::from_millis(20));

    let mut removed = false;
    for _ in 0..50 {
        if sessions.is_empty().await {
            removed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    handle.stop().await;

    assert!(removed);
}
