// tests/store_test.rs
// Integration coverage for the Store layer against a real in-memory SQLite
// pool (§6 persisted state layout, §8 invariants).
//
// Grounded on the teacher's `backend/tests/*_test.rs` style: one
// `sqlite::memory:` pool per test, migrations run up front, no mocking.

use hub_gateway::config::auth::MediaConfig;
use hub_gateway::store::models::{Job, JobStatus, Task, TaskKind};
use hub_gateway::store::{Store, StoreError};
use sqlx::sqlite::SqlitePoolOptions;

async fn test_store() -> Store {
    let pool = SqlitePoolOptions::new().connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    Store::from_pool(
        pool,
        std::path::PathBuf::from("/tmp"),
        MediaConfig {
            signing_secret: "test-secret-test-secret".to_string(),
            default_expiry_secs: 3600,
            bucket_prefix: "media".to_string(),
        },
    )
}

async fn make_user(store: &Store) -> String {
    store.users.create(Some("person@example.com"), "hash").await.unwrap().id
}

#[tokio::test]
async fn pairing_token_resolve_then_revoke_then_not_found() {
    let store = test_store().await;
    let user_id = make_user(&store).await;

    let token = store.pairing_tokens.create(&user_id, Some("laptop")).await.unwrap();
    let (resolved_user, token_id) = store.pairing_tokens.resolve(&token.token).await.unwrap();
    assert_eq!(resolved_user, user_id);

    store.pairing_tokens.revoke(&token_id, &user_id).await.unwrap();

    let err = store.pairing_tokens.resolve(&token.token).await.unwrap_err();
    assert!(matches!(err, StoreError::Revoked));
}

#[tokio::test]
async fn revoking_twice_is_not_found_not_a_silent_success() {
    let store = test_store().await;
    let user_id = make_user(&store).await;
    let token = store.pairing_tokens.create(&user_id, None).await.unwrap();

    store.pairing_tokens.revoke(&token.id, &user_id).await.unwrap();
    let err = store.pairing_tokens.revoke(&token.id, &user_id).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound));
}

#[tokio::test]
async fn revoke_preserves_audit_fields() {
    let store = test_store().await;
    let user_id = make_user(&store).await;
    let token = store.pairing_tokens.create(&user_id, None).await.unwrap();

    store.pairing_tokens.record_use(&token.id, "10.0.0.1").await.unwrap();
    store.pairing_tokens.record_use(&token.id, "10.0.0.1").await.unwrap();
    store.pairing_tokens.revoke(&token.id, &user_id).await.unwrap();

    let remaining = store.pairing_tokens.list_for_user(&user_id).await.unwrap();
    let revoked = remaining.iter().find(|t| t.id == token.id).unwrap();
    assert!(revoked.revoked_at.is_some());
    assert_eq!(revoked.connection_count, 2);
    assert_eq!(revoked.last_ip.as_deref(), Some("10.0.0.1"));
}

#[tokio::test]
async fn cannot_delete_the_last_session_in_a_channel() {
    let store = test_store().await;
    let user_id = make_user(&store).await;
    let (channel, session) = store
        .channels
        .create_with_default_session(&user_id, "Main", None)
        .await
        .unwrap();

    let err = store.channels.delete_session(&channel.id, &session.id).await.unwrap_err();
    assert!(matches!(err, StoreError::StateConflict(_)));
}

#[tokio::test]
async fn deleting_a_session_is_fine_once_a_second_one_exists() {
    let store = test_store().await;
    let user_id = make_user(&store).await;
    let (channel, first_session) = store
        .channels
        .create_with_default_session(&user_id, "Main", None)
        .await
        .unwrap();

    store.channels.add_session(&channel.id, "Second").await.unwrap();

    store.channels.delete_session(&channel.id, &first_session.id).await.unwrap();
    let remaining = store.channels.list_sessions(&channel.id).await.unwrap();
    assert_eq!(remaining.len(), 1);
}

#[tokio::test]
async fn job_upsert_rejects_reverting_a_terminal_job_to_running() {
    let store = test_store().await;
    let user_id = make_user(&store).await;
    let (channel, session) = store
        .channels
        .create_with_default_session(&user_id, "Main", None)
        .await
        .unwrap();
    let task = Task {
        id: "t1".to_string(),
        channel_id: channel.id.clone(),
        name: "nightly".to_string(),
        kind: TaskKind::Background,
        openclaw_cron_job_id: None,
        session_key: None,
        enabled: true,
        created_at: 0,
        updated_at: 0,
    };
    store.tasks.create(&task).await.unwrap();

    let mut job = Job {
        id: "j1".to_string(),
        task_id: "t1".to_string(),
        user_id: user_id.clone(),
        session_key: session.session_key.clone(),
        status: JobStatus::Running,
        started_at: 0,
        finished_at: None,
        duration_ms: None,
        summary: String::new(),
    };
    store.jobs.upsert(&job).await.unwrap();

    job.status = JobStatus::Ok;
    job.summary = "done".to_string();
    job.finished_at = Some(100);
    store.jobs.upsert(&job).await.unwrap();

    job.status = JobStatus::Running;
    let err = store.jobs.upsert(&job).await.unwrap_err();
    assert!(matches!(err, StoreError::StateConflict(_)));
}

#[tokio::test]
async fn message_history_orders_by_timestamp_then_id_and_truncates_oldest() {
    let store = test_store().await;
    let user_id = make_user(&store).await;
    let (_channel, session) = store
        .channels
        .create_with_default_session(&user_id, "Main", None)
        .await
        .unwrap();

    for i in 0..5 {
        let msg = hub_gateway::store::models::Message {
            id: format!("m{i}"),
            session_key: session.session_key.clone(),
            sender: hub_gateway::store::models::Sender::User,
            text: format!("text {i}"),
            media_url: None,
            a2ui: None,
            thread_id: None,
            encrypted: false,
            timestamp: i,
        };
        store.messages.append(&msg).await.unwrap();
    }

    let page = store.messages.list(&session.session_key, None, 3).await.unwrap();
    let ids: Vec<&str> = page.messages.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m2", "m3", "m4"]);
}
