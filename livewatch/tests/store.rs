//! SQLite store round trips against the real schema.

use chrono::{TimeDelta, Utc};
use tempfile::TempDir;

use livewatch::domain::{
    BindingStatus, ConnectionState, CreatorStatus, DeliveryAttempt, DeliveryResult, LiveStatus,
    PostInfo, PostKind, Snapshot,
};
use livewatch::logging::{DiagnosticRecord, Severity};
use livewatch::store::sqlite::{init_pool_with_size, run_migrations};
use livewatch::store::{DiagnosticsSink, SqliteStore, StateStore, StatusSink};

/// In-memory databases need a single connection to share state.
async fn memory_store() -> SqliteStore {
    let pool = init_pool_with_size("sqlite::memory:", 1)
        .await
        .expect("Failed to create test pool");
    run_migrations(&pool).await.expect("Failed to run migrations");
    SqliteStore::new(pool)
}

fn live_snapshot() -> Snapshot {
    let now = Utc::now();
    let mut snapshot = Snapshot::offline(now);
    snapshot.display_name = Some("Alice".to_string());
    snapshot.latest_post = Some(PostInfo {
        id: "42".to_string(),
        kind: PostKind::Video,
        published_at: Some(now - TimeDelta::minutes(3)),
        text: String::new(),
        title: "New video".to_string(),
        url: "https://example.com/v/42".to_string(),
    });
    snapshot.live_status = LiveStatus::Online;
    snapshot.live_title = "Evening stream".to_string();
    snapshot.viewers = 120;
    snapshot.peak_viewers = 150;
    snapshot.live_session_start = Some(now - TimeDelta::minutes(90));
    snapshot
        .hourly_ticks
        .insert("b1".to_string(), now - TimeDelta::minutes(30));
    snapshot
}

#[tokio::test]
async fn snapshot_round_trip_and_delete() {
    let store = memory_store().await;
    assert_eq!(store.get_snapshot("100").await.unwrap(), None);

    let snapshot = live_snapshot();
    store.put_snapshot("100", &snapshot).await.unwrap();
    assert_eq!(store.get_snapshot("100").await.unwrap(), Some(snapshot.clone()));

    let mut updated = snapshot;
    updated.viewers = 200;
    updated.peak_viewers = 200;
    store.put_snapshot("100", &updated).await.unwrap();
    assert_eq!(store.get_snapshot("100").await.unwrap().unwrap().peak_viewers, 200);

    store.delete_snapshot("100").await.unwrap();
    assert_eq!(store.get_snapshot("100").await.unwrap(), None);
}

#[tokio::test]
async fn snapshots_survive_reopening_the_database() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("livewatch.db");
    let db_url = format!(
        "sqlite:{}?mode=rwc",
        db_path.to_string_lossy().replace('\\', "/")
    );

    let snapshot = live_snapshot();
    {
        let store = SqliteStore::connect(&db_url).await.unwrap();
        store.put_snapshot("100", &snapshot).await.unwrap();
        store.pool().close().await;
    }

    let store = SqliteStore::connect(&db_url).await.unwrap();
    assert_eq!(store.get_snapshot("100").await.unwrap(), Some(snapshot));
}

#[tokio::test]
async fn status_upserts() {
    let store = memory_store().await;
    let now = Utc::now();

    let status = CreatorStatus::from_snapshot(
        "100",
        "Alice".to_string(),
        Some(&live_snapshot()),
        60,
        now + TimeDelta::seconds(60),
        now,
    );
    store.put_creator_status(&status).await.unwrap();
    let failed = status.clone().with_error("bridge offline");
    store.put_creator_status(&failed).await.unwrap();
    assert_eq!(store.get_creator_status("100").await.unwrap(), Some(failed));

    let mut binding = BindingStatus::new("b1", "100");
    binding.connection = ConnectionState::Connected;
    binding.record_attempt(DeliveryAttempt {
        echo: "e1".to_string(),
        attempted_at: now,
        result: DeliveryResult::AckTimeout,
    });
    store.put_binding_status(&binding).await.unwrap();
    let loaded = store.get_binding_status("b1").await.unwrap().unwrap();
    assert_eq!(loaded, binding);
    assert_eq!(loaded.last_error.as_deref(), Some("acknowledgment timed out"));

    store.delete_binding_status("b1").await.unwrap();
    store.delete_creator_status("100").await.unwrap();
    assert!(store.get_binding_status("b1").await.unwrap().is_none());
    assert!(store.get_creator_status("100").await.unwrap().is_none());
}

#[tokio::test]
async fn diagnostics_are_listed_newest_first_and_purged() {
    let store = memory_store().await;
    let now = Utc::now();

    let mut old = DiagnosticRecord::new(Severity::Warn, "livewatch::dispatcher", "old failure");
    old.timestamp = now - TimeDelta::days(10);
    let mut recent = DiagnosticRecord::new(Severity::Error, "livewatch::scheduler", "permanent fetch failure");
    recent.creator_id = Some("100".to_string());
    recent
        .context
        .insert("error".to_string(), serde_json::json!("account deleted"));

    store.append(&old).await.unwrap();
    store.append(&recent).await.unwrap();

    let listed = store.recent(10).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].message, "permanent fetch failure");
    assert_eq!(listed[0].severity, Severity::Error);
    assert_eq!(listed[0].creator_id.as_deref(), Some("100"));
    assert_eq!(listed[0].context["error"], "account deleted");

    let purged = store.purge_before(now - TimeDelta::days(7)).await.unwrap();
    assert_eq!(purged, 1);
    assert_eq!(store.recent(10).await.unwrap().len(), 1);
}
