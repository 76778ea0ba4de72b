//! Ingestion tick behavior against a scripted source and in-memory storage

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{counting_stores, video, Call, Reply, ScriptedSource};
use youtube_gateway::checkpoint::FetchCursor;
use youtube_gateway::harvester::{Harvester, IngestionJob, KeyReplacement, SearchSettings, TickOutcome};
use youtube_gateway::scheduler::PeriodicTask;
use youtube_gateway::storage::{KeyStore, VideoStore};

fn settings() -> SearchSettings {
    SearchSettings {
        query: "cats".to_string(),
        max_results: 5,
        published_after: "2022-01-01T00:00:00Z".to_string(),
    }
}

fn harvester(source: &Arc<ScriptedSource>, stores: youtube_gateway::storage::Stores) -> Harvester {
    Harvester::new(source.clone(), stores, settings(), Duration::from_secs(10))
}

#[tokio::test]
async fn test_stores_new_videos_and_keeps_change_token() {
    let source = Arc::new(ScriptedSource::new());
    source.reply(Reply::Page(
        vec![video("v1", "Cats", "one"), video("v2", "More cats", "two")],
        Some("etag-1"),
    ));
    let (store, stores) = counting_stores();
    store.insert_key("aaaa-key").await.unwrap();

    let mut cursor = FetchCursor::new();
    let outcome = harvester(&source, stores).tick(&mut cursor).await;

    assert_eq!(outcome, TickOutcome::Stored { fetched: 2, inserted: 2 });
    assert_eq!(cursor.etag.as_deref(), Some("etag-1"));
    assert_eq!(cursor.active_key.as_deref(), Some("aaaa-key"));
    assert_eq!(store.video_count().await.unwrap(), 2);
    assert_eq!(
        source.calls(),
        vec![Call {
            key: "aaaa-key".to_string(),
            etag: None
        }]
    );
}

#[tokio::test]
async fn test_repeated_result_set_inserts_each_id_once() {
    let source = Arc::new(ScriptedSource::new());
    let batch = vec![video("v1", "a", ""), video("v2", "b", ""), video("v1", "a", "")];
    source
        .reply(Reply::Page(batch.clone(), Some("etag-1")))
        .reply(Reply::Page(batch, Some("etag-2")));
    let (store, stores) = counting_stores();
    store.insert_key("aaaa-key").await.unwrap();
    let harvester = harvester(&source, stores);

    let mut cursor = FetchCursor::new();
    let first = harvester.tick(&mut cursor).await;
    let second = harvester.tick(&mut cursor).await;

    assert_eq!(first, TickOutcome::Stored { fetched: 3, inserted: 2 });
    assert_eq!(second, TickOutcome::Stored { fetched: 3, inserted: 0 });
    assert_eq!(store.video_count().await.unwrap(), 2);
    assert_eq!(cursor.etag.as_deref(), Some("etag-2"));
    assert_eq!(cursor.total_inserted, 2);
}

#[tokio::test]
async fn test_unchanged_change_token_skips_store() {
    let source = Arc::new(ScriptedSource::new());
    source
        .reply(Reply::Page(vec![video("v1", "Cats", "")], Some("etag-1")))
        .reply(Reply::NotModified);
    let (store, stores) = counting_stores();
    store.insert_key("aaaa-key").await.unwrap();
    let harvester = harvester(&source, stores);

    let mut cursor = FetchCursor::new();
    harvester.tick(&mut cursor).await;
    assert_eq!(store.insert_calls(), 1);

    let outcome = harvester.tick(&mut cursor).await;

    assert_eq!(outcome, TickOutcome::NotModified);
    assert_eq!(store.insert_calls(), 1);
    assert_eq!(source.calls()[1].etag.as_deref(), Some("etag-1"));
    assert_eq!(cursor.etag.as_deref(), Some("etag-1"));
    assert_eq!(cursor.active_key.as_deref(), Some("aaaa-key"));
    assert_eq!(cursor.error_count, 0);
}

#[tokio::test]
async fn test_quota_exceeded_demotes_key_and_caches_replacement() {
    let source = Arc::new(ScriptedSource::new());
    source
        .reply(Reply::Quota)
        .reply(Reply::Page(vec![video("v1", "Cats", "")], Some("etag-1")));
    let (store, stores) = counting_stores();
    store.insert_key("aaaa-key").await.unwrap();
    store.insert_key("bbbb-key").await.unwrap();
    let harvester = harvester(&source, stores);

    let mut cursor = FetchCursor::new();
    let outcome = harvester.tick(&mut cursor).await;

    assert_eq!(
        outcome,
        TickOutcome::QuotaExceeded {
            replacement: KeyReplacement::Acquired("bbbb****".to_string())
        }
    );
    // Not retried within the tick
    assert_eq!(source.calls().len(), 1);
    assert_eq!(store.insert_calls(), 0);
    assert!(store.inner.get_key("aaaa-key").unwrap().is_exhausted);
    assert_eq!(cursor.active_key.as_deref(), Some("bbbb-key"));
    assert_eq!(cursor.error_count, 1);

    let next = harvester.tick(&mut cursor).await;

    assert_eq!(next, TickOutcome::Stored { fetched: 1, inserted: 1 });
    assert_eq!(source.calls()[1].key, "bbbb-key");
    assert_eq!(cursor.error_count, 0);
}

#[tokio::test]
async fn test_quota_exceeded_without_replacement() {
    let source = Arc::new(ScriptedSource::new());
    source.reply(Reply::Quota);
    let (store, stores) = counting_stores();
    store.insert_key("aaaa-key").await.unwrap();
    let harvester = harvester(&source, stores);

    let mut cursor = FetchCursor::new();
    let outcome = harvester.tick(&mut cursor).await;

    assert_eq!(
        outcome,
        TickOutcome::QuotaExceeded {
            replacement: KeyReplacement::Unavailable
        }
    );
    assert!(cursor.active_key.is_none());

    let next = harvester.tick(&mut cursor).await;

    assert_eq!(next, TickOutcome::NoKeyAvailable);
    assert_eq!(source.calls().len(), 1);
    assert_eq!(cursor.error_count, 2);
}

#[tokio::test]
async fn test_no_key_skips_upstream() {
    let source = Arc::new(ScriptedSource::new());
    let (_store, stores) = counting_stores();

    let mut cursor = FetchCursor::new();
    let outcome = harvester(&source, stores).tick(&mut cursor).await;

    assert_eq!(outcome, TickOutcome::NoKeyAvailable);
    assert!(outcome.is_error());
    assert!(source.calls().is_empty());
    assert!(cursor.last_error.is_some());
}

#[tokio::test]
async fn test_upstream_error_leaves_state_unchanged() {
    let source = Arc::new(ScriptedSource::new());
    source
        .reply(Reply::Page(vec![video("v1", "Cats", "")], Some("etag-1")))
        .reply(Reply::Upstream(500));
    let (store, stores) = counting_stores();
    store.insert_key("aaaa-key").await.unwrap();
    let harvester = harvester(&source, stores);

    let mut cursor = FetchCursor::new();
    harvester.tick(&mut cursor).await;
    let outcome = harvester.tick(&mut cursor).await;

    assert!(matches!(outcome, TickOutcome::UpstreamFailed { .. }));
    assert_eq!(cursor.etag.as_deref(), Some("etag-1"));
    assert_eq!(cursor.active_key.as_deref(), Some("aaaa-key"));
    assert!(!store.inner.get_key("aaaa-key").unwrap().is_exhausted);
}

#[tokio::test(start_paused = true)]
async fn test_hanging_upstream_times_out() {
    let source = Arc::new(ScriptedSource::new());
    source.reply(Reply::Hang);
    let (store, stores) = counting_stores();
    store.insert_key("aaaa-key").await.unwrap();

    let mut cursor = FetchCursor::new();
    let outcome = harvester(&source, stores).tick(&mut cursor).await;

    assert_eq!(outcome, TickOutcome::TimedOut { operation: "upstream search" });
    assert_eq!(store.insert_calls(), 0);
}

#[tokio::test]
async fn test_ingestion_job_steps_with_owned_cursor() {
    let source = Arc::new(ScriptedSource::new());
    source.reply(Reply::Page(vec![video("v1", "Cats", "")], Some("etag-1")));
    let (store, stores) = counting_stores();
    store.insert_key("aaaa-key").await.unwrap();

    let mut task = PeriodicTask::new(IngestionJob::new(harvester(&source, stores)), Duration::from_secs(10));

    assert_eq!(task.step().await, TickOutcome::Stored { fetched: 1, inserted: 1 });
    assert_eq!(task.step().await, TickOutcome::NotModified);
    assert_eq!(task.job().cursor().etag.as_deref(), Some("etag-1"));
    assert_eq!(source.calls()[1].etag.as_deref(), Some("etag-1"));
}

#[tokio::test]
async fn test_partial_batch_keeps_landed_rows_and_refetches() {
    let source = Arc::new(ScriptedSource::new());
    source
        .reply(Reply::Page(vec![video("v1", "Cats", "")], Some("etag-1")))
        .reply(Reply::Page(
            vec![video("v2", "a", ""), video("bad", "b", ""), video("v3", "c", "")],
            Some("etag-2"),
        ));
    let (store, stores) = counting_stores();
    store.fail_on("bad");
    store.insert_key("aaaa-key").await.unwrap();
    let harvester = harvester(&source, stores);

    let mut cursor = FetchCursor::new();
    harvester.tick(&mut cursor).await;
    let outcome = harvester.tick(&mut cursor).await;

    assert!(matches!(outcome, TickOutcome::StoreFailed { .. }));
    assert!(outcome.is_error());
    assert_eq!(cursor.etag.as_deref(), Some("etag-1"));
    assert_eq!(cursor.total_inserted, 3);
    assert_eq!(cursor.error_count, 1);
    assert_eq!(store.video_count().await.unwrap(), 3);
    assert_eq!(
        source.calls().last().map(|c| c.etag.clone()),
        Some(Some("etag-1".to_string()))
    );
}
