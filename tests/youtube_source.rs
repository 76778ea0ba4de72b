//! YouTube source against a mocked Data API
//!
//! Uses wiremock for the upstream HTTP endpoints.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use youtube_gateway::checkpoint::FetchCursor;
use youtube_gateway::error::GatewayError;
use youtube_gateway::harvester::{Harvester, KeyReplacement, SearchSettings, TickOutcome};
use youtube_gateway::http_client::{HttpClientConfig, ResilientHttpClient};
use youtube_gateway::keys::KeyValidator;
use youtube_gateway::sources::{FetchOutcome, SearchRequest, VideoSource, YouTubeSource};
use youtube_gateway::storage::{KeyStore, MemoryStore, Stores, VideoStore};

fn source(server: &MockServer) -> YouTubeSource {
    let http = ResilientHttpClient::new(HttpClientConfig {
        max_retries: 0,
        ..Default::default()
    })
    .unwrap();
    YouTubeSource::new(Arc::new(http), &format!("{}/youtube/v3", server.uri()), 600).unwrap()
}

fn request(etag: Option<&str>) -> SearchRequest {
    SearchRequest::new("cats")
        .max_results(5)
        .published_after("2022-01-01T00:00:00Z")
        .etag(etag.map(str::to_string))
}

fn search_body() -> serde_json::Value {
    json!({
        "kind": "youtube#searchListResponse",
        "etag": "etag-1",
        "items": [
            {
                "id": {"kind": "youtube#video", "videoId": "vid1"},
                "snippet": {
                    "title": "Cats being cats",
                    "description": "A compilation",
                    "publishedAt": "2024-03-01T12:00:00Z"
                }
            },
            {
                "id": {"kind": "youtube#video", "videoId": "vid2"},
                "snippet": {
                    "title": "Kittens",
                    "description": "",
                    "publishedAt": "2024-02-01T12:00:00Z"
                }
            }
        ]
    })
}

fn error_body(code: u16, reason: &str) -> serde_json::Value {
    json!({
        "error": {
            "code": code,
            "message": format!("{} error", reason),
            "errors": [{"domain": "youtube", "reason": reason, "message": "..."}]
        }
    })
}

#[tokio::test]
async fn test_search_sends_expected_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/youtube/v3/search"))
        .and(query_param("part", "id,snippet"))
        .and(query_param("q", "cats"))
        .and(query_param("maxResults", "5"))
        .and(query_param("order", "date"))
        .and(query_param("type", "video"))
        .and(query_param("publishedAfter", "2022-01-01T00:00:00Z"))
        .and(query_param("key", "aaaa-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_body()))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = source(&server).search("aaaa-key", &request(None)).await.unwrap();

    match outcome {
        FetchOutcome::Modified(page) => {
            assert_eq!(page.etag.as_deref(), Some("etag-1"));
            assert_eq!(page.videos.len(), 2);
            assert_eq!(page.videos[0].unique_id, "vid1");
            assert_eq!(page.videos[0].title, "Cats being cats");
            assert_eq!(page.videos[1].published_at, "2024-02-01T12:00:00Z");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn test_matching_change_token_is_not_modified() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/youtube/v3/search"))
        .and(header("if-none-match", "etag-1"))
        .respond_with(ResponseTemplate::new(304))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = source(&server).search("aaaa-key", &request(Some("etag-1"))).await.unwrap();

    assert_eq!(outcome, FetchOutcome::NotModified);
}

#[tokio::test]
async fn test_change_token_falls_back_to_header() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/youtube/v3/search"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("etag", "\"header-etag\"")
                .set_body_json(json!({"items": []})),
        )
        .mount(&server)
        .await;

    let outcome = source(&server).search("aaaa-key", &request(None)).await.unwrap();

    assert_eq!(
        outcome,
        FetchOutcome::Modified(youtube_gateway::sources::SearchPage {
            videos: vec![],
            etag: Some("\"header-etag\"".to_string()),
        })
    );
}

#[tokio::test]
async fn test_error_classification() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/youtube/v3/search"))
        .and(query_param("key", "quota-key"))
        .respond_with(ResponseTemplate::new(403).set_body_json(error_body(403, "quotaExceeded")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/youtube/v3/search"))
        .and(query_param("key", "bad-key"))
        .respond_with(ResponseTemplate::new(400).set_body_json(error_body(400, "keyInvalid")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/youtube/v3/search"))
        .and(query_param("key", "flaky-key"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let source = source(&server);

    assert!(matches!(
        source.search("quota-key", &request(None)).await,
        Err(GatewayError::QuotaExceeded)
    ));
    assert!(matches!(
        source.search("bad-key", &request(None)).await,
        Err(GatewayError::Unauthorized)
    ));
    assert!(matches!(
        source.search("flaky-key", &request(None)).await,
        Err(GatewayError::UpstreamError { status: 503, .. })
    ));
}

#[tokio::test]
async fn test_probe_drives_validator() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/youtube/v3/channels"))
        .and(query_param("part", "id"))
        .and(query_param("forUsername", "Youtube"))
        .and(query_param("key", "good-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/youtube/v3/channels"))
        .and(query_param("key", "bad-key"))
        .respond_with(ResponseTemplate::new(400).set_body_json(error_body(400, "keyInvalid")))
        .mount(&server)
        .await;

    let validator = KeyValidator::new(Arc::new(source(&server)));

    assert!(validator.validate("good-key").await);
    assert!(!validator.validate("bad-key").await);
}

#[tokio::test]
async fn test_harvester_demotes_key_on_upstream_quota_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/youtube/v3/search"))
        .and(query_param("key", "aaaa-key"))
        .respond_with(ResponseTemplate::new(403).set_body_json(error_body(403, "quotaExceeded")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/youtube/v3/search"))
        .and(query_param("key", "bbbb-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_body()))
        .expect(1)
        .mount(&server)
        .await;

    let store = Arc::new(MemoryStore::new());
    store.insert_key("aaaa-key").await.unwrap();
    store.insert_key("bbbb-key").await.unwrap();
    let harvester = Harvester::new(
        Arc::new(source(&server)),
        Stores::from_backend(store.clone()),
        SearchSettings {
            query: "cats".to_string(),
            max_results: 5,
            published_after: "2022-01-01T00:00:00Z".to_string(),
        },
        Duration::from_secs(10),
    );

    let mut cursor = FetchCursor::new();
    let first = harvester.tick(&mut cursor).await;
    let second = harvester.tick(&mut cursor).await;

    assert_eq!(
        first,
        TickOutcome::QuotaExceeded {
            replacement: KeyReplacement::Acquired("bbbb****".to_string())
        }
    );
    assert_eq!(second, TickOutcome::Stored { fetched: 2, inserted: 2 });
    assert!(store.get_key("aaaa-key").unwrap().is_exhausted);
    assert_eq!(store.video_count().await.unwrap(), 2);
    assert_eq!(cursor.etag.as_deref(), Some("etag-1"));
}
