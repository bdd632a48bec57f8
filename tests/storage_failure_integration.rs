//! API behavior when the click store is unavailable

use anyhow::anyhow;
use async_trait::async_trait;
use axum::{
    body::Body,
    extract::connect_info::MockConnectInfo,
    http::{header, Request, StatusCode},
    Router,
};
use linkpulse::analytics::filter::TimeBucket;
use linkpulse::analytics::{ClickFilter, GeoEnricher, GeoLookup, GeoProvider};
use linkpulse::auth::AuthService;
use linkpulse::config::{AuthConfig, ClientIpConfig, CorsConfig, EnrichmentConfig};
use linkpulse::models::{ClickEvent, GeoFields};
use linkpulse::storage::{
    ActivityGroup, CountDimension, PlaceCount, Storage, StorageError, StorageResult, WidgetTotals,
};
use serde_json::{json, Value};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn unavailable<T>() -> StorageResult<T> {
    Err(StorageError::Other(anyhow!("database is unavailable")))
}

/// Resolves every user to "alice" but fails every click read or write
struct UnavailableStore;

#[async_trait]
impl Storage for UnavailableStore {
    async fn init(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn insert_click(&self, _event: &ClickEvent) -> StorageResult<i64> {
        unavailable()
    }

    async fn set_click_geo(&self, _id: i64, _geo: &GeoFields) -> StorageResult<bool> {
        unavailable()
    }

    async fn get_click(&self, _id: i64) -> StorageResult<Option<ClickEvent>> {
        unavailable()
    }

    async fn find_clicks(&self, _filter: &ClickFilter) -> StorageResult<Vec<ClickEvent>> {
        unavailable()
    }

    async fn widget_totals(&self, _filter: &ClickFilter) -> StorageResult<Vec<WidgetTotals>> {
        unavailable()
    }

    async fn click_timeline(
        &self,
        _filter: &ClickFilter,
        _bucket: TimeBucket,
    ) -> StorageResult<Vec<(String, i64)>> {
        unavailable()
    }

    async fn count_by(
        &self,
        _filter: &ClickFilter,
        _dimension: CountDimension,
        _limit: Option<i64>,
    ) -> StorageResult<Vec<(String, i64)>> {
        unavailable()
    }

    async fn top_places(&self, _filter: &ClickFilter, _limit: i64) -> StorageResult<Vec<PlaceCount>> {
        unavailable()
    }

    async fn recent_activity(
        &self,
        _filter: &ClickFilter,
        _limit: i64,
    ) -> StorageResult<Vec<ActivityGroup>> {
        unavailable()
    }

    async fn location_pairs(&self, _filter: &ClickFilter) -> StorageResult<Vec<(String, String)>> {
        unavailable()
    }

    async fn upsert_user(&self, _user_id: &str, _username: &str) -> StorageResult<()> {
        unavailable()
    }

    async fn find_username(&self, _user_id: &str) -> StorageResult<Option<String>> {
        Ok(Some("alice".to_string()))
    }

    async fn list_users(&self) -> StorageResult<Vec<(String, String)>> {
        unavailable()
    }
}

/// Counts lookups, which only happen for queued enrichment jobs
#[derive(Default)]
struct CountingLookup {
    calls: AtomicUsize,
}

#[async_trait]
impl GeoLookup for CountingLookup {
    async fn lookup(&self, _ip: IpAddr) -> Option<GeoFields> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        None
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

struct Harness {
    router: Router,
    enricher: Arc<GeoEnricher>,
    lookup: Arc<CountingLookup>,
    token: String,
}

fn harness() -> Harness {
    let storage: Arc<dyn Storage> = Arc::new(UnavailableStore);
    let lookup = Arc::new(CountingLookup::default());
    let enricher = Arc::new(GeoEnricher::spawn(
        Arc::clone(&storage),
        GeoProvider::new(lookup.clone()),
        &EnrichmentConfig::default(),
    ));
    let auth = Arc::new(AuthService::new(
        &AuthConfig {
            jwt_secret: "test-secret".to_string(),
            owner_cache_ttl_secs: 300,
        },
        Arc::clone(&storage),
    ));
    let token = auth
        .issue_token("u-alice", "user", Duration::from_secs(3600))
        .unwrap();

    let router = linkpulse::api::create_api_router(
        storage,
        auth,
        Arc::clone(&enricher),
        ClientIpConfig::default(),
        &CorsConfig {
            allowed_origins: vec![],
        },
    );

    Harness {
        router,
        enricher,
        lookup,
        token,
    }
}

async fn read_json(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap_or(Value::Null))
}

#[tokio::test]
async fn test_store_failure_on_record_returns_500_and_queues_nothing() {
    let h = harness();
    let body = json!({ "widget_id": "w1", "owner_username": "alice", "url": "https://a.example" });

    let response = h
        .router
        .clone()
        .layer(MockConnectInfo(SocketAddr::from(([203, 0, 113, 20], 51000))))
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/clicks")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    let (status, body) = read_json(response).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({ "message": "Failed to record click" }));

    // Draining the queue runs any pending job, so a zero count means none was queued
    h.enricher.shutdown().await;
    assert_eq!(h.lookup.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_store_failure_on_views_returns_500() {
    let h = harness();

    for (uri, message) in [
        ("/api/analytics", "Failed to fetch analytics"),
        ("/api/analytics/timeline?mode=hourly", "Failed to fetch timeline"),
        ("/api/analytics/referrers", "Failed to fetch referrers"),
        ("/api/analytics/devices", "Failed to fetch devices"),
        ("/api/analytics/geo?country=Germany", "Failed to fetch geo"),
        ("/api/analytics/logs", "Failed to fetch click logs"),
        ("/api/analytics/locations", "Failed to fetch locations"),
    ] {
        let response = h
            .router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .header(header::AUTHORIZATION, format!("Bearer {}", h.token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let (status, body) = read_json(response).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR, "{uri}");
        assert_eq!(body, json!({ "message": message }), "{uri}");
    }
}
