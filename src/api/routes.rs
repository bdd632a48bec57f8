use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::analytics::{AnalyticsService, ClickRecorder, GeoEnricher};
use crate::auth::{auth_middleware, AuthService};
use crate::config::{ClientIpConfig, CorsConfig};
use crate::storage::Storage;

use super::handlers::{
    get_analytics, get_click_logs, get_devices, get_geo, get_locations, get_referrers,
    get_timeline, health_check, record_click, AppState,
};

pub fn create_api_router(
    storage: Arc<dyn Storage>,
    auth_service: Arc<AuthService>,
    enricher: Arc<GeoEnricher>,
    client_ip: ClientIpConfig,
    cors: &CorsConfig,
) -> Router {
    let state = Arc::new(AppState {
        recorder: ClickRecorder::new(Arc::clone(&storage), enricher),
        analytics: AnalyticsService::new(storage),
        client_ip,
    });

    let protected_routes = Router::new()
        .route("/api/analytics", get(get_analytics))
        .route("/api/analytics/timeline", get(get_timeline))
        .route("/api/analytics/referrers", get(get_referrers))
        .route("/api/analytics/devices", get(get_devices))
        .route("/api/analytics/geo", get(get_geo))
        .route("/api/analytics/logs", get(get_click_logs))
        .route("/api/analytics/locations", get(get_locations))
        .route_layer(middleware::from_fn(move |headers, req, next| {
            let auth = Arc::clone(&auth_service);
            auth_middleware(auth, headers, req, next)
        }))
        .with_state(Arc::clone(&state));

    Router::new()
        .route("/api/health", get(health_check))
        .route("/api/clicks", post(record_click))
        .with_state(state)
        .merge(protected_routes)
        .layer(cors_layer(cors))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}
