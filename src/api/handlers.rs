use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Query, State},
    http::{header::USER_AGENT, HeaderMap, StatusCode},
    Extension, Json,
};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::analytics::models::{
    ClickLogItem, DeviceStat, GeoStat, LocationItem, ReferrerStat, TimelinePoint, WidgetClickStat,
};
use crate::analytics::{
    extract_client_ip, AnalyticsService, ClickRecorder, FilterParams, RecordError, TimelineParams,
};
use crate::auth::OwnerIdentity;
use crate::config::ClientIpConfig;
use crate::models::NewClick;
use crate::storage::StorageError;

pub struct AppState {
    pub recorder: ClickRecorder,
    pub analytics: AnalyticsService,
    pub client_ip: ClientIpConfig,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub message: String,
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub message: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn error(status: StatusCode, message: &str) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            message: message.to_string(),
        }),
    )
}

/// Log the storage failure and hide it behind a generic message
fn fetch_failed(what: &str, err: StorageError) -> ApiError {
    tracing::error!("Failed to fetch {}: {}", what, err);
    error(
        StatusCode::INTERNAL_SERVER_ERROR,
        &format!("Failed to fetch {what}"),
    )
}

pub async fn health_check() -> Json<SuccessResponse> {
    Json(SuccessResponse {
        message: "OK".to_string(),
    })
}

/// Record a widget click. Public, called by embedded widgets.
pub async fn record_click(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    payload: Result<Json<NewClick>, JsonRejection>,
) -> Result<(StatusCode, Json<SuccessResponse>), ApiError> {
    let Json(click) = payload.map_err(|rejection| {
        tracing::debug!("Rejected click payload: {}", rejection);
        error(StatusCode::BAD_REQUEST, "Invalid payload")
    })?;

    let client_ip = extract_client_ip(&headers, addr.ip(), &state.client_ip);
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");

    match state.recorder.record(click, client_ip, user_agent).await {
        Ok(_) => Ok((
            StatusCode::CREATED,
            Json(SuccessResponse {
                message: "Click recorded".to_string(),
            }),
        )),
        Err(RecordError::Validation(message)) => Err(error(StatusCode::BAD_REQUEST, &message)),
        Err(RecordError::Storage(e)) => {
            tracing::error!("Failed to record click: {}", e);
            Err(error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to record click",
            ))
        }
    }
}

pub async fn get_analytics(
    State(state): State<Arc<AppState>>,
    Extension(OwnerIdentity(owner)): Extension<OwnerIdentity>,
    Query(params): Query<FilterParams>,
) -> ApiResult<Vec<WidgetClickStat>> {
    state
        .analytics
        .widget_stats(&owner, &params)
        .await
        .map(Json)
        .map_err(|e| fetch_failed("analytics", e))
}

pub async fn get_timeline(
    State(state): State<Arc<AppState>>,
    Extension(OwnerIdentity(owner)): Extension<OwnerIdentity>,
    Query(params): Query<TimelineParams>,
) -> ApiResult<Vec<TimelinePoint>> {
    state
        .analytics
        .timeline(&owner, &params)
        .await
        .map(Json)
        .map_err(|e| fetch_failed("timeline", e))
}

pub async fn get_referrers(
    State(state): State<Arc<AppState>>,
    Extension(OwnerIdentity(owner)): Extension<OwnerIdentity>,
    Query(params): Query<FilterParams>,
) -> ApiResult<Vec<ReferrerStat>> {
    state
        .analytics
        .referrers(&owner, &params)
        .await
        .map(Json)
        .map_err(|e| fetch_failed("referrers", e))
}

pub async fn get_devices(
    State(state): State<Arc<AppState>>,
    Extension(OwnerIdentity(owner)): Extension<OwnerIdentity>,
    Query(params): Query<FilterParams>,
) -> ApiResult<Vec<DeviceStat>> {
    state
        .analytics
        .devices(&owner, &params)
        .await
        .map(Json)
        .map_err(|e| fetch_failed("devices", e))
}

pub async fn get_geo(
    State(state): State<Arc<AppState>>,
    Extension(OwnerIdentity(owner)): Extension<OwnerIdentity>,
    Query(params): Query<FilterParams>,
) -> ApiResult<Vec<GeoStat>> {
    state
        .analytics
        .geo(&owner, &params)
        .await
        .map(Json)
        .map_err(|e| fetch_failed("geo", e))
}

pub async fn get_click_logs(
    State(state): State<Arc<AppState>>,
    Extension(OwnerIdentity(owner)): Extension<OwnerIdentity>,
    Query(params): Query<FilterParams>,
) -> ApiResult<Vec<ClickLogItem>> {
    state
        .analytics
        .click_logs(&owner, &params)
        .await
        .map(Json)
        .map_err(|e| fetch_failed("click logs", e))
}

pub async fn get_locations(
    State(state): State<Arc<AppState>>,
    Extension(OwnerIdentity(owner)): Extension<OwnerIdentity>,
) -> ApiResult<Vec<LocationItem>> {
    state
        .analytics
        .locations(&owner)
        .await
        .map(Json)
        .map_err(|e| fetch_failed("locations", e))
}
