use crate::analytics::filter::{ClickFilter, TimeBucket};
use crate::models::{ClickEvent, GeoFields};
use crate::storage::aggregate::{ActivityGroup, CountDimension, PlaceCount, WidgetTotals};
use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("username already mapped to another user")]
    Conflict,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        StorageError::Other(err.into())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Persistent click-event store plus the user-id to username mapping
#[async_trait]
pub trait Storage: Send + Sync {
    /// Initialize the storage (create tables and indexes)
    async fn init(&self) -> Result<()>;

    /// Append a click and return its id. Geo fields on `event` are ignored.
    async fn insert_click(&self, event: &ClickEvent) -> StorageResult<i64>;

    /// Set all four geo fields of a click in one statement.
    ///
    /// Only applies while the click has no geo yet; returns whether a row changed.
    async fn set_click_geo(&self, id: i64, geo: &GeoFields) -> StorageResult<bool>;

    /// Get a single click by id
    async fn get_click(&self, id: i64) -> StorageResult<Option<ClickEvent>>;

    /// All clicks matching `filter`, oldest first (ties by insertion order)
    async fn find_clicks(&self, filter: &ClickFilter) -> StorageResult<Vec<ClickEvent>>;

    /// Per-widget totals and distinct visitors, busiest first
    async fn widget_totals(&self, filter: &ClickFilter) -> StorageResult<Vec<WidgetTotals>>;

    /// (bucket label, count) pairs, oldest bucket first
    async fn click_timeline(
        &self,
        filter: &ClickFilter,
        bucket: TimeBucket,
    ) -> StorageResult<Vec<(String, i64)>>;

    /// (value, count) pairs for one column, highest count first
    async fn count_by(
        &self,
        filter: &ClickFilter,
        dimension: CountDimension,
        limit: Option<i64>,
    ) -> StorageResult<Vec<(String, i64)>>;

    /// Most clicked (city, region, country) groups
    async fn top_places(&self, filter: &ClickFilter, limit: i64) -> StorageResult<Vec<PlaceCount>>;

    /// Clicks collapsed per day and dimension tuple, most recent group first
    async fn recent_activity(&self, filter: &ClickFilter, limit: i64)
        -> StorageResult<Vec<ActivityGroup>>;

    /// Distinct (country, region) pairs; region is "" when unknown
    async fn location_pairs(&self, filter: &ClickFilter) -> StorageResult<Vec<(String, String)>>;

    /// Map an authenticated user id to the username that owns its analytics
    async fn upsert_user(&self, user_id: &str, username: &str) -> StorageResult<()>;

    /// Username for a user id
    async fn find_username(&self, user_id: &str) -> StorageResult<Option<String>>;

    /// All (user_id, username) mappings, ordered by username
    async fn list_users(&self) -> StorageResult<Vec<(String, String)>>;
}
