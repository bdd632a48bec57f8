use crate::analytics::filter::{ClickFilter, TimeBucket};
use crate::models::{ClickEvent, GeoFields};
use crate::storage::aggregate::{
    activity_head, count_head, count_tail, timeline_head, ActivityGroup, CountDimension, Dialect,
    PlaceCount, WidgetTotals, ACTIVITY_TAIL, LOCATION_PAIRS_HEAD, LOCATION_PAIRS_TAIL, PLACES_HEAD,
    PLACES_TAIL, TIMELINE_TAIL, WIDGET_TOTALS_HEAD, WIDGET_TOTALS_TAIL,
};
use crate::storage::row::{rows_to_events, ClickRow, CLICK_COLUMNS};
use crate::storage::{Storage, StorageError, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::sync::Arc;

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
}

impl SqliteStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

fn push_filter(builder: &mut QueryBuilder<'_, Sqlite>, filter: &ClickFilter) {
    builder
        .push(" WHERE owner_username = ")
        .push_bind(filter.owner_username.clone());

    if let Some(from) = filter.from {
        builder
            .push(" AND clicked_at >= ")
            .push_bind(from.timestamp_millis());
    }
    if let Some(until) = filter.until {
        builder
            .push(" AND clicked_at <= ")
            .push_bind(until.timestamp_millis());
    }
    if let Some(country) = &filter.country {
        builder.push(" AND country = ").push_bind(country.clone());
    } else if filter.require_country {
        builder.push(" AND country IS NOT NULL AND country <> ''");
    }
    if let Some(region) = &filter.region {
        builder.push(" AND region = ").push_bind(region.clone());
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS click_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                widget_id TEXT NOT NULL,
                owner_username TEXT NOT NULL,
                url TEXT NOT NULL,
                custom_title TEXT,
                custom_image TEXT,
                ip_hash TEXT NOT NULL,
                referrer_domain TEXT NOT NULL,
                device_type TEXT NOT NULL,
                country TEXT,
                country_code TEXT,
                region TEXT,
                city TEXT,
                clicked_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_clicks_owner_time ON click_events(owner_username, clicked_at)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_clicks_owner_country ON click_events(owner_username, country)",
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                user_id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn insert_click(&self, event: &ClickEvent) -> StorageResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO click_events (
                widget_id, owner_username, url, custom_title, custom_image,
                ip_hash, referrer_domain, device_type, clicked_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&event.widget_id)
        .bind(&event.owner_username)
        .bind(&event.url)
        .bind(event.custom_title.as_deref())
        .bind(event.custom_image.as_deref())
        .bind(&event.ip_hash)
        .bind(&event.referrer_domain)
        .bind(event.device_type.as_str())
        .bind(event.clicked_at.timestamp_millis())
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn set_click_geo(&self, id: i64, geo: &GeoFields) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE click_events
            SET country = ?, country_code = ?, region = ?, city = ?
            WHERE id = ? AND country IS NULL
            "#,
        )
        .bind(&geo.country)
        .bind(&geo.country_code)
        .bind(&geo.region)
        .bind(&geo.city)
        .bind(id)
        .execute(self.pool.as_ref())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_click(&self, id: i64) -> StorageResult<Option<ClickEvent>> {
        let row = sqlx::query_as::<_, ClickRow>(&format!(
            "SELECT {CLICK_COLUMNS} FROM click_events WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(ClickEvent::try_from).transpose()
    }

    async fn find_clicks(&self, filter: &ClickFilter) -> StorageResult<Vec<ClickEvent>> {
        let mut builder = QueryBuilder::<Sqlite>::new(format!("SELECT {CLICK_COLUMNS} FROM click_events"));
        push_filter(&mut builder, filter);
        builder.push(" ORDER BY clicked_at ASC, id ASC");

        let rows = builder
            .build_query_as::<ClickRow>()
            .fetch_all(self.pool.as_ref())
            .await?;

        rows_to_events(rows)
    }

    async fn widget_totals(&self, filter: &ClickFilter) -> StorageResult<Vec<WidgetTotals>> {
        let mut builder = QueryBuilder::<Sqlite>::new(WIDGET_TOTALS_HEAD);
        push_filter(&mut builder, filter);
        builder.push(WIDGET_TOTALS_TAIL);

        let totals = builder
            .build_query_as::<WidgetTotals>()
            .fetch_all(self.pool.as_ref())
            .await?;
        Ok(totals)
    }

    async fn click_timeline(
        &self,
        filter: &ClickFilter,
        bucket: TimeBucket,
    ) -> StorageResult<Vec<(String, i64)>> {
        let mut builder = QueryBuilder::<Sqlite>::new(timeline_head(Dialect::Sqlite, bucket));
        push_filter(&mut builder, filter);
        builder.push(TIMELINE_TAIL);

        let points = builder
            .build_query_as::<(String, i64)>()
            .fetch_all(self.pool.as_ref())
            .await?;
        Ok(points)
    }

    async fn count_by(
        &self,
        filter: &ClickFilter,
        dimension: CountDimension,
        limit: Option<i64>,
    ) -> StorageResult<Vec<(String, i64)>> {
        let mut builder = QueryBuilder::<Sqlite>::new(count_head(dimension));
        push_filter(&mut builder, filter);
        builder.push(count_tail(dimension));
        if let Some(limit) = limit {
            builder.push(" LIMIT ").push_bind(limit);
        }

        let counts = builder
            .build_query_as::<(String, i64)>()
            .fetch_all(self.pool.as_ref())
            .await?;
        Ok(counts)
    }

    async fn top_places(&self, filter: &ClickFilter, limit: i64) -> StorageResult<Vec<PlaceCount>> {
        let mut builder = QueryBuilder::<Sqlite>::new(PLACES_HEAD);
        push_filter(&mut builder, filter);
        builder.push(PLACES_TAIL).push_bind(limit);

        let places = builder
            .build_query_as::<PlaceCount>()
            .fetch_all(self.pool.as_ref())
            .await?;
        Ok(places)
    }

    async fn recent_activity(
        &self,
        filter: &ClickFilter,
        limit: i64,
    ) -> StorageResult<Vec<ActivityGroup>> {
        let mut builder = QueryBuilder::<Sqlite>::new(activity_head(Dialect::Sqlite));
        push_filter(&mut builder, filter);
        builder.push(ACTIVITY_TAIL).push_bind(limit);

        let groups = builder
            .build_query_as::<ActivityGroup>()
            .fetch_all(self.pool.as_ref())
            .await?;
        Ok(groups)
    }

    async fn location_pairs(&self, filter: &ClickFilter) -> StorageResult<Vec<(String, String)>> {
        let mut builder = QueryBuilder::<Sqlite>::new(LOCATION_PAIRS_HEAD);
        push_filter(&mut builder, filter);
        builder.push(LOCATION_PAIRS_TAIL);

        let pairs = builder
            .build_query_as::<(String, String)>()
            .fetch_all(self.pool.as_ref())
            .await?;
        Ok(pairs)
    }

    async fn upsert_user(&self, user_id: &str, username: &str) -> StorageResult<()> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO users (user_id, username, created_at)
            VALUES (?, ?, ?)
            ON CONFLICT (user_id) DO UPDATE SET username = excluded.username
            "#,
        )
        .bind(user_id)
        .bind(username)
        .bind(now)
        .execute(self.pool.as_ref())
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(StorageError::Conflict),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_username(&self, user_id: &str) -> StorageResult<Option<String>> {
        let username = sqlx::query_scalar::<_, String>("SELECT username FROM users WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(username)
    }

    async fn list_users(&self) -> StorageResult<Vec<(String, String)>> {
        let users = sqlx::query_as::<_, (String, String)>(
            "SELECT user_id, username FROM users ORDER BY username ASC",
        )
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(users)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeviceType;
    use chrono::{TimeZone, Utc};

    async fn setup() -> SqliteStorage {
        let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        storage.init().await.unwrap();
        storage
    }

    fn click(owner: &str, widget: &str, at_secs: i64) -> ClickEvent {
        ClickEvent {
            id: 0,
            widget_id: widget.to_string(),
            owner_username: owner.to_string(),
            url: "https://example.com".to_string(),
            custom_title: Some("Example".to_string()),
            custom_image: None,
            ip_hash: "abc".to_string(),
            referrer_domain: "Direct".to_string(),
            device_type: DeviceType::Desktop,
            geo: None,
            clicked_at: Utc.timestamp_opt(at_secs, 0).unwrap(),
        }
    }

    fn texas() -> GeoFields {
        GeoFields {
            country: "USA".to_string(),
            country_code: "US".to_string(),
            region: "Texas".to_string(),
            city: "Austin".to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_click() {
        let storage = setup().await;
        let id = storage.insert_click(&click("alice", "w1", 1_700_000_000)).await.unwrap();

        let stored = storage.get_click(id).await.unwrap().unwrap();
        assert_eq!(stored.widget_id, "w1");
        assert_eq!(stored.custom_title.as_deref(), Some("Example"));
        assert_eq!(stored.device_type, DeviceType::Desktop);
        assert!(stored.geo.is_none());
        assert_eq!(stored.clicked_at.timestamp(), 1_700_000_000);
    }

    #[tokio::test]
    async fn test_geo_is_set_at_most_once() {
        let storage = setup().await;
        let id = storage.insert_click(&click("alice", "w1", 1_700_000_000)).await.unwrap();

        assert!(storage.set_click_geo(id, &texas()).await.unwrap());
        let other = GeoFields {
            country: "Canada".to_string(),
            ..texas()
        };
        assert!(!storage.set_click_geo(id, &other).await.unwrap());

        let stored = storage.get_click(id).await.unwrap().unwrap();
        assert_eq!(stored.geo, Some(texas()));
    }

    #[tokio::test]
    async fn test_find_clicks_applies_filter() {
        let storage = setup().await;
        storage.insert_click(&click("alice", "w1", 1_000)).await.unwrap();
        let located = storage.insert_click(&click("alice", "w2", 2_000)).await.unwrap();
        storage.insert_click(&click("alice", "w3", 3_000)).await.unwrap();
        storage.insert_click(&click("bob", "w9", 2_000)).await.unwrap();
        storage.set_click_geo(located, &texas()).await.unwrap();

        let all = storage.find_clicks(&ClickFilter::for_owner("alice")).await.unwrap();
        let widgets: Vec<_> = all.iter().map(|c| c.widget_id.as_str()).collect();
        assert_eq!(widgets, vec!["w1", "w2", "w3"]);

        let mut ranged = ClickFilter::for_owner("alice");
        ranged.from = Some(Utc.timestamp_opt(2_000, 0).unwrap());
        ranged.until = Some(Utc.timestamp_opt(3_000, 0).unwrap());
        assert_eq!(storage.find_clicks(&ranged).await.unwrap().len(), 2);

        let mut with_country = ClickFilter::for_owner("alice");
        with_country.require_country = true;
        let found = storage.find_clicks(&with_country).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].widget_id, "w2");

        let mut by_region = ClickFilter::for_owner("alice");
        by_region.country = Some("USA".to_string());
        by_region.region = Some("Ohio".to_string());
        assert!(storage.find_clicks(&by_region).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sql_buckets_match_label_format() {
        let storage = setup().await;
        // 2024-02-25 09:41:07.250 UTC and 23:59:59.999 the same day
        let morning = Utc.timestamp_millis_opt(1_708_854_067_250).unwrap();
        let midnight = Utc.timestamp_millis_opt(1_708_905_599_999).unwrap();
        for at in [morning, midnight] {
            let mut event = click("alice", "w1", 0);
            event.clicked_at = at;
            storage.insert_click(&event).await.unwrap();
        }

        let filter = ClickFilter::for_owner("alice");
        let hourly = storage.click_timeline(&filter, TimeBucket::Hour).await.unwrap();
        assert_eq!(
            hourly,
            vec![
                (TimeBucket::Hour.label(morning), 1),
                (TimeBucket::Hour.label(midnight), 1)
            ]
        );

        let daily = storage.click_timeline(&filter, TimeBucket::Day).await.unwrap();
        assert_eq!(daily, vec![(TimeBucket::Day.label(morning), 2)]);
    }

    #[tokio::test]
    async fn test_grouped_queries_respect_filter_and_limit() {
        let storage = setup().await;
        for (widget, referrer, at) in [("w1", "a.com", 1_000), ("w1", "b.com", 2_000), ("w2", "b.com", 3_000)] {
            let mut event = click("alice", widget, at);
            event.referrer_domain = referrer.to_string();
            storage.insert_click(&event).await.unwrap();
        }
        storage.insert_click(&click("bob", "w9", 2_000)).await.unwrap();

        let filter = ClickFilter::for_owner("alice");
        let top = storage
            .count_by(&filter, CountDimension::Referrer, Some(1))
            .await
            .unwrap();
        assert_eq!(top, vec![("b.com".to_string(), 2)]);

        let mut ranged = ClickFilter::for_owner("alice");
        ranged.until = Some(Utc.timestamp_opt(2_000, 0).unwrap());
        let totals = storage.widget_totals(&ranged).await.unwrap();
        assert_eq!(totals.len(), 1);
        assert_eq!(totals[0].widget_id, "w1");
        assert_eq!(totals[0].total, 2);
        assert_eq!(totals[0].visitors, 1);

        let activity = storage.recent_activity(&filter, 10).await.unwrap();
        assert_eq!(activity[0].referrer_domain, "b.com");
        assert_eq!(activity[0].last_clicked_at, 3_000_000);
        assert_eq!(activity[0].day, "1970-01-01");
        assert_eq!(storage.recent_activity(&filter, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_places_and_location_pairs_skip_unenriched() {
        let storage = setup().await;
        let located = storage.insert_click(&click("alice", "w1", 1_000)).await.unwrap();
        storage.insert_click(&click("alice", "w1", 2_000)).await.unwrap();
        storage.set_click_geo(located, &texas()).await.unwrap();

        let mut filter = ClickFilter::for_owner("alice");
        filter.require_country = true;

        let places = storage.top_places(&filter, 30).await.unwrap();
        assert_eq!(places.len(), 1);
        assert_eq!(places[0].city, "Austin");
        assert_eq!(places[0].country_code.as_deref(), Some("US"));
        assert_eq!(places[0].hits, 1);

        let pairs = storage.location_pairs(&filter).await.unwrap();
        assert_eq!(pairs, vec![("USA".to_string(), "Texas".to_string())]);
    }

    #[tokio::test]
    async fn test_user_mapping() {
        let storage = setup().await;
        storage.upsert_user("u1", "alice").await.unwrap();
        storage.upsert_user("u2", "bob").await.unwrap();

        assert_eq!(storage.find_username("u1").await.unwrap().as_deref(), Some("alice"));
        assert!(storage.find_username("nobody").await.unwrap().is_none());
        assert!(matches!(
            storage.upsert_user("u3", "alice").await,
            Err(StorageError::Conflict)
        ));

        storage.upsert_user("u1", "alice2").await.unwrap();
        let users = storage.list_users().await.unwrap();
        assert_eq!(
            users,
            vec![
                ("u1".to_string(), "alice2".to_string()),
                ("u2".to_string(), "bob".to_string())
            ]
        );
    }
}
