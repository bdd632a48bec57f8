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
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::sync::Arc;

pub struct PostgresStorage {
    pool: Arc<PgPool>,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &ClickFilter) {
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
impl Storage for PostgresStorage {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS click_events (
                id BIGSERIAL PRIMARY KEY,
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
                clicked_at BIGINT NOT NULL
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
                created_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn insert_click(&self, event: &ClickEvent) -> StorageResult<i64> {
        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO click_events (
                widget_id, owner_username, url, custom_title, custom_image,
                ip_hash, referrer_domain, device_type, clicked_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
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
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(id)
    }

    async fn set_click_geo(&self, id: i64, geo: &GeoFields) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE click_events
            SET country = $1, country_code = $2, region = $3, city = $4
            WHERE id = $5 AND country IS NULL
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
            "SELECT {CLICK_COLUMNS} FROM click_events WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        row.map(ClickEvent::try_from).transpose()
    }

    async fn find_clicks(&self, filter: &ClickFilter) -> StorageResult<Vec<ClickEvent>> {
        let mut builder =
            QueryBuilder::<Postgres>::new(format!("SELECT {CLICK_COLUMNS} FROM click_events"));
        push_filter(&mut builder, filter);
        builder.push(" ORDER BY clicked_at ASC, id ASC");

        let rows = builder
            .build_query_as::<ClickRow>()
            .fetch_all(self.pool.as_ref())
            .await?;

        rows_to_events(rows)
    }

    async fn widget_totals(&self, filter: &ClickFilter) -> StorageResult<Vec<WidgetTotals>> {
        let mut builder = QueryBuilder::<Postgres>::new(WIDGET_TOTALS_HEAD);
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
        let mut builder = QueryBuilder::<Postgres>::new(timeline_head(Dialect::Postgres, bucket));
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
        let mut builder = QueryBuilder::<Postgres>::new(count_head(dimension));
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
        let mut builder = QueryBuilder::<Postgres>::new(PLACES_HEAD);
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
        let mut builder = QueryBuilder::<Postgres>::new(activity_head(Dialect::Postgres));
        push_filter(&mut builder, filter);
        builder.push(ACTIVITY_TAIL).push_bind(limit);

        let groups = builder
            .build_query_as::<ActivityGroup>()
            .fetch_all(self.pool.as_ref())
            .await?;
        Ok(groups)
    }

    async fn location_pairs(&self, filter: &ClickFilter) -> StorageResult<Vec<(String, String)>> {
        let mut builder = QueryBuilder::<Postgres>::new(LOCATION_PAIRS_HEAD);
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
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id) DO UPDATE SET username = EXCLUDED.username
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
        let username =
            sqlx::query_scalar::<_, String>("SELECT username FROM users WHERE user_id = $1")
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
