//! Grouped queries behind the analytics views
//!
//! Both backends run the same statements. Only the expression that turns
//! `clicked_at` (unix milliseconds) into a UTC bucket label differs. Each
//! statement is split around the owner filter, which the backend pushes with
//! its own `QueryBuilder`.

use sqlx::FromRow;

use crate::analytics::filter::TimeBucket;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Dialect {
    Sqlite,
    Postgres,
}

impl Dialect {
    /// Label expression matching `TimeBucket::label`
    fn bucket(self, bucket: TimeBucket) -> &'static str {
        match (self, bucket) {
            (Dialect::Sqlite, TimeBucket::Hour) => {
                "strftime('%Y-%m-%d %H:00', clicked_at / 1000, 'unixepoch')"
            }
            (Dialect::Sqlite, TimeBucket::Day) => {
                "strftime('%Y-%m-%d', clicked_at / 1000, 'unixepoch')"
            }
            (Dialect::Postgres, TimeBucket::Hour) => {
                "to_char(to_timestamp(clicked_at / 1000) AT TIME ZONE 'UTC', 'YYYY-MM-DD HH24:00')"
            }
            (Dialect::Postgres, TimeBucket::Day) => {
                "to_char(to_timestamp(clicked_at / 1000) AT TIME ZONE 'UTC', 'YYYY-MM-DD')"
            }
        }
    }
}

/// Column a simple ranking groups by
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountDimension {
    Referrer,
    Device,
}

impl CountDimension {
    fn column(self) -> &'static str {
        match self {
            CountDimension::Referrer => "referrer_domain",
            CountDimension::Device => "device_type",
        }
    }
}

/// Per-widget totals. The url, title and image come from the widget's
/// earliest click, ties broken by id.
#[derive(Debug, Clone, FromRow)]
pub struct WidgetTotals {
    pub widget_id: String,
    pub url: Option<String>,
    pub custom_title: Option<String>,
    pub custom_image: Option<String>,
    pub total: i64,
    pub visitors: i64,
}

/// Click count of one (city, region, country) group. Missing parts are "".
#[derive(Debug, Clone, FromRow)]
pub struct PlaceCount {
    pub city: String,
    pub region: String,
    pub country: String,
    /// Country code of the group's earliest click
    pub country_code: Option<String>,
    pub hits: i64,
}

/// One recent-activity group. Missing geo parts are "".
#[derive(Debug, Clone, FromRow)]
pub struct ActivityGroup {
    pub url: String,
    pub device_type: String,
    pub referrer_domain: String,
    pub country_code: String,
    pub city: String,
    pub region: String,
    pub country: String,
    pub day: String,
    pub hits: i64,
    /// Unix milliseconds
    pub last_clicked_at: i64,
}

pub(crate) const WIDGET_TOTALS_HEAD: &str = r#"
    SELECT widget_id,
           MAX(CASE WHEN first_seen = 1 THEN url END) AS url,
           MAX(CASE WHEN first_seen = 1 THEN custom_title END) AS custom_title,
           MAX(CASE WHEN first_seen = 1 THEN custom_image END) AS custom_image,
           COUNT(*) AS total,
           COUNT(DISTINCT ip_hash) AS visitors
    FROM (
        SELECT widget_id, url, custom_title, custom_image, ip_hash,
               ROW_NUMBER() OVER (PARTITION BY widget_id ORDER BY clicked_at, id) AS first_seen
        FROM click_events"#;

pub(crate) const WIDGET_TOTALS_TAIL: &str = r#"
    ) AS scoped
    GROUP BY widget_id
    ORDER BY total DESC, widget_id ASC"#;

pub(crate) fn timeline_head(dialect: Dialect, bucket: TimeBucket) -> String {
    format!(
        "SELECT {} AS bucket, COUNT(*) AS hits FROM click_events",
        dialect.bucket(bucket)
    )
}

pub(crate) const TIMELINE_TAIL: &str = " GROUP BY bucket ORDER BY bucket ASC";

pub(crate) fn count_head(dimension: CountDimension) -> String {
    format!(
        "SELECT {} AS grp, COUNT(*) AS hits FROM click_events",
        dimension.column()
    )
}

pub(crate) fn count_tail(dimension: CountDimension) -> String {
    format!(
        " GROUP BY {} ORDER BY hits DESC, grp ASC",
        dimension.column()
    )
}

pub(crate) const PLACES_HEAD: &str = r#"
    SELECT geo_city AS city, geo_region AS region, geo_country AS country,
           MAX(CASE WHEN first_seen = 1 THEN geo_country_code END) AS country_code,
           COUNT(*) AS hits
    FROM (
        SELECT COALESCE(city, '') AS geo_city,
               COALESCE(region, '') AS geo_region,
               COALESCE(country, '') AS geo_country,
               COALESCE(country_code, '') AS geo_country_code,
               ROW_NUMBER() OVER (PARTITION BY city, region, country ORDER BY clicked_at, id) AS first_seen
        FROM click_events"#;

pub(crate) const PLACES_TAIL: &str = r#"
    ) AS scoped
    GROUP BY geo_city, geo_region, geo_country
    ORDER BY hits DESC, city ASC, region ASC, country ASC
    LIMIT "#;

pub(crate) fn activity_head(dialect: Dialect) -> String {
    format!(
        r#"
    SELECT url, device_type, referrer_domain,
           log_country_code AS country_code, log_city AS city,
           log_region AS region, log_country AS country, log_day AS day,
           COUNT(*) AS hits, MAX(clicked_at) AS last_clicked_at
    FROM (
        SELECT url, device_type, referrer_domain, clicked_at,
               COALESCE(country_code, '') AS log_country_code,
               COALESCE(city, '') AS log_city,
               COALESCE(region, '') AS log_region,
               COALESCE(country, '') AS log_country,
               {} AS log_day
        FROM click_events"#,
        dialect.bucket(TimeBucket::Day)
    )
}

pub(crate) const ACTIVITY_TAIL: &str = r#"
    ) AS scoped
    GROUP BY url, device_type, referrer_domain, log_country_code, log_city, log_region, log_country, log_day
    ORDER BY last_clicked_at DESC, url ASC, device_type ASC, referrer_domain ASC,
             country ASC, region ASC, city ASC
    LIMIT "#;

pub(crate) const LOCATION_PAIRS_HEAD: &str =
    "SELECT DISTINCT country AS loc_country, COALESCE(region, '') AS loc_region FROM click_events";

pub(crate) const LOCATION_PAIRS_TAIL: &str = " ORDER BY loc_country ASC, loc_region ASC";
