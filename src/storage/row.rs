use anyhow::anyhow;
use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::models::{ClickEvent, GeoFields};
use crate::storage::StorageError;

pub(crate) const CLICK_COLUMNS: &str = "id, widget_id, owner_username, url, custom_title, \
     custom_image, ip_hash, referrer_domain, device_type, country, country_code, region, city, \
     clicked_at";

/// Flat database shape of a click, shared by both backends
#[derive(Debug, FromRow)]
pub(crate) struct ClickRow {
    pub id: i64,
    pub widget_id: String,
    pub owner_username: String,
    pub url: String,
    pub custom_title: Option<String>,
    pub custom_image: Option<String>,
    pub ip_hash: String,
    pub referrer_domain: String,
    pub device_type: String,
    pub country: Option<String>,
    pub country_code: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    /// Unix milliseconds
    pub clicked_at: i64,
}

impl TryFrom<ClickRow> for ClickEvent {
    type Error = StorageError;

    fn try_from(row: ClickRow) -> Result<Self, Self::Error> {
        let device_type = row.device_type.parse()?;
        let clicked_at: DateTime<Utc> = DateTime::from_timestamp_millis(row.clicked_at)
            .ok_or_else(|| anyhow!("click {} has out-of-range timestamp", row.id))?;

        // The enricher writes the group in one statement, so `country` decides
        let geo = row.country.map(|country| GeoFields {
            country,
            country_code: row.country_code.unwrap_or_default(),
            region: row.region.unwrap_or_default(),
            city: row.city.unwrap_or_default(),
        });

        Ok(ClickEvent {
            id: row.id,
            widget_id: row.widget_id,
            owner_username: row.owner_username,
            url: row.url,
            custom_title: row.custom_title,
            custom_image: row.custom_image,
            ip_hash: row.ip_hash,
            referrer_domain: row.referrer_domain,
            device_type,
            geo,
            clicked_at,
        })
    }
}

pub(crate) fn rows_to_events(rows: Vec<ClickRow>) -> Result<Vec<ClickEvent>, StorageError> {
    rows.into_iter().map(ClickEvent::try_from).collect()
}
