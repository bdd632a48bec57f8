//! Owner-scoped aggregation views over stored clicks
//!
//! Grouping, counting and top-N limits run in the store. This module shapes
//! the grouped rows into response items: location labels, positional log
//! ids, and countries with their regions. Results are built fresh per call.

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::analytics::filter::{plan_timeline, ClickFilter, FilterParams, TimelineParams};
use crate::analytics::models::{
    ClickLogItem, DeviceStat, GeoStat, LocationItem, ReferrerStat, TimelinePoint, WidgetClickStat,
};
use crate::storage::{
    ActivityGroup, CountDimension, PlaceCount, Storage, StorageResult, WidgetTotals,
};

pub const REFERRER_LIMIT: i64 = 20;
pub const GEO_LIMIT: i64 = 30;
pub const CLICK_LOG_LIMIT: i64 = 200;

const UNKNOWN_GEO_LOCATION: &str = "Unknown Location";
const UNKNOWN_LOG_LOCATION: &str = "Unknown";

/// Read-only analytics queries
#[derive(Clone)]
pub struct AnalyticsService {
    storage: Arc<dyn Storage>,
}

impl AnalyticsService {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Totals and unique visitors per widget, busiest first
    pub async fn widget_stats(&self, owner: &str, params: &FilterParams) -> StorageResult<Vec<WidgetClickStat>> {
        let totals = self
            .storage
            .widget_totals(&ClickFilter::from_params(owner, params))
            .await?;
        Ok(totals.into_iter().map(widget_stat).collect())
    }

    /// Click counts per hour or day bucket, oldest bucket first
    pub async fn timeline(&self, owner: &str, params: &TimelineParams) -> StorageResult<Vec<TimelinePoint>> {
        let plan = plan_timeline(params, Utc::now());

        let mut filter = ClickFilter::from_params(owner, &params.filter);
        if let Some(since) = plan.since {
            filter.restrict_since(since);
        }

        let points = self.storage.click_timeline(&filter, plan.bucket).await?;
        Ok(points
            .into_iter()
            .map(|(date, total)| TimelinePoint { date, total })
            .collect())
    }

    /// Top referrer domains
    pub async fn referrers(&self, owner: &str, params: &FilterParams) -> StorageResult<Vec<ReferrerStat>> {
        let counts = self
            .storage
            .count_by(
                &ClickFilter::from_params(owner, params),
                CountDimension::Referrer,
                Some(REFERRER_LIMIT),
            )
            .await?;
        Ok(counts
            .into_iter()
            .map(|(domain, count)| ReferrerStat { domain, count })
            .collect())
    }

    /// Click counts per device class
    pub async fn devices(&self, owner: &str, params: &FilterParams) -> StorageResult<Vec<DeviceStat>> {
        let counts = self
            .storage
            .count_by(&ClickFilter::from_params(owner, params), CountDimension::Device, None)
            .await?;
        counts
            .into_iter()
            .map(|(device_type, count)| -> StorageResult<DeviceStat> {
                Ok(DeviceStat {
                    device_type: device_type.parse()?,
                    count,
                })
            })
            .collect()
    }

    /// Top (city, region, country) locations
    pub async fn geo(&self, owner: &str, params: &FilterParams) -> StorageResult<Vec<GeoStat>> {
        let mut filter = ClickFilter::from_params(owner, params);
        filter.require_country = true;

        let places = self.storage.top_places(&filter, GEO_LIMIT).await?;
        Ok(places.into_iter().map(geo_stat).collect())
    }

    /// Recent activity, collapsed per day and dimension tuple
    pub async fn click_logs(&self, owner: &str, params: &FilterParams) -> StorageResult<Vec<ClickLogItem>> {
        let groups = self
            .storage
            .recent_activity(&ClickFilter::from_params(owner, params), CLICK_LOG_LIMIT)
            .await?;
        groups
            .into_iter()
            .enumerate()
            .map(|(i, group)| click_log_item(i, group))
            .collect()
    }

    /// Countries and their regions, for filter dropdowns. Ignores request filters.
    pub async fn locations(&self, owner: &str) -> StorageResult<Vec<LocationItem>> {
        let mut filter = ClickFilter::for_owner(owner);
        filter.require_country = true;

        let pairs = self.storage.location_pairs(&filter).await?;
        Ok(group_locations(pairs))
    }
}

/// Human-readable place name: "City, Region", "City, Country",
/// "Region, Country", "Country", or `fallback`
pub fn location_label(city: &str, region: &str, country: &str, fallback: &str) -> String {
    match (city.is_empty(), region.is_empty(), country.is_empty()) {
        (false, false, _) => format!("{city}, {region}"),
        (false, true, _) => format!("{city}, {country}"),
        (true, false, _) => format!("{region}, {country}"),
        (true, true, false) => country.to_string(),
        (true, true, true) => fallback.to_string(),
    }
}

fn widget_stat(totals: WidgetTotals) -> WidgetClickStat {
    WidgetClickStat {
        widget_id: totals.widget_id,
        url: totals.url.unwrap_or_default(),
        custom_title: totals.custom_title.unwrap_or_default(),
        custom_image: totals.custom_image.unwrap_or_default(),
        total: totals.total,
        unique: totals.visitors,
    }
}

fn geo_stat(place: PlaceCount) -> GeoStat {
    GeoStat {
        location: location_label(&place.city, &place.region, &place.country, UNKNOWN_GEO_LOCATION),
        country_code: place.country_code.unwrap_or_default(),
        count: place.hits,
    }
}

fn click_log_item(index: usize, group: ActivityGroup) -> StorageResult<ClickLogItem> {
    let clicked_at: DateTime<Utc> = DateTime::from_timestamp_millis(group.last_clicked_at)
        .ok_or_else(|| anyhow!("activity group has out-of-range timestamp {}", group.last_clicked_at))?;

    Ok(ClickLogItem {
        id: format!("agg-{index}"),
        location: location_label(&group.city, &group.region, &group.country, UNKNOWN_LOG_LOCATION),
        url: group.url,
        device_type: group.device_type.parse()?,
        referrer_domain: group.referrer_domain,
        country_code: group.country_code,
        clicked_at,
        count: group.hits,
    })
}

/// Fold (country, region) pairs into one item per country. Empty regions
/// keep the country listed without adding a region.
pub fn group_locations(pairs: Vec<(String, String)>) -> Vec<LocationItem> {
    let mut countries: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (country, region) in pairs {
        if country.is_empty() {
            continue;
        }
        let regions = countries.entry(country).or_default();
        if !region.is_empty() && !regions.contains(&region) {
            regions.push(region);
        }
    }

    countries
        .into_iter()
        .map(|(country, mut regions)| {
            regions.sort();
            LocationItem { country, regions }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClickEvent, DeviceType, GeoFields};
    use crate::storage::SqliteStorage;
    use chrono::{Duration, TimeZone};

    fn base_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
    }

    fn click(widget: &str, ip: &str, minutes: i64) -> ClickEvent {
        ClickEvent {
            id: 0,
            widget_id: widget.to_string(),
            owner_username: "alice".to_string(),
            url: format!("https://example.com/{widget}"),
            custom_title: None,
            custom_image: None,
            ip_hash: ip.to_string(),
            referrer_domain: "Direct".to_string(),
            device_type: DeviceType::Desktop,
            geo: None,
            clicked_at: base_time() + Duration::minutes(minutes),
        }
    }

    fn located(mut event: ClickEvent, city: &str, region: &str, country: &str, code: &str) -> ClickEvent {
        event.geo = Some(GeoFields {
            country: country.to_string(),
            country_code: code.to_string(),
            region: region.to_string(),
            city: city.to_string(),
        });
        event
    }

    /// Store `events` in insertion order, applying geo the way the enricher does
    async fn service_with(events: Vec<ClickEvent>) -> AnalyticsService {
        let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        storage.init().await.unwrap();
        for event in &events {
            let id = storage.insert_click(event).await.unwrap();
            if let Some(geo) = &event.geo {
                assert!(storage.set_click_geo(id, geo).await.unwrap());
            }
        }
        AnalyticsService::new(Arc::new(storage))
    }

    fn all_time() -> FilterParams {
        FilterParams::default()
    }

    fn range(start: &str, end: &str) -> TimelineParams {
        TimelineParams {
            filter: FilterParams {
                start: Some(start.to_string()),
                end: Some(end.to_string()),
                ..FilterParams::default()
            },
            ..TimelineParams::default()
        }
    }

    #[test]
    fn test_location_label_precedence() {
        assert_eq!(location_label("Austin", "Texas", "USA", "Unknown Location"), "Austin, Texas");
        assert_eq!(location_label("Austin", "", "USA", "Unknown Location"), "Austin, USA");
        assert_eq!(location_label("", "Texas", "USA", "Unknown Location"), "Texas, USA");
        assert_eq!(location_label("", "", "USA", "Unknown Location"), "USA");
        assert_eq!(location_label("", "", "", "Unknown Location"), "Unknown Location");
        assert_eq!(location_label("", "", "", "Unknown"), "Unknown");
    }

    #[test]
    fn test_group_locations_dedupes_and_sorts_regions() {
        let pairs = vec![
            ("USA".to_string(), "Texas".to_string()),
            ("USA".to_string(), "Ohio".to_string()),
            ("USA".to_string(), "Texas".to_string()),
            ("USA".to_string(), String::new()),
            (String::new(), "Nowhere".to_string()),
        ];
        assert_eq!(
            group_locations(pairs),
            vec![LocationItem {
                country: "USA".to_string(),
                regions: vec!["Ohio".to_string(), "Texas".to_string()],
            }]
        );
    }

    #[tokio::test]
    async fn test_widget_stats_unique_and_first_seen() {
        let mut first = click("w1", "ip-a", 0);
        first.custom_title = Some("First title".to_string());
        let mut later = click("w1", "ip-a", 5);
        later.custom_title = Some("Renamed".to_string());
        later.url = "https://example.com/changed".to_string();
        // Inserted first, but clicked last
        let mut late_insert = click("w1", "ip-b", 6);
        late_insert.custom_image = Some("https://img.example/late.png".to_string());

        let service = service_with(vec![late_insert, first, later, click("w2", "ip-a", 7)]).await;
        let stats = service.widget_stats("alice", &all_time()).await.unwrap();

        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].widget_id, "w1");
        assert_eq!(stats[0].total, 3);
        assert_eq!(stats[0].unique, 2);
        assert_eq!(stats[0].custom_title, "First title");
        assert_eq!(stats[0].url, "https://example.com/w1");
        assert_eq!(stats[0].custom_image, "");
        assert_eq!(stats[1].widget_id, "w2");
        assert_eq!(stats[1].total, 1);
    }

    #[tokio::test]
    async fn test_widget_stats_ties_order_by_widget_id() {
        let service = service_with(vec![click("w2", "a", 0), click("w1", "a", 1)]).await;
        let stats = service.widget_stats("alice", &all_time()).await.unwrap();
        let ids: Vec<_> = stats.iter().map(|s| s.widget_id.as_str()).collect();
        assert_eq!(ids, vec!["w1", "w2"]);
    }

    #[tokio::test]
    async fn test_timeline_groups_by_bucket() {
        let events = vec![
            click("w1", "a", 0),
            click("w1", "a", 30),
            click("w1", "a", 75),
            click("w1", "a", 60 * 24),
        ];
        let service = service_with(events).await;

        // Span under 48 hours is hourly
        let hourly = service
            .timeline("alice", &range("2024-01-01T00:00:00Z", "2024-01-02T23:00:00Z"))
            .await
            .unwrap();
        assert_eq!(
            hourly,
            vec![
                TimelinePoint { date: "2024-01-01 09:00".to_string(), total: 2 },
                TimelinePoint { date: "2024-01-01 10:00".to_string(), total: 1 },
                TimelinePoint { date: "2024-01-02 09:00".to_string(), total: 1 },
            ]
        );

        let daily = service
            .timeline("alice", &range("2024-01-01T00:00:00Z", "2024-01-05T00:00:00Z"))
            .await
            .unwrap();
        assert_eq!(daily.len(), 2);
        assert_eq!(daily[0], TimelinePoint { date: "2024-01-01".to_string(), total: 3 });
        assert_eq!(daily[1], TimelinePoint { date: "2024-01-02".to_string(), total: 1 });
    }

    #[tokio::test]
    async fn test_referrers_cap_at_twenty() {
        let mut events = Vec::new();
        for i in 0..25 {
            let mut event = click("w1", "a", i);
            event.referrer_domain = format!("site{i:02}.com");
            events.push(event);
        }
        let mut popular = click("w1", "a", 100);
        popular.referrer_domain = "site24.com".to_string();
        events.push(popular);

        let service = service_with(events).await;
        let ranked = service.referrers("alice", &all_time()).await.unwrap();
        assert_eq!(ranked.len(), REFERRER_LIMIT as usize);
        assert_eq!(ranked[0], ReferrerStat { domain: "site24.com".to_string(), count: 2 });
        assert_eq!(ranked[1].domain, "site00.com");
    }

    #[tokio::test]
    async fn test_device_ranking() {
        let mut mobile = click("w1", "a", 1);
        mobile.device_type = DeviceType::Mobile;
        let mut mobile2 = click("w1", "a", 2);
        mobile2.device_type = DeviceType::Mobile;
        let mut bot = click("w1", "a", 3);
        bot.device_type = DeviceType::Bot;

        let service = service_with(vec![click("w1", "a", 0), mobile, mobile2, bot]).await;
        assert_eq!(
            service.devices("alice", &all_time()).await.unwrap(),
            vec![
                DeviceStat { device_type: DeviceType::Mobile, count: 2 },
                DeviceStat { device_type: DeviceType::Bot, count: 1 },
                DeviceStat { device_type: DeviceType::Desktop, count: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn test_geo_labels_and_first_code() {
        let events = vec![
            located(click("w1", "a", 0), "Austin", "Texas", "USA", "US"),
            located(click("w1", "a", 1), "Austin", "Texas", "USA", "XX"),
            located(click("w1", "a", 2), "", "Texas", "USA", "US"),
            located(click("w1", "a", 3), "", "", "USA", "US"),
            // Never enriched, so excluded
            click("w1", "a", 4),
        ];
        let service = service_with(events).await;

        let ranked = service.geo("alice", &all_time()).await.unwrap();
        assert_eq!(ranked.len(), 3);
        assert_eq!(
            ranked[0],
            GeoStat { location: "Austin, Texas".to_string(), country_code: "US".to_string(), count: 2 }
        );
        let labels: Vec<_> = ranked.iter().map(|g| g.location.as_str()).collect();
        assert!(labels.contains(&"Texas, USA"));
        assert!(labels.contains(&"USA"));
    }

    #[tokio::test]
    async fn test_geo_caps_at_thirty() {
        let events: Vec<_> = (0..40)
            .map(|i| located(click("w1", "a", i), &format!("City{i}"), "", "USA", "US"))
            .collect();
        let service = service_with(events).await;
        assert_eq!(
            service.geo("alice", &all_time()).await.unwrap().len(),
            GEO_LIMIT as usize
        );
    }

    #[tokio::test]
    async fn test_click_logs_collapse_per_day() {
        let events = vec![
            click("w1", "a", 0),
            click("w1", "b", 10),
            // Same attributes, next day
            click("w1", "a", 60 * 24),
            located(click("w1", "a", 20), "Austin", "Texas", "USA", "US"),
        ];
        let service = service_with(events).await;

        let logs = service.click_logs("alice", &all_time()).await.unwrap();
        assert_eq!(logs.len(), 3);

        assert_eq!(logs[0].id, "agg-0");
        assert_eq!(logs[0].clicked_at, base_time() + Duration::minutes(60 * 24));
        assert_eq!(logs[0].count, 1);
        assert_eq!(logs[0].location, "Unknown");
        assert_eq!(logs[0].device_type, DeviceType::Desktop);

        assert_eq!(logs[1].location, "Austin, Texas");
        assert_eq!(logs[1].country_code, "US");

        assert_eq!(logs[2].count, 2);
        assert_eq!(logs[2].clicked_at, base_time() + Duration::minutes(10));
        assert_eq!(logs[2].id, "agg-2");
        assert_eq!(logs[2].country_code, "");
    }

    #[tokio::test]
    async fn test_click_logs_cap() {
        let events: Vec<_> = (0..250)
            .map(|i| {
                let mut event = click("w1", "a", i);
                event.url = format!("https://example.com/{i}");
                event
            })
            .collect();
        let service = service_with(events).await;

        let logs = service.click_logs("alice", &all_time()).await.unwrap();
        assert_eq!(logs.len(), CLICK_LOG_LIMIT as usize);
        assert_eq!(logs[0].url, "https://example.com/249");
        assert_eq!(logs[199].id, "agg-199");
    }

    #[tokio::test]
    async fn test_locations_exclude_empty_regions() {
        let events = vec![
            located(click("w1", "a", 0), "Austin", "Texas", "USA", "US"),
            located(click("w1", "a", 1), "", "", "USA", "US"),
            located(click("w1", "a", 2), "Berlin", "Berlin", "Germany", "DE"),
            located(click("w1", "a", 3), "", "", "Canada", "CA"),
            click("w1", "a", 4),
        ];
        let service = service_with(events).await;

        assert_eq!(
            service.locations("alice").await.unwrap(),
            vec![
                LocationItem { country: "Canada".to_string(), regions: vec![] },
                LocationItem { country: "Germany".to_string(), regions: vec!["Berlin".to_string()] },
                LocationItem { country: "USA".to_string(), regions: vec!["Texas".to_string()] },
            ]
        );
    }

    #[tokio::test]
    async fn test_views_are_scoped_to_owner() {
        let mut other = click("w9", "a", 0);
        other.owner_username = "bob".to_string();
        let service = service_with(vec![click("w1", "a", 0), other]).await;

        let stats = service.widget_stats("bob", &all_time()).await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].widget_id, "w9");
    }

    #[tokio::test]
    async fn test_empty_store_gives_empty_lists() {
        let service = service_with(Vec::new()).await;
        let params = all_time();

        assert!(service.widget_stats("alice", &params).await.unwrap().is_empty());
        assert!(service
            .timeline("alice", &TimelineParams::default())
            .await
            .unwrap()
            .is_empty());
        assert!(service.referrers("alice", &params).await.unwrap().is_empty());
        assert!(service.devices("alice", &params).await.unwrap().is_empty());
        assert!(service.geo("alice", &params).await.unwrap().is_empty());
        assert!(service.click_logs("alice", &params).await.unwrap().is_empty());
        assert!(service.locations("alice").await.unwrap().is_empty());
    }
}
