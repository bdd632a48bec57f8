//! Result shapes returned by the analytics views

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::DeviceType;

/// Per-widget totals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidgetClickStat {
    pub widget_id: String,
    /// First-seen values within the group
    pub url: String,
    pub custom_title: String,
    pub custom_image: String,
    pub total: i64,
    /// Distinct visitor hashes
    pub unique: i64,
}

/// One timeline bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelinePoint {
    /// Bucket label, e.g. "2024-02-25" or "2024-02-25 13:00"
    pub date: String,
    pub total: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferrerStat {
    pub domain: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStat {
    pub device_type: DeviceType,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoStat {
    pub location: String,
    pub country_code: String,
    pub count: i64,
}

/// Collapsed recent-activity row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClickLogItem {
    /// Positional id, `agg-<index>`
    pub id: String,
    pub url: String,
    pub device_type: DeviceType,
    pub referrer_domain: String,
    pub country_code: String,
    pub location: String,
    /// Most recent click in the group
    pub clicked_at: DateTime<Utc>,
    pub count: i64,
}

/// Country with the distinct regions seen for it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationItem {
    pub country: String,
    pub regions: Vec<String>,
}
