use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Coarse device category derived from the User-Agent header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Bot,
    Tablet,
    Mobile,
    Desktop,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Bot => "bot",
            DeviceType::Tablet => "tablet",
            DeviceType::Mobile => "mobile",
            DeviceType::Desktop => "desktop",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bot" => Ok(DeviceType::Bot),
            "tablet" => Ok(DeviceType::Tablet),
            "mobile" => Ok(DeviceType::Mobile),
            "desktop" => Ok(DeviceType::Desktop),
            other => Err(anyhow::anyhow!("unknown device type '{other}'")),
        }
    }
}

/// Geolocation attached to a click once enrichment succeeds.
///
/// The four fields travel together: an event either has all of them or none.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoFields {
    pub country: String,
    pub country_code: String,
    pub region: String,
    pub city: String,
}

/// One recorded click on a widget link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickEvent {
    /// Store-assigned id (0 until inserted)
    pub id: i64,
    pub widget_id: String,
    pub owner_username: String,
    pub url: String,
    pub custom_title: Option<String>,
    pub custom_image: Option<String>,
    /// SHA-256 of the caller address, used for unique-visitor counting
    pub ip_hash: String,
    pub referrer_domain: String,
    pub device_type: DeviceType,
    /// Absent until the enricher patches the event
    pub geo: Option<GeoFields>,
    pub clicked_at: DateTime<Utc>,
}

impl ClickEvent {
    pub fn country(&self) -> &str {
        self.geo.as_ref().map(|g| g.country.as_str()).unwrap_or("")
    }

    pub fn country_code(&self) -> &str {
        self.geo.as_ref().map(|g| g.country_code.as_str()).unwrap_or("")
    }

    pub fn region(&self) -> &str {
        self.geo.as_ref().map(|g| g.region.as_str()).unwrap_or("")
    }

    pub fn city(&self) -> &str {
        self.geo.as_ref().map(|g| g.city.as_str()).unwrap_or("")
    }
}

/// Body of `POST /api/clicks`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewClick {
    #[serde(default)]
    pub widget_id: String,
    #[serde(default)]
    pub owner_username: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub custom_title: Option<String>,
    #[serde(default)]
    pub custom_image: Option<String>,
    #[serde(default)]
    pub referrer: Option<String>,
}
