//! Filter construction shared by every analytics view

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

/// Widest range, in hours, that is still bucketed by hour on the timeline
const HOURLY_SPAN_LIMIT_HOURS: i64 = 48;

/// Query-string filters accepted by all analytics endpoints
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterParams {
    /// RFC 3339 lower bound, inclusive
    pub start: Option<String>,
    /// RFC 3339 upper bound, inclusive
    pub end: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
}

/// Timeline endpoint parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TimelineParams {
    #[serde(flatten)]
    pub filter: FilterParams,
    /// `hourly` selects the last-24-hours view
    pub mode: Option<String>,
    /// `30` selects the 30-day view, anything else means 7
    pub days: Option<String>,
}

/// Store-level predicate. Every field is AND'd with the owner match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClickFilter {
    pub owner_username: String,
    pub from: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub country: Option<String>,
    pub region: Option<String>,
    /// Only clicks with a non-empty country. Ignored when `country` is set.
    pub require_country: bool,
}

impl ClickFilter {
    /// All clicks owned by `owner_username`
    pub fn for_owner(owner_username: &str) -> Self {
        Self {
            owner_username: owner_username.to_string(),
            from: None,
            until: None,
            country: None,
            region: None,
            require_country: false,
        }
    }

    /// Owner filter refined by the request's optional bounds and location.
    /// Malformed bounds are dropped rather than rejected.
    pub fn from_params(owner_username: &str, params: &FilterParams) -> Self {
        Self {
            from: params.start.as_deref().and_then(parse_bound),
            until: params.end.as_deref().and_then(parse_bound),
            country: params.country.as_deref().and_then(non_null),
            region: params.region.as_deref().and_then(non_null),
            ..Self::for_owner(owner_username)
        }
    }

    /// Narrow the lower bound to `since` (keeps the later of the two)
    pub fn restrict_since(&mut self, since: DateTime<Utc>) {
        self.from = Some(match self.from {
            Some(existing) if existing > since => existing,
            _ => since,
        });
    }
}

/// Query values the dashboard sends for "unset": empty or the string `null`
fn non_null(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty() && value != "null").then(|| value.to_string())
}

/// Parse an RFC 3339 timestamp, ignoring anything malformed
pub fn parse_bound(value: &str) -> Option<DateTime<Utc>> {
    let value = non_null(value)?;
    DateTime::parse_from_rfc3339(&value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Timeline bucket granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBucket {
    /// `YYYY-MM-DD HH:00`
    Hour,
    /// `YYYY-MM-DD`
    Day,
}

impl TimeBucket {
    pub fn label(&self, at: DateTime<Utc>) -> String {
        match self {
            TimeBucket::Hour => at.format("%Y-%m-%d %H:00").to_string(),
            TimeBucket::Day => at.format("%Y-%m-%d").to_string(),
        }
    }
}

/// Bucket choice plus the implicit lower bound it imposes, if any
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelinePlan {
    pub bucket: TimeBucket,
    pub since: Option<DateTime<Utc>>,
}

/// Pick the timeline bucket, in order:
/// 1. valid `start` and `end`: hourly when the span is at most 48 hours, else daily
/// 2. `mode=hourly`: hourly over the last 24 hours
/// 3. otherwise daily over the last 30 days (`days=30`) or 7 days
pub fn plan_timeline(params: &TimelineParams, now: DateTime<Utc>) -> TimelinePlan {
    let start = params.filter.start.as_deref().and_then(parse_bound);
    let end = params.filter.end.as_deref().and_then(parse_bound);

    if let (Some(start), Some(end)) = (start, end) {
        let bucket = if end - start <= Duration::hours(HOURLY_SPAN_LIMIT_HOURS) {
            TimeBucket::Hour
        } else {
            TimeBucket::Day
        };
        return TimelinePlan {
            bucket,
            since: None,
        };
    }

    if params.mode.as_deref() == Some("hourly") {
        return TimelinePlan {
            bucket: TimeBucket::Hour,
            since: Some(now - Duration::hours(24)),
        };
    }

    let days = if params.days.as_deref().map(str::trim) == Some("30") {
        30
    } else {
        7
    };
    TimelinePlan {
        bucket: TimeBucket::Day,
        since: Some(now - Duration::days(days)),
    }
}
