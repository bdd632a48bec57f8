//! Request-path classifiers
//!
//! Pure functions that turn raw request attributes into the dimensions
//! stored on every click: device class from the User-Agent, and the
//! referrer's bare hostname.

use url::{Host, Url};

use crate::models::DeviceType;

/// Label used when a click has no usable referrer
pub const DIRECT_REFERRER: &str = "Direct";

/// Ordered classification table. First matching row wins, and the bot row
/// must stay first: several crawler User-Agents also contain "Android" or
/// "Mobile".
const DEVICE_RULES: &[(&[&str], DeviceType)] = &[
    (
        &["bot", "crawler", "spider", "slurp", "curl", "wget", "python", "go-http"],
        DeviceType::Bot,
    ),
    (&["ipad", "tablet", "kindle"], DeviceType::Tablet),
    (
        &["mobile", "android", "iphone", "ipod", "windows phone"],
        DeviceType::Mobile,
    ),
];

/// Classify a User-Agent string. Unknown or empty agents are `Desktop`.
pub fn classify_device(user_agent: &str) -> DeviceType {
    let lower = user_agent.to_lowercase();

    DEVICE_RULES
        .iter()
        .find(|(signatures, _)| signatures.iter().any(|sig| lower.contains(sig)))
        .map(|(_, device)| *device)
        .unwrap_or(DeviceType::Desktop)
}

/// Reduce a referrer URL to its hostname without a leading `www.`.
///
/// Returns [`DIRECT_REFERRER`] for empty, unparseable or host-less input.
pub fn referrer_domain(referrer: &str) -> String {
    let referrer = referrer.trim();
    if referrer.is_empty() {
        return DIRECT_REFERRER.to_string();
    }

    // Protocol-relative ("//host/path") still names a host
    let parsed = match referrer.strip_prefix("//") {
        Some(rest) => Url::parse(&format!("http://{rest}")),
        None => Url::parse(referrer),
    };
    let Ok(parsed) = parsed else {
        return DIRECT_REFERRER.to_string();
    };

    let host = match parsed.host() {
        Some(Host::Domain(domain)) => domain.to_lowercase(),
        Some(Host::Ipv4(addr)) => addr.to_string(),
        Some(Host::Ipv6(addr)) => addr.to_string(),
        None => String::new(),
    };

    let host = host.strip_prefix("www.").unwrap_or(&host);
    if host.is_empty() {
        DIRECT_REFERRER.to_string()
    } else {
        host.to_string()
    }
}
