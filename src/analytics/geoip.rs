//! IP geolocation providers
//!
//! A [`GeoLookup`] turns an address into country/region/city. Two
//! implementations exist: the ip-api.com HTTP service and a local MaxMind
//! GeoLite2-City database. [`GeoProvider`] wraps whichever is configured and
//! refuses private and loopback addresses before any provider is consulted.
//!
//! Every failure is absorbed: callers only ever see `Some(geo)` or `None`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use ipnet::IpNet;
use maxminddb::{geoip2, Mmap, Reader};
use moka::future::Cache;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::{debug, info, trace};

use crate::config::{GeoConfig, GeoProviderKind};
use crate::models::GeoFields;

const LOOKUP_CACHE_TTL_SECS: u64 = 15 * 60;
const LOOKUP_CACHE_MAX_CAPACITY: u64 = 10_000;

/// Ranges that are never sent to a provider
static NON_ROUTABLE: LazyLock<Vec<IpNet>> = LazyLock::new(|| {
    [
        "0.0.0.0/8",
        "10.0.0.0/8",
        "100.64.0.0/10",
        "127.0.0.0/8",
        "169.254.0.0/16",
        "172.16.0.0/12",
        "192.168.0.0/16",
        "::/128",
        "::1/128",
        "fc00::/7",
        "fe80::/10",
    ]
    .iter()
    .filter_map(|cidr| cidr.parse().ok())
    .collect()
});

/// True for loopback, private, link-local and similar non-routable addresses
pub fn is_non_routable(ip: IpAddr) -> bool {
    let ip = match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(ip),
        v4 => v4,
    };
    NON_ROUTABLE.iter().any(|net| net.contains(&ip))
}

#[async_trait]
pub trait GeoLookup: Send + Sync {
    /// Resolve an address. `None` on any failure or when nothing is known.
    async fn lookup(&self, ip: IpAddr) -> Option<GeoFields>;

    /// Provider name for logs
    fn name(&self) -> &'static str;
}

/// Provider front used by the enricher
#[derive(Clone)]
pub struct GeoProvider {
    inner: Option<Arc<dyn GeoLookup>>,
}

impl GeoProvider {
    pub fn new(inner: Arc<dyn GeoLookup>) -> Self {
        Self { inner: Some(inner) }
    }

    /// Provider that never resolves anything
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    pub fn from_config(config: &GeoConfig) -> Result<Self> {
        let provider = match config.provider {
            GeoProviderKind::IpApi => Self::new(Arc::new(IpApiLookup::new(
                &config.api_url,
                Duration::from_millis(config.lookup_timeout_ms),
            )?)),
            GeoProviderKind::MaxMind => {
                let path = config
                    .city_db_path
                    .as_deref()
                    .context("GeoIP City database path is not configured")?;
                Self::new(Arc::new(MaxMindLookup::new(path)?))
            }
            GeoProviderKind::Disabled => Self::disabled(),
        };

        info!("GeoIP: Initialized with {} provider", provider.provider_name());
        Ok(provider)
    }

    pub async fn lookup(&self, ip: IpAddr) -> Option<GeoFields> {
        if is_non_routable(ip) {
            trace!(%ip, "skipping geo lookup for non-routable address");
            return None;
        }

        let geo = self.inner.as_ref()?.lookup(ip).await?;
        // A result without a country is treated as no result
        (!geo.country.is_empty()).then_some(geo)
    }

    pub fn provider_name(&self) -> &'static str {
        self.inner.as_ref().map(|p| p.name()).unwrap_or("disabled")
    }
}

/// ip-api.com JSON response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IpApiResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    country_code: String,
    #[serde(default)]
    region_name: String,
    #[serde(default)]
    city: String,
}

/// HTTP lookup against ip-api.com (or a compatible service)
///
/// Results, including misses, are cached so that bursts of clicks from one
/// visitor cost a single request.
pub struct IpApiLookup {
    client: reqwest::Client,
    url_template: String,
    cache: Cache<IpAddr, Option<GeoFields>>,
}

impl IpApiLookup {
    /// `url_template` uses `{ip}` as placeholder
    pub fn new(url_template: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("linkpulse/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client for geo lookups")?;

        let cache = Cache::builder()
            .time_to_live(Duration::from_secs(LOOKUP_CACHE_TTL_SECS))
            .max_capacity(LOOKUP_CACHE_MAX_CAPACITY)
            .build();

        Ok(Self {
            client,
            url_template: url_template.to_string(),
            cache,
        })
    }

    async fn fetch(&self, ip: IpAddr) -> Option<GeoFields> {
        let url = self.url_template.replace("{ip}", &ip.to_string());

        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(%ip, error = %e, "geo lookup request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            debug!(%ip, status = %response.status(), "geo lookup returned error status");
            return None;
        }

        let body: IpApiResponse = match response.json().await {
            Ok(b) => b,
            Err(e) => {
                debug!(%ip, error = %e, "geo lookup response could not be decoded");
                return None;
            }
        };

        if body.status != "success" {
            trace!(%ip, status = %body.status, "geo lookup reported failure");
            return None;
        }

        Some(GeoFields {
            country: body.country,
            country_code: body.country_code,
            region: body.region_name,
            city: body.city,
        })
    }
}

#[async_trait]
impl GeoLookup for IpApiLookup {
    async fn lookup(&self, ip: IpAddr) -> Option<GeoFields> {
        self.cache.get_with(ip, self.fetch(ip)).await
    }

    fn name(&self) -> &'static str {
        "ip-api"
    }
}

/// Lookup against a memory-mapped MaxMind GeoLite2-City / GeoIP2-City file
#[derive(Clone)]
pub struct MaxMindLookup {
    city_reader: Arc<Reader<Mmap>>,
}

impl MaxMindLookup {
    pub fn new(city_path: &str) -> Result<Self> {
        let reader = unsafe { Reader::open_mmap(city_path) }
            .with_context(|| format!("Failed to open GeoIP City database at {}", city_path))?;
        Ok(Self {
            city_reader: Arc::new(reader),
        })
    }

    fn lookup_sync(&self, ip: IpAddr) -> Option<GeoFields> {
        let result = self.city_reader.lookup(ip).ok()?;
        let city = result.decode::<geoip2::City>().ok()??;

        let english = |name: Option<&str>| name.map(str::to_string).unwrap_or_default();

        Some(GeoFields {
            country: english(city.country.names.english),
            country_code: english(city.country.iso_code),
            region: english(city.subdivisions.first().and_then(|s| s.names.english)),
            city: english(city.city.names.english),
        })
    }
}

#[async_trait]
impl GeoLookup for MaxMindLookup {
    async fn lookup(&self, ip: IpAddr) -> Option<GeoFields> {
        self.lookup_sync(ip)
    }

    fn name(&self) -> &'static str {
        "maxmind"
    }
}
