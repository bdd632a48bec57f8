use anyhow::Context;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api_server: ServerConfig,
    pub auth: AuthConfig,
    pub cors: CorsConfig,
    pub client_ip: ClientIpConfig,
    pub geo: GeoConfig,
    pub enrichment: EnrichmentConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret shared with the service that issues session tokens
    pub jwt_secret: String,
    #[serde(default = "AuthConfig::default_owner_cache_ttl_secs")]
    pub owner_cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    /// Use the socket address only
    None,
    /// Use `Forwarded` / `X-Forwarded-For`
    Standard,
    /// Use `CF-Connecting-IP`
    Cloudflare,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientIpConfig {
    pub trusted_proxy_mode: TrustedProxyMode,
    /// Proxies whose hops are skipped when walking X-Forwarded-For from the right
    pub trusted_proxies: Vec<IpNet>,
    /// Fixed number of proxy hops to skip (takes precedence over `trusted_proxies`)
    pub num_trusted_proxies: Option<usize>,
}

impl Default for ClientIpConfig {
    fn default() -> Self {
        Self {
            trusted_proxy_mode: TrustedProxyMode::None,
            trusted_proxies: Vec::new(),
            num_trusted_proxies: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoProviderKind {
    IpApi,
    MaxMind,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoConfig {
    pub provider: GeoProviderKind,
    /// URL template for the HTTP provider, `{ip}` is replaced by the address
    pub api_url: String,
    pub lookup_timeout_ms: u64,
    pub city_db_path: Option<String>,
}

impl GeoConfig {
    pub const DEFAULT_API_URL: &'static str =
        "http://ip-api.com/json/{ip}?fields=status,country,countryCode,regionName,city";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Maximum number of enrichment jobs running at once
    pub workers: usize,
    /// Jobs waiting for a worker; further jobs are dropped
    pub queue_capacity: usize,
    /// Upper bound for one job (lookup + store update)
    pub timeout_secs: u64,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            workers: 32,
            queue_capacity: 10_000,
            timeout_secs: 5,
        }
    }
}

impl EnrichmentConfig {
    /// Raise zero values to 1. A zero timeout would fail every job.
    pub fn at_least_one(self) -> Self {
        Self {
            workers: self.workers.max(1),
            queue_capacity: self.queue_capacity.max(1),
            timeout_secs: self.timeout_secs.max(1),
        }
    }
}

impl AuthConfig {
    const fn default_owner_cache_ttl_secs() -> u64 {
        300
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {key}: '{v}'")),
        _ => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend = match env_or("DATABASE_BACKEND", "sqlite").to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            _ => DatabaseBackend::Sqlite,
        };
        let database_url = env_or("DATABASE_URL", "sqlite://./linkpulse.db?mode=rwc");
        let max_connections = env_parse("DATABASE_MAX_CONNECTIONS", 10u32)?;

        let api_host = env_or("API_HOST", "127.0.0.1");
        let api_port = env_parse("API_PORT", 5000u16)?;

        let jwt_secret = env_or("JWT_SECRET", "secret_key");
        if jwt_secret == "secret_key" {
            tracing::warn!("JWT_SECRET is not set, using the insecure development default");
        }
        let owner_cache_ttl_secs = env_parse(
            "OWNER_CACHE_TTL_SECS",
            AuthConfig::default_owner_cache_ttl_secs(),
        )?;

        let mut allowed_origins: Vec<String> = env_or("ALLOWED_ORIGINS", "http://localhost:5173")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        allowed_origins.sort();
        allowed_origins.dedup();

        let trusted_proxy_mode = match env_or("TRUSTED_PROXY_MODE", "none").to_lowercase().as_str() {
            "none" => TrustedProxyMode::None,
            "standard" => TrustedProxyMode::Standard,
            "cloudflare" => TrustedProxyMode::Cloudflare,
            other => {
                tracing::warn!(
                    "Unknown TRUSTED_PROXY_MODE '{other}', falling back to 'none'. Supported values: none, standard, cloudflare"
                );
                TrustedProxyMode::None
            }
        };

        let trusted_proxies = env_or("TRUSTED_PROXIES", "")
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<IpNet>()
                    .with_context(|| format!("invalid CIDR in TRUSTED_PROXIES: '{s}'"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let num_trusted_proxies = std::env::var("NUM_TRUSTED_PROXIES")
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok());

        let provider = match env_or("GEO_PROVIDER", "ipapi").to_lowercase().as_str() {
            "ipapi" | "ip-api" => GeoProviderKind::IpApi,
            "maxmind" => GeoProviderKind::MaxMind,
            "disabled" | "none" => GeoProviderKind::Disabled,
            other => {
                tracing::warn!(
                    "Unknown GEO_PROVIDER '{other}', falling back to 'ipapi'. Supported values: ipapi, maxmind, disabled"
                );
                GeoProviderKind::IpApi
            }
        };

        let city_db_path = std::env::var("GEOIP_CITY_DB_PATH").ok();
        if provider == GeoProviderKind::MaxMind && city_db_path.is_none() {
            anyhow::bail!("GEOIP_CITY_DB_PATH must be set when GEO_PROVIDER=maxmind");
        }

        let enrichment_defaults = EnrichmentConfig::default();

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            api_server: ServerConfig {
                host: api_host,
                port: api_port,
            },
            auth: AuthConfig {
                jwt_secret,
                owner_cache_ttl_secs,
            },
            cors: CorsConfig { allowed_origins },
            client_ip: ClientIpConfig {
                trusted_proxy_mode,
                trusted_proxies,
                num_trusted_proxies,
            },
            geo: GeoConfig {
                provider,
                api_url: env_or("GEO_API_URL", GeoConfig::DEFAULT_API_URL),
                lookup_timeout_ms: env_parse("GEO_LOOKUP_TIMEOUT_MS", 3000u64)?,
                city_db_path,
            },
            enrichment: EnrichmentConfig {
                workers: env_parse("ENRICHMENT_WORKERS", enrichment_defaults.workers)?,
                queue_capacity: env_parse(
                    "ENRICHMENT_QUEUE_CAPACITY",
                    enrichment_defaults.queue_capacity,
                )?,
                timeout_secs: env_parse("ENRICHMENT_TIMEOUT_SECS", enrichment_defaults.timeout_secs)?,
            }
            .at_least_one(),
        })
    }
}
