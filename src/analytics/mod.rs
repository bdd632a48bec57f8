//! Click analytics
//!
//! Ingestion (classification, visitor hashing, background geo enrichment)
//! and the per-owner aggregate views served by the dashboard API.

pub mod aggregator;
pub mod classifier;
pub mod enricher;
pub mod filter;
pub mod geoip;
pub mod ip_extractor;
pub mod models;
pub mod recorder;

pub use aggregator::AnalyticsService;
pub use enricher::{EnrichmentJob, GeoEnricher};
pub use filter::{ClickFilter, FilterParams, TimelineParams};
pub use geoip::{GeoLookup, GeoProvider};
pub use ip_extractor::{extract_client_ip, hash_ip};
pub use recorder::{ClickRecorder, RecordError};
