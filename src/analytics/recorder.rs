//! Click ingestion
//!
//! Validates the payload, derives the stored dimensions, writes the event and
//! hands the client address to the enrichment pool. The caller gets the new
//! click id as soon as the insert succeeds.

use chrono::Utc;
use std::net::IpAddr;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::analytics::classifier::{classify_device, referrer_domain};
use crate::analytics::enricher::{EnrichmentJob, GeoEnricher};
use crate::analytics::ip_extractor::hash_ip;
use crate::models::{ClickEvent, NewClick};
use crate::storage::{Storage, StorageError};

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("{0}")]
    Validation(String),
    #[error("failed to store click: {0}")]
    Storage(#[from] StorageError),
}

#[derive(Clone)]
pub struct ClickRecorder {
    storage: Arc<dyn Storage>,
    enricher: Arc<GeoEnricher>,
}

impl ClickRecorder {
    pub fn new(storage: Arc<dyn Storage>, enricher: Arc<GeoEnricher>) -> Self {
        Self { storage, enricher }
    }

    /// Store one click and schedule its geo enrichment
    pub async fn record(
        &self,
        click: NewClick,
        client_ip: IpAddr,
        user_agent: &str,
    ) -> Result<i64, RecordError> {
        let widget_id = click.widget_id.trim();
        let owner_username = click.owner_username.trim();
        if widget_id.is_empty() || owner_username.is_empty() {
            return Err(RecordError::Validation(
                "widget_id and owner_username are required".to_string(),
            ));
        }

        let event = ClickEvent {
            id: 0,
            widget_id: widget_id.to_string(),
            owner_username: owner_username.to_string(),
            url: click.url,
            custom_title: click.custom_title,
            custom_image: click.custom_image,
            ip_hash: hash_ip(client_ip),
            referrer_domain: referrer_domain(click.referrer.as_deref().unwrap_or("")),
            device_type: classify_device(user_agent),
            geo: None,
            clicked_at: Utc::now(),
        };

        let id = self.storage.insert_click(&event).await?;
        debug!(click_id = id, widget_id = %event.widget_id, "click recorded");

        self.enricher.enqueue(EnrichmentJob {
            click_id: id,
            client_ip,
        });

        Ok(id)
    }
}
