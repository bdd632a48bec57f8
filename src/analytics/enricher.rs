//! Background geo enrichment of stored clicks
//!
//! Recording a click pushes an [`EnrichmentJob`] onto a bounded channel and
//! returns immediately. A dispatcher task pulls jobs and runs each one on its
//! own task, at most `workers` at a time, each under a hard timeout. Jobs are
//! never tied to the request that produced them, so a client disconnect does
//! not cancel enrichment.
//!
//! Everything on this path is best effort: a full queue drops the job, a
//! failed lookup or update leaves the click without geo fields for good.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::analytics::geoip::GeoProvider;
use crate::config::EnrichmentConfig;
use crate::storage::Storage;

/// Geo lookup request for one stored click
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnrichmentJob {
    pub click_id: i64,
    pub client_ip: IpAddr,
}

/// Handle for submitting enrichment jobs
pub struct GeoEnricher {
    sender: mpsc::Sender<EnrichmentJob>,
    shutdown_tx: watch::Sender<bool>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl GeoEnricher {
    /// Spawn the dispatcher on the current runtime
    pub fn spawn(storage: Arc<dyn Storage>, geo: GeoProvider, config: &EnrichmentConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let dispatcher = Dispatcher {
            receiver,
            shutdown_rx,
            storage,
            geo,
            permits: Arc::new(Semaphore::new(config.workers.max(1))),
            job_timeout: Duration::from_secs(config.timeout_secs),
            running: JoinSet::new(),
        };
        let handle = tokio::spawn(dispatcher.run());

        info!(
            workers = config.workers,
            queue_capacity = config.queue_capacity,
            "Geo enrichment pool started"
        );

        Self {
            sender,
            shutdown_tx,
            dispatcher: Mutex::new(Some(handle)),
        }
    }

    /// Queue a job without waiting. Returns false if it was dropped.
    pub fn enqueue(&self, job: EnrichmentJob) -> bool {
        match self.sender.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(click_id = job.click_id, "Enrichment queue full, dropping job");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Stop accepting jobs and wait for queued and running ones to finish
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);

        if let Some(handle) = self.dispatcher.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("Enrichment dispatcher ended abnormally: {}", e);
            }
            info!("Geo enrichment pool stopped");
        }
    }
}

struct Dispatcher {
    receiver: mpsc::Receiver<EnrichmentJob>,
    shutdown_rx: watch::Receiver<bool>,
    storage: Arc<dyn Storage>,
    geo: GeoProvider,
    permits: Arc<Semaphore>,
    job_timeout: Duration,
    running: JoinSet<()>,
}

impl Dispatcher {
    async fn run(mut self) {
        loop {
            tokio::select! {
                job = self.receiver.recv() => match job {
                    Some(job) => self.dispatch(job).await,
                    None => break,
                },
                _ = self.shutdown_rx.changed() => {
                    // Refuse new jobs, then drain what is already queued
                    self.receiver.close();
                    while let Some(job) = self.receiver.recv().await {
                        self.dispatch(job).await;
                    }
                    break;
                }
            }
        }

        while self.running.join_next().await.is_some() {}
    }

    /// Wait for a free worker slot, then run the job on its own task
    async fn dispatch(&mut self, job: EnrichmentJob) {
        let Ok(permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return;
        };

        let storage = Arc::clone(&self.storage);
        let geo = self.geo.clone();
        let job_timeout = self.job_timeout;

        self.running.spawn(async move {
            let _permit = permit;
            if tokio::time::timeout(job_timeout, enrich(storage, geo, job))
                .await
                .is_err()
            {
                debug!(click_id = job.click_id, "enrichment timed out");
            }
        });

        // Reap finished tasks so the set does not grow with throughput
        while self.running.try_join_next().is_some() {}
    }
}

/// Look up the address and patch the click. Failures are logged at debug only.
async fn enrich(storage: Arc<dyn Storage>, geo: GeoProvider, job: EnrichmentJob) {
    let Some(fields) = geo.lookup(job.client_ip).await else {
        return;
    };

    match storage.set_click_geo(job.click_id, &fields).await {
        Ok(true) => debug!(click_id = job.click_id, country = %fields.country, "click enriched"),
        Ok(false) => debug!(click_id = job.click_id, "click already enriched or missing"),
        Err(e) => debug!(click_id = job.click_id, error = %e, "enrichment update failed"),
    }
}
