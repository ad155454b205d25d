//! One working session: cumulative jobs across submitted batches.
//!
//! The session owns the job store and the image handles. Each
//! [`Session::submit`] starts an independent batch; [`Session::clear`] is the
//! only place image handles are released.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, info, warn};
use tokio::sync::broadcast;

use crate::config::{validate_config, Config, ExportConfig};
use crate::error::{ExportError, Result};
use crate::export;
use crate::gateway::{DeadlineGateway, ExtractionGateway, GeminiGateway};
use crate::images::ImageStore;
use crate::intake::filter_images;
use crate::job::{ImageUpload, Job};
use crate::report::{build_report_in, summarize, DisplayRow, ReportSummary};
use crate::scheduler::{BatchControl, BatchHandle, BatchScheduler};
use crate::store::{JobStore, JobUpdate, Progress, StoreEvent, StoreSnapshot};

pub struct Session {
    store: Arc<JobStore>,
    images: Arc<ImageStore>,
    scheduler: Arc<BatchScheduler>,
    export: ExportConfig,
    batches: Mutex<Vec<Arc<BatchControl>>>,
}

impl Session {
    /// Builds a session around `gateway`, bounded by the configured deadline.
    ///
    /// Fails with a config error when `config` does not validate.
    pub fn new(config: &Config, gateway: Arc<dyn ExtractionGateway>) -> Result<Self> {
        validate_config(config)?;

        let store = Arc::new(JobStore::default());
        let images = Arc::new(ImageStore::new());
        let gateway = DeadlineGateway::new(gateway, config.gateway.timeout());
        debug!("Gateway calls bounded to {:?}", gateway.deadline());
        let gateway: Arc<dyn ExtractionGateway> = Arc::new(gateway);
        let scheduler = Arc::new(BatchScheduler::new(
            Arc::clone(&store),
            Arc::clone(&images),
            gateway,
            config.concurrency_limit,
        ));

        Ok(Self {
            store,
            images,
            scheduler,
            export: config.export.clone(),
            batches: Mutex::new(Vec::new()),
        })
    }

    /// Builds a session that talks to Gemini.
    pub fn from_config(config: &Config) -> Result<Self> {
        let gateway = GeminiGateway::from_config(&config.gateway)?;
        info!(
            "Using model {} with a {}s deadline",
            config.gateway.model, config.gateway.timeout_secs
        );
        Self::new(config, Arc::new(gateway))
    }

    fn lock_batches(&self) -> MutexGuard<'_, Vec<Arc<BatchControl>>> {
        match self.batches.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                warn!("Batch list lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Queues the image uploads as a new batch and starts it.
    ///
    /// Non-image uploads are dropped. Returns `None` when nothing is left.
    /// Must be called from within a tokio runtime.
    pub fn submit(&self, uploads: Vec<ImageUpload>) -> Option<BatchHandle> {
        let uploads = filter_images(uploads);
        if uploads.is_empty() {
            info!("Nothing to submit");
            return None;
        }

        let jobs: Vec<Job> = uploads
            .into_iter()
            .map(|upload| {
                let name = upload.file_name.clone();
                Job::new(name, self.images.acquire(upload))
            })
            .collect();

        let batch_id = uuid::Uuid::new_v4().to_string();
        if let Err(e) = self.store.apply(JobUpdate::Submitted {
            batch_id: batch_id.clone(),
            jobs: jobs.clone(),
        }) {
            warn!("Batch {} rejected: {}", batch_id, e);
            for job in &jobs {
                self.images.release(&job.image);
            }
            return None;
        }

        let handle = self.scheduler.spawn(batch_id, jobs);
        let mut batches = self.lock_batches();
        batches.retain(|c| !c.is_finished());
        batches.push(handle.control());
        Some(handle)
    }

    /// True while any submitted batch is still running.
    pub fn is_processing(&self) -> bool {
        self.lock_batches().iter().any(|c| !c.is_finished())
    }

    /// Stops every running batch before its next wave.
    pub fn abort(&self) {
        for control in self.lock_batches().iter().filter(|c| !c.is_finished()) {
            control.abort();
        }
    }

    /// Discards every job and releases its image. Running batches are
    /// aborted; their in-flight results are dropped. Returns the number of
    /// jobs discarded.
    pub fn clear(&self) -> usize {
        self.abort();
        let jobs = self.store.clear();
        let released = jobs
            .iter()
            .filter(|job| self.images.release(&job.image))
            .count();
        info!("Cleared {} jobs, released {} images", jobs.len(), released);
        jobs.len()
    }

    /// Offset-less timestamps are read in the export display offset.
    pub fn report(&self) -> Vec<DisplayRow> {
        build_report_in(
            &self.store.snapshot().jobs,
            export::display_offset(&self.export),
        )
    }

    pub fn summary(&self) -> ReportSummary {
        summarize(&self.report())
    }

    pub fn export_csv(&self) -> std::result::Result<Vec<u8>, ExportError> {
        export::export_csv(&self.report(), &self.export)
    }

    pub fn write_export(&self, dir: &Path) -> std::result::Result<PathBuf, ExportError> {
        export::write_export(&self.report(), &self.export, dir)
    }

    pub fn export_config(&self) -> &ExportConfig {
        &self.export
    }

    pub fn progress(&self) -> Progress {
        self.store.progress()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.subscribe()
    }

    pub fn concurrency_limit(&self) -> usize {
        self.scheduler.concurrency_limit()
    }

    /// Image handles not yet released.
    pub fn live_images(&self) -> usize {
        self.images.live_count()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let live = self.images.live_count();
        if live > 0 {
            warn!("Session dropped with {} unreleased images", live);
            self.clear();
        }
    }
}
