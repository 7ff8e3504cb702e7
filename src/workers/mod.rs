//! # Worker Pool Supervisors
//!
//! One supervisor per pipeline stage. Each runs a fixed number of polling
//! loops that claim jobs through a [`JobProcessor`] and run them to a
//! terminal state. Loops sleep with exponential back-off while idle and stop
//! when their cancellation token fires; a job already claimed is always
//! finished first.

mod processors;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::DatabaseConnection;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::concurrency::SlotManager;
use crate::config::{WorkerPoolConfig, WorkerPoolsConfig};
use crate::storage::Bucket;

pub use processors::{ClaimedJob, ExportProcessor, ImportProcessor, RestoreProcessor};

/// Loops started when a pool is configured with `max_concurrency = 0`
pub const DEFAULT_CONCURRENCY: usize = 2;

/// Claims and runs one kind of job.
#[async_trait]
pub trait JobProcessor: Send + Sync + 'static {
    type Job: Send;

    fn name(&self) -> &'static str;

    /// Fails jobs whose lease ran out; returns how many were reaped.
    async fn reap_expired(&self, now: DateTime<Utc>) -> anyhow::Result<u64>;

    /// Claims the next eligible job, or `None` when there is nothing to do.
    async fn claim_next(&self) -> anyhow::Result<Option<Self::Job>>;

    async fn process(&self, job: Self::Job) -> anyhow::Result<()>;
}

struct Running {
    token: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

pub struct Supervisor<P: JobProcessor> {
    processor: Arc<P>,
    config: WorkerPoolConfig,
    running: Mutex<Option<Running>>,
}

impl<P: JobProcessor> Supervisor<P> {
    pub fn new(processor: P, config: WorkerPoolConfig) -> Self {
        Self {
            processor: Arc::new(processor),
            config,
            running: Mutex::new(None),
        }
    }

    pub fn processor(&self) -> &P {
        &self.processor
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .map(|running| running.is_some())
            .unwrap_or(false)
    }

    /// Spawns the polling loops under a child of `parent`. Starting a running
    /// supervisor is a no-op.
    pub fn start(&self, parent: &CancellationToken) {
        let Ok(mut running) = self.running.lock() else {
            error!(pool = self.processor.name(), "Supervisor state poisoned");
            return;
        };
        if running.is_some() {
            debug!(pool = self.processor.name(), "Supervisor already running");
            return;
        }

        let loops = match self.config.max_concurrency {
            0 => DEFAULT_CONCURRENCY,
            n => n,
        };
        let token = parent.child_token();
        let handles = (0..loops)
            .map(|index| {
                tokio::spawn(run_loop(
                    self.processor.clone(),
                    index,
                    self.config,
                    token.clone(),
                ))
            })
            .collect();

        info!(pool = self.processor.name(), loops, "Worker pool started");
        *running = Some(Running { token, handles });
    }

    /// Cancels the loops and waits for them to exit.
    pub async fn stop(&self) {
        let running = match self.running.lock() {
            Ok(mut running) => running.take(),
            Err(_) => None,
        };
        let Some(Running { token, handles }) = running else {
            return;
        };

        token.cancel();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(pool = self.processor.name(), error = %e, "Worker loop panicked");
            }
        }
        info!(pool = self.processor.name(), "Worker pool stopped");
    }
}

async fn run_loop<P: JobProcessor>(
    processor: Arc<P>,
    index: usize,
    config: WorkerPoolConfig,
    token: CancellationToken,
) {
    let pool = processor.name();
    let poll_interval = Duration::from_millis(config.poll_interval_ms.max(1));
    let max_poll_interval = Duration::from_millis(config.max_poll_interval_ms).max(poll_interval);
    let mut idle_sleep = poll_interval;

    debug!(pool, worker = index, "Worker loop started");
    while !token.is_cancelled() {
        if index == 0 {
            match processor.reap_expired(Utc::now()).await {
                Ok(0) => {}
                Ok(reaped) => warn!(pool, reaped, "Failed jobs with expired leases"),
                Err(e) => error!(pool, error = ?e, "Lease reaping failed"),
            }
        }

        match processor.claim_next().await {
            Ok(Some(job)) => {
                counter!("stockpile_worker_claims_total", "pool" => pool).increment(1);
                if let Err(e) = processor.process(job).await {
                    warn!(pool, worker = index, error = %e, "Job finished with an error");
                }
                idle_sleep = poll_interval;
                continue;
            }
            Ok(None) => {}
            Err(e) => error!(pool, worker = index, error = ?e, "Claiming the next job failed"),
        }

        tokio::select! {
            _ = token.cancelled() => break,
            _ = sleep(idle_sleep) => {}
        }
        idle_sleep = (idle_sleep * 2).min(max_poll_interval);
    }
    debug!(pool, worker = index, "Worker loop stopped");
}

/// The three pipeline pools.
pub struct Workers {
    pub export: Supervisor<ExportProcessor>,
    pub import: Supervisor<ImportProcessor>,
    pub restore: Supervisor<RestoreProcessor>,
}

impl Workers {
    pub fn new(
        config: &WorkerPoolsConfig,
        db: DatabaseConnection,
        bucket: Arc<dyn Bucket>,
        slots: Arc<dyn SlotManager>,
    ) -> Self {
        Self {
            export: Supervisor::new(
                ExportProcessor::new(db.clone(), bucket.clone(), slots.clone(), &config.export),
                config.export,
            ),
            import: Supervisor::new(
                ImportProcessor::new(db.clone(), bucket.clone(), &config.import),
                config.import,
            ),
            restore: Supervisor::new(
                RestoreProcessor::new(db, bucket, slots, &config.restore),
                config.restore,
            ),
        }
    }

    pub fn start(&self, token: &CancellationToken) {
        self.export.start(token);
        self.import.start(token);
        self.restore.start(token);
    }

    pub async fn stop(&self) {
        tokio::join!(self.export.stop(), self.import.stop(), self.restore.stop());
    }
}
