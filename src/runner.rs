use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

use crate::align;
use crate::client::ComputeBackend;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::events::{
    BatchCompletedEvent, EventSink, ImageStore, JobCompletedEvent, JobErrorEvent, JobStartedEvent,
    ProgressEvent,
};
use crate::notify::{NotificationSink, NotificationThrottle};
use crate::progress::{self, format_step_label};
use crate::retry::{self, RetryPolicy};
use crate::store::QueueStore;
use crate::types::{JobDescriptor, ProgressReading, RunnerStatus};

/// The orchestrator: drains the ongoing list one job at a time.
///
/// One logical thread of control; a job is never started while a previous
/// one is outstanding, because the server runs a single generation at a
/// time. Queue edits from the UI interleave freely between jobs: the loop
/// re-reads the head of the ongoing list on every iteration instead of
/// caching indices.
pub struct QueueRunner<B, S>
where
    B: ComputeBackend + 'static,
    S: NotificationSink + 'static,
{
    backend: Arc<B>,
    store: Arc<QueueStore>,
    config: EngineConfig,
    notify: Arc<NotificationThrottle<S>>,
    events: Arc<dyn EventSink>,
    images: Arc<dyn ImageStore>,
    status: Arc<Mutex<RunnerStatus>>,
    draining: AtomicBool,
}

impl<B, S> QueueRunner<B, S>
where
    B: ComputeBackend + 'static,
    S: NotificationSink + 'static,
{
    pub fn new(
        backend: Arc<B>,
        store: Arc<QueueStore>,
        config: EngineConfig,
        notifications: S,
        events: Arc<dyn EventSink>,
        images: Arc<dyn ImageStore>,
    ) -> Self {
        let notify = Arc::new(NotificationThrottle::new(
            notifications,
            config.notify_min_interval,
        ));
        Self {
            backend,
            store,
            config,
            notify,
            events,
            images,
            status: Arc::new(Mutex::new(RunnerStatus::Idle)),
            draining: AtomicBool::new(false),
        }
    }

    /// Current engine state, for the UI to observe.
    pub fn status(&self) -> RunnerStatus {
        self.status
            .lock()
            .map(|s| *s)
            .unwrap_or(RunnerStatus::Idle)
    }

    fn set_status(&self, status: RunnerStatus) {
        if let Ok(mut s) = self.status.lock() {
            *s = status;
        }
    }

    /// Drain the ongoing list: run every job in order until the list is
    /// empty or a job fails.
    ///
    /// On failure the loop halts immediately; the failed job stays at the
    /// head of the ongoing list, so a later call resumes exactly where it
    /// stopped. Exactly one terminal notification is emitted either way.
    pub async fn process_queue(&self) -> Result<()> {
        if self.draining.swap(true, Ordering::SeqCst) {
            return Err(EngineError::QueueBusy("A drain is already running".into()));
        }
        if self.store.ongoing_len() == 0 {
            self.draining.store(false, Ordering::SeqCst);
            return Err(EngineError::QueueBusy("Queue is empty".into()));
        }

        // Denominator for the whole batch, computed once over the snapshot
        // at drain start. Edits to not-yet-run jobs do not retroactively
        // perturb percentages already reported for earlier jobs.
        let mut total_batch_steps: u32 = self
            .store
            .snapshot(crate::store::QueueList::Ongoing)
            .iter()
            .map(JobDescriptor::total_steps)
            .sum();
        let mut current_batch_progress: u32 = 0;
        let mut jobs_completed: usize = 0;

        self.notify.emit(
            "Starting batch job",
            &format!("0 / {} steps", total_batch_steps),
            true,
        );
        tracing::debug!(total_batch_steps, "drain started");

        let result = loop {
            let Some(job) = self.store.ongoing_head() else {
                break Ok(());
            };

            // Jobs appended to ongoing after drain start were never counted;
            // raise the denominator so the reported percentage stays <= 100.
            let job_total = job.total_steps();
            if current_batch_progress + job_total > total_batch_steps {
                total_batch_steps = current_batch_progress + job_total;
            }

            match self
                .run_job(&job, Some((current_batch_progress, total_batch_steps)))
                .await
            {
                Ok(image_ids) => {
                    // Credit the job's full precomputed total, not whatever
                    // the progress polling happened to sample. Keeps
                    // cross-job accounting monotonic.
                    current_batch_progress += job_total;
                    let finished = self
                        .store
                        .complete_head()?
                        .ok_or_else(|| EngineError::Storage("ongoing list emptied mid-job".into()))?;
                    jobs_completed += 1;
                    self.events.job_completed(JobCompletedEvent {
                        job: finished,
                        image_ids,
                    });
                }
                Err(e) => {
                    tracing::warn!(job_id = %job.id, error = %e, "drain halted");
                    self.set_status(RunnerStatus::PausedOnError);
                    self.notify.emit("Batch Paused", "Error occurred", true);
                    self.events.error(JobErrorEvent {
                        job,
                        error: e.to_string(),
                    });
                    break Err(e);
                }
            }
        };

        self.draining.store(false, Ordering::SeqCst);
        match &result {
            Ok(()) => {
                self.set_status(RunnerStatus::Idle);
                self.events.batch_completed(BatchCompletedEvent { jobs_completed });
                self.notify.completion("Batch Complete: All images ready.");
            }
            Err(e) => {
                self.notify.completion(&format!("Batch paused: {}", e));
            }
        }
        result
    }

    /// Run one job immediately, bypassing the queue. Identical
    /// align/retry/notification behavior to a queued job.
    pub async fn generate_now(&self, job: JobDescriptor) -> Result<Vec<String>> {
        if self.draining.swap(true, Ordering::SeqCst) {
            return Err(EngineError::QueueBusy("A drain is already running".into()));
        }

        let result = self.run_job(&job, None).await;
        self.draining.store(false, Ordering::SeqCst);
        match &result {
            Ok(image_ids) => {
                self.set_status(RunnerStatus::Idle);
                self.events.job_completed(JobCompletedEvent {
                    job,
                    image_ids: image_ids.clone(),
                });
                self.notify.completion("Generation Complete: Image Ready");
            }
            Err(e) => {
                // Unlike a drain, there is no job left at the head to
                // resume from, so the engine is idle, not paused.
                self.set_status(RunnerStatus::Idle);
                self.events.error(JobErrorEvent {
                    job,
                    error: e.to_string(),
                });
                self.notify.completion(&format!("Generation failed: {}", e));
            }
        }
        result
    }

    /// The per-job sub-protocol: align the model, poll progress while the
    /// submission call is outstanding, store the returned images.
    ///
    /// `batch` carries `(steps done so far, batch denominator)` when the
    /// job runs inside a drain.
    async fn run_job(&self, job: &JobDescriptor, batch: Option<(u32, u32)>) -> Result<Vec<String>> {
        self.events.job_started(JobStartedEvent { job: job.clone() });

        self.set_status(RunnerStatus::Aligning);
        align::align(self.backend.as_ref(), job, &self.config).await?;

        self.set_status(RunnerStatus::Generating);
        self.notify.emit("Starting Generation", "Initializing...", true);

        let job_total = job.total_steps();
        let poller = {
            let notify = Arc::clone(&self.notify);
            let events = Arc::clone(&self.events);
            let status = Arc::clone(&self.status);
            progress::spawn_poller(
                Arc::clone(&self.backend),
                job_total,
                job.steps_per_image(),
                self.config.progress_interval,
                move |reading| match reading {
                    ProgressReading::Sampling { current, total } => {
                        let (title, current, total) = match batch {
                            Some((done, batch_total)) => ("Batch Running", done + current, batch_total),
                            None => ("Generating...", current, total),
                        };
                        let body = format_step_label(current, total);
                        notify.emit(title, &body, false);
                        events.progress(ProgressEvent {
                            label: title.to_string(),
                            current,
                            total,
                        });
                    }
                    ProgressReading::Finalizing => {
                        if let Ok(mut s) = status.lock() {
                            *s = RunnerStatus::Finalizing;
                        }
                        notify.emit("Finalizing...", "Receiving images...", true);
                    }
                    ProgressReading::Idle => {}
                },
            )
        };

        let policy = RetryPolicy::new(self.config.max_retries, self.config.initial_backoff);
        let submitted = retry::with_backoff(policy, "generation submission", || {
            self.backend.submit(job.mode.endpoint(), &job.payload)
        })
        .await;

        // The poller must never outlive the call it describes.
        poller.cancel();
        let response = submitted?;

        let mut image_ids = Vec::with_capacity(response.images.len());
        for encoded in &response.images {
            let bytes = match BASE64.decode(encoded) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(job_id = %job.id, error = %e, "skipping undecodable image");
                    continue;
                }
            };
            match self.images.save_image(&bytes) {
                Ok(id) => image_ids.push(id),
                Err(e) => {
                    tracing::warn!(job_id = %job.id, error = %e, "image store rejected image");
                }
            }
        }

        tracing::debug!(job_id = %job.id, images = image_ids.len(), "job finished");
        Ok(image_ids)
    }
}
