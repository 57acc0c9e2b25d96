//! Match acquisition orchestrator
//!
//! Owns the single active `MatchJob` and its state machine:
//!
//! ```text
//! Idle -> Uploading -> Processing -> Complete | Error
//!            |                          ^
//!            +--------------------------+   (inline result, 404, upload failure)
//! Complete | Error -> Idle                  (reset)
//! ```
//!
//! Once a job id is known, the push subscription and the poll loop run as
//! separate tasks and send proposals over one mpsc channel. The orchestrator
//! is the only consumer, so "first terminal delivery wins" is a state check:
//! after the job leaves `Processing`, every further delivery is ignored.

use metrics::{counter, histogram};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::models::api::SubmitOutcome;
use crate::models::job::{EventToken, JobId, MatchFailure, MatchJob, MatchSnapshot, MatchState};
use crate::models::payload::ImagePayload;
use crate::models::photo::MatchSet;
use crate::services::normalizer;
use crate::services::transport::poll::{self, PollPolicy};
use crate::services::transport::push::{self, ReconnectPolicy};
use crate::services::transport::{Channel, ChannelMessage, MatchBackend, Signal};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub poll: PollPolicy,
    pub reconnect: ReconnectPolicy,
    pub push_enabled: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll: PollPolicy::default(),
            reconnect: ReconnectPolicy::default(),
            push_enabled: true,
        }
    }
}

/// Push subscription and poll loop for one job. Dropping stops both.
struct JobObservers {
    job_id: JobId,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl JobObservers {
    fn stop(&mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for JobObservers {
    fn drop(&mut self) {
        self.stop();
    }
}

pub struct MatchOrchestrator {
    backend: Arc<dyn MatchBackend>,
    config: OrchestratorConfig,
    job: Option<MatchJob>,
    observers: Option<JobObservers>,
    inbox: Option<mpsc::UnboundedReceiver<ChannelMessage>>,
    updates: watch::Sender<MatchSnapshot>,
}

impl MatchOrchestrator {
    pub fn new(backend: Arc<dyn MatchBackend>, config: OrchestratorConfig) -> Self {
        let (updates, _) = watch::channel(MatchSnapshot::idle());
        Self {
            backend,
            config,
            job: None,
            observers: None,
            inbox: None,
            updates,
        }
    }

    pub fn state(&self) -> MatchState {
        self.job
            .as_ref()
            .map(MatchJob::state)
            .unwrap_or(MatchState::Idle)
    }

    pub fn job(&self) -> Option<&MatchJob> {
        self.job.as_ref()
    }

    pub fn snapshot(&self) -> MatchSnapshot {
        self.job
            .as_ref()
            .map(MatchSnapshot::of)
            .unwrap_or_else(MatchSnapshot::idle)
    }

    /// Receive a snapshot after every observable change.
    pub fn subscribe(&self) -> watch::Receiver<MatchSnapshot> {
        self.updates.subscribe()
    }

    /// Whether push/poll observers are running for the current job.
    pub fn is_observing(&self) -> bool {
        self.observers.is_some()
    }

    /// Submit a selfie and run the job until it reaches `Complete` or `Error`.
    pub async fn find_matches(&mut self, payload: ImagePayload, event: EventToken) -> MatchState {
        self.submit(payload, event).await;
        self.settle().await
    }

    /// Start a new job for `payload`, discarding any previous one.
    ///
    /// Returns after the upload round trip: in `Complete` or `Error` when
    /// the response settled the job, otherwise in `Processing` with push
    /// and poll observers running.
    pub async fn submit(&mut self, payload: ImagePayload, event: EventToken) -> MatchState {
        self.discard_job();
        self.job = Some(MatchJob::begin(event.clone()));
        self.publish();

        counter!("guest_match_jobs_submitted_total").increment(1);
        info!(event = %event, size_bytes = payload.size_bytes(), "Submitting selfie for matching");

        match self.backend.submit_selfie(&event, &payload).await {
            Err(e) => {
                error!(event = %event, error = %e, "Selfie upload failed");
                self.finish_with_failure(MatchFailure::Upload {
                    error: e.to_string(),
                });
            }
            Ok(SubmitOutcome::NoMatch) => {
                self.assign_id(JobId::local());
                self.finish_with_result("inline", MatchSet::empty());
            }
            Ok(SubmitOutcome::Accepted(body)) => self.accept(body),
        }

        self.state()
    }

    /// Apply channel messages until the job leaves `Processing`.
    pub async fn settle(&mut self) -> MatchState {
        while self.state() == MatchState::Processing {
            self.process_next().await;
        }
        self.state()
    }

    /// Wait for one channel message and apply it.
    ///
    /// Returns `None` without waiting when no job is in `Processing`.
    pub async fn process_next(&mut self) -> Option<MatchState> {
        if self.state() != MatchState::Processing {
            return None;
        }

        let message = match self.inbox.as_mut() {
            Some(inbox) => inbox.recv().await,
            None => None,
        };

        match message {
            Some(message) => self.apply(message),
            None => {
                warn!("Job channels closed without a result");
                self.finish_with_failure(MatchFailure::Transport {
                    error: "job channels closed without a result".to_string(),
                });
            }
        }

        Some(self.state())
    }

    /// Abandon the current job and return to `Idle`.
    ///
    /// Stops both observers synchronously. Safe to call repeatedly or when
    /// already idle. Late deliveries for the abandoned job are dropped.
    pub fn reset(&mut self) {
        self.discard_job();
        self.publish();
    }

    /// Handle the synchronous acknowledgement of an upload.
    fn accept(&mut self, body: Value) {
        let job_id = normalizer::extract_job_id(&body);

        match (job_id, normalizer::normalize_result(&body)) {
            (job_id, Ok(result)) if !result.is_empty() => {
                self.assign_id(job_id.unwrap_or_else(JobId::local));
                self.finish_with_result("inline", result);
            }
            (Some(job_id), inline) => {
                if let Err(e) = inline {
                    if normalizer::has_match_list(&body) {
                        warn!(job_id = %job_id, error = %e, "Ignoring malformed inline matches, waiting for job result");
                    }
                }
                self.assign_id(job_id.clone());
                let started = self
                    .job
                    .as_mut()
                    .map(MatchJob::start_processing)
                    .unwrap_or(false);
                if started {
                    info!(job_id = %job_id, "Selfie accepted, tracking matching job");
                    self.start_observers(job_id);
                    self.publish();
                }
            }
            (None, Ok(result)) => {
                self.assign_id(JobId::local());
                self.finish_with_result("inline", result);
            }
            (None, Err(e)) => {
                warn!(error = %e, "Upload response carried neither matches nor a job id");
                self.assign_id(JobId::local());
                self.finish_with_failure(MatchFailure::Malformed {
                    error: e.to_string(),
                });
            }
        }
    }

    /// Apply one proposal from a channel.
    fn apply(&mut self, message: ChannelMessage) {
        let Some(job) = self.job.as_mut() else {
            debug!(job_id = %message.job_id, "Discarding channel message, no active job");
            return;
        };
        if job.id() != Some(&message.job_id) {
            debug!(
                job_id = %message.job_id,
                channel = %message.channel,
                "Discarding channel message for a stale job"
            );
            return;
        }
        if job.state() != MatchState::Processing {
            debug!(
                job_id = %message.job_id,
                channel = %message.channel,
                state = %job.state(),
                "Ignoring late delivery for a settled job"
            );
            return;
        }

        match message.signal {
            Signal::Progress { percent, step } => {
                if job.record_progress(percent, step) {
                    debug!(
                        job_id = %message.job_id,
                        channel = %message.channel,
                        percent = job.progress_percent(),
                        "Job progress"
                    );
                    self.publish();
                }
            }
            Signal::Terminal(payload) => match normalizer::normalize_result(&payload) {
                Ok(result) => {
                    counter!("guest_match_channel_wins_total", "channel" => message.channel.as_str())
                        .increment(1);
                    self.finish_with_result(message.channel.as_str(), result);
                }
                Err(e) => {
                    warn!(
                        job_id = %message.job_id,
                        channel = %message.channel,
                        error = %e,
                        "Terminal payload failed normalization"
                    );
                    self.finish_with_failure(MatchFailure::Malformed {
                        error: e.to_string(),
                    });
                }
            },
            Signal::Failed { reason } => {
                self.finish_with_failure(MatchFailure::JobFailed { reason });
            }
            Signal::Exhausted { attempts } => {
                self.finish_with_failure(MatchFailure::Timeout { attempts });
            }
            Signal::Broken { error } => match message.channel {
                Channel::Poll => self.finish_with_failure(MatchFailure::Transport { error }),
                Channel::Push => {
                    debug!(job_id = %message.job_id, error = %error, "Ignoring push channel breakage");
                }
            },
            Signal::Closed => {
                info!(job_id = %message.job_id, "Push channel closed, relying on polling");
            }
        }
    }

    fn assign_id(&mut self, id: JobId) {
        if let Some(job) = self.job.as_mut() {
            job.assign_id(id);
        }
    }

    fn start_observers(&mut self, job_id: JobId) {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let mut tasks = Vec::with_capacity(2);

        if self.config.push_enabled {
            tasks.push(tokio::spawn(push::run_push_subscription(
                self.backend.clone(),
                job_id.clone(),
                self.config.reconnect,
                tx.clone(),
                cancel.clone(),
            )));
        }
        tasks.push(tokio::spawn(poll::run_polling(
            self.backend.clone(),
            job_id.clone(),
            self.config.poll,
            tx,
            cancel.clone(),
        )));

        self.inbox = Some(rx);
        self.observers = Some(JobObservers {
            job_id,
            cancel,
            tasks,
        });
    }

    fn stop_observers(&mut self) {
        if let Some(mut observers) = self.observers.take() {
            observers.stop();
            debug!(job_id = %observers.job_id, "Stopped job observers");
        }
        self.inbox = None;
    }

    fn discard_job(&mut self) {
        self.stop_observers();
        if let Some(job) = self.job.take() {
            info!(
                job_id = ?job.id().map(JobId::as_str),
                state = %job.state(),
                "Discarding match job"
            );
        }
    }

    fn finish_with_result(&mut self, source: &'static str, result: MatchSet) {
        let Some(job) = self.job.as_mut() else {
            return;
        };
        if !job.complete(result) {
            return;
        }

        info!(
            job_id = ?job.id().map(JobId::as_str),
            source,
            matches = job.matches().len(),
            bulk_download = job.bulk_download_handle().is_some(),
            "Match job complete"
        );
        counter!("guest_match_jobs_completed_total").increment(1);
        histogram!("guest_match_job_duration_seconds").record(job.elapsed_secs());

        self.stop_observers();
        self.publish();
    }

    fn finish_with_failure(&mut self, failure: MatchFailure) {
        let Some(job) = self.job.as_mut() else {
            return;
        };
        let reason = failure.reason();
        let message = failure.to_string();
        if !job.fail(failure) {
            return;
        }

        warn!(
            job_id = ?job.id().map(JobId::as_str),
            reason,
            error = %message,
            "Match job failed"
        );
        counter!("guest_match_jobs_failed_total", "reason" => reason).increment(1);

        self.stop_observers();
        self.publish();
    }

    fn publish(&self) {
        self.updates.send_replace(self.snapshot());
    }
}
