use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::{Channel, ChannelMessage, MatchBackend, Signal};
use crate::models::api::PollState;
use crate::models::job::JobId;

/// Interval and attempt budget for status polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: 22,
        }
    }
}

/// Poll `job_id` every `policy.interval` until a terminal status, a
/// transport error, the attempt budget, or cancellation.
///
/// A transport error ends polling at once; it is reported, never retried.
pub async fn run_polling(
    backend: Arc<dyn MatchBackend>,
    job_id: JobId,
    policy: PollPolicy,
    tx: UnboundedSender<ChannelMessage>,
    cancel: CancellationToken,
) {
    let send = |signal: Signal| tx.send(ChannelMessage::new(job_id.clone(), Channel::Poll, signal));

    for attempt in 1..=policy.max_attempts {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(policy.interval) => {}
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return,
            response = backend.poll_status(&job_id) => response,
        };

        let status = match response {
            Ok(status) => status,
            Err(e) => {
                tracing::error!(job_id = %job_id, attempt, error = %e, "Status poll failed, stopping polling");
                let _ = send(Signal::Broken {
                    error: e.to_string(),
                });
                return;
            }
        };

        tracing::debug!(job_id = %job_id, attempt, status = %status.state, "Polled job status");

        let delivered = match status.state {
            PollState::Pending => match status.progress {
                Some(percent) => send(Signal::Progress {
                    percent,
                    step: status.step,
                }),
                None => Ok(()),
            },
            PollState::Done => {
                let _ = send(Signal::Terminal(status.body));
                return;
            }
            PollState::Failed => {
                let _ = send(Signal::Failed {
                    reason: status.error,
                });
                return;
            }
        };

        if delivered.is_err() {
            // Orchestrator went away
            return;
        }
    }

    tracing::warn!(
        job_id = %job_id,
        attempts = policy.max_attempts,
        "Polling budget exhausted without a result"
    );
    let _ = send(Signal::Exhausted {
        attempts: policy.max_attempts,
    });
}
