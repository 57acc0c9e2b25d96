use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::{Channel, ChannelMessage, MatchBackend, Signal};
use crate::models::api::PushEvent;
use crate::models::job::JobId;

/// Reconnect budget for the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive failed connections tolerated before giving up.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(1),
        }
    }
}

/// Keep a push subscription for `job_id` alive until its result arrives.
///
/// Dropped connections are reopened transparently. The subscription ends
/// after forwarding the first result tagged with `job_id`, so a reconnect
/// can never deliver a second one. Events are forwarded with the job id the
/// server tagged them with; filtering foreign ids is the consumer's job.
pub async fn run_push_subscription(
    backend: Arc<dyn MatchBackend>,
    job_id: JobId,
    policy: ReconnectPolicy,
    tx: UnboundedSender<ChannelMessage>,
    cancel: CancellationToken,
) {
    let mut failures: u32 = 0;

    loop {
        let opened = tokio::select! {
            _ = cancel.cancelled() => return,
            opened = backend.open_push(&job_id) => opened,
        };

        match opened {
            Ok(mut stream) => {
                tracing::debug!(job_id = %job_id, "Push channel connected");
                let mut received_any = false;

                loop {
                    let next = tokio::select! {
                        _ = cancel.cancelled() => return,
                        next = stream.next() => next,
                    };

                    let event = match next {
                        Some(Ok(event)) => event,
                        Some(Err(e)) => {
                            tracing::warn!(job_id = %job_id, error = %e, "Push channel error");
                            break;
                        }
                        None => {
                            tracing::debug!(job_id = %job_id, "Push channel disconnected");
                            break;
                        }
                    };
                    received_any = true;

                    let (tagged, signal, is_result) = match event {
                        PushEvent::Progress {
                            job_id: tagged,
                            step,
                            percent,
                        } => (tagged, Signal::Progress { percent, step }, false),
                        PushEvent::Result {
                            job_id: tagged,
                            payload,
                        } => (tagged, Signal::Terminal(payload), true),
                    };
                    let ours = tagged == job_id;

                    if tx.send(ChannelMessage::new(tagged, Channel::Push, signal)).is_err() {
                        return;
                    }
                    if is_result && ours {
                        return;
                    }
                }

                if received_any {
                    failures = 0;
                }
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Push channel connect failed");
            }
        }

        failures += 1;
        if failures > policy.max_attempts {
            tracing::warn!(
                job_id = %job_id,
                attempts = policy.max_attempts,
                "Push channel reconnects exhausted, relying on polling"
            );
            let _ = tx.send(ChannelMessage::new(job_id.clone(), Channel::Push, Signal::Closed));
            return;
        }

        tracing::info!(job_id = %job_id, attempt = failures, "Reconnecting push channel");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(policy.delay) => {}
        }
    }
}
