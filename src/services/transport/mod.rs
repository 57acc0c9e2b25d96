//! Job delivery channels
//!
//! A matching job is observed through two independent producers: the push
//! subscription (`push`) and the polling fallback (`poll`). Neither touches
//! job state. Both send `ChannelMessage` proposals to the orchestrator, which
//! alone decides what they mean.

pub mod poll;
pub mod push;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value;
use strum::Display;

use crate::models::api::{PollStatus, PushEvent, SubmitOutcome};
use crate::models::job::{EventToken, JobId};
use crate::models::payload::ImagePayload;

/// One push connection's event stream. Ends when the connection drops.
pub type PushStream = BoxStream<'static, Result<PushEvent, TransportError>>;

/// Network seam between the orchestrator and the matching backend.
#[async_trait]
pub trait MatchBackend: Send + Sync {
    /// Upload the selfie for `event`.
    async fn submit_selfie(
        &self,
        event: &EventToken,
        payload: &ImagePayload,
    ) -> Result<SubmitOutcome, TransportError>;

    /// Check the status of `job_id` once.
    async fn poll_status(&self, job_id: &JobId) -> Result<PollStatus, TransportError>;

    /// Open one push connection for `job_id`.
    async fn open_push(&self, job_id: &JobId) -> Result<PushStream, TransportError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend returned HTTP {status}")]
    Status { status: u16 },

    #[error("Failed to decode response body: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Channel unavailable: {0}")]
    Unavailable(String),
}

/// Which producer a message came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Channel {
    Push,
    Poll,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Poll => "poll",
        }
    }
}

/// What a producer observed about a job.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Progress { percent: f64, step: Option<String> },
    /// Final payload carrying the match list, not yet normalized.
    Terminal(Value),
    /// The backend reported the job as failed.
    Failed { reason: Option<String> },
    /// The poll budget ran out without a terminal status.
    Exhausted { attempts: u32 },
    /// The poll loop hit a transport error and stopped. The push channel
    /// reconnects on errors instead and never sends this.
    Broken { error: String },
    /// The push channel gave up reconnecting.
    Closed,
}

/// A proposed transition, tagged with the job it concerns.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelMessage {
    pub job_id: JobId,
    pub channel: Channel,
    pub signal: Signal,
}

impl ChannelMessage {
    pub fn new(job_id: JobId, channel: Channel, signal: Signal) -> Self {
        Self {
            job_id,
            channel,
            signal,
        }
    }
}
