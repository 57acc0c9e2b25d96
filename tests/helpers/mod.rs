//! Test helper utilities: a scripted backend and payload builders

#![allow(dead_code)]

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use guest_match::models::api::{PollStatus, PushEvent, SubmitOutcome};
use guest_match::models::job::{EventToken, JobId};
use guest_match::models::payload::ImagePayload;
use guest_match::services::orchestrator::OrchestratorConfig;
use guest_match::services::transport::poll::PollPolicy;
use guest_match::services::transport::push::ReconnectPolicy;
use guest_match::services::transport::{MatchBackend, PushStream, TransportError};

/// What one push connection does once opened.
pub enum PushScript {
    /// The connection cannot be opened.
    Refuse,
    /// Deliver the events, then drop the connection.
    Deliver(Vec<PushEvent>),
    /// Deliver the events, then stay open without sending anything.
    Hold(Vec<PushEvent>),
}

/// `MatchBackend` that replays scripted responses and counts calls.
///
/// Polls past the end of the script report `processing`. Push connections
/// past the end of the script are refused.
#[derive(Default)]
pub struct ScriptedBackend {
    submits: Mutex<VecDeque<Result<SubmitOutcome, String>>>,
    polls: Mutex<VecDeque<Result<Value, String>>>,
    pushes: Mutex<VecDeque<PushScript>>,
    poll_count: AtomicU32,
    push_opens: AtomicU32,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submit_json(self, body: Value) -> Self {
        self.submits.lock().unwrap().push_back(Ok(SubmitOutcome::Accepted(body)));
        self
    }

    pub fn submit_not_found(self) -> Self {
        self.submits.lock().unwrap().push_back(Ok(SubmitOutcome::NoMatch));
        self
    }

    pub fn submit_error(self, error: &str) -> Self {
        self.submits.lock().unwrap().push_back(Err(error.to_string()));
        self
    }

    pub fn poll_pending(self, times: usize) -> Self {
        for _ in 0..times {
            self.polls
                .lock()
                .unwrap()
                .push_back(Ok(json!({"status": "processing"})));
        }
        self
    }

    pub fn poll_json(self, body: Value) -> Self {
        self.polls.lock().unwrap().push_back(Ok(body));
        self
    }

    pub fn poll_error(self, error: &str) -> Self {
        self.polls.lock().unwrap().push_back(Err(error.to_string()));
        self
    }

    pub fn push(self, script: PushScript) -> Self {
        self.pushes.lock().unwrap().push_back(script);
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn poll_count(&self) -> u32 {
        self.poll_count.load(Ordering::SeqCst)
    }

    pub fn push_opens(&self) -> u32 {
        self.push_opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MatchBackend for ScriptedBackend {
    async fn submit_selfie(
        &self,
        _event: &EventToken,
        _payload: &ImagePayload,
    ) -> Result<SubmitOutcome, TransportError> {
        let next = self.submits.lock().unwrap().pop_front();
        match next {
            Some(Ok(outcome)) => Ok(outcome),
            Some(Err(error)) => Err(TransportError::Unavailable(error)),
            None => Err(TransportError::Unavailable("no scripted submit".to_string())),
        }
    }

    async fn poll_status(&self, _job_id: &JobId) -> Result<PollStatus, TransportError> {
        self.poll_count.fetch_add(1, Ordering::SeqCst);
        let next = self.polls.lock().unwrap().pop_front();
        match next {
            Some(Ok(body)) => Ok(PollStatus::from_value(body)),
            Some(Err(error)) => Err(TransportError::Unavailable(error)),
            None => Ok(PollStatus::from_value(json!({"status": "processing"}))),
        }
    }

    async fn open_push(&self, _job_id: &JobId) -> Result<PushStream, TransportError> {
        self.push_opens.fetch_add(1, Ordering::SeqCst);
        let next = self.pushes.lock().unwrap().pop_front();
        match next {
            Some(PushScript::Deliver(events)) => {
                Ok(futures::stream::iter(events.into_iter().map(Ok)).boxed())
            }
            Some(PushScript::Hold(events)) => Ok(futures::stream::iter(events.into_iter().map(Ok))
                .chain(futures::stream::pending())
                .boxed()),
            Some(PushScript::Refuse) | None => {
                Err(TransportError::Unavailable("connection refused".to_string()))
            }
        }
    }
}

/// Fast timings for tests: 10ms polls and 5ms reconnects.
pub fn fast_config() -> OrchestratorConfig {
    OrchestratorConfig {
        poll: PollPolicy {
            interval: Duration::from_millis(10),
            max_attempts: 22,
        },
        reconnect: ReconnectPolicy {
            max_attempts: 5,
            delay: Duration::from_millis(5),
        },
        push_enabled: true,
    }
}

pub fn poll_only_config() -> OrchestratorConfig {
    OrchestratorConfig {
        push_enabled: false,
        ..fast_config()
    }
}

pub fn progress(job_id: &str, percent: f64) -> PushEvent {
    PushEvent::Progress {
        job_id: JobId::new(job_id),
        step: None,
        percent,
    }
}

pub fn result(job_id: &str, matches: Value) -> PushEvent {
    PushEvent::Result {
        job_id: JobId::new(job_id),
        payload: json!({"job_id": job_id, "matches": matches}),
    }
}

pub fn event() -> EventToken {
    EventToken::new("evt-test").unwrap()
}

/// Small solid-color JPEG.
pub fn jpeg_bytes() -> Vec<u8> {
    let image = image::RgbImage::from_pixel(16, 16, image::Rgb([200, 150, 120]));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Jpeg)
        .unwrap();
    bytes
}

pub fn selfie() -> ImagePayload {
    ImagePayload {
        file_name: "selfie.jpg".to_string(),
        content_type: "image/jpeg".to_string(),
        bytes: jpeg_bytes(),
    }
}
