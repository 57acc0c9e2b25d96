use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum::Display;
use uuid::Uuid;

use crate::models::photo::{MatchSet, MatchedPhoto};
use crate::services::capture::ValidationError;

/// Identifier of a matching job, assigned by the backend or, for jobs the
/// backend never named, by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh orchestrator-assigned id.
    pub fn local() -> Self {
        Self(format!("local-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_local(&self) -> bool {
        self.0.starts_with("local-")
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Event a selfie is matched against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct EventToken(String);

impl EventToken {
    pub fn new(token: impl Into<String>) -> Result<Self, ValidationError> {
        let token = token.into().trim().to_string();
        if token.is_empty() {
            return Err(ValidationError::MissingEventToken);
        }
        Ok(Self(token))
    }

    /// Extract the token from a guest join link.
    ///
    /// Accepts bare paths (`/guest/<token>`) as well as full URLs
    /// (`https://host/guest/<token>?ref=qr`).
    pub fn from_guest_path(link: &str) -> Result<Self, ValidationError> {
        let path = link.split(['?', '#']).next().unwrap_or(link);
        let mut segments = path.split('/').filter(|s| !s.is_empty());
        while let Some(segment) = segments.next() {
            if segment == "guest" {
                return match segments.next() {
                    Some(token) => Self::new(token),
                    None => Err(ValidationError::MissingEventToken),
                };
            }
        }
        Err(ValidationError::MissingEventToken)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of the active matching job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MatchState {
    Idle,
    Uploading,
    Processing,
    Complete,
    Error,
}

impl MatchState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(self, next: MatchState) -> bool {
        use MatchState::*;
        matches!(
            (self, next),
            (Idle, Uploading)
                | (Uploading, Processing)
                | (Uploading, Complete)
                | (Uploading, Error)
                | (Processing, Complete)
                | (Processing, Error)
                | (Complete, Idle)
                | (Error, Idle)
        )
    }
}

/// Why a job ended in `MatchState::Error`.
#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchFailure {
    #[error("Selfie upload failed: {error}")]
    Upload { error: String },

    #[error("Status channel failed: {error}")]
    Transport { error: String },

    #[error("Malformed match result: {error}")]
    Malformed { error: String },

    #[error("Matching job failed on the server")]
    JobFailed { reason: Option<String> },

    #[error("No result after {attempts} status checks")]
    Timeout { attempts: u32 },
}

impl MatchFailure {
    /// Message shown to the guest next to the retry action.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Upload { .. } | Self::Transport { .. } => {
                "We couldn't reach the photo service. Please try again."
            }
            Self::Malformed { .. } => {
                "Something went wrong while matching your photos. Please try again."
            }
            Self::JobFailed { .. } => {
                "We couldn't process your selfie. Please try again with a different photo."
            }
            Self::Timeout { .. } => {
                "Matching is taking longer than expected. Please try again in a moment."
            }
        }
    }

    /// Short label for metrics and logs.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Upload { .. } => "upload",
            Self::Transport { .. } => "transport",
            Self::Malformed { .. } => "malformed",
            Self::JobFailed { .. } => "job_failed",
            Self::Timeout { .. } => "timeout",
        }
    }
}

/// One outstanding or completed matching request.
///
/// Only the orchestrator mutates a job; every mutator refuses edges the
/// state machine does not allow and reports whether anything changed.
#[derive(Debug, Clone, Serialize)]
pub struct MatchJob {
    id: Option<JobId>,
    event_token: EventToken,
    state: MatchState,
    progress_percent: u8,
    step: Option<String>,
    matches: Vec<MatchedPhoto>,
    bulk_download_handle: Option<String>,
    failure: Option<MatchFailure>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl MatchJob {
    /// A job whose selfie upload is starting.
    pub(crate) fn begin(event_token: EventToken) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            event_token,
            state: MatchState::Uploading,
            progress_percent: 0,
            step: None,
            matches: Vec::new(),
            bulk_download_handle: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> Option<&JobId> {
        self.id.as_ref()
    }

    pub fn event_token(&self) -> &EventToken {
        &self.event_token
    }

    pub fn state(&self) -> MatchState {
        self.state
    }

    pub fn progress_percent(&self) -> u8 {
        self.progress_percent
    }

    pub fn step(&self) -> Option<&str> {
        self.step.as_deref()
    }

    pub fn matches(&self) -> &[MatchedPhoto] {
        &self.matches
    }

    pub fn bulk_download_handle(&self) -> Option<&str> {
        self.bulk_download_handle.as_deref()
    }

    pub fn failure(&self) -> Option<&MatchFailure> {
        self.failure.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Seconds from creation to the last update.
    pub fn elapsed_secs(&self) -> f64 {
        (self.updated_at - self.created_at).num_milliseconds() as f64 / 1000.0
    }

    /// Set the id once; later assignments are refused.
    pub(crate) fn assign_id(&mut self, id: JobId) -> bool {
        if self.id.is_some() {
            return false;
        }
        self.id = Some(id);
        true
    }

    pub(crate) fn start_processing(&mut self) -> bool {
        self.transition(MatchState::Processing)
    }

    /// Apply a progress report. Reports that would lower the displayed
    /// percentage, or that arrive outside `Processing`, are ignored.
    pub(crate) fn record_progress(&mut self, percent: f64, step: Option<String>) -> bool {
        if self.state != MatchState::Processing || !percent.is_finite() {
            return false;
        }
        let percent = percent.clamp(0.0, 100.0).round() as u8;
        if percent < self.progress_percent {
            return false;
        }

        let step_changed = step.is_some() && step != self.step;
        let changed = percent != self.progress_percent || step_changed;
        self.progress_percent = percent;
        if step_changed {
            self.step = step;
        }
        if changed {
            self.updated_at = Utc::now();
        }
        changed
    }

    /// Write the result set. Happens at most once per job.
    pub(crate) fn complete(&mut self, result: MatchSet) -> bool {
        if !self.transition(MatchState::Complete) {
            return false;
        }
        self.matches = result.photos;
        self.bulk_download_handle = result.bulk_download;
        self.progress_percent = 100;
        true
    }

    pub(crate) fn fail(&mut self, failure: MatchFailure) -> bool {
        if !self.transition(MatchState::Error) {
            return false;
        }
        self.failure = Some(failure);
        true
    }

    fn transition(&mut self, next: MatchState) -> bool {
        if !self.state.can_transition_to(next) {
            return false;
        }
        self.state = next;
        self.updated_at = Utc::now();
        true
    }
}

/// Point-in-time view of the orchestrator published to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchSnapshot {
    pub state: MatchState,
    pub job_id: Option<JobId>,
    pub progress_percent: u8,
    pub step: Option<String>,
    pub matches: Vec<MatchedPhoto>,
    pub bulk_download_handle: Option<String>,
    pub failure: Option<MatchFailure>,
}

impl MatchSnapshot {
    pub fn idle() -> Self {
        Self {
            state: MatchState::Idle,
            job_id: None,
            progress_percent: 0,
            step: None,
            matches: Vec::new(),
            bulk_download_handle: None,
            failure: None,
        }
    }

    pub fn of(job: &MatchJob) -> Self {
        Self {
            state: job.state,
            job_id: job.id.clone(),
            progress_percent: job.progress_percent,
            step: job.step.clone(),
            matches: job.matches.clone(),
            bulk_download_handle: job.bulk_download_handle.clone(),
            failure: job.failure.clone(),
        }
    }

    /// One-line status for the guest.
    pub fn headline(&self) -> String {
        match self.state {
            MatchState::Idle => "Take a selfie to find your photos".to_string(),
            MatchState::Uploading => "Uploading your selfie...".to_string(),
            MatchState::Processing => format!("Finding your photos... {}%", self.progress_percent),
            MatchState::Complete => match self.matches.len() {
                0 => "No Matches Found".to_string(),
                1 => "Found 1 Match!".to_string(),
                n => format!("Found {} Matches!", n),
            },
            MatchState::Error => self
                .failure
                .as_ref()
                .map(|f| f.user_message())
                .unwrap_or("Something went wrong. Please try again.")
                .to_string(),
        }
    }
}
