use serde::Deserialize;
use serde_json::Value;
use strum::{Display, EnumString};

use crate::models::job::JobId;
use crate::services::normalizer;

/// Outcome of the selfie submission request.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    /// HTTP 404: the backend found no photo with the guest's face.
    NoMatch,
    /// Success body: an inline result, a job acknowledgement, or both.
    Accepted(Value),
}

/// Job status reported by the poll endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(ascii_case_insensitive)]
pub enum PollState {
    #[strum(
        to_string = "pending",
        serialize = "processing",
        serialize = "queued",
        serialize = "running"
    )]
    Pending,

    #[strum(
        to_string = "done",
        serialize = "completed",
        serialize = "complete",
        serialize = "success"
    )]
    Done,

    #[strum(to_string = "failed", serialize = "error")]
    Failed,
}

/// Parsed poll response. `body` keeps the raw payload for normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct PollStatus {
    pub state: PollState,
    pub progress: Option<f64>,
    pub step: Option<String>,
    pub error: Option<String>,
    pub body: Value,
}

impl PollStatus {
    /// Unknown or missing status strings count as still pending.
    pub fn from_value(body: Value) -> Self {
        let state = body
            .get("status")
            .and_then(Value::as_str)
            .and_then(|s| s.trim().parse::<PollState>().ok())
            .unwrap_or(PollState::Pending);
        let progress = ["progress", "percent"]
            .iter()
            .find_map(|key| body.get(*key).and_then(Value::as_f64));
        let step = body.get("step").and_then(Value::as_str).map(str::to_string);
        let error = ["error", "message"]
            .iter()
            .find_map(|key| body.get(*key).and_then(Value::as_str))
            .map(str::to_string);

        Self {
            state,
            progress,
            step,
            error,
            body,
        }
    }
}

/// Event delivered on the push channel.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Progress {
        job_id: JobId,
        step: Option<String>,
        percent: f64,
    },
    Result {
        job_id: JobId,
        payload: Value,
    },
}

#[derive(Deserialize)]
struct ProgressData {
    #[serde(default)]
    step: Option<String>,
    #[serde(alias = "progress")]
    percent: f64,
}

impl PushEvent {
    /// Decode a push frame. Event kinds this client does not consume yield `None`.
    ///
    /// The job id is read with the same rules as a submission
    /// acknowledgement, so numeric ids decode too.
    pub fn from_frame(event: &str, data: &str) -> Result<Option<Self>, serde_json::Error> {
        match event {
            "progress" => {
                let data: Value = serde_json::from_str(data)?;
                let job_id = frame_job_id(&data)?;
                let progress = ProgressData::deserialize(&data)?;
                Ok(Some(Self::Progress {
                    job_id,
                    step: progress.step,
                    percent: progress.percent,
                }))
            }
            "result" => {
                let payload: Value = serde_json::from_str(data)?;
                let job_id = frame_job_id(&payload)?;
                Ok(Some(Self::Result { job_id, payload }))
            }
            _ => Ok(None),
        }
    }

    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Progress { job_id, .. } | Self::Result { job_id, .. } => job_id,
        }
    }
}

fn frame_job_id(data: &Value) -> Result<JobId, serde_json::Error> {
    normalizer::extract_job_id(data).ok_or_else(|| serde::de::Error::missing_field("job_id"))
}
