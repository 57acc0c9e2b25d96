use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;

use crate::config::ClientConfig;
use crate::models::api::{PollStatus, PushEvent, SubmitOutcome};
use crate::models::job::{EventToken, JobId, MatchJob};
use crate::models::payload::ImagePayload;
use crate::models::photo::MatchedPhoto;
use crate::services::sse::SseDecoder;
use crate::services::transport::{MatchBackend, PushStream, TransportError};

/// HTTP client for the face-matching backend.
pub struct FaceApiClient {
    http: Client,
    api_base: String,
    events_base: String,
    auth_token: Option<String>,
    request_timeout: Duration,
}

impl FaceApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let request_timeout = Duration::from_secs(config.request_timeout_secs);
        // No overall timeout on the client: push streams stay open indefinitely.
        let http = Client::builder()
            .user_agent(concat!("guest-match/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(request_timeout)
            .build()?;

        Ok(Self {
            http,
            api_base: config.api_base_url.trim_end_matches('/').to_string(),
            events_base: config.events_base_url().to_string(),
            auth_token: config.auth_token.clone(),
            request_timeout,
        })
    }

    /// Fetch the full-resolution bytes of one photo.
    pub async fn download_photo(&self, photo_id: &str) -> Result<Vec<u8>, TransportError> {
        let url = endpoint(&self.api_base, &["photos", photo_id, "download"])?;
        let response = self
            .authorized(self.http.get(url))
            .timeout(self.request_timeout)
            .send()
            .await?;
        let response = ensure_success(response)?;
        Ok(response.bytes().await?.to_vec())
    }

    /// Link that downloads every photo in `photos` as one archive.
    pub fn combined_download_url(&self, photos: &[MatchedPhoto]) -> Result<Url, TransportError> {
        let mut url = endpoint(&self.api_base, &["face", "download-matched-photos"])?;
        let urls = photos
            .iter()
            .map(|photo| photo.full_url.as_str())
            .collect::<Vec<_>>()
            .join(",");
        url.query_pairs_mut().append_pair("urls", &urls);
        Ok(url)
    }

    /// The backend's bulk handle for `job`, else a combined-download link
    /// built from its matches. `None` when there is nothing to download.
    pub fn bulk_download_url(&self, job: &MatchJob) -> Option<String> {
        if let Some(handle) = job.bulk_download_handle() {
            return Some(handle.to_string());
        }
        if job.matches().is_empty() {
            return None;
        }
        self.combined_download_url(job.matches())
            .ok()
            .map(|url| url.to_string())
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl MatchBackend for FaceApiClient {
    async fn submit_selfie(
        &self,
        event: &EventToken,
        payload: &ImagePayload,
    ) -> Result<SubmitOutcome, TransportError> {
        let url = endpoint(&self.api_base, &["face", "upload-selfie"])?;

        let file = Part::bytes(payload.bytes.clone())
            .file_name(payload.file_name.clone())
            .mime_str(&payload.content_type)?;
        let form = Form::new()
            .text("event_uuid", event.as_str().to_string())
            .part("file", file);

        tracing::debug!(event = %event, size_bytes = payload.size_bytes(), "Uploading selfie");

        let response = self
            .authorized(self.http.post(url))
            .timeout(self.request_timeout)
            .multipart(form)
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            tracing::info!(event = %event, "Backend reported no matching photos");
            return Ok(SubmitOutcome::NoMatch);
        }

        let body: Value = ensure_success(response)?.json().await?;
        Ok(SubmitOutcome::Accepted(body))
    }

    async fn poll_status(&self, job_id: &JobId) -> Result<PollStatus, TransportError> {
        let url = endpoint(&self.api_base, &["face", "jobs", job_id.as_str()])?;
        let response = self
            .authorized(self.http.get(url))
            .timeout(self.request_timeout)
            .send()
            .await?;
        let body: Value = ensure_success(response)?.json().await?;
        Ok(PollStatus::from_value(body))
    }

    async fn open_push(&self, job_id: &JobId) -> Result<PushStream, TransportError> {
        let url = endpoint(&self.events_base, &["face", "jobs", job_id.as_str(), "events"])?;
        let response = self
            .authorized(self.http.get(url))
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;
        Ok(event_stream(ensure_success(response)?))
    }
}

/// `base` with `segments` appended as percent-encoded path segments.
fn endpoint(base: &str, segments: &[&str]) -> Result<Url, TransportError> {
    let mut url = Url::parse(base).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
    url.path_segments_mut()
        .map_err(|_| TransportError::InvalidUrl(base.to_string()))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn ensure_success(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(TransportError::Status {
            status: status.as_u16(),
        })
    }
}

/// Decode a `text/event-stream` body into push events. Frames that fail to
/// decode are skipped.
fn event_stream(response: Response) -> PushStream {
    let body = Box::pin(response.bytes_stream());

    futures::stream::unfold(
        (body, SseDecoder::new(), VecDeque::new()),
        |(mut body, mut decoder, mut pending)| async move {
            loop {
                if let Some(event) = pending.pop_front() {
                    return Some((Ok(event), (body, decoder, pending)));
                }

                match body.next().await {
                    Some(Ok(chunk)) => {
                        for frame in decoder.feed(&chunk) {
                            match PushEvent::from_frame(&frame.event, &frame.data) {
                                Ok(Some(event)) => pending.push_back(event),
                                Ok(None) => {}
                                Err(e) => tracing::warn!(
                                    event = %frame.event,
                                    error = %e,
                                    "Skipping malformed push event"
                                ),
                            }
                        }
                    }
                    Some(Err(e)) => {
                        return Some((Err(TransportError::Http(e)), (body, decoder, pending)))
                    }
                    None => return None,
                }
            }
        },
    )
    .boxed()
}
