//! Response normalization
//!
//! The matching backend does not commit to one response schema: a match may
//! arrive as a bare URL or as a record whose keys vary between deployments.
//! Everything here parses raw JSON into an explicit intermediate shape first
//! and only then builds `MatchedPhoto` values, so a malformed payload is a
//! distinct error instead of a silently wrong result.

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::models::job::JobId;
use crate::models::photo::{MatchSet, MatchedPhoto, DEFAULT_CONFIDENCE};

/// Keys that may carry the match list, in lookup order.
const LIST_KEYS: &[&str] = &["matched_photos", "matchedPhotos", "matches", "photos", "results"];
const BULK_KEYS: &[&str] = &["download_zip_url", "downloadZipUrl", "zip_url", "zipUrl", "download_url"];
const JOB_ID_KEYS: &[&str] = &["job_id", "jobId", "task_id", "taskId"];

const ID_KEYS: &[&str] = &["photoId", "photo_id", "id", "_id"];
const URL_KEYS: &[&str] = &["url", "fullUrl", "full_url", "photo_url", "photoUrl", "image_url", "imageUrl", "src"];
const THUMB_KEYS: &[&str] = &["thumbUrl", "thumb_url", "thumbnailUrl", "thumbnail_url", "thumbnail"];
const SCORE_KEYS: &[&str] = &["confidence", "score", "similarity", "match_score"];

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizationError {
    #[error("matches field is missing or not a list")]
    NotAList,

    #[error("match entry {index} has no image URL")]
    MissingUrl { index: usize },

    #[error("match entry {index} has an invalid `{field}` field")]
    InvalidField { index: usize, field: &'static str },

    #[error("match entry {index} is neither a URL nor a record")]
    UnsupportedEntry { index: usize },
}

/// One raw list entry, before validation.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Url(String),
    Record(Map<String, Value>),
    Other(Value),
}

/// Normalize the match list carried by `raw`.
///
/// `raw` may be the list itself or an object holding it under one of the
/// known keys. An empty list is a valid result; a missing list is not.
pub fn normalize(raw: &Value) -> Result<Vec<MatchedPhoto>, NormalizationError> {
    let entries = locate_list(raw)?;
    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| normalize_entry(index, entry))
        .collect()
}

/// Normalize the match list plus the optional bulk-download handle.
pub fn normalize_result(raw: &Value) -> Result<MatchSet, NormalizationError> {
    let photos = normalize(raw)?;
    let bulk_download = raw.as_object().and_then(|obj| {
        first_present(obj, BULK_KEYS)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    });
    Ok(MatchSet {
        photos,
        bulk_download,
    })
}

/// Job id from a submission acknowledgement, if the backend assigned one.
pub fn extract_job_id(raw: &Value) -> Option<JobId> {
    let value = first_present(raw.as_object()?, JOB_ID_KEYS)?;
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(JobId::new(s.trim())),
        Value::Number(n) => Some(JobId::new(n.to_string())),
        _ => None,
    }
}

/// Whether `raw` carries a match list at all.
pub fn has_match_list(raw: &Value) -> bool {
    locate_list(raw).is_ok()
}

fn locate_list(raw: &Value) -> Result<&Vec<Value>, NormalizationError> {
    match raw {
        Value::Array(entries) => Ok(entries),
        Value::Object(obj) => match first_present(obj, LIST_KEYS) {
            Some(Value::Array(entries)) => Ok(entries),
            _ => Err(NormalizationError::NotAList),
        },
        _ => Err(NormalizationError::NotAList),
    }
}

/// First non-null value under any of `keys`.
fn first_present<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| obj.get(*key))
        .find(|value| !value.is_null())
}

fn normalize_entry(index: usize, entry: &Value) -> Result<MatchedPhoto, NormalizationError> {
    let raw = RawEntry::deserialize(entry).unwrap_or_else(|_| RawEntry::Other(entry.clone()));
    match raw {
        RawEntry::Url(url) => {
            let url = url.trim();
            if url.is_empty() {
                return Err(NormalizationError::MissingUrl { index });
            }
            Ok(MatchedPhoto {
                photo_id: synthesized_id(index),
                full_url: url.to_string(),
                thumbnail_url: url.to_string(),
                confidence: DEFAULT_CONFIDENCE,
                confidence_reported: false,
            })
        }
        RawEntry::Record(record) => normalize_record(index, &record),
        RawEntry::Other(_) => {
            warn!(index, "Unsupported match entry shape");
            Err(NormalizationError::UnsupportedEntry { index })
        }
    }
}

fn normalize_record(
    index: usize,
    record: &Map<String, Value>,
) -> Result<MatchedPhoto, NormalizationError> {
    let photo_id = match first_present(record, ID_KEYS) {
        None => synthesized_id(index),
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::String(_)) => synthesized_id(index),
        Some(Value::Number(n)) => n.to_string(),
        Some(_) => return Err(NormalizationError::InvalidField { index, field: "id" }),
    };

    let full_url = match first_present(record, URL_KEYS) {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::String(_)) | None => return Err(NormalizationError::MissingUrl { index }),
        Some(_) => return Err(NormalizationError::InvalidField { index, field: "url" }),
    };

    let thumbnail_url = match first_present(record, THUMB_KEYS) {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::String(_)) | None => full_url.clone(),
        Some(_) => {
            return Err(NormalizationError::InvalidField {
                index,
                field: "thumbnail",
            })
        }
    };

    let (confidence, confidence_reported) = match first_present(record, SCORE_KEYS) {
        None => (DEFAULT_CONFIDENCE, false),
        Some(value) => match value.as_f64().filter(|score| score.is_finite()) {
            Some(score) => (normalize_score(score), true),
            None => return Err(NormalizationError::InvalidField { index, field: "score" }),
        },
    };

    Ok(MatchedPhoto {
        photo_id,
        full_url,
        thumbnail_url,
        confidence,
        confidence_reported,
    })
}

/// Scores above 1 (up to 100) are percentages.
fn normalize_score(score: f64) -> f64 {
    let score = if score > 1.0 && score <= 100.0 {
        score / 100.0
    } else {
        score
    };
    score.clamp(0.0, 1.0)
}

fn synthesized_id(index: usize) -> String {
    format!("match-{}", index)
}
