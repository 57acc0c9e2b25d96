use serde::{Deserialize, Serialize};
use strum::Display;

/// Score assigned to a match the backend did not score.
pub const DEFAULT_CONFIDENCE: f64 = 0.95;

/// Display bucket for a match confidence score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

impl ConfidenceTier {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            Self::High
        } else if score >= 0.6 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// One (selfie, event photo) correspondence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedPhoto {
    pub photo_id: String,
    pub full_url: String,
    pub thumbnail_url: String,
    /// Normalized to [0, 1].
    pub confidence: f64,
    /// False when `confidence` is `DEFAULT_CONFIDENCE` because the backend
    /// sent no score. Check this flag, never the score value.
    pub confidence_reported: bool,
}

impl MatchedPhoto {
    /// Lightest renderable URL for the photo.
    pub fn display_url(&self) -> &str {
        &self.thumbnail_url
    }

    /// Confidence as a rounded whole percentage.
    pub fn confidence_percent(&self) -> u8 {
        (self.confidence.clamp(0.0, 1.0) * 100.0).round() as u8
    }

    pub fn confidence_tier(&self) -> ConfidenceTier {
        ConfidenceTier::from_score(self.confidence)
    }

    /// Shareable link to the photo page under `origin`.
    pub fn share_url(&self, origin: &str) -> String {
        format!("{}/photo/{}", origin.trim_end_matches('/'), self.photo_id)
    }
}

/// Canonical result of a matching job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MatchSet {
    pub photos: Vec<MatchedPhoto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bulk_download: Option<String>,
}

impl MatchSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.photos.is_empty()
    }
}
