use std::path::{Path, PathBuf};

use crate::models::photo::MatchedPhoto;
use crate::services::api_client::FaceApiClient;
use crate::services::transport::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("Download failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Failed to write photo: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-photo outcome of a multi-photo save. Failures do not stop the batch.
#[derive(Debug, Default)]
pub struct DownloadReport {
    pub saved: Vec<(String, PathBuf)>,
    pub failed: Vec<(String, String)>,
}

impl DownloadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Local file name for a downloaded photo: `photo-<id>.jpg`.
pub fn photo_file_name(photo_id: &str) -> String {
    let safe: String = photo_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("photo-{}.jpg", safe)
}

/// Download one photo into `dir`.
pub async fn save_photo(
    client: &FaceApiClient,
    photo_id: &str,
    dir: &Path,
) -> Result<PathBuf, DownloadError> {
    let bytes = client.download_photo(photo_id).await?;
    tokio::fs::create_dir_all(dir).await?;
    let path = dir.join(photo_file_name(photo_id));
    tokio::fs::write(&path, &bytes).await?;

    tracing::debug!(photo_id, path = %path.display(), size_bytes = bytes.len(), "Saved photo");
    Ok(path)
}

/// Download every photo into `dir`, one after another.
pub async fn save_all(client: &FaceApiClient, photos: &[MatchedPhoto], dir: &Path) -> DownloadReport {
    let mut report = DownloadReport::default();

    for photo in photos {
        match save_photo(client, &photo.photo_id, dir).await {
            Ok(path) => report.saved.push((photo.photo_id.clone(), path)),
            Err(e) => {
                tracing::warn!(photo_id = %photo.photo_id, error = %e, "Photo download failed");
                report.failed.push((photo.photo_id.clone(), e.to_string()));
            }
        }
    }

    tracing::info!(
        saved = report.saved.len(),
        failed = report.failed.len(),
        "Photo downloads finished"
    );
    report
}
