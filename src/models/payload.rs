use base64::Engine;
use serde::Serialize;

/// File name used for selfies captured from a camera.
pub const CAMERA_FILE_NAME: &str = "selfie.jpg";

/// A file handed over by a file picker or drag-and-drop.
#[derive(Debug, Clone)]
pub struct PickedFile {
    pub file_name: String,
    /// MIME type reported by the picker, if any.
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// Where a selfie comes from.
#[derive(Debug, Clone)]
pub enum ImageSource {
    File(PickedFile),
    Camera,
}

/// A validated selfie ready for submission.
#[derive(Debug, Clone)]
pub struct ImagePayload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ImagePayload {
    pub fn size_bytes(&self) -> usize {
        self.bytes.len()
    }
}

/// Renderable `data:` URL of an acquired image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preview {
    data_url: String,
}

impl Preview {
    pub fn of(content_type: &str, bytes: &[u8]) -> Self {
        let encoded = base64::engine::general_purpose::STANDARD.encode(bytes);
        Self {
            data_url: format!("data:{};base64,{}", content_type, encoded),
        }
    }

    pub fn data_url(&self) -> &str {
        &self.data_url
    }

    pub fn is_empty(&self) -> bool {
        self.data_url.is_empty()
    }
}
