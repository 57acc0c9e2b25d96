use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;
use tracing::{debug, info, warn};

use crate::models::payload::{ImagePayload, ImageSource, PickedFile, Preview, CAMERA_FILE_NAME};

/// Default selfie size ceiling in MiB.
pub const DEFAULT_MAX_UPLOAD_MIB: u64 = 10;

const BYTES_PER_MIB: u64 = 1024 * 1024;

/// Input problems the guest can correct. Resolved at the capture boundary,
/// never forwarded to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Please select an image file")]
    NotAnImage,

    #[error("File size must be less than {0}MB")]
    TooLarge(u64),

    #[error("The selected image is empty")]
    Empty,

    #[error("Camera unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("Could not capture a photo: {0}")]
    CaptureFailed(String),

    #[error("Missing event token")]
    MissingEventToken,
}

/// Which way a requested camera should face.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Facing {
    User,
    Environment,
}

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("Camera permission denied")]
    PermissionDenied,

    #[error("No camera found")]
    NotFound,

    #[error("Camera is in use by another application")]
    Busy,

    #[error("Camera error: {0}")]
    Other(String),
}

/// A device that can hand out a live video stream.
pub trait Camera: Send {
    /// Request exclusive access to a stream facing `facing`.
    fn open(&mut self, facing: Facing) -> Result<Box<dyn VideoStream>, CameraError>;
}

/// An exclusively held video stream. Dropping it releases the device.
pub trait VideoStream: Send {
    fn grab_frame(&mut self) -> Result<RgbImage, CameraError>;
}

/// Capture/select adapter: turns a picked file or a camera frame into a
/// validated `ImagePayload` plus a preview.
pub struct SelfieCapture {
    max_upload_mib: u64,
    camera: Option<Box<dyn Camera>>,
    stream: Option<Box<dyn VideoStream>>,
    preview: Option<Preview>,
}

impl SelfieCapture {
    pub fn new(max_upload_mib: u64) -> Self {
        Self {
            max_upload_mib,
            camera: None,
            stream: None,
            preview: None,
        }
    }

    pub fn with_camera(mut self, camera: Box<dyn Camera>) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn max_upload_mib(&self) -> u64 {
        self.max_upload_mib
    }

    /// Preview of the last accepted image.
    pub fn preview(&self) -> Option<&Preview> {
        self.preview.as_ref()
    }

    pub fn camera_active(&self) -> bool {
        self.stream.is_some()
    }

    /// Acquire a selfie from `source`.
    ///
    /// A rejected file leaves the adapter exactly as it was. A camera that
    /// cannot be opened yields `DeviceUnavailable` and the file path stays
    /// usable.
    pub fn acquire(&mut self, source: ImageSource) -> Result<ImagePayload, ValidationError> {
        let payload = match source {
            ImageSource::File(file) => self.validate_file(file)?,
            ImageSource::Camera => self.capture_from_camera()?,
        };

        self.preview = Some(Preview::of(&payload.content_type, &payload.bytes));

        info!(
            file_name = %payload.file_name,
            content_type = %payload.content_type,
            size_bytes = payload.size_bytes(),
            "Selfie acquired"
        );

        Ok(payload)
    }

    /// Drop the preview and release the camera, back to the initial state.
    pub fn clear(&mut self) {
        if self.preview.is_some() || self.stream.is_some() {
            debug!("Clearing selfie preview and camera stream");
        }
        self.preview = None;
        self.stream = None;
    }

    fn validate_file(&self, file: PickedFile) -> Result<ImagePayload, ValidationError> {
        let declared = file
            .content_type
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_ascii_lowercase);

        let content_type = match declared {
            Some(mime) if mime.starts_with("image/") => mime,
            Some(_) => return Err(ValidationError::NotAnImage),
            None => sniff_mime(&file.bytes)
                .ok_or(ValidationError::NotAnImage)?
                .to_string(),
        };

        self.check_size(&file.bytes)?;

        let file_name = if file.file_name.trim().is_empty() {
            CAMERA_FILE_NAME.to_string()
        } else {
            file.file_name
        };

        Ok(ImagePayload {
            file_name,
            content_type,
            bytes: file.bytes,
        })
    }

    fn capture_from_camera(&mut self) -> Result<ImagePayload, ValidationError> {
        if self.stream.is_none() {
            let camera = self.camera.as_mut().ok_or_else(|| {
                ValidationError::DeviceUnavailable("no camera attached".to_string())
            })?;
            let stream = camera.open(Facing::User).map_err(|e| {
                warn!(error = %e, "Camera unavailable, file selection remains available");
                ValidationError::DeviceUnavailable(e.to_string())
            })?;
            self.stream = Some(stream);
        }

        let Some(stream) = self.stream.as_mut() else {
            return Err(ValidationError::DeviceUnavailable(
                "camera stream closed".to_string(),
            ));
        };

        let frame = match stream.grab_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Camera stream failed, releasing device");
                self.stream = None;
                return Err(ValidationError::DeviceUnavailable(e.to_string()));
            }
        };

        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(frame)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
            .map_err(|e| ValidationError::CaptureFailed(e.to_string()))?;

        self.check_size(&bytes)?;

        Ok(ImagePayload {
            file_name: CAMERA_FILE_NAME.to_string(),
            content_type: "image/jpeg".to_string(),
            bytes,
        })
    }

    fn check_size(&self, bytes: &[u8]) -> Result<(), ValidationError> {
        if bytes.is_empty() {
            return Err(ValidationError::Empty);
        }
        if bytes.len() as u64 > self.max_upload_mib * BYTES_PER_MIB {
            return Err(ValidationError::TooLarge(self.max_upload_mib));
        }
        Ok(())
    }
}

impl Default for SelfieCapture {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_UPLOAD_MIB)
    }
}

/// MIME type from the image's magic bytes.
fn sniff_mime(bytes: &[u8]) -> Option<&'static str> {
    image::guess_format(bytes).ok().map(|format| format.to_mime_type())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn png_bytes() -> Vec<u8> {
        let img = RgbImage::from_pixel(4, 4, Rgb([10, 20, 30]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn picked(content_type: Option<&str>, bytes: Vec<u8>) -> ImageSource {
        ImageSource::File(PickedFile {
            file_name: "me.png".to_string(),
            content_type: content_type.map(str::to_string),
            bytes,
        })
    }

    struct FakeCamera {
        deny: bool,
        opens: Arc<AtomicUsize>,
    }

    struct FakeStream;

    impl Camera for FakeCamera {
        fn open(&mut self, facing: Facing) -> Result<Box<dyn VideoStream>, CameraError> {
            assert_eq!(facing, Facing::User);
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self.deny {
                Err(CameraError::PermissionDenied)
            } else {
                Ok(Box::new(FakeStream))
            }
        }
    }

    impl VideoStream for FakeStream {
        fn grab_frame(&mut self) -> Result<RgbImage, CameraError> {
            Ok(RgbImage::from_pixel(8, 8, Rgb([200, 120, 90])))
        }
    }

    #[test]
    fn test_sniffs_untyped_file() {
        let mut capture = SelfieCapture::default();
        let payload = capture.acquire(picked(None, png_bytes())).unwrap();
        assert_eq!(payload.content_type, "image/png");
        let preview = capture.preview().unwrap();
        assert!(preview.data_url().starts_with("data:image/png;base64,"));
        assert!(!preview.is_empty());
    }

    #[test]
    fn test_rejects_non_image_type() {
        let mut capture = SelfieCapture::default();
        let err = capture.acquire(picked(Some("text/plain"), b"hello".to_vec())).unwrap_err();
        assert_eq!(err, ValidationError::NotAnImage);

        let err = capture.acquire(picked(None, b"hello".to_vec())).unwrap_err();
        assert_eq!(err, ValidationError::NotAnImage);
    }

    #[test]
    fn test_too_large_keeps_previous_preview() {
        let mut capture = SelfieCapture::new(1);
        capture.acquire(picked(Some("image/png"), png_bytes())).unwrap();
        let before = capture.preview().cloned();

        let oversized = vec![0u8; (BYTES_PER_MIB + 1) as usize];
        let err = capture.acquire(picked(Some("image/jpeg"), oversized)).unwrap_err();
        assert_eq!(err, ValidationError::TooLarge(1));
        assert_eq!(err.to_string(), "File size must be less than 1MB");
        assert_eq!(capture.preview().cloned(), before);
    }

    #[test]
    fn test_empty_image_rejected() {
        let mut capture = SelfieCapture::default();
        let err = capture.acquire(picked(Some("image/jpeg"), Vec::new())).unwrap_err();
        assert_eq!(err, ValidationError::Empty);
    }

    #[test]
    fn test_camera_denied_leaves_file_path_usable() {
        let opens = Arc::new(AtomicUsize::new(0));
        let mut capture = SelfieCapture::default().with_camera(Box::new(FakeCamera {
            deny: true,
            opens: opens.clone(),
        }));

        let err = capture.acquire(ImageSource::Camera).unwrap_err();
        assert!(matches!(err, ValidationError::DeviceUnavailable(_)));
        assert!(!capture.camera_active());

        assert!(capture.acquire(picked(None, png_bytes())).is_ok());
        assert_eq!(opens.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_camera_attached() {
        let mut capture = SelfieCapture::default();
        let err = capture.acquire(ImageSource::Camera).unwrap_err();
        assert!(matches!(err, ValidationError::DeviceUnavailable(_)));
    }

    #[test]
    fn test_camera_capture_and_clear() {
        let opens = Arc::new(AtomicUsize::new(0));
        let mut capture = SelfieCapture::default().with_camera(Box::new(FakeCamera {
            deny: false,
            opens: opens.clone(),
        }));

        let payload = capture.acquire(ImageSource::Camera).unwrap();
        assert_eq!(payload.content_type, "image/jpeg");
        assert_eq!(payload.file_name, CAMERA_FILE_NAME);
        assert_eq!(image::guess_format(&payload.bytes).unwrap(), ImageFormat::Jpeg);
        assert!(capture.camera_active());

        // Retake reuses the open stream.
        capture.acquire(ImageSource::Camera).unwrap();
        assert_eq!(opens.load(Ordering::SeqCst), 1);

        capture.clear();
        assert!(capture.preview().is_none());
        assert!(!capture.camera_active());

        capture.acquire(ImageSource::Camera).unwrap();
        assert_eq!(opens.load(Ordering::SeqCst), 2);
    }
}
