use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use image::RgbImage;
use serde_json::Value;

use crate::error::CaptionError;
use crate::preprocessor::read_image_any_rgb8;
use crate::protocol::Envelope;

/// A pretrained captioning model together with its input preprocessor.
///
/// Implementors own the whole preprocess, generate and decode cycle for one image.
pub trait CaptionBackend {
    /// Generate a caption for a decoded rgb8 image.
    fn caption(&mut self, image: &RgbImage) -> Result<String, CaptionError>;
}

impl<B: CaptionBackend + ?Sized> CaptionBackend for Box<B> {
    fn caption(&mut self, image: &RgbImage) -> Result<String, CaptionError> {
        (**self).caption(image)
    }
}

/// Holder of the loaded backend, or nothing if loading failed.
pub struct ModelHandle<B> {
    backend: Option<B>,
}

impl<B> Default for ModelHandle<B> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<B> ModelHandle<B> {
    /// A handle without a backend; every caption attempt fails.
    pub fn empty() -> Self {
        Self { backend: None }
    }

    /// A handle owning a fully loaded backend.
    pub fn loaded(backend: B) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// Whether a backend is present.
    pub fn is_loaded(&self) -> bool {
        self.backend.is_some()
    }
}

impl<B: CaptionBackend> ModelHandle<B> {
    /// Caption the image at `image_path`, reporting any failure in the envelope.
    ///
    /// # Arguments
    ///
    /// * `image_path` - The raw `image_path` field of the request.
    ///
    /// # Returns
    ///
    /// `Envelope::Success` with the caption, or `Envelope::Failure` describing what went
    /// wrong. Backend panics are caught and reported the same way.
    pub fn caption(&mut self, image_path: &Value) -> Envelope {
        let result = self.try_caption(image_path);
        if let Err(e) = &result {
            log::warn!("caption failed for {image_path}: {e}");
        }
        result.into()
    }

    fn try_caption(&mut self, image_path: &Value) -> Result<String, CaptionError> {
        let path = match image_path {
            Value::String(path) => path,
            Value::Null => return Err(CaptionError::MissingImagePath),
            other => return Err(CaptionError::InvalidImagePath(other.clone())),
        };

        let image = read_image_any_rgb8(path)?;
        let backend = self.backend.as_mut().ok_or(CaptionError::ModelNotLoaded)?;

        panic::catch_unwind(AssertUnwindSafe(|| backend.caption(&image)))
            .map_err(|payload| CaptionError::BackendPanic(panic_message(payload.as_ref())))?
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use image::Rgb;
    use serde_json::json;

    use super::*;

    struct SizeBackend;

    impl CaptionBackend for SizeBackend {
        fn caption(&mut self, image: &RgbImage) -> Result<String, CaptionError> {
            let (w, h) = image.dimensions();
            Ok(format!("an image of {w}x{h} pixels"))
        }
    }

    struct PanickingBackend;

    impl CaptionBackend for PanickingBackend {
        fn caption(&mut self, _image: &RgbImage) -> Result<String, CaptionError> {
            panic!("index out of bounds");
        }
    }

    fn write_png(dir: &tempfile::TempDir) -> String {
        let file_path = dir.path().join("red.png");
        RgbImage::from_pixel(6, 4, Rgb([255, 0, 0]))
            .save(&file_path)
            .unwrap();
        file_path.to_string_lossy().into_owned()
    }

    #[test]
    fn caption_with_loaded_backend() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path = write_png(&tmp_dir);

        let mut handle = ModelHandle::loaded(SizeBackend);
        assert!(handle.is_loaded());
        assert_eq!(
            handle.caption(&json!(path)),
            Envelope::Success {
                caption: "an image of 6x4 pixels".to_string()
            }
        );
    }

    #[test]
    fn caption_with_empty_handle() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path = write_png(&tmp_dir);

        let mut handle = ModelHandle::<SizeBackend>::empty();
        assert!(!handle.is_loaded());
        match handle.caption(&json!(path)) {
            Envelope::Failure { error } => assert_eq!(error, "Model is not loaded"),
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn caption_with_bad_paths() {
        let mut handle = ModelHandle::loaded(SizeBackend);

        for image_path in [json!("/no/such/image.jpg"), Value::Null, json!(["a.png"])] {
            match handle.caption(&image_path) {
                Envelope::Failure { error } => assert!(!error.is_empty()),
                other => panic!("unexpected envelope: {other:?}"),
            }
        }
    }

    #[test]
    fn caption_catches_backend_panics() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let path = write_png(&tmp_dir);

        let mut handle = ModelHandle::loaded(PanickingBackend);
        match handle.caption(&json!(path)) {
            Envelope::Failure { error } => assert!(error.contains("index out of bounds")),
            other => panic!("unexpected envelope: {other:?}"),
        }
    }
}
