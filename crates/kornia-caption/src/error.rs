/// An error type for the caption service.
#[derive(thiserror::Error, Debug)]
pub enum CaptionError {
    /// Error when downloading model files from the hub.
    #[error(transparent)]
    FailedToLoadModel(#[from] hf_hub::api::sync::ApiError),

    /// Error raised by the tensor backend.
    #[error(transparent)]
    CandleError(#[from] candle_core::Error),

    /// Error raised by the tokenizer.
    #[error(transparent)]
    TokenizerError(#[from] tokenizers::Error),

    /// Error to decode the input image.
    #[error(transparent)]
    ImageError(#[from] image::ImageError),

    /// Error reading or writing a stream or a file.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Error to parse or encode a JSON message.
    #[error(transparent)]
    SerializationError(#[from] serde_json::Error),

    /// The image file does not exist.
    #[error("File does not exist: {0}")]
    FileDoesNotExist(std::path::PathBuf),

    /// A caption was requested but the model failed to load at startup.
    #[error("Model is not loaded")]
    ModelNotLoaded,

    /// The caption request carries no `image_path`.
    #[error("Missing image_path")]
    MissingImagePath,

    /// The caption request carries an `image_path` that is not a string.
    #[error("image_path must be a string, got: {0}")]
    InvalidImagePath(serde_json::Value),

    /// The request line is valid JSON but not an object.
    #[error("Request must be a JSON object, got: {0}")]
    InvalidRequest(String),

    /// The request line is not valid UTF-8.
    #[error("Request is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    /// The backend panicked while generating a caption.
    #[error("Backend panicked: {0}")]
    BackendPanic(String),
}
