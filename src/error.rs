#[derive(thiserror::Error, Debug)]
pub enum DewarpError {
    #[error("Invalid image format: {0}")]
    InvalidImageFormat(String),

    #[error("Image processing error: {0}")]
    ImageError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Geometry error: {0}")]
    Geometry(String),
}

impl From<image::ImageError> for DewarpError {
    fn from(err: image::ImageError) -> Self {
        DewarpError::ImageError(err.to_string())
    }
}

impl From<serde_json::Error> for DewarpError {
    fn from(err: serde_json::Error) -> Self {
        DewarpError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DewarpError>;
