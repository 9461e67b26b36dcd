use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("capture is not a data URL: {0:?}")]
    InvalidDataUrl(String),
    #[error("failed to decode data URL payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("failed to decode capture image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("pixel buffer of {width}x{height} needs {expected} bytes, got {actual}")]
    BufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("cannot compare a {0}x{1} buffer against a {2}x{3} buffer")]
    DimensionMismatch(u32, u32, u32, u32),
    #[error("no loaded font can render {ch:?} for font stack {font:?}")]
    FontUnavailable { ch: char, font: String },
    #[error("font has no outline for {0:?}")]
    MissingGlyph(char),
}
