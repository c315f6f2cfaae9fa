// ============================================================================
// ERROR TYPES — one enum per concern, folded into EditorError at the session
// ============================================================================

use thiserror::Error;

/// An image reference could not be turned into pixel data.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("image reference is not a base64 data URI")]
    NotADataUri,
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("image has zero width or height")]
    Empty,
    #[error("image encode failed: {0}")]
    Encode(#[source] image::ImageError),
}

/// The external generation call produced no usable image.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("no API key configured")]
    MissingCredentials,
    #[error("a generation is already in progress")]
    Busy,
    #[error("provider rejected the request: {0}")]
    Rejected(String),
    #[error("provider returned no image content")]
    NoImage,
    #[error("provider returned an unreadable image: {0}")]
    Decode(#[from] DecodeError),
    #[error("provider I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// A project document could not be loaded.
#[derive(Debug, Error)]
pub enum ProjectFileError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed project JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("project file is missing `{0}`")]
    MissingField(&'static str),
    #[error("invalid grid of {rows} rows by {cols} columns")]
    InvalidGrid { rows: u32, cols: u32 },
    #[error("invalid cell key '{0}' (expected \"row-col\")")]
    InvalidCellKey(String),
    #[error("cell {key} lies outside the {rows}x{cols} grid")]
    KeyOutOfRange { key: String, rows: u32, cols: u32 },
    #[error("embedded image for {what} cannot be decoded: {source}")]
    Image {
        what: String,
        #[source]
        source: DecodeError,
    },
}

/// Anything an editing command can fail with.
#[derive(Debug, Error)]
pub enum EditorError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    ProjectFile(#[from] ProjectFileError),
    #[error("no base image loaded")]
    NoProject,
    #[error("no cell selected")]
    NoActiveCell,
    #[error("a grid of {rows} rows by {cols} columns is not supported")]
    InvalidGrid { rows: u32, cols: u32 },
    #[error("cell {0} lies outside the current grid")]
    CellOutOfRange(String),
    #[error("export failed: {0}")]
    Export(#[from] image::ImageError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
