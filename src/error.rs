//! Error types for the pipeline.
//!
//! Everything below the async stage returns `Result<_, Error>`. Nothing past
//! that boundary propagates an error: the stage parks failures and the texture
//! tier converts them into error-flagged handles (see `texture`).

use thiserror::Error;

/// Pipeline error.
#[derive(Debug, Error)]
pub enum Error {
    /// Image bytes could not be decoded.
    #[error("decode failed: {0}")]
    Decode(String),

    /// The remote collaborator could not deliver the asset.
    #[error("remote fetch failed for {asset}: {reason}")]
    Fetch { asset: String, reason: String },

    /// The GPU uploader rejected the pixel data.
    #[error("texture upload failed: {0}")]
    Upload(String),

    /// A single reservation larger than the whole memory budget.
    /// Retrying can never succeed, so this is permanent.
    #[error("requested {requested} bytes but the total budget is {budget}")]
    BudgetExceeded { requested: usize, budget: usize },

    /// The item source has no origin for this identifier.
    #[error("no origin for item {0}")]
    MissingItem(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, Error>;
