use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T, E = GammaError> = std::result::Result<T, E>;

/// Errors surfaced by the image model and the gamma kernels.
///
/// Parameter and shape problems are reported eagerly through these variants.
/// Arithmetic edge cases (NaN doses, voxels whose search region has no
/// evaluated sample) are never errors; they are recovered locally by emitting
/// NaN into the affected output voxel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GammaError {
    /// A gamma parameter failed eager validation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// A buffer length or a resize does not match the product of the dimensions.
    #[error("invalid size: {0}")]
    InvalidSize(String),

    /// A checked index was outside the image bounds.
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// The two input images cannot be combined by the requested kernel.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// The requested execution policy is not provided by this build.
    #[error("not implemented: {0}")]
    NotImplemented(String),
}
