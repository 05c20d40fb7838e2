use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Pixel values of a single band (rows x cols)
pub type Raster = Array2<f64>;

/// Per-pixel validity (true = valid, false = masked)
pub type PixelMask = Array2<bool>;

/// Half-open range of bits `[start, end)` within a packed QA value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitRange {
    pub start: u32,
    pub end: u32,
}

impl BitRange {
    /// Create a bit range, rejecting empty or out-of-width ranges
    pub fn new(start: u32, end: u32) -> GwResult<Self> {
        let range = Self { start, end };
        range.validate()?;
        Ok(range)
    }

    pub fn validate(&self) -> GwResult<()> {
        if self.start >= self.end || self.end > 64 {
            return Err(GwError::InvalidBitRange {
                start: self.start,
                end: self.end,
            });
        }
        Ok(())
    }

    /// Bit pattern with every bit in the range set
    pub fn pattern(&self) -> u64 {
        (self.start..self.end).fold(0u64, |acc, bit| acc | (1u64 << bit))
    }
}

impl std::fmt::Display for BitRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// Error types for image algebra and time-series processing
#[derive(Debug, thiserror::Error)]
pub enum GwError {
    #[error("Band not found: {0}")]
    MissingBand(String),

    #[error("Band index {index} out of range for image with {count} bands")]
    BandIndex { index: usize, count: usize },

    #[error("Duplicate band name: {0}")]
    DuplicateBand(String),

    #[error("Shape mismatch: {left:?} vs {right:?}")]
    ShapeMismatch {
        left: (usize, usize),
        right: (usize, usize),
    },

    #[error("Band count mismatch: expected {expected}, got {actual}")]
    BandCount { expected: usize, actual: usize },

    #[error("Image has no acquisition date")]
    MissingDate,

    #[error("Invalid bit range [{start}, {end})")]
    InvalidBitRange { start: u32, end: u32 },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

/// Result type for image operations
pub type GwResult<T> = Result<T, GwError>;
