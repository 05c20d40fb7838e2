//! greenwave: harmonic seasonal models for vegetation-index time series
//!
//! This library builds harmonic-regression predictor bands (constant, time,
//! cosine and sine terms), fits and evaluates per-pixel seasonal models, and
//! cleans vegetation-index images with packed quality-assurance bit flags.
//! Images are small in-memory rasters with per-band validity masks.

pub mod types;
pub mod core;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{BitRange, GwError, GwResult, PixelMask, Raster};

pub use crate::core::{
    add_dependents, construct_band_names, extract_bits, get_qa_bits, is_cloudy, AddDependents, Band,
    HarmonicConfig, HarmonicFit, HarmonicRegression, HarmonicTerms, Image, ImageCollection,
    ImageTransform, Predictor, QaMaskConfig, QualityMask, ResidualDiff, SeasonalModel,
    SeasonalPipeline,
};
