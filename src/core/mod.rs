//! Core image algebra and time-series modules

pub mod image;
pub mod harmonics;
pub mod qa_mask;
pub mod regression;
pub mod pipeline;

// Re-export main types
pub use image::{Band, Image, ImageCollection, ImageTransform};
pub use harmonics::{
    add_dependents, construct_band_names, years_since_epoch, AddDependents, HarmonicConfig,
    HarmonicTerms, Predictor, ResidualDiff,
};
pub use qa_mask::{extract_bits, get_qa_bits, is_cloudy, MaskCoverage, QaMaskConfig, QualityMask};
pub use regression::{solve_linear_system, HarmonicFit, HarmonicRegression};
pub use pipeline::{SeasonalModel, SeasonalPipeline};
