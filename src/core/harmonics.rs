use crate::core::image::{Image, ImageTransform};
use crate::types::{GwError, GwResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt::Display;

/// Constant regressor band
pub const CONSTANT_BAND: &str = "constant";
/// Time since epoch in radians (one year = 2*pi)
pub const TIME_BAND: &str = "t";
/// Model prediction band
pub const FITTED_BAND: &str = "fitted";
/// Prediction minus observation
pub const DIFF_BAND: &str = "diff";

/// Average year length in milliseconds (365.25 days)
const MILLIS_PER_YEAR: f64 = 365.25 * 86_400_000.0;

/// Harmonic model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarmonicConfig {
    /// Harmonic frequencies in cycles per year
    pub harmonics: Vec<u32>,
    /// Prefix for cosine band names
    pub cos_prefix: String,
    /// Prefix for sine band names
    pub sin_prefix: String,
    /// Vegetation-index band the model is fitted to
    pub index_band: String,
}

impl Default for HarmonicConfig {
    fn default() -> Self {
        Self {
            harmonics: vec![1, 2, 3],
            cos_prefix: "cos_".to_string(),
            sin_prefix: "sin_".to_string(),
            index_band: "NDVI".to_string(),
        }
    }
}

impl HarmonicConfig {
    pub fn validate(&self) -> GwResult<()> {
        if self.harmonics.is_empty() {
            return Err(GwError::Config("at least one harmonic is required".to_string()));
        }
        if self.cos_prefix == self.sin_prefix {
            return Err(GwError::Config(format!(
                "cosine and sine prefixes must differ (both '{}')",
                self.cos_prefix
            )));
        }
        Ok(())
    }

    pub fn cos_names(&self) -> Vec<String> {
        construct_band_names(&self.cos_prefix, &self.harmonics)
    }

    pub fn sin_names(&self) -> Vec<String> {
        construct_band_names(&self.sin_prefix, &self.harmonics)
    }

    /// Regressors in model order: constant, time, cosines, sines
    pub fn independents(&self) -> Vec<String> {
        let mut names = vec![CONSTANT_BAND.to_string(), TIME_BAND.to_string()];
        names.extend(self.cos_names());
        names.extend(self.sin_names());
        names
    }

    pub fn terms(&self) -> GwResult<HarmonicTerms> {
        self.validate()?;
        HarmonicTerms::new(self.harmonics.clone(), self.cos_names(), self.sin_names())
    }
}

/// Band names formed by appending each suffix to `prefix`
pub fn construct_band_names<T: Display>(prefix: &str, suffixes: &[T]) -> Vec<String> {
    suffixes.iter().map(|s| format!("{}{}", prefix, s)).collect()
}

/// Years elapsed since 1970-01-01T00:00:00Z, measured in average-length
/// (365.25 day) years.
pub fn years_since_epoch(date: DateTime<Utc>) -> f64 {
    date.timestamp_millis() as f64 / MILLIS_PER_YEAR
}

/// Append a constant band of 1 and the time band `t` (radians since epoch)
pub fn add_dependents(image: &Image) -> GwResult<Image> {
    let acquired = image.acquired().ok_or(GwError::MissingDate)?;
    let years = years_since_epoch(acquired);
    log::debug!("Image acquired {} is {:.4} years past epoch", acquired, years);

    let time_radians = Image::constant(&[years * 2.0 * PI]).rename(&[TIME_BAND])?;
    image
        .add_bands(&Image::constant(&[1.0]))?
        .add_bands(&time_radians)
}

/// [`add_dependents`] as a mappable transform
#[derive(Debug, Clone, Copy, Default)]
pub struct AddDependents;

impl ImageTransform for AddDependents {
    fn apply(&self, image: &Image) -> GwResult<Image> {
        add_dependents(image)
    }
}

/// Adds one cosine and one sine band per frequency, computed from `t`
#[derive(Debug, Clone)]
pub struct HarmonicTerms {
    frequencies: Vec<u32>,
    cos_names: Vec<String>,
    sin_names: Vec<String>,
}

impl HarmonicTerms {
    pub fn new(frequencies: Vec<u32>, cos_names: Vec<String>, sin_names: Vec<String>) -> GwResult<Self> {
        if frequencies.is_empty() {
            return Err(GwError::Config("no harmonic frequencies given".to_string()));
        }
        for names in [&cos_names, &sin_names] {
            if names.len() != frequencies.len() {
                return Err(GwError::BandCount {
                    expected: frequencies.len(),
                    actual: names.len(),
                });
            }
        }
        Ok(Self {
            frequencies,
            cos_names,
            sin_names,
        })
    }
}

impl ImageTransform for HarmonicTerms {
    fn apply(&self, image: &Image) -> GwResult<Image> {
        let frequencies: Vec<f64> = self.frequencies.iter().map(|&f| f as f64).collect();
        let phase = image
            .select(&[TIME_BAND])?
            .multiply(&Image::constant(&frequencies))?;

        let cosines = phase.cos().rename(&self.cos_names)?;
        let sines = phase.sin().rename(&self.sin_names)?;
        image.add_bands(&cosines)?.add_bands(&sines)
    }
}

/// Appends `fitted`: the dot product of the independent bands with a coefficient image
#[derive(Debug, Clone)]
pub struct Predictor {
    independents: Vec<String>,
    coefficients: Image,
}

impl Predictor {
    pub fn new(independents: Vec<String>, coefficients: Image) -> GwResult<Self> {
        let count = coefficients.band_count();
        if count != independents.len() && count != 1 {
            return Err(GwError::BandCount {
                expected: independents.len(),
                actual: count,
            });
        }
        Ok(Self {
            independents,
            coefficients,
        })
    }
}

impl ImageTransform for Predictor {
    fn apply(&self, image: &Image) -> GwResult<Image> {
        let fitted = image
            .select(&self.independents)?
            .multiply(&self.coefficients)?
            .reduce_sum(FITTED_BAND)?;
        image.add_bands(&fitted)
    }
}

/// Appends `diff` = `fitted` - observed index, optionally divided by a per-pixel RMSE
#[derive(Debug, Clone)]
pub struct ResidualDiff {
    index: String,
    rmse: Option<Image>,
}

impl ResidualDiff {
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            rmse: None,
        }
    }

    /// Rescale the difference by a single-band RMSE image
    pub fn with_rmse(mut self, rmse: Image) -> GwResult<Self> {
        if rmse.band_count() != 1 {
            return Err(GwError::BandCount {
                expected: 1,
                actual: rmse.band_count(),
            });
        }
        self.rmse = Some(rmse);
        Ok(self)
    }
}

impl ImageTransform for ResidualDiff {
    fn apply(&self, image: &Image) -> GwResult<Image> {
        let mut diff = image
            .select(&[FITTED_BAND])?
            .subtract(&image.select(&[self.index.as_str()])?)?;
        if let Some(rmse) = &self.rmse {
            diff = diff.divide(rmse)?;
        }
        image.add_bands(&diff.rename(&[DIFF_BAND])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::image::Band;
    use approx::assert_relative_eq;
    use chrono::TimeZone;
    use ndarray::array;

    fn dated(y: i32, m: u32, d: u32) -> Image {
        Image::from_raster("NDVI", array![[0.5, 0.6]])
            .with_date(Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap())
    }

    #[test]
    fn test_construct_band_names() {
        assert_eq!(construct_band_names("S", &[1, 2, 3]), vec!["S1", "S2", "S3"]);
        assert!(construct_band_names::<u32>("S", &[]).is_empty());
    }

    #[test]
    fn test_years_since_epoch() {
        let years = |y, m, d| years_since_epoch(Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap());
        assert_relative_eq!(years(1970, 1, 1), 0.0);
        assert_relative_eq!(years(1971, 1, 1), 365.0 / 365.25, epsilon = 1e-12);
        // 11323 days from 1970-01-01 to 2001-01-01
        assert_relative_eq!(years(2001, 1, 1), 11323.0 / 365.25, epsilon = 1e-12);
        assert_relative_eq!(years(2001, 1, 1), 31.000684462696782, epsilon = 1e-9);

        let quarter_day_past = Utc.with_ymd_and_hms(1971, 1, 1, 6, 0, 0).unwrap();
        assert_relative_eq!(years_since_epoch(quarter_day_past), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_add_dependents() {
        let image = add_dependents(&dated(1971, 1, 1)).unwrap();
        assert_eq!(image.band_names(), vec!["NDVI", "constant", "t"]);
        assert_relative_eq!(image.band(CONSTANT_BAND).unwrap().data[[0, 0]], 1.0);
        assert_relative_eq!(
            image.band(TIME_BAND).unwrap().data[[0, 0]],
            2.0 * PI * 365.0 / 365.25,
            epsilon = 1e-12
        );
    }

    #[test]
    fn test_add_dependents_requires_date() {
        let image = Image::from_raster("NDVI", array![[0.5]]);
        assert!(matches!(add_dependents(&image), Err(GwError::MissingDate)));
    }

    #[test]
    fn test_harmonic_terms() {
        let terms = HarmonicTerms::new(
            vec![1, 2],
            construct_band_names("cos_", &[1, 2]),
            construct_band_names("sin_", &[1, 2]),
        )
        .unwrap();

        let base = Image::new(vec![Band::constant(TIME_BAND, PI / 4.0)]).unwrap();
        let image = terms.apply(&base).unwrap();
        assert_eq!(image.band_names(), vec!["t", "cos_1", "cos_2", "sin_1", "sin_2"]);

        let value = |name: &str| image.band(name).unwrap().data[[0, 0]];
        assert_relative_eq!(value("cos_1"), (PI / 4.0).cos(), epsilon = 1e-12);
        assert_relative_eq!(value("cos_2"), 0.0, epsilon = 1e-12);
        assert_relative_eq!(value("sin_2"), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_harmonic_terms_requires_time_band() {
        let terms = HarmonicConfig::default().terms().unwrap();
        let image = Image::from_raster("NDVI", array![[0.5]]);
        assert!(matches!(terms.apply(&image), Err(GwError::MissingBand(name)) if name == "t"));
    }

    #[test]
    fn test_harmonic_terms_name_mismatch() {
        let result = HarmonicTerms::new(vec![1, 2], vec!["c1".into()], vec!["s1".into(), "s2".into()]);
        assert!(matches!(result, Err(GwError::BandCount { expected: 2, actual: 1 })));
    }

    #[test]
    fn test_predictor() {
        let image = Image::new(vec![
            Band::new("x1", array![[1.0, 2.0]]),
            Band::new("x2", array![[3.0, 4.0]]),
        ])
        .unwrap();
        let coefficients = Image::constant(&[0.5, 2.0]);
        let predictor = Predictor::new(vec!["x1".into(), "x2".into()], coefficients).unwrap();

        let out = predictor.apply(&image).unwrap();
        assert_eq!(out.band(FITTED_BAND).unwrap().data, array![[6.5, 9.0]]);
        assert!(Predictor::new(vec!["x1".into(), "x2".into()], Image::constant(&[1.0, 2.0, 3.0])).is_err());
    }

    #[test]
    fn test_residual_keeps_fitted_minus_observed() {
        let image = Image::new(vec![
            Band::constant(FITTED_BAND, 3.0),
            Band::constant("NDVI", 5.0),
        ])
        .unwrap();
        let out = ResidualDiff::new("NDVI").apply(&image).unwrap();
        assert_relative_eq!(out.band(DIFF_BAND).unwrap().data[[0, 0]], -2.0);
    }

    #[test]
    fn test_residual_rescaled_by_rmse() {
        let image = Image::new(vec![
            Band::constant(FITTED_BAND, 3.0),
            Band::constant("NDVI", 5.0),
        ])
        .unwrap();
        let diff = ResidualDiff::new("NDVI")
            .with_rmse(Image::constant(&[4.0]))
            .unwrap();
        let out = diff.apply(&image).unwrap();
        assert_relative_eq!(out.band(DIFF_BAND).unwrap().data[[0, 0]], -0.5);
    }

    #[test]
    fn test_residual_masked_where_rmse_is_zero() {
        let image = Image::new(vec![
            Band::new(FITTED_BAND, array![[5.0, 5.0]]),
            Band::new("NDVI", array![[5.0, 4.0]]),
        ])
        .unwrap();
        let diff = ResidualDiff::new("NDVI")
            .with_rmse(Image::from_raster("rmse", array![[0.0, 2.0]]))
            .unwrap();
        let out = diff.apply(&image).unwrap();
        let band = out.band(DIFF_BAND).unwrap();
        assert_eq!(band.value_at(0, 0), None);
        assert_eq!(band.value_at(0, 1), Some(0.5));
    }

    #[test]
    fn test_default_independents() {
        let config = HarmonicConfig::default();
        assert_eq!(
            config.independents(),
            vec!["constant", "t", "cos_1", "cos_2", "cos_3", "sin_1", "sin_2", "sin_3"]
        );
    }
}
