//! QA-bit based cleaning of vegetation-index images.
//!
//! The detailed QA band packs several categorical flags into one integer per
//! pixel. A pixel survives the composite mask when it is land, not cloudy,
//! inside the area of interest, and has a positive index value.

use crate::core::image::{Image, ImageTransform};
use crate::types::{BitRange, GwError, GwResult};
use serde::{Deserialize, Serialize};

/// Cloud-state values that mark a pixel as cloudy
const CLOUDY_STATES: [u64; 2] = [2, 3];

/// Bit layout and band names used by the composite quality mask
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaMaskConfig {
    /// Packed QA band
    pub qa_band: String,
    /// Bits holding the cloud state
    pub cloud_bits: BitRange,
    /// Bits holding the land/water flag
    pub land_water_bits: BitRange,
    /// Land/water flag value meaning land
    pub land_value: u64,
    /// Band of the area mask image that flags the area of interest with 1
    pub area_flag_band: String,
}

impl Default for QaMaskConfig {
    fn default() -> Self {
        Self {
            qa_band: "DetailedQA".to_string(),
            cloud_bits: BitRange { start: 0, end: 2 },
            land_water_bits: BitRange { start: 11, end: 13 },
            land_value: 1,
            area_flag_band: "flag".to_string(),
        }
    }
}

impl QaMaskConfig {
    pub fn validate(&self) -> GwResult<()> {
        self.cloud_bits.validate()?;
        self.land_water_bits.validate()?;
        if self.land_value > self.land_water_bits.pattern() >> self.land_water_bits.start {
            return Err(GwError::Config(format!(
                "land value {} does not fit in bits {}",
                self.land_value, self.land_water_bits
            )));
        }
        Ok(())
    }
}

/// Decode the bits of `range` from a packed QA value
pub fn extract_bits(value: u64, range: BitRange) -> u64 {
    (value & range.pattern()) >> range.start
}

/// Cloud-state values 2 and 3 are cloudy
pub fn is_cloudy(cloud_state: u64) -> bool {
    CLOUDY_STATES.contains(&cloud_state)
}

/// Isolate the bits of `range` from the first band of `image` into a band named `new_name`
pub fn get_qa_bits(image: &Image, range: BitRange, new_name: &str) -> GwResult<Image> {
    range.validate()?;
    Ok(image
        .select_index(0)?
        .rename(&[new_name])?
        .bitwise_and(range.pattern())
        .right_shift(range.start))
}

/// Pixel counts of a cleaned index band
#[derive(Debug, Clone, Default)]
pub struct MaskCoverage {
    pub total_pixels: usize,
    pub valid_pixels: usize,
    pub valid_percentage: f64,
}

/// Composite land / cloud / area / index mask applied to each image
#[derive(Debug, Clone)]
pub struct QualityMask {
    index: String,
    area_mask: Image,
    config: QaMaskConfig,
}

impl QualityMask {
    pub fn new(index: impl Into<String>, area_mask: Image) -> Self {
        Self {
            index: index.into(),
            area_mask,
            config: QaMaskConfig::default(),
        }
    }

    pub fn with_config(mut self, config: QaMaskConfig) -> GwResult<Self> {
        config.validate()?;
        self.config = config;
        Ok(self)
    }

    /// The boolean (1/0) mask for one image, before it is applied
    pub fn mask_for(&self, image: &Image) -> GwResult<Image> {
        let qa = image.select(&[self.config.qa_band.as_str()])?;
        let index_positive = image.select(&[self.index.as_str()])?.gt(0.0);

        let cloudy = get_qa_bits(&qa, self.config.cloud_bits, "cloud_state")?
            .map_values(|state| if is_cloudy(state as u64) { 1.0 } else { 0.0 });
        let land = get_qa_bits(&qa, self.config.land_water_bits, "land_water_flag")?
            .eq(self.config.land_value as f64);
        let in_area = self
            .area_mask
            .select(&[self.config.area_flag_band.as_str()])?
            .eq(1.0);

        land.and(&cloudy.not())?
            .and(&in_area)?
            .and(&index_positive)?
            .rename(&["mask"])
    }

    /// Count surviving pixels of the index band after masking
    pub fn coverage(&self, image: &Image) -> GwResult<MaskCoverage> {
        let cleaned = self.apply(image)?;
        let band = cleaned.band(&self.index)?;
        let total_pixels = band.mask.len();
        let valid_pixels = band.valid_count();
        let valid_percentage = if total_pixels == 0 {
            0.0
        } else {
            100.0 * valid_pixels as f64 / total_pixels as f64
        };
        log::info!(
            "Quality mask kept {}/{} pixels ({:.1}%)",
            valid_pixels,
            total_pixels,
            valid_percentage
        );
        Ok(MaskCoverage {
            total_pixels,
            valid_pixels,
            valid_percentage,
        })
    }
}

impl ImageTransform for QualityMask {
    fn apply(&self, image: &Image) -> GwResult<Image> {
        let mask = self.mask_for(image)?;
        image.update_mask(&mask)
    }
}
