use crate::types::{GwError, GwResult, PixelMask, Raster};
use chrono::{DateTime, Utc};
use ndarray::{Array2, Zip};
use num_traits::ToPrimitive;

/// Value and validity of one pixel
#[derive(Debug, Clone, Copy)]
struct Cell {
    value: f64,
    valid: bool,
}

fn truthy(value: f64) -> bool {
    value != 0.0 && !value.is_nan()
}

fn flag(condition: bool) -> f64 {
    if condition {
        1.0
    } else {
        0.0
    }
}

/// A named raster layer with its own validity mask.
///
/// A band of shape (1, 1) is a constant and broadcasts against any shape.
#[derive(Debug, Clone, PartialEq)]
pub struct Band {
    pub name: String,
    pub data: Raster,
    pub mask: PixelMask,
}

impl Band {
    /// Create a fully valid band
    pub fn new(name: impl Into<String>, data: Raster) -> Self {
        let mask = Array2::from_elem(data.dim(), true);
        Self {
            name: name.into(),
            data,
            mask,
        }
    }

    /// Create a band with an explicit mask of the same shape
    pub fn with_mask(name: impl Into<String>, data: Raster, mask: PixelMask) -> GwResult<Self> {
        if data.dim() != mask.dim() {
            return Err(GwError::ShapeMismatch {
                left: data.dim(),
                right: mask.dim(),
            });
        }
        Ok(Self {
            name: name.into(),
            data,
            mask,
        })
    }

    /// Create a constant band
    pub fn constant(name: impl Into<String>, value: f64) -> Self {
        Self::new(name, Array2::from_elem((1, 1), value))
    }

    pub fn is_constant(&self) -> bool {
        self.data.dim() == (1, 1)
    }

    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Pixel value at (row, col), `None` when masked. Constants answer for any position.
    pub fn value_at(&self, row: usize, col: usize) -> Option<f64> {
        let idx = if self.is_constant() { [0, 0] } else { [row, col] };
        match (self.data.get(idx), self.mask.get(idx)) {
            (Some(&value), Some(&true)) => Some(value),
            _ => None,
        }
    }

    pub fn valid_count(&self) -> usize {
        self.mask.iter().filter(|&&valid| valid).count()
    }

    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data: self.data.clone(),
            mask: self.mask.clone(),
        }
    }

    /// Apply `f` to every pixel value, keeping the mask
    pub fn map_values<F>(&self, f: F) -> Self
    where
        F: Fn(f64) -> f64,
    {
        Self {
            name: self.name.clone(),
            data: self.data.mapv(f),
            mask: self.mask.clone(),
        }
    }

    /// Apply `f` to every pixel value; pixels where `f` yields `None` become masked
    pub fn map_checked<F>(&self, f: F) -> Self
    where
        F: Fn(f64) -> Option<f64>,
    {
        let results = self.data.mapv(f);
        let data = results.mapv(|r| r.unwrap_or(0.0));
        let mask = Zip::from(&self.mask)
            .and(&results)
            .map_collect(|&valid, result| valid && result.is_some());
        Self {
            name: self.name.clone(),
            data,
            mask,
        }
    }

    /// Pixel-wise combination with broadcasting of constant bands
    fn zip_cells<T, F>(&self, other: &Band, f: F) -> GwResult<Array2<T>>
    where
        F: Fn(Cell, Cell) -> T,
    {
        let cell = |band: &Band| Cell {
            value: band.data[[0, 0]],
            valid: band.mask[[0, 0]],
        };

        match (self.is_constant(), other.is_constant()) {
            (true, false) => {
                let a = cell(self);
                Ok(Zip::from(&other.data)
                    .and(&other.mask)
                    .map_collect(|&value, &valid| f(a, Cell { value, valid })))
            }
            (false, true) => {
                let b = cell(other);
                Ok(Zip::from(&self.data)
                    .and(&self.mask)
                    .map_collect(|&value, &valid| f(Cell { value, valid }, b)))
            }
            _ => {
                if self.dim() != other.dim() {
                    return Err(GwError::ShapeMismatch {
                        left: self.dim(),
                        right: other.dim(),
                    });
                }
                Ok(Zip::from(&self.data)
                    .and(&self.mask)
                    .and(&other.data)
                    .and(&other.mask)
                    .map_collect(|&a, &a_valid, &b, &b_valid| {
                        f(
                            Cell { value: a, valid: a_valid },
                            Cell { value: b, valid: b_valid },
                        )
                    }))
            }
        }
    }

    /// Combine two bands value-wise; the result is valid where both inputs are
    pub fn zip_with<F>(&self, other: &Band, name: &str, f: F) -> GwResult<Band>
    where
        F: Fn(f64, f64) -> f64,
    {
        self.zip_checked(other, name, |a, b| Some(f(a, b)))
    }

    /// Like [`Band::zip_with`], additionally masking pixels where `f` yields `None`
    pub fn zip_checked<F>(&self, other: &Band, name: &str, f: F) -> GwResult<Band>
    where
        F: Fn(f64, f64) -> Option<f64>,
    {
        let cells = self.zip_cells(other, |a, b| match f(a.value, b.value) {
            Some(value) => (value, a.valid && b.valid),
            None => (0.0, false),
        })?;
        Ok(Band {
            name: name.to_string(),
            data: cells.map(|c| c.0),
            mask: cells.map(|c| c.1),
        })
    }

    /// Keep values, additionally masking pixels where `other` is zero or masked
    fn restrict(&self, other: &Band) -> GwResult<Band> {
        let cells = self.zip_cells(other, |a, b| {
            (a.value, a.valid && b.valid && truthy(b.value))
        })?;
        Ok(Band {
            name: self.name.clone(),
            data: cells.map(|c| c.0),
            mask: cells.map(|c| c.1),
        })
    }
}

/// Ordered, uniquely named bands with an optional acquisition time
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Image {
    bands: Vec<Band>,
    acquired: Option<DateTime<Utc>>,
}

impl Image {
    /// Create an image, rejecting duplicate band names
    pub fn new(bands: Vec<Band>) -> GwResult<Self> {
        let mut image = Self::default();
        for band in bands {
            image.push_band(band)?;
        }
        Ok(image)
    }

    /// Single-band image from a raster
    pub fn from_raster(name: impl Into<String>, data: Raster) -> Self {
        Self {
            bands: vec![Band::new(name, data)],
            acquired: None,
        }
    }

    /// One constant band per value: `constant` for one value, `constant_<i>` otherwise
    pub fn constant(values: &[f64]) -> Self {
        let bands = if values.len() == 1 {
            vec![Band::constant("constant", values[0])]
        } else {
            values
                .iter()
                .enumerate()
                .map(|(i, &v)| Band::constant(format!("constant_{}", i), v))
                .collect()
        };
        Self {
            bands,
            acquired: None,
        }
    }

    pub fn with_date(mut self, acquired: DateTime<Utc>) -> Self {
        self.acquired = Some(acquired);
        self
    }

    pub fn acquired(&self) -> Option<DateTime<Utc>> {
        self.acquired
    }

    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    pub fn band_names(&self) -> Vec<&str> {
        self.bands.iter().map(|b| b.name.as_str()).collect()
    }

    pub fn band(&self, name: &str) -> GwResult<&Band> {
        self.bands
            .iter()
            .find(|b| b.name == name)
            .ok_or_else(|| GwError::MissingBand(name.to_string()))
    }

    fn push_band(&mut self, band: Band) -> GwResult<()> {
        if self.bands.iter().any(|b| b.name == band.name) {
            return Err(GwError::DuplicateBand(band.name));
        }
        self.bands.push(band);
        Ok(())
    }

    fn derive(&self, bands: Vec<Band>) -> Image {
        Image {
            bands,
            acquired: self.acquired,
        }
    }

    /// Select bands by name, in the requested order
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> GwResult<Image> {
        let bands = names
            .iter()
            .map(|n| self.band(n.as_ref()).cloned())
            .collect::<GwResult<Vec<_>>>()?;
        Ok(self.derive(bands))
    }

    /// Select a single band by position
    pub fn select_index(&self, index: usize) -> GwResult<Image> {
        let band = self.bands.get(index).ok_or(GwError::BandIndex {
            index,
            count: self.bands.len(),
        })?;
        Ok(self.derive(vec![band.clone()]))
    }

    /// Rename all bands positionally
    pub fn rename<S: AsRef<str>>(&self, names: &[S]) -> GwResult<Image> {
        if names.len() != self.bands.len() {
            return Err(GwError::BandCount {
                expected: self.bands.len(),
                actual: names.len(),
            });
        }
        let bands = self
            .bands
            .iter()
            .zip(names)
            .map(|(b, n)| b.renamed(n.as_ref()))
            .collect();
        Image::new(bands).map(|img| Image {
            acquired: self.acquired,
            ..img
        })
    }

    /// Append the bands of `other`; the acquisition time of `self` is kept
    pub fn add_bands(&self, other: &Image) -> GwResult<Image> {
        let mut image = self.clone();
        for band in &other.bands {
            image.push_band(band.clone())?;
        }
        Ok(image)
    }

    /// Band-wise binary operation.
    ///
    /// Equal band counts pair positionally and keep the left names; a
    /// single-band operand broadcasts and the many-band side names the output.
    fn combine<F>(&self, other: &Image, f: F) -> GwResult<Image>
    where
        F: Fn(f64, f64) -> Option<f64>,
    {
        let (left, right) = (self.bands.len(), other.bands.len());
        let bands = if left == right {
            self.bands
                .iter()
                .zip(&other.bands)
                .map(|(a, b)| a.zip_checked(b, &a.name, &f))
                .collect::<GwResult<Vec<_>>>()?
        } else if right == 1 {
            self.bands
                .iter()
                .map(|a| a.zip_checked(&other.bands[0], &a.name, &f))
                .collect::<GwResult<Vec<_>>>()?
        } else if left == 1 {
            other
                .bands
                .iter()
                .map(|b| self.bands[0].zip_checked(b, &b.name, &f))
                .collect::<GwResult<Vec<_>>>()?
        } else {
            return Err(GwError::BandCount {
                expected: left,
                actual: right,
            });
        };
        Ok(self.derive(bands))
    }

    fn map_bands<F>(&self, f: F) -> Image
    where
        F: Fn(&Band) -> Band,
    {
        self.derive(self.bands.iter().map(f).collect())
    }

    pub fn add(&self, other: &Image) -> GwResult<Image> {
        self.combine(other, |a, b| Some(a + b))
    }

    pub fn subtract(&self, other: &Image) -> GwResult<Image> {
        self.combine(other, |a, b| Some(a - b))
    }

    pub fn multiply(&self, other: &Image) -> GwResult<Image> {
        self.combine(other, |a, b| Some(a * b))
    }

    /// Pixels with a zero divisor become masked
    pub fn divide(&self, other: &Image) -> GwResult<Image> {
        self.combine(other, |a, b| if b == 0.0 { None } else { Some(a / b) })
    }

    /// Apply `f` to every pixel of every band
    pub fn map_values<F>(&self, f: F) -> Image
    where
        F: Fn(f64) -> f64,
    {
        self.map_bands(|b| b.map_values(&f))
    }

    pub fn cos(&self) -> Image {
        self.map_bands(|b| b.map_values(f64::cos))
    }

    pub fn sin(&self) -> Image {
        self.map_bands(|b| b.map_values(f64::sin))
    }

    /// 1 where value > threshold, else 0
    pub fn gt(&self, threshold: f64) -> Image {
        self.map_bands(|b| b.map_values(|v| flag(v > threshold)))
    }

    /// 1 where value == target, else 0
    pub fn eq(&self, target: f64) -> Image {
        self.map_bands(|b| b.map_values(|v| flag(v == target)))
    }

    pub fn and(&self, other: &Image) -> GwResult<Image> {
        self.combine(other, |a, b| Some(flag(truthy(a) && truthy(b))))
    }

    pub fn or(&self, other: &Image) -> GwResult<Image> {
        self.combine(other, |a, b| Some(flag(truthy(a) || truthy(b))))
    }

    pub fn not(&self) -> Image {
        self.map_bands(|b| b.map_values(|v| flag(!truthy(v))))
    }

    /// Bitwise AND on integer-truncated values; negative or non-finite pixels become masked
    pub fn bitwise_and(&self, pattern: u64) -> Image {
        self.map_bands(|b| b.map_checked(|v| v.to_u64().map(|bits| (bits & pattern) as f64)))
    }

    /// Logical right shift on integer-truncated values
    pub fn right_shift(&self, shift: u32) -> Image {
        self.map_bands(|b| {
            b.map_checked(|v| {
                v.to_u64()
                    .map(|bits| bits.checked_shr(shift).unwrap_or(0) as f64)
            })
        })
    }

    /// Sum all bands into one band named `name`
    pub fn reduce_sum(&self, name: &str) -> GwResult<Image> {
        let (first, rest) = self.bands.split_first().ok_or_else(|| {
            GwError::Processing("Cannot reduce an image with no bands".to_string())
        })?;
        let total = rest
            .iter()
            .try_fold(first.renamed(name), |acc, band| acc.zip_with(band, name, |a, b| a + b))?;
        Ok(self.derive(vec![total]))
    }

    /// Mask pixels where `mask` is zero or itself masked.
    ///
    /// A single-band mask applies to every band; otherwise band counts must match.
    pub fn update_mask(&self, mask: &Image) -> GwResult<Image> {
        let count = mask.bands.len();
        if count != 1 && count != self.bands.len() {
            return Err(GwError::BandCount {
                expected: self.bands.len(),
                actual: count,
            });
        }
        let bands = self
            .bands
            .iter()
            .enumerate()
            .map(|(i, band)| band.restrict(&mask.bands[if count == 1 { 0 } else { i }]))
            .collect::<GwResult<Vec<_>>>()?;
        Ok(self.derive(bands))
    }
}

/// A per-image transformation configured once and mapped over a collection
pub trait ImageTransform: Send + Sync {
    fn apply(&self, image: &Image) -> GwResult<Image>;
}

impl<F> ImageTransform for F
where
    F: Fn(&Image) -> GwResult<Image> + Send + Sync,
{
    fn apply(&self, image: &Image) -> GwResult<Image> {
        self(image)
    }
}

/// Ordered collection of images, typically a time series
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageCollection {
    images: Vec<Image>,
}

impl ImageCollection {
    pub fn new(images: Vec<Image>) -> Self {
        Self { images }
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn images(&self) -> &[Image] {
        &self.images
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Image> {
        self.images.iter()
    }

    /// Apply a transform to every image, preserving order
    pub fn map<T: ImageTransform + ?Sized>(&self, transform: &T) -> GwResult<ImageCollection> {
        log::debug!("Mapping transform over {} images", self.images.len());

        #[cfg(feature = "parallel")]
        let images = {
            use rayon::prelude::*;
            self.images
                .par_iter()
                .map(|image| transform.apply(image))
                .collect::<GwResult<Vec<_>>>()?
        };

        #[cfg(not(feature = "parallel"))]
        let images = self
            .images
            .iter()
            .map(|image| transform.apply(image))
            .collect::<GwResult<Vec<_>>>()?;

        Ok(ImageCollection { images })
    }

    /// Images acquired within `[start, end)`; undated images are dropped
    pub fn filter_date(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> ImageCollection {
        let images: Vec<Image> = self
            .images
            .iter()
            .filter(|img| matches!(img.acquired, Some(t) if t >= start && t < end))
            .cloned()
            .collect();
        log::debug!(
            "Date filter {} .. {} kept {} of {} images",
            start,
            end,
            images.len(),
            self.images.len()
        );
        ImageCollection { images }
    }
}

impl FromIterator<Image> for ImageCollection {
    fn from_iter<I: IntoIterator<Item = Image>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a ImageCollection {
    type Item = &'a Image;
    type IntoIter = std::slice::Iter<'a, Image>;

    fn into_iter(self) -> Self::IntoIter {
        self.images.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ndarray::array;

    fn two_band_image() -> Image {
        Image::new(vec![
            Band::new("a", array![[1.0, 2.0], [3.0, 4.0]]),
            Band::new("b", array![[10.0, 20.0], [30.0, 40.0]]),
        ])
        .unwrap()
    }

    #[test]
    fn test_select_and_rename() {
        let image = two_band_image();
        let selected = image.select(&["b", "a"]).unwrap();
        assert_eq!(selected.band_names(), vec!["b", "a"]);

        let renamed = selected.rename(&["x", "y"]).unwrap();
        assert_eq!(renamed.band_names(), vec!["x", "y"]);
        assert!(matches!(image.select(&["missing"]), Err(GwError::MissingBand(_))));
        assert!(matches!(image.rename(&["only"]), Err(GwError::BandCount { .. })));
    }

    #[test]
    fn test_add_bands_rejects_duplicates() {
        let image = two_band_image();
        let extra = Image::from_raster("a", array![[0.0, 0.0], [0.0, 0.0]]);
        assert!(matches!(image.add_bands(&extra), Err(GwError::DuplicateBand(name)) if name == "a"));
    }

    #[test]
    fn test_constant_broadcasts() {
        let image = two_band_image();
        let scaled = image.multiply(&Image::constant(&[2.0])).unwrap();
        assert_eq!(scaled.band_names(), vec!["a", "b"]);
        assert_eq!(scaled.band("b").unwrap().data, array![[20.0, 40.0], [60.0, 80.0]]);

        let constants = Image::constant(&[1.0, 2.0]);
        assert_eq!(constants.band_names(), vec!["constant_0", "constant_1"]);
    }

    #[test]
    fn test_shape_mismatch() {
        let a = Image::from_raster("a", Array2::zeros((2, 2)));
        let b = Image::from_raster("b", Array2::zeros((3, 2)));
        assert!(matches!(a.add(&b), Err(GwError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_update_mask_combines_masks() {
        let image = two_band_image();
        let mask = Image::from_raster("m", array![[1.0, 0.0], [1.0, 1.0]]);
        let masked = image.update_mask(&mask).unwrap();
        for band in masked.bands() {
            assert_eq!(band.mask, array![[true, false], [true, true]]);
        }

        let second = Image::from_raster("m", array![[0.0, 1.0], [1.0, 1.0]]);
        let twice = masked.update_mask(&second).unwrap();
        assert_eq!(twice.band("a").unwrap().valid_count(), 2);
    }

    #[test]
    fn test_masked_pixels_propagate_through_arithmetic() {
        let band = Band::with_mask(
            "a",
            array![[1.0, 2.0]],
            array![[true, false]],
        )
        .unwrap();
        let image = Image::new(vec![band]).unwrap();
        let other = Image::from_raster("b", array![[5.0, 5.0]]);
        let sum = image.add(&other).unwrap();
        let out = sum.band("a").unwrap();
        assert_eq!(out.value_at(0, 0), Some(6.0));
        assert_eq!(out.value_at(0, 1), None);
    }

    #[test]
    fn test_divide_masks_zero_divisor() {
        let a = Image::from_raster("a", array![[6.0, 1.0, 0.0]]);
        let b = Image::from_raster("b", array![[3.0, 0.0, 0.0]]);
        let ratio = a.divide(&b).unwrap();
        let band = ratio.band("a").unwrap();
        assert_eq!(band.value_at(0, 0), Some(2.0));
        assert_eq!(band.value_at(0, 1), None);
        assert_eq!(band.value_at(0, 2), None);
    }

    #[test]
    fn test_bitwise_ops() {
        let qa = Image::from_raster("qa", array![[10.0, 6.0, -1.0]]);
        let bits = qa.bitwise_and(0b0110).right_shift(1);
        let band = bits.band("qa").unwrap();
        assert_eq!(band.value_at(0, 0), Some(1.0));
        assert_eq!(band.value_at(0, 1), Some(3.0));
        assert_eq!(band.value_at(0, 2), None);
    }

    #[test]
    fn test_reduce_sum() {
        let image = two_band_image();
        let total = image.reduce_sum("sum").unwrap();
        assert_eq!(total.band_names(), vec!["sum"]);
        assert_eq!(total.band("sum").unwrap().data, array![[11.0, 22.0], [33.0, 44.0]]);
        assert!(Image::default().reduce_sum("sum").is_err());
    }

    #[test]
    fn test_logical_ops() {
        let a = Image::from_raster("a", array![[0.0, 1.0, 2.0]]);
        let b = Image::from_raster("b", array![[1.0, 1.0, 0.0]]);
        assert_eq!(a.and(&b).unwrap().band("a").unwrap().data, array![[0.0, 1.0, 0.0]]);
        assert_eq!(a.or(&b).unwrap().band("a").unwrap().data, array![[1.0, 1.0, 1.0]]);
        assert_eq!(a.not().band("a").unwrap().data, array![[1.0, 0.0, 0.0]]);
        assert_eq!(a.gt(0.5).band("a").unwrap().data, array![[0.0, 1.0, 1.0]]);
        assert_eq!(a.eq(2.0).band("a").unwrap().data, array![[0.0, 0.0, 1.0]]);
    }

    #[test]
    fn test_collection_map_and_filter() {
        let day = |d: u32| Utc.with_ymd_and_hms(2020, 1, d, 0, 0, 0).unwrap();
        let collection: ImageCollection = (1..=4)
            .map(|d| Image::constant(&[d as f64]).with_date(day(d)))
            .collect();

        let doubled = collection
            .map(&|img: &Image| img.multiply(&Image::constant(&[2.0])))
            .unwrap();
        let values: Vec<f64> = doubled
            .iter()
            .map(|img| img.band("constant").unwrap().data[[0, 0]])
            .collect();
        assert_eq!(values, vec![2.0, 4.0, 6.0, 8.0]);

        let window = collection.filter_date(day(2), day(4));
        assert_eq!(window.len(), 2);
    }
}
