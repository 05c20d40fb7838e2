use crate::core::image::{Band, Image, ImageCollection};
use crate::types::{GwError, GwResult};
use ndarray::Array2;

/// Root mean square error band
pub const RMSE_BAND: &str = "rmse";
/// Number of unmasked observations used per pixel
pub const COUNT_BAND: &str = "count";

/// Per-pixel least squares fit of a dependent band on independent bands
#[derive(Debug, Clone)]
pub struct HarmonicRegression {
    independents: Vec<String>,
    dependent: String,
}

/// Result of a per-pixel regression
#[derive(Debug, Clone)]
pub struct HarmonicFit {
    /// One band per independent, in model order
    pub coefficients: Image,
    /// Root mean square error of the fit
    pub rmse: Image,
    /// Observation count per pixel
    pub observations: Image,
}

#[derive(Debug, Clone)]
struct PixelFit {
    coefficients: Vec<f64>,
    rmse: f64,
}

type Layer<'a> = (Vec<&'a Band>, &'a Band);

impl HarmonicRegression {
    pub fn new(independents: Vec<String>, dependent: impl Into<String>) -> GwResult<Self> {
        if independents.is_empty() {
            return Err(GwError::Config("regression needs at least one independent".to_string()));
        }
        Ok(Self {
            independents,
            dependent: dependent.into(),
        })
    }

    pub fn independents(&self) -> &[String] {
        &self.independents
    }

    fn layer<'a>(&self, image: &'a Image) -> GwResult<Layer<'a>> {
        let xs = self
            .independents
            .iter()
            .map(|name| image.band(name))
            .collect::<GwResult<Vec<_>>>()?;
        Ok((xs, image.band(&self.dependent)?))
    }

    /// Fit every pixel over the collection.
    ///
    /// Observations with any masked input are skipped. Pixels with fewer
    /// observations than independents, or a singular system, are masked.
    pub fn fit(&self, collection: &ImageCollection) -> GwResult<HarmonicFit> {
        log::info!(
            "Fitting {} ~ {} over {} images",
            self.dependent,
            self.independents.join(" + "),
            collection.len()
        );

        if collection.is_empty() {
            return Err(GwError::Processing("Cannot fit an empty collection".to_string()));
        }

        let layers = collection
            .iter()
            .map(|image| self.layer(image))
            .collect::<GwResult<Vec<_>>>()?;

        let (rows, cols) = output_dim(&layers)?;
        let p = self.independents.len();
        log::debug!("Regression grid {} x {} with {} coefficients", rows, cols, p);

        let fit_row = |row: usize| -> Vec<(usize, Option<PixelFit>)> {
            (0..cols).map(|col| fit_pixel(&layers, row, col, p)).collect()
        };

        #[cfg(feature = "parallel")]
        let fitted: Vec<Vec<(usize, Option<PixelFit>)>> = {
            use rayon::prelude::*;
            (0..rows).into_par_iter().map(fit_row).collect()
        };

        #[cfg(not(feature = "parallel"))]
        let fitted: Vec<Vec<(usize, Option<PixelFit>)>> = (0..rows).map(fit_row).collect();

        let mut coefficients = vec![Array2::<f64>::zeros((rows, cols)); p];
        let mut rmse = Array2::<f64>::zeros((rows, cols));
        let mut counts = Array2::<f64>::zeros((rows, cols));
        let mut valid = Array2::from_elem((rows, cols), false);

        for (row, row_fits) in fitted.into_iter().enumerate() {
            for (col, (count, pixel)) in row_fits.into_iter().enumerate() {
                counts[[row, col]] = count as f64;
                if let Some(pixel) = pixel {
                    for (band, value) in coefficients.iter_mut().zip(&pixel.coefficients) {
                        band[[row, col]] = *value;
                    }
                    rmse[[row, col]] = pixel.rmse;
                    valid[[row, col]] = true;
                }
            }
        }

        let fitted_pixels = valid.iter().filter(|&&v| v).count();
        log::info!("Fitted {}/{} pixels", fitted_pixels, rows * cols);

        let coefficient_bands = self
            .independents
            .iter()
            .zip(coefficients)
            .map(|(name, data)| Band::with_mask(name.as_str(), data, valid.clone()))
            .collect::<GwResult<Vec<_>>>()?;

        Ok(HarmonicFit {
            coefficients: Image::new(coefficient_bands)?,
            rmse: Image::new(vec![Band::with_mask(RMSE_BAND, rmse, valid)?])?,
            observations: Image::from_raster(COUNT_BAND, counts),
        })
    }
}

/// Shared shape of all non-constant bands, or (1, 1) if every band is constant
fn output_dim(layers: &[Layer]) -> GwResult<(usize, usize)> {
    let mut dim: Option<(usize, usize)> = None;
    for (xs, y) in layers {
        for band in xs.iter().chain(std::iter::once(y)) {
            if band.is_constant() {
                continue;
            }
            match dim {
                None => dim = Some(band.dim()),
                Some(d) if d != band.dim() => {
                    return Err(GwError::ShapeMismatch {
                        left: d,
                        right: band.dim(),
                    })
                }
                _ => {}
            }
        }
    }
    Ok(dim.unwrap_or((1, 1)))
}

fn fit_pixel(layers: &[Layer], row: usize, col: usize, p: usize) -> (usize, Option<PixelFit>) {
    let mut xtx = vec![0.0; p * p];
    let mut xty = vec![0.0; p];
    let mut samples: Vec<(Vec<f64>, f64)> = Vec::with_capacity(layers.len());

    for (xs, y) in layers {
        let Some(observed) = y.value_at(row, col) else {
            continue;
        };
        let Some(x) = xs
            .iter()
            .map(|band| band.value_at(row, col))
            .collect::<Option<Vec<f64>>>()
        else {
            continue;
        };

        for i in 0..p {
            xty[i] += x[i] * observed;
            for j in 0..p {
                xtx[i * p + j] += x[i] * x[j];
            }
        }
        samples.push((x, observed));
    }

    let count = samples.len();
    if count < p {
        return (count, None);
    }

    let Some(coefficients) = solve_linear_system(xtx, xty) else {
        return (count, None);
    };

    let sse: f64 = samples
        .iter()
        .map(|(x, observed)| {
            let predicted: f64 = x.iter().zip(&coefficients).map(|(a, b)| a * b).sum();
            (observed - predicted).powi(2)
        })
        .sum();

    (
        count,
        Some(PixelFit {
            coefficients,
            rmse: (sse / count as f64).sqrt(),
        }),
    )
}

/// Solve `a * x = b` for a square row-major `a` by Gaussian elimination with
/// partial pivoting. Returns `None` for a singular system.
pub fn solve_linear_system(mut a: Vec<f64>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    if n == 0 || a.len() != n * n {
        return None;
    }

    let scale = a.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    if scale == 0.0 || !scale.is_finite() {
        return None;
    }
    let tolerance = scale * 1e-12;

    for k in 0..n {
        let pivot = (k..n).max_by(|&i, &j| a[i * n + k].abs().total_cmp(&a[j * n + k].abs()))?;
        if a[pivot * n + k].abs() <= tolerance {
            return None;
        }
        if pivot != k {
            for j in 0..n {
                a.swap(k * n + j, pivot * n + j);
            }
            b.swap(k, pivot);
        }

        for i in (k + 1)..n {
            let factor = a[i * n + k] / a[k * n + k];
            if factor == 0.0 {
                continue;
            }
            for j in k..n {
                a[i * n + j] -= factor * a[k * n + j];
            }
            b[i] -= factor * b[k];
        }
    }

    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let tail: f64 = ((i + 1)..n).map(|j| a[i * n + j] * x[j]).sum();
        x[i] = (b[i] - tail) / a[i * n + i];
    }
    Some(x)
}
