//! Python bindings for the pure per-pixel helpers

use crate::core::harmonics;
use crate::core::image::{Band, Image};
use crate::core::qa_mask::{self, QaMaskConfig, QualityMask};
use crate::types::{BitRange, GwError};
use chrono::{DateTime, Utc};
use ndarray::Zip;
use numpy::{PyArray2, PyReadonlyArray2, ToPyArray};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;
use std::f64::consts::PI;

fn to_py_err(err: GwError) -> PyErr {
    PyValueError::new_err(err.to_string())
}

/// Band names formed by appending each suffix to the prefix
#[pyfunction]
#[pyo3(name = "construct_band_names")]
fn py_construct_band_names(prefix: &str, suffixes: Vec<u32>) -> Vec<String> {
    harmonics::construct_band_names(prefix, &suffixes)
}

/// Time since 1970-01-01 in radians (one year = 2*pi) for an RFC 3339 date
#[pyfunction]
fn time_radians(date: &str) -> PyResult<f64> {
    let parsed = DateTime::parse_from_rfc3339(date)
        .map_err(|e| PyValueError::new_err(format!("Invalid date '{}': {}", date, e)))?;
    Ok(harmonics::years_since_epoch(parsed.with_timezone(&Utc)) * 2.0 * PI)
}

/// Decode bits [start, end) of a packed QA array
#[pyfunction]
fn qa_bits<'py>(
    py: Python<'py>,
    qa: PyReadonlyArray2<f64>,
    start: u32,
    end: u32,
) -> PyResult<&'py PyArray2<f64>> {
    let range = BitRange::new(start, end).map_err(to_py_err)?;
    let image = Image::from_raster("qa", qa.as_array().to_owned());
    let bits = qa_mask::get_qa_bits(&image, range, "bits").map_err(to_py_err)?;
    let band = bits.band("bits").map_err(to_py_err)?;
    Ok(band.data.to_pyarray(py))
}

#[pyfunction]
#[pyo3(name = "is_cloudy")]
fn py_is_cloudy(cloud_state: u64) -> bool {
    qa_mask::is_cloudy(cloud_state)
}

/// Boolean keep-mask: land, not cloudy, inside the area flag, positive index
#[pyfunction]
fn quality_mask<'py>(
    py: Python<'py>,
    index: PyReadonlyArray2<f64>,
    qa: PyReadonlyArray2<f64>,
    area_flag: PyReadonlyArray2<f64>,
) -> PyResult<&'py PyArray2<bool>> {
    let config = QaMaskConfig::default();
    let image = Image::new(vec![
        Band::new("index", index.as_array().to_owned()),
        Band::new(config.qa_band.clone(), qa.as_array().to_owned()),
    ])
    .map_err(to_py_err)?;
    let area = Image::from_raster(config.area_flag_band.clone(), area_flag.as_array().to_owned());

    let mask = QualityMask::new("index", area)
        .mask_for(&image)
        .map_err(to_py_err)?;
    let band = mask.band("mask").map_err(to_py_err)?;
    let keep = Zip::from(&band.data)
        .and(&band.mask)
        .map_collect(|&value, &valid| valid && value != 0.0);
    Ok(keep.to_pyarray(py))
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_function(wrap_pyfunction!(py_construct_band_names, m)?)?;
    m.add_function(wrap_pyfunction!(time_radians, m)?)?;
    m.add_function(wrap_pyfunction!(qa_bits, m)?)?;
    m.add_function(wrap_pyfunction!(py_is_cloudy, m)?)?;
    m.add_function(wrap_pyfunction!(quality_mask, m)?)?;
    Ok(())
}
