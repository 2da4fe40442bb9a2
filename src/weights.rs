//! Weight-file loading.
//!
//! A weight file is one CSV row of flat floats. Convolution weights reshape
//! to [out][in][kH][kW], fully connected weights to [out][in]; bias files
//! are a single row. A malformed value or a length that does not match the
//! declared shape is a configuration error and fails before any encryption
//! work starts.

use std::path::Path;

use crate::error::{EvalError, Result};

/// Read the single row of flat floats a weight or bias file holds.
pub fn load_csv_row(path: &Path) -> Result<Vec<f64>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| EvalError::Io(format!("{}: {}", path.display(), e)))?;
    let mut record = csv::StringRecord::new();
    let got = reader
        .read_record(&mut record)
        .map_err(|e| EvalError::Io(format!("{}: {}", path.display(), e)))?;
    if !got {
        return Err(EvalError::Io(format!("{}: empty weight file", path.display())));
    }
    record
        .iter()
        .map(|cell| {
            cell.trim().parse::<f64>().map_err(|_| {
                EvalError::Io(format!("{}: invalid number '{}'", path.display(), cell))
            })
        })
        .collect()
}

pub fn load_bias(path: &Path) -> Result<Vec<f64>> {
    load_csv_row(path)
}

/// Reshape a flat row into [out][in][k][k] convolution weights.
pub fn load_conv_weights(
    path: &Path,
    out_channels: usize,
    in_channels: usize,
    kernel: usize,
) -> Result<Vec<Vec<Vec<Vec<f64>>>>> {
    let flat = load_csv_row(path)?;
    let expected = out_channels * in_channels * kernel * kernel;
    if flat.len() != expected {
        return Err(EvalError::Io(format!(
            "{}: {} values, expected {} ({}x{}x{}x{})",
            path.display(),
            flat.len(),
            expected,
            out_channels,
            in_channels,
            kernel,
            kernel
        )));
    }
    let mut it = flat.into_iter();
    Ok((0..out_channels)
        .map(|_| {
            (0..in_channels)
                .map(|_| {
                    (0..kernel)
                        .map(|_| (0..kernel).map(|_| it.next().unwrap()).collect())
                        .collect()
                })
                .collect()
        })
        .collect())
}

/// Reshape a flat row into [out][in] fully connected weights.
pub fn load_fc_weights(
    path: &Path,
    out_size: usize,
    in_size: usize,
) -> Result<Vec<Vec<f64>>> {
    let flat = load_csv_row(path)?;
    let expected = out_size * in_size;
    if flat.len() != expected {
        return Err(EvalError::Io(format!(
            "{}: {} values, expected {} ({}x{})",
            path.display(),
            flat.len(),
            expected,
            out_size,
            in_size
        )));
    }
    Ok(flat.chunks(in_size).map(|row| row.to_vec()).collect())
}
