//! Test-pixel datasets.
//!
//! One image per line of whitespace- or comma-separated floats in [0, 1]:
//! 784 for MNIST, 3072 (channel-planar RGB) for CIFAR-10. Normalisation
//! happens here, on the client, before encryption; the padded tail keeps the
//! image aligned to the slot tiling the evaluator expects.

use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{EvalError, Result};
use crate::params::{Network, CIFAR10_MEAN, CIFAR10_STD, MNIST_MEAN, MNIST_STD};

/// Load every image line of a test-pixel file, checking dimensions.
pub fn load_images(path: &Path, network: Network) -> Result<Vec<Vec<f64>>> {
    let file = std::fs::File::open(path)
        .map_err(|e| EvalError::Io(format!("{}: {}", path.display(), e)))?;
    let dim = network.input_dim();
    let mut images = Vec::new();
    for (lineno, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| EvalError::Io(format!("{}: {}", path.display(), e)))?;
        if line.trim().is_empty() {
            continue;
        }
        let pixels: Vec<f64> = line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<f64>().map_err(|_| {
                    EvalError::Io(format!(
                        "{} line {}: invalid pixel '{}'",
                        path.display(),
                        lineno + 1,
                        s
                    ))
                })
            })
            .collect::<Result<_>>()?;
        if pixels.len() != dim {
            return Err(EvalError::Io(format!(
                "{} line {}: {} pixels, expected {}",
                path.display(),
                lineno + 1,
                pixels.len(),
                dim
            )));
        }
        images.push(pixels);
    }
    Ok(images)
}

/// Normalise one raw image and pad it to the network's slot tiling.
pub fn normalize(network: Network, raw: &[f64]) -> Vec<f64> {
    let mut out = match network {
        Network::Mlp | Network::Lenet5 => {
            raw.iter().map(|&x| (x - MNIST_MEAN) / MNIST_STD).collect::<Vec<f64>>()
        }
        Network::Resnet20 => {
            // channel-planar: 1024 red, 1024 green, 1024 blue
            let plane = raw.len() / 3;
            raw.iter()
                .enumerate()
                .map(|(i, &x)| {
                    let ch = i / plane;
                    (x - CIFAR10_MEAN[ch]) / CIFAR10_STD[ch]
                })
                .collect()
        }
    };
    out.resize(network.padded_dim(), 0.0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn mnist_normalisation_and_padding() {
        let raw = vec![0.5; 784];
        let out = normalize(Network::Lenet5, &raw);
        assert_eq!(out.len(), 1024);
        assert!((out[0] - (0.5 - MNIST_MEAN) / MNIST_STD).abs() < 1e-12);
        assert_eq!(out[784], 0.0);
    }

    #[test]
    fn cifar_normalisation_is_per_channel()  {
        let mut raw = vec![0.0; 3072];
        raw[0] = 1.0; // red
        raw[1024] = 1.0; // green
        raw[2048] = 1.0; // blue
        let out = normalize(Network::Resnet20, &raw);
        assert_eq!(out.len(), 4096);
        assert!((out[0] - (1.0 - CIFAR10_MEAN[0]) / CIFAR10_STD[0]).abs() < 1e-12);
        assert!((out[1024] - (1.0 - CIFAR10_MEAN[1]) / CIFAR10_STD[1]).abs() < 1e-12);
        assert!((out[2048] - (1.0 - CIFAR10_MEAN[2]) / CIFAR10_STD[2]).abs() < 1e-12);
    }

    #[test]
    fn image_lines_parse_and_check_dimensions() {
        let path = std::env::temp_dir().join("slotnet_test_pixels.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        let line: Vec<String> = (0..784).map(|i| format!("{}", i as f64 / 784.0)).collect();
        writeln!(f, "{}", line.join(" ")).unwrap();
        writeln!(f, "{}", line.join(" ")).unwrap();
        drop(f);
        let images = load_images(&path, Network::Lenet5).unwrap();
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].len(), 784);
        std::fs::remove_file(path).ok();
    }
}
