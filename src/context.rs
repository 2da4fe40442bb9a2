//! Evaluation context: the facade the layer kernels run against.
//!
//! `EvalContext` owns the backend handle and the mask cache, and provides the
//! weight-encoding helpers every layer needs. Kernels thread it explicitly;
//! there is no ambient global. The backend's key table is the only piece of
//! mutable shared state, and only the driver touches it between layers.

use crate::backend::CkksBackend;
use crate::error::{EvalError, Result};
use crate::masks::{MaskFactory, MaskKind};

pub struct EvalContext<B: CkksBackend> {
    backend: B,
    masks: MaskFactory<B>,
}

impl<B: CkksBackend> EvalContext<B> {
    pub fn new(backend: B) -> Self {
        Self { backend, masks: MaskFactory::new() }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn num_slots(&self) -> usize {
        self.backend.geometry().num_slots
    }

    /// Encoded mask at `level`, cached.
    pub fn mask(&self, kind: MaskKind, level: usize) -> Result<B::Plaintext> {
        self.masks.get(&self.backend, kind, level)
    }

    // --- weight encoding -------------------------------------------------

    /// Encode one output channel of a kxk convolution kernel as k^2
    /// plaintexts. Plaintext t holds kernel value (t / k, t % k) of input
    /// channel c repeated across channel c's tile, for all input channels
    /// back to back, so one slotwise multiply applies the weight to every
    /// pixel of every input channel at once.
    pub fn encode_conv_kernel(
        &self,
        kernel: &[Vec<Vec<f64>>],
        tile: usize,
        level: usize,
    ) -> Result<Vec<B::Plaintext>> {
        let k = kernel
            .first()
            .map(|ch| ch.len())
            .ok_or_else(|| EvalError::InvalidParams("empty kernel".into()))?;
        let mut encoded = Vec::with_capacity(k * k);
        for u in 0..k {
            for v in 0..k {
                let mut plain = Vec::with_capacity(kernel.len() * tile);
                for channel in kernel {
                    plain.extend(std::iter::repeat(channel[u][v]).take(tile));
                }
                encoded.push(self.backend.encode(&plain, level)?);
            }
        }
        Ok(encoded)
    }

    /// Encode a 3x3 kernel for the padding-1 optimised convolution. Each of
    /// the nine plaintexts is additionally zeroed at the tile positions whose
    /// source pixel falls outside the map, so the rotated copies cannot leak
    /// wrapped-around rows or columns into the result.
    pub fn encode_conv3x3_kernel(
        &self,
        kernel: &[Vec<Vec<f64>>],
        width: usize,
        level: usize,
    ) -> Result<Vec<B::Plaintext>> {
        let tile = width * width;
        let mut encoded = Vec::with_capacity(9);
        for u in 0..3 {
            for v in 0..3 {
                let dy = u as isize - 1;
                let dx = v as isize - 1;
                let mut plain = Vec::with_capacity(kernel.len() * tile);
                for channel in kernel {
                    let w = channel[u][v];
                    for r in 0..width as isize {
                        for c in 0..width as isize {
                            let inside = r + dy >= 0
                                && r + dy < width as isize
                                && c + dx >= 0
                                && c + dx < width as isize;
                            plain.push(if inside { w } else { 0.0 });
                        }
                    }
                }
                encoded.push(self.backend.encode(&plain, level)?);
            }
        }
        Ok(encoded)
    }

    /// Encode the 1x1 shortcut kernel of one output channel: the per-input-
    /// channel scalar repeated across that channel's tile.
    pub fn encode_shortcut_kernel(
        &self,
        weights: &[f64],
        tile: usize,
        level: usize,
    ) -> Result<B::Plaintext> {
        let mut plain = Vec::with_capacity(weights.len() * tile);
        for &w in weights {
            plain.extend(std::iter::repeat(w).take(tile));
        }
        self.backend.encode(&plain, level)
    }

    /// Encode a bias vector with each entry repeated across an output tile.
    pub fn encode_bias(&self, bias: &[f64], tile: usize, level: usize) -> Result<B::Plaintext> {
        let mut plain = Vec::with_capacity(bias.len() * tile);
        for &b in bias {
            plain.extend(std::iter::repeat(b).take(tile));
        }
        self.backend.encode(&plain, level)
    }

    /// Encode a flat vector (fully-connected weight rows, bias rows).
    pub fn encode_values(&self, values: &[f64], level: usize) -> Result<B::Plaintext> {
        self.backend.encode(values, level)
    }

    // --- driver-facing key and level management --------------------------

    pub fn load_rotation_group(&self, offsets: &[i32]) {
        self.backend.load_rotation_keys(offsets);
    }

    pub fn clear_rotation_group(&self) {
        self.backend.clear_rotation_keys();
    }

    pub fn load_sum_keys(&self) {
        self.backend.load_sum_keys();
    }

    pub fn bootstrap(&self, ct: &B::Ciphertext) -> Result<B::Ciphertext> {
        self.backend.bootstrap(ct)
    }

    // --- secret-key diagnostics ------------------------------------------
    //
    // Calibration tools for fixing plan constants offline. They decrypt, so
    // they only work where the secret key is attached; the network driver
    // never calls them.

    /// Decrypted first `n` slots.
    pub fn decrypt_prefix(&self, ct: &B::Ciphertext, n: usize) -> Result<Vec<f64>> {
        let mut values = self.backend.decrypt(ct)?;
        values.truncate(n);
        Ok(values)
    }

    /// Argmax over the decrypted first `n` slots.
    pub fn read_label(&self, ct: &B::Ciphertext, n: usize) -> Result<usize> {
        let logits = self.decrypt_prefix(ct, n)?;
        Ok(argmax(&logits))
    }

    /// Observed value range of the live region, for plan calibration.
    pub fn value_range(&self, ct: &B::Ciphertext, n: usize) -> Result<(f64, f64)> {
        let values = self.decrypt_prefix(ct, n)?;
        let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Ok((lo, hi))
    }

    /// Next power of two covering max |slot|: the pre-scale a ReLU at this
    /// point would need. Offline use only.
    pub fn probe_relu_scale(&self, ct: &B::Ciphertext, n: usize) -> Result<u64> {
        let values = self.decrypt_prefix(ct, n)?;
        let max_abs = values.iter().fold(0.0f64, |m, v| m.max(v.abs()));
        Ok((max_abs.ceil() as u64).max(1).next_power_of_two())
    }
}

pub fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0)
}
