//! Slot mask factory.
//!
//! Masks gate slot regions before operations that would otherwise see
//! neighbouring channels or garbage slots. Every mask is a pure function of
//! integer parameters plus the encoding level, and the same mask is requested
//! once per output channel in the convolution kernels, so encoded masks are
//! cached by `(kind, level)`.

use std::cell::RefCell;
use std::collections::HashMap;

use crate::backend::CkksBackend;
use crate::error::Result;

/// Mask shapes used by the striding and layer kernels.
///
/// `tile` is the per-channel slot extent (W^2 for a WxW feature map) and
/// `channels` the number of tiled repetitions; `channels = 1` yields the
/// single-channel variants.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MaskKind {
    /// Ones at (i, j) with i % stride == 0 and j % stride == 0.
    First { width: usize, stride: usize, channels: usize },
    /// `pattern` ones, `pattern` zeros, repeating across each tile.
    Binary { pattern: usize, tile: usize, channels: usize },
    /// Ones across row `row` of a tile of row length `width`.
    Row { row: usize, width: usize, tile: usize, channels: usize },
    /// Ones across channel `channel`'s whole tile.
    Channel { channel: usize, tile: usize, channels: usize },
    /// All zeros; seeds accumulators.
    Zero { len: usize },
    /// 1/denom over the first `len` slots.
    Scale { denom: u64, len: usize },
    /// `ones` leading ones, then zeros up to `len`.
    Mixed { ones: usize, len: usize },
}

impl MaskKind {
    /// Materialise the mask values (unencoded, unpadded).
    pub fn values(&self) -> Vec<f64> {
        match *self {
            MaskKind::First { width, stride, channels } => {
                let mut tile = vec![0.0; width * width];
                for i in (0..width).step_by(stride) {
                    for j in (0..width).step_by(stride) {
                        tile[i * width + j] = 1.0;
                    }
                }
                repeat_tile(&tile, channels)
            }
            MaskKind::Binary { pattern, tile, channels } => {
                let mut base = Vec::with_capacity(tile);
                for i in 0..tile {
                    base.push(if (i / pattern) % 2 == 0 { 1.0 } else { 0.0 });
                }
                repeat_tile(&base, channels)
            }
            MaskKind::Row { row, width, tile, channels } => {
                let mut base = vec![0.0; tile];
                for j in 0..width {
                    base[row * width + j] = 1.0;
                }
                repeat_tile(&base, channels)
            }
            MaskKind::Channel { channel, tile, channels } => {
                let mut mask = vec![0.0; tile * channels];
                mask[channel * tile..(channel + 1) * tile].fill(1.0);
                mask
            }
            MaskKind::Zero { len } => vec![0.0; len],
            MaskKind::Scale { denom, len } => vec![1.0 / denom as f64; len],
            MaskKind::Mixed { ones, len } => {
                let mut mask = vec![1.0; ones];
                mask.resize(len, 0.0);
                mask
            }
        }
    }
}

/// Cache of encoded masks, keyed by kind and level.
#[derive(Clone)]
pub struct MaskFactory<B: CkksBackend> {
    cache: RefCell<HashMap<(MaskKind, usize), B::Plaintext>>,
}

impl<B: CkksBackend> Default for MaskFactory<B> {
    fn default() -> Self {
        Self { cache: RefCell::new(HashMap::new()) }
    }
}

impl<B: CkksBackend> MaskFactory<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encoded mask at `level`, from cache or freshly built.
    pub fn get(&self, backend: &B, kind: MaskKind, level: usize) -> Result<B::Plaintext> {
        let key = (kind, level);
        if let Some(pt) = self.cache.borrow().get(&key) {
            return Ok(pt.clone());
        }
        let pt = backend.encode(&key.0.values(), level)?;
        self.cache.borrow_mut().insert(key, pt.clone());
        Ok(pt)
    }

    #[cfg(test)]
    pub fn cached_len(&self) -> usize {
        self.cache.borrow().len()
    }
}

fn repeat_tile(tile: &[f64], channels: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(tile.len() * channels);
    for _ in 0..channels {
        out.extend_from_slice(tile);
    }
    out
}
