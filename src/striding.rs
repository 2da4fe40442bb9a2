//! Strided downsampling of slot-tiled feature maps.
//!
//! A strided layer leaves its wanted values scattered at stride-s positions
//! of each WxW tile; these routines compact them to the top-left of the tile
//! (and, in the multi-channel variant, compact the channel tiles themselves).
//!
//! Three strategies exist and each call site picks one statically:
//!
//! - `SingleChannel`: mask-and-double juxtaposition within one channel.
//!   Cheapest in rotations; requires a power-of-two width. Strides above 2
//!   run as repeated stride-2 halvings.
//! - `MultiChannel`: the same doubling with channel-tiled masks plus a final
//!   channel-compaction pass, handling every channel in one ciphertext.
//! - `Basic`: per-row slot merging. More rotations and one merge level, but
//!   correct for any width; the pooling layer routes non-power-of-two maps
//!   here.

use crate::backend::CkksBackend;
use crate::context::EvalContext;
use crate::error::Result;
use crate::masks::MaskKind;

/// Which downsampling strategy a kernel uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StridingKind {
    Basic,
    SingleChannel,
    MultiChannel,
}

/// Row-and-column juxtaposition of one channel (variant A).
///
/// The s-strided subsample of the WxW tile ends up in the first (W/s)^2
/// slots; the rest of the tile is zero. Consumes `depth::downsample(w, s)`
/// levels. Requires W and s powers of two, s | W, W/s >= 2.
pub fn downsample<B: CkksBackend>(
    ctx: &EvalContext<B>,
    ct: &B::Ciphertext,
    width: usize,
    stride: usize,
) -> Result<B::Ciphertext> {
    check_pow2(width, stride);
    let mut ct = ct.clone();
    let mut w = width;
    let mut s = stride;
    while s > 1 {
        ct = halve(ctx, &ct, w, 1)?;
        w /= 2;
        s /= 2;
    }
    Ok(ct)
}

/// Variant B: every channel downsampled at once, then the channel tiles
/// compacted so channel c occupies slots [c*(W/s)^2, (c+1)*(W/s)^2).
/// Consumes `depth::downsample_multi(w, s)` levels.
pub fn downsample_multi<B: CkksBackend>(
    ctx: &EvalContext<B>,
    ct: &B::Ciphertext,
    width: usize,
    stride: usize,
    channels: usize,
) -> Result<B::Ciphertext> {
    check_pow2(width, stride);
    let be = ctx.backend();
    let mut ct = ct.clone();
    let mut w = width;
    let mut s = stride;
    while s > 1 {
        let tile = w * w;
        let out_tile = (w / 2) * (w / 2);
        let mut rows = halve(ctx, &ct, w, channels)?;

        // Channel compaction: after the row phase channel c's block sits at
        // c*tile; pull each block flush with the previous one.
        let level = be.level(&rows);
        let mut compacted: Option<B::Ciphertext> = None;
        for ch in 0..channels {
            let mask =
                ctx.mask(MaskKind::Channel { channel: ch, tile: out_tile, channels }, level)?;
            let picked = be.mul_plain(&rows, &mask)?;
            compacted = Some(match compacted {
                Some(acc) => be.add(&acc, &picked)?,
                None => picked,
            });
            if ch + 1 < channels {
                rows = be.rotate(&rows, (tile - out_tile) as i32)?;
            }
        }
        ct = compacted.expect("at least one channel");
        w /= 2;
        s /= 2;
    }
    Ok(ct)
}

fn check_pow2(width: usize, stride: usize) {
    assert!(
        width.is_power_of_two()
            && stride.is_power_of_two()
            && stride >= 2
            && width / stride >= 2,
        "doubling downsampler needs power-of-two W and s with W/s >= 2 (W={}, s={})",
        width,
        stride
    );
}

/// One stride-2 pass: column doubling then row compaction, channel-tiled
/// when channels > 1. Consumes log2(W/2) + 1 levels.
fn halve<B: CkksBackend>(
    ctx: &EvalContext<B>,
    ct: &B::Ciphertext,
    width: usize,
    channels: usize,
) -> Result<B::Ciphertext> {
    let be = ctx.backend();
    let out_width = width / 2;
    let tile = width * width;
    let doublings = out_width.trailing_zeros() as usize;

    // Column juxtaposition: isolate the even grid, then double the packed
    // run length until each row's keepers are contiguous.
    let level = be.level(ct);
    let mut result =
        be.mul_plain(ct, &ctx.mask(MaskKind::First { width, stride: 2, channels }, level)?)?;
    for s in 1..doublings {
        let shifted = be.rotate(&result, 1 << (s - 1))?;
        let summed = be.add(&result, &shifted)?;
        let mask = ctx.mask(
            MaskKind::Binary { pattern: 1 << s, tile, channels },
            be.level(&summed),
        )?;
        result = be.mul_plain(&summed, &mask)?;
    }
    let shifted = be.rotate(&result, 1 << (doublings - 1))?;
    result = be.add(&result, &shifted)?;

    // Row compaction: pull each packed row flush with the previous one.
    let row_level = be.level(&result);
    let row_step = (2 * width - out_width) as i32;
    let mut acc: Option<B::Ciphertext> = None;
    for row in 0..out_width {
        let mask = ctx.mask(
            MaskKind::Row { row, width: out_width, tile, channels },
            row_level,
        )?;
        let masked = be.mul_plain(&result, &mask)?;
        acc = Some(match acc {
            Some(acc) => be.add(&acc, &masked)?,
            None => masked,
        });
        if row + 1 < out_width {
            result = be.rotate(&result, row_step)?;
        }
    }
    Ok(acc.expect("at least one output row"))
}

/// Merge-based compaction of one channel (the `Basic` strategy): correct for
/// any width, at the cost of W/s merges of W/s rotations each. Consumes the
/// single merge level.
pub fn basic_compaction<B: CkksBackend>(
    ctx: &EvalContext<B>,
    ct: &B::Ciphertext,
    width: usize,
    stride: usize,
) -> Result<B::Ciphertext> {
    let be = ctx.backend();
    let out_width = width / stride;
    let row_step = (stride * width) as i32;

    let mut work = ct.clone();
    let mut rows = Vec::with_capacity(out_width);
    for row in 0..out_width {
        if row != 0 {
            work = be.rotate(&work, row_step)?;
        }
        let digits = be.hoist(&work)?;
        let mut picks = Vec::with_capacity(out_width);
        for col in 0..out_width {
            picks.push(if col == 0 {
                work.clone()
            } else {
                be.rotate_hoisted(&work, &digits, (col * stride) as i32)?
            });
        }
        let merged = be.merge(&picks)?;
        rows.push(if row == 0 {
            merged
        } else {
            be.rotate(&merged, -((row * out_width) as i32))?
        });
    }
    be.add_many(&rows)
}
