//! Average pooling kernels.
//!
//! A kxk pool is the sum of k^2 shifted copies scaled by 1/k^2, followed by
//! the strided compaction. The global variant collapses each channel to a
//! single slot with the backend's first-k summation and merges the scalars.

use crate::backend::CkksBackend;
use crate::context::EvalContext;
use crate::error::Result;
use crate::masks::MaskKind;
use crate::striding::{basic_compaction, downsample, downsample_multi, StridingKind};

/// kxk average pooling with stride s over `channels` tiled WxW maps.
///
/// `striding` picks the compaction strategy: `MultiChannel` handles all
/// channels in one doubling pass (power-of-two widths), `SingleChannel`
/// doubles channel by channel, `Basic` merges row by row and works for any
/// width. Maps of width <= 2 skip the striding machinery entirely and merge
/// the single pooled slot of each channel.
pub fn avgpool<B: CkksBackend>(
    ctx: &EvalContext<B>,
    ct: &B::Ciphertext,
    width: usize,
    channels: usize,
    kernel: usize,
    stride: usize,
    striding: StridingKind,
) -> Result<B::Ciphertext> {
    let be = ctx.backend();
    let tile = width * width;
    let out_width = width / stride;
    let out_tile = out_width * out_width;

    // window sum: k^2 shifted copies off one hoisted precompute per row
    let mut copies = Vec::with_capacity(kernel * kernel);
    let mut row_base = ct.clone();
    for u in 0..kernel {
        if u > 0 {
            row_base = be.rotate(&row_base, width as i32)?;
        }
        let digits = be.hoist(&row_base)?;
        copies.push(row_base.clone());
        for v in 1..kernel {
            copies.push(be.rotate_hoisted(&row_base, &digits, v as i32)?);
        }
    }
    let window_sum = be.add_many(&copies)?;

    let scale = ctx.mask(
        MaskKind::Scale { denom: (kernel * kernel) as u64, len: channels * tile },
        be.level(&window_sum),
    )?;
    let mut scaled = be.mul_plain(&window_sum, &scale)?;

    if width <= 2 {
        // each channel's pooled value already sits at its tile base
        let mut picks = Vec::with_capacity(channels);
        for ch in 0..channels {
            if ch > 0 {
                scaled = be.rotate(&scaled, tile as i32)?;
            }
            picks.push(scaled.clone());
        }
        return be.merge(&picks);
    }

    match striding {
        StridingKind::MultiChannel => downsample_multi(ctx, &scaled, width, stride, channels),
        StridingKind::SingleChannel | StridingKind::Basic => {
            let mut acc: Option<B::Ciphertext> = None;
            for ch in 0..channels {
                if ch > 0 {
                    scaled = be.rotate(&scaled, tile as i32)?;
                }
                let compacted = match striding {
                    StridingKind::Basic => basic_compaction(ctx, &scaled, width, stride)?,
                    _ => downsample(ctx, &scaled, width, stride)?,
                };
                let placed = if ch == 0 {
                    compacted
                } else {
                    be.rotate(&compacted, -((ch * out_tile) as i32))?
                };
                acc = Some(match acc {
                    Some(acc) => be.add(&acc, &placed)?,
                    None => placed,
                });
            }
            Ok(acc.expect("at least one channel"))
        }
    }
}

/// Global average pooling: channel c's WxW tile collapses to slot c.
/// Scalars are merged in groups of `rot_positions` and the group blocks
/// rotated into place, then everything is scaled by 1/W^2.
pub fn global_avgpool<B: CkksBackend>(
    ctx: &EvalContext<B>,
    ct: &B::Ciphertext,
    width: usize,
    channels: usize,
    rot_positions: usize,
) -> Result<B::Ciphertext> {
    let be = ctx.backend();
    let tile = width * width;

    let mut work = ct.clone();
    let mut group = Vec::with_capacity(rot_positions);
    let mut merged_groups = Vec::new();
    let mut group_index = 0usize;
    for ch in 0..channels {
        if ch > 0 {
            work = be.rotate(&work, tile as i32)?;
        }
        group.push(be.sum_first(&work, tile)?);
        if group.len() == rot_positions || ch + 1 == channels {
            let merged = be.merge(&group)?;
            merged_groups.push(if group_index == 0 {
                merged
            } else {
                be.rotate(&merged, -((group_index * rot_positions) as i32))?
            });
            group_index += 1;
            group.clear();
        }
    }

    let collected = be.add_many(&merged_groups)?;
    let scale = ctx.mask(
        MaskKind::Scale { denom: tile as u64, len: channels },
        be.level(&collected),
    )?;
    be.mul_plain(&collected, &scale)
}
