//! Rotation-key planning.
//!
//! Each layer kernel needs a fixed set of slot rotations that is a pure
//! function of its shape parameters. The planners here enumerate exactly the
//! offsets the corresponding kernel invokes (no more, no fewer), so the
//! driver can generate automorphism keys ahead of time and stream one group
//! in per layer run. The planner/kernel agreement is enforced by tests that
//! run every kernel against a recording backend and assert set equality.

use itertools::Itertools;

use crate::striding::StridingKind;

/// One layer's rotation offsets: sorted, deduplicated, zero dropped.
pub fn normalize(offsets: impl IntoIterator<Item = i32>) -> Vec<i32> {
    offsets.into_iter().filter(|&k| k != 0).sorted().dedup().collect()
}

/// Union of several layers' offsets into one loadable key group.
pub fn group_union<'a>(plans: impl IntoIterator<Item = &'a Vec<i32>>) -> Vec<i32> {
    normalize(plans.into_iter().flatten().copied())
}

/// One stride-2 halving pass of the doubling downsampler on a WxW tile.
fn halve_offsets(width: usize, out: &mut Vec<i32>) {
    let out_width = width / 2;
    let doublings = out_width.trailing_zeros() as usize;
    for s in 1..doublings {
        out.push(1 << (s - 1));
    }
    out.push(1 << (doublings - 1));
    out.push((2 * width - out_width) as i32);
}

/// Single-channel doubling downsampler, stride as repeated halvings.
pub fn downsample_offsets(width: usize, stride: usize) -> Vec<i32> {
    let mut offsets = Vec::new();
    let mut w = width;
    let mut s = stride;
    while s > 1 {
        halve_offsets(w, &mut offsets);
        w /= 2;
        s /= 2;
    }
    normalize(offsets)
}

/// Multi-channel doubling downsampler: each halving adds the channel
/// compaction rotation.
pub fn downsample_multi_offsets(width: usize, stride: usize, channels: usize) -> Vec<i32> {
    let mut offsets = Vec::new();
    let mut w = width;
    let mut s = stride;
    while s > 1 {
        halve_offsets(w, &mut offsets);
        if channels > 1 {
            let tile = w * w;
            let out_tile = (w / 2) * (w / 2);
            offsets.push((tile - out_tile) as i32);
        }
        w /= 2;
        s /= 2;
    }
    normalize(offsets)
}

/// Merge-based compaction of one channel.
pub fn basic_compaction_offsets(width: usize, stride: usize) -> Vec<i32> {
    let out_width = width / stride;
    let mut offsets = Vec::new();
    if out_width > 1 {
        offsets.push((stride * width) as i32);
    }
    for col in 1..out_width {
        offsets.push((col * stride) as i32);
    }
    // slot merging consumes automorphism keys 1..=group size
    for k in 1..=out_width {
        offsets.push(k as i32);
    }
    for row in 1..out_width {
        offsets.push(-((row * out_width) as i32));
    }
    normalize(offsets)
}

/// Generic convolution: kernel k, padding p, stride s on a WxW map.
pub fn conv_generic_offsets(
    width: usize,
    in_channels: usize,
    out_channels: usize,
    kernel: usize,
    padding: usize,
    stride: usize,
) -> Vec<i32> {
    let padded = width + 2 * padding;
    let out_width = (padded - kernel) / stride + 1;
    let mut offsets = Vec::new();

    if padding > 0 {
        // inflation: per-channel row relocation into the padded layout
        if in_channels > 1 {
            offsets.push((width * width) as i32);
        }
        offsets.push(width as i32);
        for row in 1..width {
            offsets.push(-((row * padded) as i32));
        }
        for ch in 1..in_channels {
            offsets.push(-((ch * padded * padded) as i32));
        }
        offsets.push(-((padding * padded + padding) as i32));
    }

    // k^2 rotated copies: k-1 vertical row steps sharing one key, k-1
    // horizontal single-slot steps
    offsets.push(padded as i32);
    for j in 1..kernel {
        offsets.push(j as i32);
    }
    // input-channel summation
    if in_channels > 1 {
        offsets.push((padded * padded) as i32);
    }
    if stride > 1 {
        offsets.extend(downsample_offsets(padded, stride));
    } else {
        // output-row compaction
        for l in 1..out_width {
            offsets.push(-((l * out_width) as i32));
        }
    }
    // output-channel placement
    for c in 1..out_channels {
        offsets.push(-((c * out_width * out_width) as i32));
    }
    normalize(offsets)
}

/// The nine-rotation set shared by the 3x3 padding-1 kernels.
fn conv3x3_copies(width: usize, out: &mut Vec<i32>) {
    out.extend_from_slice(&[-1, 1, -(width as i32), width as i32]);
}

/// Optimised 3x3 convolution, stride 1, padding 1.
pub fn conv3x3_offsets(width: usize, in_channels: usize, out_channels: usize) -> Vec<i32> {
    let mut offsets = Vec::new();
    conv3x3_copies(width, &mut offsets);
    if in_channels > 1 {
        offsets.push((width * width) as i32);
    }
    for c in 1..out_channels {
        offsets.push(-((c * width * width) as i32));
    }
    normalize(offsets)
}

/// Shortcut-only 1x1 stride-2 convolution.
pub fn shortcut_offsets(width: usize, in_channels: usize, out_channels: usize) -> Vec<i32> {
    let out_width = width / 2;
    let mut offsets = Vec::new();
    if in_channels > 1 {
        offsets.push((width * width) as i32);
    }
    offsets.extend(downsample_offsets(width, 2));
    for c in 1..out_channels {
        offsets.push(-((c * out_width * out_width) as i32));
    }
    normalize(offsets)
}

/// Fused 3x3 + shortcut stage-transition convolution, stride 2.
pub fn fused_conv_shortcut_offsets(
    width: usize,
    in_channels: usize,
    out_channels: usize,
    striding: StridingKind,
) -> Vec<i32> {
    let out_width = width / 2;
    let mut offsets = Vec::new();
    conv3x3_copies(width, &mut offsets);
    if in_channels > 1 {
        offsets.push((width * width) as i32);
    }
    match striding {
        StridingKind::SingleChannel => {
            offsets.extend(downsample_offsets(width, 2));
            for c in 1..out_channels {
                offsets.push(-((c * out_width * out_width) as i32));
            }
        }
        StridingKind::MultiChannel => {
            for ic in 1..in_channels {
                offsets.push(-((ic * width * width) as i32));
            }
            offsets.extend(downsample_multi_offsets(width, 2, in_channels));
            let block = in_channels * out_width * out_width;
            for g in 1..out_channels / in_channels {
                offsets.push(-((g * block) as i32));
            }
        }
        StridingKind::Basic => unreachable!("fused transitions run on power-of-two maps"),
    }
    normalize(offsets)
}

/// Average pooling over kxk windows with stride s.
pub fn avgpool_offsets(
    width: usize,
    channels: usize,
    kernel: usize,
    stride: usize,
    striding: StridingKind,
) -> Vec<i32> {
    let out_width = width / stride;
    let mut offsets = Vec::new();

    // k^2 window copies; the (1, W+1) copy reuses keys 1 and W
    for j in 1..kernel {
        offsets.push(j as i32);
    }
    offsets.push(width as i32);

    if width <= 2 {
        // tiny maps: per-channel slot merge, no striding tricks
        if channels > 1 {
            offsets.push((width * width) as i32);
        }
        for k in 1..=channels {
            offsets.push(k as i32);
        }
        return normalize(offsets);
    }

    match striding {
        StridingKind::MultiChannel => {
            offsets.extend(downsample_multi_offsets(width, stride, channels));
        }
        StridingKind::Basic | StridingKind::SingleChannel => {
            // per-channel striding with channel re-placement
            if channels > 1 {
                offsets.push((width * width) as i32);
            }
            match striding {
                StridingKind::Basic => offsets.extend(basic_compaction_offsets(width, stride)),
                _ => offsets.extend(downsample_offsets(width, stride)),
            }
            for c in 1..channels {
                offsets.push(-((c * out_width * out_width) as i32));
            }
        }
    }
    normalize(offsets)
}

/// Global average pooling: one scalar per channel, merged in groups.
pub fn global_avgpool_offsets(width: usize, channels: usize, rot_positions: usize) -> Vec<i32> {
    let mut offsets = Vec::new();
    if channels > 1 {
        offsets.push((width * width) as i32);
    }
    for k in 1..=rot_positions.min(channels) {
        offsets.push(k as i32);
    }
    let groups = channels.div_ceil(rot_positions);
    for g in 1..groups {
        offsets.push(-((g * rot_positions) as i32));
    }
    normalize(offsets)
}

/// Fully connected layer with grouped slot merging.
pub fn linear_offsets(out_size: usize, rot_positions: usize) -> Vec<i32> {
    let mut offsets = Vec::new();
    for k in 1..=rot_positions.min(out_size) {
        offsets.push(k as i32);
    }
    let groups = out_size.div_ceil(rot_positions);
    for g in 1..groups {
        offsets.push(-((g * rot_positions) as i32));
    }
    normalize(offsets)
}

/// Optimised fully connected layer: all outputs in one merge.
pub fn linear_optimized_offsets(out_size: usize) -> Vec<i32> {
    normalize((1..=out_size).map(|k| k as i32))
}
