//! Convolution kernels on slot-tiled feature maps.
//!
//! All variants share the same skeleton: build rotated copies of the input,
//! multiply by tiled weight plaintexts, fold the input channels together by
//! tile rotation, mask the live tile clean, downsample if strided, then
//! rotate each output channel into its tile and add the bias.
//!
//! The 3x3 kernels share one hoisted-rotation precompute across their nine
//! copies; the fused stage-transition kernel additionally reuses those copies
//! and the raw input for the shortcut branch, so the two branches cost one
//! rotation set instead of two.

use crate::backend::CkksBackend;
use crate::context::EvalContext;
use crate::error::Result;
use crate::masks::MaskKind;
use crate::striding::{downsample, downsample_multi, StridingKind};

/// Generic convolution: kernel k, padding p, stride s over a WxW map with
/// `in_channels` tiled channels. Output is `out_channels` tiled maps of
/// width (W + 2p - k)/s + 1, anchored at slot 0.
#[allow(clippy::too_many_arguments)]
pub fn convolution<B: CkksBackend>(
    ctx: &EvalContext<B>,
    ct: &B::Ciphertext,
    kernel: &[Vec<Vec<Vec<f64>>>],
    bias: &[f64],
    width: usize,
    in_channels: usize,
    out_channels: usize,
    kernel_width: usize,
    padding: usize,
    stride: usize,
) -> Result<B::Ciphertext> {
    let be = ctx.backend();

    let mut ct = ct.clone();
    let mut width = width;
    if padding > 0 {
        ct = inflate(ctx, &ct, width, in_channels, padding)?;
        width += 2 * padding;
    }
    let tile = width * width;
    let out_width = (width - kernel_width) / stride + 1;
    let out_tile = out_width * out_width;
    let level = be.level(&ct);

    // k^2 rotated copies; horizontal shifts of each row copy share a hoist
    let mut copies = Vec::with_capacity(kernel_width * kernel_width);
    let mut row_base = ct.clone();
    for u in 0..kernel_width {
        if u > 0 {
            row_base = be.rotate(&row_base, width as i32)?;
        }
        let digits = be.hoist(&row_base)?;
        copies.push(row_base.clone());
        for v in 1..kernel_width {
            copies.push(be.rotate_hoisted(&row_base, &digits, v as i32)?);
        }
    }

    let mut output: Option<B::Ciphertext> = None;
    for out_c in 0..out_channels {
        let weights = ctx.encode_conv_kernel(&kernel[out_c], tile, level)?;
        let products = copies
            .iter()
            .zip(&weights)
            .map(|(copy, w)| be.mul_plain(copy, w))
            .collect::<Result<Vec<_>>>()?;
        let mut sum = be.add_many(&products)?;
        sum = fold_channels(ctx, &sum, tile, in_channels)?;
        let clean = ctx.mask(
            MaskKind::Mixed { ones: tile, len: tile * in_channels },
            be.level(&sum),
        )?;
        let summed = be.mul_plain(&sum, &clean)?;

        let strided = if stride > 1 {
            downsample(ctx, &summed, width, stride)?
        } else {
            compact_rows(ctx, &summed, width, out_width)?
        };

        let placed = place_channel(ctx, &strided, out_c, out_tile)?;
        output = Some(match output {
            Some(acc) => be.add(&acc, &placed)?,
            None => placed,
        });
    }

    let output = output.expect("at least one output channel");
    let bias_pt = ctx.encode_bias(bias, out_tile, be.level(&output))?;
    be.add_plain(&output, &bias_pt)
}

/// Optimised 3x3 convolution, stride 1, padding 1: width is preserved, the
/// nine copies come from one hoisted precompute, and out-of-map taps are
/// zeroed in the encoded weights rather than by inflating the input.
pub fn convolution_3x3<B: CkksBackend>(
    ctx: &EvalContext<B>,
    ct: &B::Ciphertext,
    kernel: &[Vec<Vec<Vec<f64>>>],
    bias: &[f64],
    width: usize,
    in_channels: usize,
    out_channels: usize,
) -> Result<B::Ciphertext> {
    let be = ctx.backend();
    let tile = width * width;
    let level = be.level(ct);
    let copies = nine_copies(ctx, ct, width)?;

    let mut output: Option<B::Ciphertext> = None;
    for out_c in 0..out_channels {
        let weights = ctx.encode_conv3x3_kernel(&kernel[out_c], width, level)?;
        let products = copies
            .iter()
            .zip(&weights)
            .map(|(copy, w)| be.mul_plain(copy, w))
            .collect::<Result<Vec<_>>>()?;
        let mut sum = be.add_many(&products)?;
        sum = fold_channels(ctx, &sum, tile, in_channels)?;
        let clean = ctx.mask(
            MaskKind::Mixed { ones: tile, len: tile * in_channels },
            be.level(&sum),
        )?;
        let summed = be.mul_plain(&sum, &clean)?;
        let placed = place_channel(ctx, &summed, out_c, tile)?;
        output = Some(match output {
            Some(acc) => be.add(&acc, &placed)?,
            None => placed,
        });
    }

    let output = output.expect("at least one output channel");
    let bias_pt = ctx.encode_bias(bias, tile, be.level(&output))?;
    be.add_plain(&output, &bias_pt)
}

/// Shortcut-only projection: 1x1 kernel, stride 2, no padding.
pub fn shortcut_convolution<B: CkksBackend>(
    ctx: &EvalContext<B>,
    ct: &B::Ciphertext,
    weights: &[Vec<f64>],
    bias: &[f64],
    width: usize,
    in_channels: usize,
    out_channels: usize,
) -> Result<B::Ciphertext> {
    let be = ctx.backend();
    let tile = width * width;
    let out_tile = (width / 2) * (width / 2);
    let level = be.level(ct);

    let mut output: Option<B::Ciphertext> = None;
    for out_c in 0..out_channels {
        let w = ctx.encode_shortcut_kernel(&weights[out_c], tile, level)?;
        let mut sum = be.mul_plain(ct, &w)?;
        sum = fold_channels(ctx, &sum, tile, in_channels)?;
        let clean = ctx.mask(
            MaskKind::Mixed { ones: tile, len: tile * in_channels },
            be.level(&sum),
        )?;
        let summed = be.mul_plain(&sum, &clean)?;
        let strided = downsample(ctx, &summed, width, 2)?;
        let placed = place_channel(ctx, &strided, out_c, out_tile)?;
        output = Some(match output {
            Some(acc) => be.add(&acc, &placed)?,
            None => placed,
        });
    }

    let output = output.expect("at least one output channel");
    let bias_pt = ctx.encode_bias(bias, out_tile, be.level(&output))?;
    be.add_plain(&output, &bias_pt)
}

/// Fused stage-transition block: the stride-2 3x3 main branch and the 1x1
/// stride-2 shortcut projection evaluated together, sharing the nine-copy
/// rotation set and the cleaning masks. Returns (main, shortcut); the driver
/// adds them after the second convolution and activation of the block.
#[allow(clippy::too_many_arguments)]
pub fn fused_conv_shortcut<B: CkksBackend>(
    ctx: &EvalContext<B>,
    ct: &B::Ciphertext,
    kernel: &[Vec<Vec<Vec<f64>>>],
    shortcut_weights: &[Vec<f64>],
    bias: &[f64],
    shortcut_bias: &[f64],
    width: usize,
    in_channels: usize,
    out_channels: usize,
    striding: StridingKind,
) -> Result<(B::Ciphertext, B::Ciphertext)> {
    match striding {
        StridingKind::SingleChannel => fused_single_channel(
            ctx,
            ct,
            kernel,
            shortcut_weights,
            bias,
            shortcut_bias,
            width,
            in_channels,
            out_channels,
        ),
        StridingKind::MultiChannel => fused_multi_channel(
            ctx,
            ct,
            kernel,
            shortcut_weights,
            bias,
            shortcut_bias,
            width,
            in_channels,
            out_channels,
        ),
        StridingKind::Basic => unreachable!("stage transitions run on power-of-two maps"),
    }
}

#[allow(clippy::too_many_arguments)]
fn fused_single_channel<B: CkksBackend>(
    ctx: &EvalContext<B>,
    ct: &B::Ciphertext,
    kernel: &[Vec<Vec<Vec<f64>>>],
    shortcut_weights: &[Vec<f64>],
    bias: &[f64],
    shortcut_bias: &[f64],
    width: usize,
    in_channels: usize,
    out_channels: usize,
) -> Result<(B::Ciphertext, B::Ciphertext)> {
    let be = ctx.backend();
    let tile = width * width;
    let out_tile = (width / 2) * (width / 2);
    let level = be.level(ct);
    let copies = nine_copies(ctx, ct, width)?;
    let clean_kind = MaskKind::Mixed { ones: tile, len: tile * in_channels };

    let mut main_out: Option<B::Ciphertext> = None;
    let mut short_out: Option<B::Ciphertext> = None;
    for out_c in 0..out_channels {
        let weights = ctx.encode_conv3x3_kernel(&kernel[out_c], width, level)?;
        let products = copies
            .iter()
            .zip(&weights)
            .map(|(copy, w)| be.mul_plain(copy, w))
            .collect::<Result<Vec<_>>>()?;
        let main_sum = fold_channels(ctx, &be.add_many(&products)?, tile, in_channels)?;

        let sw = ctx.encode_shortcut_kernel(&shortcut_weights[out_c], tile, level)?;
        let short_sum = fold_channels(ctx, &be.mul_plain(ct, &sw)?, tile, in_channels)?;

        let clean = ctx.mask(clean_kind.clone(), be.level(&main_sum))?;
        let main = downsample(ctx, &be.mul_plain(&main_sum, &clean)?, width, 2)?;
        let short = downsample(ctx, &be.mul_plain(&short_sum, &clean)?, width, 2)?;

        let main = place_channel(ctx, &main, out_c, out_tile)?;
        let short = place_channel(ctx, &short, out_c, out_tile)?;
        main_out = Some(match main_out {
            Some(acc) => be.add(&acc, &main)?,
            None => main,
        });
        short_out = Some(match short_out {
            Some(acc) => be.add(&acc, &short)?,
            None => short,
        });
    }

    let main_out = main_out.expect("at least one output channel");
    let short_out = short_out.expect("at least one output channel");
    let main_bias = ctx.encode_bias(bias, out_tile, be.level(&main_out))?;
    let short_bias = ctx.encode_bias(shortcut_bias, out_tile, be.level(&short_out))?;
    Ok((be.add_plain(&main_out, &main_bias)?, be.add_plain(&short_out, &short_bias)?))
}

/// Multi-channel flavour: output channels are processed in groups of
/// `in_channels`; each group is assembled into one multi-channel map,
/// downsampled across all its channels at once, and placed as a block.
/// Requires out_channels to be a multiple of in_channels.
#[allow(clippy::too_many_arguments)]
fn fused_multi_channel<B: CkksBackend>(
    ctx: &EvalContext<B>,
    ct: &B::Ciphertext,
    kernel: &[Vec<Vec<Vec<f64>>>],
    shortcut_weights: &[Vec<f64>],
    bias: &[f64],
    shortcut_bias: &[f64],
    width: usize,
    in_channels: usize,
    out_channels: usize,
) -> Result<(B::Ciphertext, B::Ciphertext)> {
    assert!(
        out_channels % in_channels == 0,
        "multi-channel fused convolution needs out_channels divisible by in_channels"
    );
    let be = ctx.backend();
    let tile = width * width;
    let out_tile = (width / 2) * (width / 2);
    let level = be.level(ct);
    let copies = nine_copies(ctx, ct, width)?;
    let clean_kind = MaskKind::Mixed { ones: tile, len: tile * in_channels };
    let out_clean_kind =
        MaskKind::Mixed { ones: in_channels * out_tile, len: in_channels * tile };
    let block = in_channels * out_tile;

    let mut main_out: Option<B::Ciphertext> = None;
    let mut short_out: Option<B::Ciphertext> = None;
    let mut main_group: Option<B::Ciphertext> = None;
    let mut short_group: Option<B::Ciphertext> = None;

    for out_c in 0..out_channels {
        let inner = out_c % in_channels;
        let group = out_c / in_channels;

        let weights = ctx.encode_conv3x3_kernel(&kernel[out_c], width, level)?;
        let products = copies
            .iter()
            .zip(&weights)
            .map(|(copy, w)| be.mul_plain(copy, w))
            .collect::<Result<Vec<_>>>()?;
        let main_sum = fold_channels(ctx, &be.add_many(&products)?, tile, in_channels)?;

        let sw = ctx.encode_shortcut_kernel(&shortcut_weights[out_c], tile, level)?;
        let short_sum = fold_channels(ctx, &be.mul_plain(ct, &sw)?, tile, in_channels)?;

        let clean = ctx.mask(clean_kind.clone(), be.level(&main_sum))?;
        let mut main = be.mul_plain(&main_sum, &clean)?;
        let mut short = be.mul_plain(&short_sum, &clean)?;
        if inner > 0 {
            let shift = -((inner * tile) as i32);
            main = be.rotate(&main, shift)?;
            short = be.rotate(&short, shift)?;
        }
        main_group = Some(match main_group.take() {
            Some(acc) => be.add(&acc, &main)?,
            None => main,
        });
        short_group = Some(match short_group.take() {
            Some(acc) => be.add(&acc, &short)?,
            None => short,
        });

        if inner + 1 < in_channels {
            continue;
        }

        // group complete: downsample all of its channels in one pass
        let main_ds =
            downsample_multi(ctx, &main_group.take().unwrap(), width, 2, in_channels)?;
        let short_ds =
            downsample_multi(ctx, &short_group.take().unwrap(), width, 2, in_channels)?;
        let out_clean = ctx.mask(out_clean_kind.clone(), be.level(&main_ds))?;
        let mut main_block = be.mul_plain(&main_ds, &out_clean)?;
        let mut short_block = be.mul_plain(&short_ds, &out_clean)?;
        if group > 0 {
            let shift = -((group * block) as i32);
            main_block = be.rotate(&main_block, shift)?;
            short_block = be.rotate(&short_block, shift)?;
        }
        main_out = Some(match main_out {
            Some(acc) => be.add(&acc, &main_block)?,
            None => main_block,
        });
        short_out = Some(match short_out {
            Some(acc) => be.add(&acc, &short_block)?,
            None => short_block,
        });
    }

    let main_out = main_out.expect("at least one output group");
    let short_out = short_out.expect("at least one output group");
    let main_bias = ctx.encode_bias(bias, out_tile, be.level(&main_out))?;
    let short_bias = ctx.encode_bias(shortcut_bias, out_tile, be.level(&short_out))?;
    Ok((be.add_plain(&main_out, &main_bias)?, be.add_plain(&short_out, &short_bias)?))
}

/// Rebuild the input in a (W + 2p)-wide layout with zero borders: every row
/// of every channel is masked out and rotated to its padded position. One
/// masking level.
fn inflate<B: CkksBackend>(
    ctx: &EvalContext<B>,
    ct: &B::Ciphertext,
    width: usize,
    in_channels: usize,
    padding: usize,
) -> Result<B::Ciphertext> {
    let be = ctx.backend();
    let padded = width + 2 * padding;
    let tile = width * width;
    let padded_tile = padded * padded;
    let level = be.level(ct);
    let row_mask = ctx.mask(
        MaskKind::Mixed { ones: width, len: tile * in_channels },
        level,
    )?;

    let mut channel_base = ct.clone();
    let mut acc: Option<B::Ciphertext> = None;
    for ch in 0..in_channels {
        if ch > 0 {
            channel_base = be.rotate(&channel_base, tile as i32)?;
        }
        let mut row_base = channel_base.clone();
        let mut rows = Vec::with_capacity(width);
        for r in 0..width {
            let cleaned = be.mul_plain(&row_base, &row_mask)?;
            if r + 1 < width {
                row_base = be.rotate(&row_base, width as i32)?;
            }
            rows.push(if r == 0 {
                cleaned
            } else {
                be.rotate(&cleaned, -((r * padded) as i32))?
            });
        }
        let channel = be.add_many(&rows)?;
        let placed = if ch == 0 {
            channel
        } else {
            be.rotate(&channel, -((ch * padded_tile) as i32))?
        };
        acc = Some(match acc {
            Some(acc) => be.add(&acc, &placed)?,
            None => placed,
        });
    }
    // shift everything off the top-left zero border
    let border = (padding * padded + padding) as i32;
    be.rotate(&acc.expect("at least one channel"), -border)
}

/// The nine rotated copies of a 3x3 neighbourhood, from one hoisted
/// precompute: +-1 hoisted, +-W hoisted, and the corners as row shifts of
/// the two horizontal copies.
pub(crate) fn nine_copies<B: CkksBackend>(
    ctx: &EvalContext<B>,
    ct: &B::Ciphertext,
    width: usize,
) -> Result<Vec<B::Ciphertext>> {
    let be = ctx.backend();
    let w = width as i32;
    let digits = be.hoist(ct)?;
    let left = be.rotate_hoisted(ct, &digits, -1)?;
    let right = be.rotate_hoisted(ct, &digits, 1)?;
    Ok(vec![
        be.rotate(&left, -w)?,
        be.rotate_hoisted(ct, &digits, -w)?,
        be.rotate(&right, -w)?,
        left.clone(),
        ct.clone(),
        right.clone(),
        be.rotate(&left, w)?,
        be.rotate_hoisted(ct, &digits, w)?,
        be.rotate(&right, w)?,
    ])
}

/// Fold `channels` tiled partial products into the first tile by repeated
/// tile rotation and summation.
pub(crate) fn fold_channels<B: CkksBackend>(
    ctx: &EvalContext<B>,
    ct: &B::Ciphertext,
    tile: usize,
    channels: usize,
) -> Result<B::Ciphertext> {
    if channels <= 1 {
        return Ok(ct.clone());
    }
    let be = ctx.backend();
    let mut parts = Vec::with_capacity(channels);
    parts.push(ct.clone());
    let mut cur = ct.clone();
    for _ in 1..channels {
        cur = be.rotate(&cur, tile as i32)?;
        parts.push(cur.clone());
    }
    be.add_many(&parts)
}

/// Stride-1 output compaction: pull each valid output row of width
/// `out_width` flush against the previous one. One masking level.
fn compact_rows<B: CkksBackend>(
    ctx: &EvalContext<B>,
    ct: &B::Ciphertext,
    width: usize,
    out_width: usize,
) -> Result<B::Ciphertext> {
    let be = ctx.backend();
    let tile = width * width;
    let level = be.level(ct);
    let mask = ctx.mask(MaskKind::Mixed { ones: out_width, len: tile }, level)?;

    let mut work = ct.clone();
    let mut acc: Option<B::Ciphertext> = None;
    for row in 0..out_width {
        if row > 0 {
            work = be.rotate(&work, width as i32)?;
        }
        let masked = be.mul_plain(&work, &mask)?;
        let placed = if row == 0 {
            masked
        } else {
            be.rotate(&masked, -((row * out_width) as i32))?
        };
        acc = Some(match acc {
            Some(acc) => be.add(&acc, &placed)?,
            None => placed,
        });
    }
    Ok(acc.expect("at least one output row"))
}

/// Rotate a channel-0 result into output channel `c`'s tile.
fn place_channel<B: CkksBackend>(
    ctx: &EvalContext<B>,
    ct: &B::Ciphertext,
    channel: usize,
    out_tile: usize,
) -> Result<B::Ciphertext> {
    if channel == 0 {
        return Ok(ct.clone());
    }
    ctx.backend().rotate(ct, -((channel * out_tile) as i32))
}

/// Residual add after the block's second convolution.
pub fn add_ciphertexts<B: CkksBackend>(
    ctx: &EvalContext<B>,
    a: &B::Ciphertext,
    b: &B::Ciphertext,
) -> Result<B::Ciphertext> {
    ctx.backend().add(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CkksBackend, ReferenceBackend};
    use crate::params::CkksParams;

    fn ctx(num_slots: usize, depth: usize) -> EvalContext<ReferenceBackend> {
        let mut be = ReferenceBackend::new(&CkksParams {
            num_slots,
            depth,
            bootstrap_level: depth,
        });
        be.generate_keys(5);
        let all: Vec<i32> = (-(num_slots as i32) + 1..num_slots as i32).collect();
        be.load_rotation_keys(&all);
        EvalContext::new(be)
    }

    fn encrypted(
        ctx: &EvalContext<ReferenceBackend>,
        values: &[f64],
    ) -> <ReferenceBackend as CkksBackend>::Ciphertext {
        let be = ctx.backend();
        let pt = be.encode(values, be.geometry().max_level).unwrap();
        be.encrypt(&pt).unwrap()
    }

    /// Plaintext convolution over channel-tiled maps, for cross-checking.
    #[allow(clippy::too_many_arguments)]
    fn conv_reference(
        input: &[f64],
        kernel: &[Vec<Vec<Vec<f64>>>],
        bias: &[f64],
        width: usize,
        in_channels: usize,
        k: usize,
        padding: usize,
        stride: usize,
    ) -> Vec<f64> {
        let pw = width + 2 * padding;
        let out_w = (pw - k) / stride + 1;
        let mut out = Vec::new();
        for (oc, oc_kernel) in kernel.iter().enumerate() {
            for r in 0..out_w {
                for c in 0..out_w {
                    let mut acc = bias[oc];
                    for (ic, ch_kernel) in oc_kernel.iter().enumerate().take(in_channels) {
                        for (u, krow) in ch_kernel.iter().enumerate() {
                            for (v, &w) in krow.iter().enumerate() {
                                let rr = (r * stride + u) as isize - padding as isize;
                                let cc = (c * stride + v) as isize - padding as isize;
                                if rr >= 0 && rr < width as isize && cc >= 0 && cc < width as isize
                                {
                                    acc += w
                                        * input[ic * width * width
                                            + rr as usize * width
                                            + cc as usize];
                                }
                            }
                        }
                    }
                    out.push(acc);
                }
            }
        }
        out
    }

    #[test]
    fn identity_kernel_with_padding_reproduces_input() {
        let ctx = ctx(256, 12);
        let input: Vec<f64> = (0..16).map(|v| v as f64).collect();
        let ct = encrypted(&ctx, &input);
        // 3x3 kernel, zero except centre = 1
        let mut k = vec![vec![vec![0.0; 3]; 3]; 1];
        k[0][1][1] = 1.0;
        let kernel = vec![k];
        let out = convolution(&ctx, &ct, &kernel, &[0.0], 4, 1, 1, 3, 1, 1).unwrap();
        let dec = ctx.backend().decrypt(&out).unwrap();
        for i in 0..16 {
            assert!((dec[i] - input[i]).abs() < 2f64.powi(-20), "slot {}", i);
        }
    }

    #[test]
    fn generic_convolution_matches_plaintext_reference() {
        let ctx = ctx(1 << 10, 14);
        let width = 6;
        let (ci, co, k) = (2, 3, 3);
        let input: Vec<f64> = (0..ci * width * width).map(|v| (v as f64 * 0.37).sin()).collect();
        let kernel: Vec<Vec<Vec<Vec<f64>>>> = (0..co)
            .map(|oc| {
                (0..ci)
                    .map(|ic| {
                        (0..k)
                            .map(|u| {
                                (0..k)
                                    .map(|v| ((oc * 9 + ic * 3 + u + v) as f64 * 0.21).cos())
                                    .collect()
                            })
                            .collect()
                    })
                    .collect()
            })
            .collect();
        let bias = vec![0.25, -0.5, 1.0];
        let ct = encrypted(&ctx, &input);
        let out = convolution(&ctx, &ct, &kernel, &bias, width, ci, co, k, 0, 1).unwrap();
        let dec = ctx.backend().decrypt(&out).unwrap();
        let expect = conv_reference(&input, &kernel, &bias, width, ci, k, 0, 1);
        for (i, e) in expect.iter().enumerate() {
            assert!((dec[i] - e).abs() < 1e-9, "slot {}: {} vs {}", i, dec[i], e);
        }
    }

    #[test]
    fn optimised_3x3_matches_generic_semantics() {
        let ctx = ctx(256, 12);
        let width = 4;
        let (ci, co) = (2, 2);
        let input: Vec<f64> = (0..ci * width * width).map(|v| (v as f64 * 0.11).cos()).collect();
        let kernel: Vec<Vec<Vec<Vec<f64>>>> = (0..co)
            .map(|oc| {
                (0..ci)
                    .map(|ic| {
                        (0..3)
                            .map(|u| {
                                (0..3).map(|v| 0.1 * (1 + oc + ic + u + v) as f64).collect()
                            })
                            .collect()
                    })
                    .collect()
            })
            .collect();
        let bias = vec![0.1, -0.2];
        let ct = encrypted(&ctx, &input);
        let out = convolution_3x3(&ctx, &ct, &kernel, &bias, width, ci, co).unwrap();
        let dec = ctx.backend().decrypt(&out).unwrap();
        let expect = conv_reference(&input, &kernel, &bias, width, ci, 3, 1, 1);
        for (i, e) in expect.iter().enumerate() {
            assert!((dec[i] - e).abs() < 1e-9, "slot {}: {} vs {}", i, dec[i], e);
        }
    }

    #[test]
    fn fused_branches_match_their_standalone_kernels() {
        let width = 4;
        let (ci, co) = (2, 4);
        let input: Vec<f64> = (0..ci * width * width).map(|v| (v as f64 * 0.29).sin()).collect();
        let kernel: Vec<Vec<Vec<Vec<f64>>>> = (0..co)
            .map(|oc| {
                (0..ci)
                    .map(|ic| {
                        (0..3)
                            .map(|u| {
                                (0..3)
                                    .map(|v| 0.05 * ((oc + 2 * ic) as f64) + 0.01 * (u + v) as f64)
                                    .collect()
                            })
                            .collect()
                    })
                    .collect()
            })
            .collect();
        let shortcut: Vec<Vec<f64>> =
            (0..co).map(|oc| (0..ci).map(|ic| 0.3 * (oc + ic + 1) as f64).collect()).collect();
        let bias = vec![0.1; co];
        let shortcut_bias = vec![-0.1; co];

        let ctx1 = ctx(256, 16);
        let ct = encrypted(&ctx1, &input);
        let (main_s, short_s) = fused_conv_shortcut(
            &ctx1,
            &ct,
            &kernel,
            &shortcut,
            &bias,
            &shortcut_bias,
            width,
            ci,
            co,
            StridingKind::SingleChannel,
        )
        .unwrap();

        let ctx2 = ctx(256, 16);
        let ct2 = encrypted(&ctx2, &input);
        let (main_m, short_m) = fused_conv_shortcut(
            &ctx2,
            &ct2,
            &kernel,
            &shortcut,
            &bias,
            &shortcut_bias,
            width,
            ci,
            co,
            StridingKind::MultiChannel,
        )
        .unwrap();

        let ctx3 = ctx(256, 16);
        let ct3 = encrypted(&ctx3, &input);
        let short_ref =
            shortcut_convolution(&ctx3, &ct3, &shortcut, &shortcut_bias, width, ci, co).unwrap();

        let out_len = co * (width / 2) * (width / 2);
        let dec_main_s = ctx1.backend().decrypt(&main_s).unwrap();
        let dec_main_m = ctx2.backend().decrypt(&main_m).unwrap();
        let dec_short_s = ctx1.backend().decrypt(&short_s).unwrap();
        let dec_short_m = ctx2.backend().decrypt(&short_m).unwrap();
        let dec_short_ref = ctx3.backend().decrypt(&short_ref).unwrap();
        for i in 0..out_len {
            assert!((dec_main_s[i] - dec_main_m[i]).abs() < 1e-9, "main slot {}", i);
            assert!((dec_short_s[i] - dec_short_m[i]).abs() < 1e-9, "shortcut slot {}", i);
            assert!((dec_short_s[i] - dec_short_ref[i]).abs() < 1e-9, "standalone slot {}", i);
        }

        // main branch equals the strided plaintext convolution
        let full = conv_reference(&input, &kernel, &bias, width, ci, 3, 1, 2);
        for (i, e) in full.iter().enumerate() {
            assert!((dec_main_s[i] - e).abs() < 1e-9, "strided slot {}: {} vs {}", i, dec_main_s[i], e);
        }
    }
}
