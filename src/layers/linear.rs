//! Fully connected layers.
//!
//! Each output neuron is a slotwise product with its weight row followed by
//! the backend's first-k summation, leaving the scalar in slot 0. Scalars
//! are merged `rot_positions` at a time and the merged blocks rotated into
//! their positions; the optimised variant handles layers whose whole output
//! fits one merge.

use crate::backend::CkksBackend;
use crate::context::EvalContext;
use crate::error::{EvalError, Result};

/// Grouped fully connected layer: `out_size` neurons over the first
/// `in_size` slots, merged in blocks of `rot_positions`.
pub fn linear<B: CkksBackend>(
    ctx: &EvalContext<B>,
    ct: &B::Ciphertext,
    weights: &[Vec<f64>],
    bias: &[f64],
    in_size: usize,
    out_size: usize,
    rot_positions: usize,
) -> Result<B::Ciphertext> {
    if out_size > weights.len() {
        return Err(EvalError::InvalidParams(format!(
            "output size {} exceeds weight matrix rows {}",
            out_size,
            weights.len()
        )));
    }
    let be = ctx.backend();
    let level = be.level(ct);

    let mut group = Vec::with_capacity(rot_positions);
    let mut merged_groups = Vec::new();
    let mut group_index = 0usize;
    for (i, row) in weights.iter().enumerate().take(out_size) {
        let row_pt = ctx.encode_values(row, level)?;
        let product = be.mul_plain(ct, &row_pt)?;
        group.push(be.sum_first(&product, in_size)?);
        if group.len() == rot_positions || i + 1 == out_size {
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
    let bias_pt = ctx.encode_values(bias, be.level(&collected))?;
    be.add_plain(&collected, &bias_pt)
}

/// Optimised variant for layers with out_size <= rot_positions: one merge,
/// no block rotations.
pub fn linear_optimized<B: CkksBackend>(
    ctx: &EvalContext<B>,
    ct: &B::Ciphertext,
    weights: &[Vec<f64>],
    bias: &[f64],
    in_size: usize,
    out_size: usize,
) -> Result<B::Ciphertext> {
    if out_size > weights.len() {
        return Err(EvalError::InvalidParams(format!(
            "output size {} exceeds weight matrix rows {}",
            out_size,
            weights.len()
        )));
    }
    let be = ctx.backend();
    let level = be.level(ct);

    let mut scalars = Vec::with_capacity(out_size);
    for row in weights.iter().take(out_size) {
        let row_pt = ctx.encode_values(row, level)?;
        let product = be.mul_plain(ct, &row_pt)?;
        scalars.push(be.sum_first(&product, in_size)?);
    }
    let merged = be.merge(&scalars)?;
    let bias_pt = ctx.encode_values(bias, be.level(&merged))?;
    be.add_plain(&merged, &bias_pt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{CkksBackend, ReferenceBackend};
    use crate::params::CkksParams;

    fn ctx(num_slots: usize) -> EvalContext<ReferenceBackend> {
        let mut be = ReferenceBackend::new(&CkksParams {
            num_slots,
            depth: 8,
            bootstrap_level: 8,
        });
        be.generate_keys(13);
        let all: Vec<i32> = (-(num_slots as i32) + 1..num_slots as i32).collect();
        be.load_rotation_keys(&all);
        be.load_sum_keys();
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

    #[test]
    fn unit_rows_select_inputs() {
        let ctx = ctx(64);
        let ct = encrypted(&ctx, &[1.0, 2.0, 3.0, 4.0]);
        let weights = vec![vec![1.0, 0.0, 0.0, 0.0], vec![0.0, 1.0, 0.0, 0.0]];
        let bias = vec![10.0, 20.0];
        let out = linear(&ctx, &ct, &weights, &bias, 4, 2, 16).unwrap();
        let dec = ctx.backend().decrypt(&out).unwrap();
        assert!((dec[0] - 11.0).abs() < 2f64.powi(-30));
        assert!((dec[1] - 22.0).abs() < 2f64.powi(-30));
    }

    #[test]
    fn grouped_merge_spans_multiple_blocks() {
        let ctx = ctx(64);
        let input: Vec<f64> = (0..8).map(|v| v as f64 + 1.0).collect();
        let ct = encrypted(&ctx, &input);
        // 5 outputs with rot_positions 2 forces three merge groups
        let weights: Vec<Vec<f64>> = (0..5)
            .map(|i| (0..8).map(|j| if j == i { 2.0 } else { 0.0 }).collect())
            .collect();
        let bias = vec![0.0; 5];
        let out = linear(&ctx, &ct, &weights, &bias, 8, 5, 2).unwrap();
        let dec = ctx.backend().decrypt(&out).unwrap();
        for i in 0..5 {
            assert!((dec[i] - 2.0 * (i as f64 + 1.0)).abs() < 1e-12, "output {}", i);
        }
    }

    #[test]
    fn optimised_variant_matches_grouped() {
        let ctx = ctx(64);
        let input: Vec<f64> = (0..6).map(|v| (v as f64).sin()).collect();
        let ct = encrypted(&ctx, &input);
        let weights: Vec<Vec<f64>> =
            (0..4).map(|i| (0..6).map(|j| ((i * 6 + j) as f64 * 0.1).cos()).collect()).collect();
        let bias = vec![0.5, -0.5, 1.5, 0.0];
        let a = linear(&ctx, &ct, &weights, &bias, 6, 4, 16).unwrap();
        let b = linear_optimized(&ctx, &ct, &weights, &bias, 6, 4).unwrap();
        let da = ctx.backend().decrypt(&a).unwrap();
        let db = ctx.backend().decrypt(&b).unwrap();
        for i in 0..4 {
            assert!((da[i] - db[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn oversized_output_is_rejected() {
        let ctx = ctx(64);
        let ct = encrypted(&ctx, &[1.0; 4]);
        let weights = vec![vec![1.0; 4]];
        assert!(linear(&ctx, &ct, &weights, &[0.0], 4, 2, 16).is_err());
    }
}
