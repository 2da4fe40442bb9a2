//! Network plans and the plan interpreter.
//!
//! Each target network is a declarative table of layer steps: operation,
//! bootstrap points, ReLU constants and rotation-key group, with shapes
//! derived by walking the table. The interpreter executes the table against
//! a ciphertext, switching key groups between layer runs and checking the
//! level trajectory that `validate` predicts from the shared depth model.
//! Any mismatch is fatal; there is no recovery path.

pub mod lenet5;
pub mod mlp;
pub mod resnet20;

use std::collections::HashMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::backend::{depth, CkksBackend};
use crate::context::EvalContext;
use crate::error::{EvalError, Result};
use crate::layers;
use crate::params::{CkksParams, Network};
use crate::rotation_plan;
use crate::striding::StridingKind;
use crate::weights;

/// Live tensor shape while walking a plan. `flat` is the live slot count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorShape {
    pub width: usize,
    pub channels: usize,
    pub flat: usize,
}

impl TensorShape {
    pub fn map(width: usize, channels: usize) -> Self {
        Self { width, channels, flat: channels * width * width }
    }

    pub fn vector(len: usize) -> Self {
        Self { width: 1, channels: len, flat: len }
    }
}

/// One layer operation. Input channel counts and widths come from the
/// running shape, so the tables only state what changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerOp {
    Convolution { kernel: usize, padding: usize, stride: usize, out_channels: usize },
    Conv3x3 { out_channels: usize },
    FusedConvShortcut { out_channels: usize, striding: StridingKind },
    AvgPool { kernel: usize, stride: usize, striding: StridingKind },
    GlobalAvgPool { rot_positions: usize },
    Linear { out_size: usize, rot_positions: usize, optimized: bool },
    Relu { scale: u64, degree: usize },
    /// Remember the current ciphertext as the residual branch.
    SaveResidual,
    /// Add the remembered residual back in and clear it.
    AddResidual,
}

impl LayerOp {
    /// Levels this operation consumes, by the shared depth model.
    pub fn consumed(&self, shape: TensorShape) -> usize {
        match *self {
            LayerOp::Convolution { kernel: _, padding, stride, .. } => {
                let padded = shape.width + 2 * padding;
                let pad_cost = usize::from(padding > 0);
                let stride_cost =
                    if stride > 1 { depth::downsample(padded, stride) } else { 1 };
                pad_cost + 2 + stride_cost
            }
            LayerOp::Conv3x3 { .. } => 2,
            LayerOp::FusedConvShortcut { striding, .. } => match striding {
                StridingKind::SingleChannel => 2 + depth::downsample(shape.width, 2),
                StridingKind::MultiChannel => 3 + depth::downsample_multi(shape.width, 2),
                StridingKind::Basic => unreachable!("transitions run on power-of-two maps"),
            },
            LayerOp::AvgPool { stride, striding, .. } => {
                if shape.width <= 2 {
                    2
                } else {
                    1 + match striding {
                        StridingKind::MultiChannel => depth::downsample_multi(shape.width, stride),
                        StridingKind::SingleChannel => depth::downsample(shape.width, stride),
                        StridingKind::Basic => depth::basic_compaction(),
                    }
                }
            }
            LayerOp::GlobalAvgPool { .. } => 2,
            LayerOp::Linear { .. } => 2,
            LayerOp::Relu { scale, degree } => {
                usize::from(scale > 1) + depth::chebyshev(degree)
            }
            LayerOp::SaveResidual | LayerOp::AddResidual => 0,
        }
    }

    /// Shape after this operation.
    pub fn output_shape(&self, shape: TensorShape) -> TensorShape {
        match *self {
            LayerOp::Convolution { kernel, padding, stride, out_channels } => {
                let out_w = (shape.width + 2 * padding - kernel) / stride + 1;
                TensorShape::map(out_w, out_channels)
            }
            LayerOp::Conv3x3 { out_channels } => TensorShape::map(shape.width, out_channels),
            LayerOp::FusedConvShortcut { out_channels, .. } => {
                TensorShape::map(shape.width / 2, out_channels)
            }
            LayerOp::AvgPool { stride, .. } => {
                if shape.width <= 2 {
                    TensorShape::vector(shape.channels)
                } else {
                    TensorShape::map(shape.width / stride, shape.channels)
                }
            }
            LayerOp::GlobalAvgPool { .. } => TensorShape::vector(shape.channels),
            LayerOp::Linear { out_size, .. } => TensorShape::vector(out_size),
            LayerOp::Relu { .. } | LayerOp::SaveResidual | LayerOp::AddResidual => shape,
        }
    }

    /// Exact rotation offsets the kernel invokes at this shape.
    pub fn offsets(&self, shape: TensorShape) -> Vec<i32> {
        match *self {
            LayerOp::Convolution { kernel, padding, stride, out_channels } => {
                rotation_plan::conv_generic_offsets(
                    shape.width,
                    shape.channels,
                    out_channels,
                    kernel,
                    padding,
                    stride,
                )
            }
            LayerOp::Conv3x3 { out_channels } => {
                rotation_plan::conv3x3_offsets(shape.width, shape.channels, out_channels)
            }
            LayerOp::FusedConvShortcut { out_channels, striding } => {
                rotation_plan::fused_conv_shortcut_offsets(
                    shape.width,
                    shape.channels,
                    out_channels,
                    striding,
                )
            }
            LayerOp::AvgPool { kernel, stride, striding } => rotation_plan::avgpool_offsets(
                shape.width,
                shape.channels,
                kernel,
                stride,
                striding,
            ),
            LayerOp::GlobalAvgPool { rot_positions } => rotation_plan::global_avgpool_offsets(
                shape.width,
                shape.channels,
                rot_positions,
            ),
            LayerOp::Linear { out_size, rot_positions, optimized } => {
                if optimized {
                    rotation_plan::linear_optimized_offsets(out_size)
                } else {
                    rotation_plan::linear_offsets(out_size, rot_positions)
                }
            }
            LayerOp::Relu { .. } | LayerOp::SaveResidual | LayerOp::AddResidual => Vec::new(),
        }
    }
}

/// One row of a network table.
#[derive(Debug, Clone)]
pub struct LayerStep {
    /// Weight-file prefix; empty for steps without weights.
    pub name: String,
    pub op: LayerOp,
    pub bootstrap_before: bool,
    pub bootstrap_after: bool,
    pub rot_group: usize,
}

impl LayerStep {
    pub fn plain(name: &str, op: LayerOp, rot_group: usize) -> Self {
        Self {
            name: name.to_string(),
            op,
            bootstrap_before: false,
            bootstrap_after: false,
            rot_group,
        }
    }
}

/// A full evaluation plan for one target network.
#[derive(Debug, Clone)]
pub struct NetworkPlan {
    pub network: Network,
    pub input_shape: TensorShape,
    pub steps: Vec<LayerStep>,
    pub num_groups: usize,
}

/// Expected levels around one step, produced by `validate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepLevels {
    pub before: usize,
    pub after: usize,
}

impl NetworkPlan {
    /// Static pass over the table: checks that every segment between
    /// bootstraps fits the budget, and returns the expected level
    /// trajectory the interpreter asserts at run time.
    pub fn validate(&self, params: &CkksParams) -> Result<Vec<StepLevels>> {
        let mut level = params.depth;
        let mut residual: Option<usize> = None;
        let mut shape = self.input_shape;
        let mut trajectory = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            if step.bootstrap_before {
                level = params.bootstrap_level;
            }
            let before = level;
            let cost = step.op.consumed(shape);
            if cost > level {
                return Err(EvalError::LevelExhausted { needed: cost, remaining: level });
            }
            level -= cost;
            match step.op {
                LayerOp::SaveResidual => residual = Some(level),
                LayerOp::FusedConvShortcut { .. } => residual = Some(level),
                LayerOp::AddResidual => {
                    let res = residual.take().ok_or_else(|| {
                        EvalError::InvalidParams(format!(
                            "step '{}' adds a residual nothing saved",
                            step.name
                        ))
                    })?;
                    level = level.min(res);
                }
                _ => {}
            }
            if step.bootstrap_after {
                level = params.bootstrap_level;
            }
            trajectory.push(StepLevels { before, after: level });
            shape = step.op.output_shape(shape);
        }
        Ok(trajectory)
    }

    /// Final tensor shape (the logit vector).
    pub fn output_shape(&self) -> TensorShape {
        self.steps
            .iter()
            .fold(self.input_shape, |shape, step| step.op.output_shape(shape))
    }

    /// Rotation-key groups: the union of each member layer's exact offsets.
    pub fn rotation_groups(&self) -> Vec<Vec<i32>> {
        let mut groups = vec![Vec::new(); self.num_groups];
        let mut shape = self.input_shape;
        for step in &self.steps {
            groups[step.rot_group].extend(step.op.offsets(shape));
            shape = step.op.output_shape(shape);
        }
        groups.into_iter().map(rotation_plan::normalize).collect()
    }

    /// Weight tensor shapes per named step, for loading and synthesis.
    pub fn weight_shapes(&self) -> Vec<(String, WeightShape)> {
        let mut out = Vec::new();
        let mut shape = self.input_shape;
        for step in &self.steps {
            match step.op {
                LayerOp::Convolution { kernel, out_channels, .. } => out.push((
                    step.name.clone(),
                    WeightShape::Conv {
                        out_channels,
                        in_channels: shape.channels,
                        kernel,
                    },
                )),
                LayerOp::Conv3x3 { out_channels } => out.push((
                    step.name.clone(),
                    WeightShape::Conv {
                        out_channels,
                        in_channels: shape.channels,
                        kernel: 3,
                    },
                )),
                LayerOp::FusedConvShortcut { out_channels, .. } => out.push((
                    step.name.clone(),
                    WeightShape::Fused { out_channels, in_channels: shape.channels },
                )),
                LayerOp::Linear { out_size, .. } => out.push((
                    step.name.clone(),
                    WeightShape::Linear { out_size, in_size: shape.flat },
                )),
                _ => {}
            }
            shape = step.op.output_shape(shape);
        }
        out
    }
}

/// Shape of one step's weight tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeightShape {
    Conv { out_channels: usize, in_channels: usize, kernel: usize },
    Fused { out_channels: usize, in_channels: usize },
    Linear { out_size: usize, in_size: usize },
}

/// Weights for one step.
#[derive(Debug, Clone)]
pub enum LayerWeights {
    Conv { kernel: Vec<Vec<Vec<Vec<f64>>>>, bias: Vec<f64> },
    Fused {
        kernel: Vec<Vec<Vec<Vec<f64>>>>,
        bias: Vec<f64>,
        shortcut_weights: Vec<Vec<f64>>,
        shortcut_bias: Vec<f64>,
    },
    Linear { weights: Vec<Vec<f64>>, bias: Vec<f64> },
}

/// All weights of a network, keyed by step name.
#[derive(Debug, Clone, Default)]
pub struct ModelWeights {
    entries: HashMap<String, LayerWeights>,
}

impl ModelWeights {
    /// Load every named step's weight files from `dir`, shaped per the plan.
    /// Convolution steps read `<name>_weight.csv` / `<name>_bias.csv`; fused
    /// steps read the `<name>_conv1_*` and `<name>_shortcut_*` pairs.
    pub fn from_dir(plan: &NetworkPlan, dir: &std::path::Path) -> Result<Self> {
        let mut entries = HashMap::new();
        for (name, shape) in plan.weight_shapes() {
            let weights = match shape {
                WeightShape::Conv { out_channels, in_channels, kernel } => LayerWeights::Conv {
                    kernel: weights::load_conv_weights(
                        &dir.join(format!("{}_weight.csv", name)),
                        out_channels,
                        in_channels,
                        kernel,
                    )?,
                    bias: weights::load_bias(&dir.join(format!("{}_bias.csv", name)))?,
                },
                WeightShape::Fused { out_channels, in_channels } => LayerWeights::Fused {
                    kernel: weights::load_conv_weights(
                        &dir.join(format!("{}_conv1_weight.csv", name)),
                        out_channels,
                        in_channels,
                        3,
                    )?,
                    bias: weights::load_bias(&dir.join(format!("{}_conv1_bias.csv", name)))?,
                    shortcut_weights: weights::load_fc_weights(
                        &dir.join(format!("{}_shortcut_weight.csv", name)),
                        out_channels,
                        in_channels,
                    )?,
                    shortcut_bias: weights::load_bias(
                        &dir.join(format!("{}_shortcut_bias.csv", name)),
                    )?,
                },
                WeightShape::Linear { out_size, in_size } => LayerWeights::Linear {
                    weights: weights::load_fc_weights(
                        &dir.join(format!("{}_weight.csv", name)),
                        out_size,
                        in_size,
                    )?,
                    bias: weights::load_bias(&dir.join(format!("{}_bias.csv", name)))?,
                },
            };
            entries.insert(name, weights);
        }
        Ok(Self { entries })
    }

    /// Seeded random weights with the plan's shapes, scaled by 1/sqrt(fan-in)
    /// so activations stay within the plans' ReLU ranges.
    pub fn synthetic(plan: &NetworkPlan, seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut entries = HashMap::new();
        for (name, shape) in plan.weight_shapes() {
            let weights = match shape {
                WeightShape::Conv { out_channels, in_channels, kernel } => {
                    let bound = 1.0 / ((in_channels * kernel * kernel) as f64).sqrt();
                    LayerWeights::Conv {
                        kernel: (0..out_channels)
                            .map(|_| {
                                (0..in_channels)
                                    .map(|_| {
                                        (0..kernel)
                                            .map(|_| {
                                                (0..kernel)
                                                    .map(|_| rng.gen_range(-bound..bound))
                                                    .collect()
                                            })
                                            .collect()
                                    })
                                    .collect()
                            })
                            .collect(),
                        bias: (0..out_channels).map(|_| rng.gen_range(-0.1..0.1)).collect(),
                    }
                }
                WeightShape::Fused { out_channels, in_channels } => {
                    let bound = 1.0 / ((in_channels * 9) as f64).sqrt();
                    let short_bound = 1.0 / (in_channels as f64).sqrt();
                    LayerWeights::Fused {
                        kernel: (0..out_channels)
                            .map(|_| {
                                (0..in_channels)
                                    .map(|_| {
                                        (0..3)
                                            .map(|_| {
                                                (0..3)
                                                    .map(|_| rng.gen_range(-bound..bound))
                                                    .collect()
                                            })
                                            .collect()
                                    })
                                    .collect()
                            })
                            .collect(),
                        bias: (0..out_channels).map(|_| rng.gen_range(-0.1..0.1)).collect(),
                        shortcut_weights: (0..out_channels)
                            .map(|_| {
                                (0..in_channels)
                                    .map(|_| rng.gen_range(-short_bound..short_bound))
                                    .collect()
                            })
                            .collect(),
                        shortcut_bias: (0..out_channels)
                            .map(|_| rng.gen_range(-0.1..0.1))
                            .collect(),
                    }
                }
                WeightShape::Linear { out_size, in_size } => {
                    let bound = 1.0 / (in_size as f64).sqrt();
                    LayerWeights::Linear {
                        weights: (0..out_size)
                            .map(|_| (0..in_size).map(|_| rng.gen_range(-bound..bound)).collect())
                            .collect(),
                        bias: (0..out_size).map(|_| rng.gen_range(-0.1..0.1)).collect(),
                    }
                }
            };
            entries.insert(name, weights);
        }
        Self { entries }
    }

    fn get(&self, name: &str) -> Result<&LayerWeights> {
        self.entries
            .get(name)
            .ok_or_else(|| EvalError::InvalidParams(format!("no weights for step '{}'", name)))
    }
}

/// Run a plan over one encrypted input.
///
/// `groups` holds the rotation-key group offsets; the interpreter clears and
/// reloads the backend's key table at every group switch, and checks the
/// observed level after each step against the validated trajectory.
pub fn evaluate<B: CkksBackend>(
    ctx: &EvalContext<B>,
    plan: &NetworkPlan,
    model: &ModelWeights,
    groups: &[Vec<i32>],
    input: &B::Ciphertext,
) -> Result<B::Ciphertext> {
    let be = ctx.backend();
    let geometry = be.geometry();
    let params = CkksParams {
        num_slots: geometry.num_slots,
        depth: geometry.max_level,
        bootstrap_level: geometry.bootstrap_level,
    };
    let trajectory = plan.validate(&params)?;
    ctx.load_sum_keys();

    let mut ct = input.clone();
    let mut residual: Option<B::Ciphertext> = None;
    let mut shape = plan.input_shape;
    let mut loaded_group: Option<usize> = None;

    for (step, expected) in plan.steps.iter().zip(&trajectory) {
        if loaded_group != Some(step.rot_group) {
            ctx.clear_rotation_group();
            ctx.load_rotation_group(&groups[step.rot_group]);
            loaded_group = Some(step.rot_group);
        }
        if step.bootstrap_before {
            ct = ctx.bootstrap(&ct)?;
        }

        ct = match step.op {
            LayerOp::Convolution { kernel, padding, stride, out_channels } => {
                let LayerWeights::Conv { kernel: k, bias } = model.get(&step.name)? else {
                    return Err(EvalError::InvalidParams(format!(
                        "step '{}' expects convolution weights",
                        step.name
                    )));
                };
                layers::convolution(
                    ctx,
                    &ct,
                    k,
                    bias,
                    shape.width,
                    shape.channels,
                    out_channels,
                    kernel,
                    padding,
                    stride,
                )?
            }
            LayerOp::Conv3x3 { out_channels } => {
                let LayerWeights::Conv { kernel: k, bias } = model.get(&step.name)? else {
                    return Err(EvalError::InvalidParams(format!(
                        "step '{}' expects convolution weights",
                        step.name
                    )));
                };
                layers::convolution_3x3(
                    ctx,
                    &ct,
                    k,
                    bias,
                    shape.width,
                    shape.channels,
                    out_channels,
                )?
            }
            LayerOp::FusedConvShortcut { out_channels, striding } => {
                let LayerWeights::Fused { kernel, bias, shortcut_weights, shortcut_bias } =
                    model.get(&step.name)?
                else {
                    return Err(EvalError::InvalidParams(format!(
                        "step '{}' expects fused transition weights",
                        step.name
                    )));
                };
                let (main, shortcut) = layers::fused_conv_shortcut(
                    ctx,
                    &ct,
                    kernel,
                    shortcut_weights,
                    bias,
                    shortcut_bias,
                    shape.width,
                    shape.channels,
                    out_channels,
                    striding,
                )?;
                residual = Some(shortcut);
                main
            }
            LayerOp::AvgPool { kernel, stride, striding } => layers::avgpool(
                ctx,
                &ct,
                shape.width,
                shape.channels,
                kernel,
                stride,
                striding,
            )?,
            LayerOp::GlobalAvgPool { rot_positions } => {
                layers::global_avgpool(ctx, &ct, shape.width, shape.channels, rot_positions)?
            }
            LayerOp::Linear { out_size, rot_positions, optimized } => {
                let LayerWeights::Linear { weights, bias } = model.get(&step.name)? else {
                    return Err(EvalError::InvalidParams(format!(
                        "step '{}' expects linear weights",
                        step.name
                    )));
                };
                if optimized {
                    layers::linear_optimized(ctx, &ct, weights, bias, shape.flat, out_size)?
                } else {
                    layers::linear(ctx, &ct, weights, bias, shape.flat, out_size, rot_positions)?
                }
            }
            LayerOp::Relu { scale, degree } => {
                layers::relu(ctx, &ct, scale, shape.flat, degree)?
            }
            LayerOp::SaveResidual => {
                residual = Some(ct.clone());
                ct
            }
            LayerOp::AddResidual => {
                let res = residual.take().ok_or_else(|| {
                    EvalError::InvalidParams("residual add without a saved branch".into())
                })?;
                layers::add_ciphertexts(ctx, &ct, &res)?
            }
        };

        if step.bootstrap_after {
            ct = ctx.bootstrap(&ct)?;
        }
        let observed = be.level(&ct);
        if observed != expected.after {
            return Err(EvalError::LevelMismatch {
                expected: expected.after,
                actual: observed,
            });
        }
        shape = step.op.output_shape(shape);
    }
    Ok(ct)
}

/// The plan for a network.
pub fn plan_for(network: Network) -> NetworkPlan {
    match network {
        Network::Mlp => mlp::plan(),
        Network::Lenet5 => lenet5::plan(),
        Network::Resnet20 => resnet20::plan(),
    }
}

/// Plaintext mirror of `evaluate`: the same layer semantics in floats, with
/// the same Chebyshev-interpolated ReLU, used to cross-check the packed
/// evaluator end to end.
pub fn plaintext_forward(plan: &NetworkPlan, model: &ModelWeights, input: &[f64]) -> Result<Vec<f64>> {
    let mut shape = plan.input_shape;
    let mut data = input.to_vec();
    let mut residual: Option<Vec<f64>> = None;

    for step in &plan.steps {
        data = match step.op {
            LayerOp::Convolution { kernel, padding, stride, out_channels } => {
                let LayerWeights::Conv { kernel: k, bias } = model.get(&step.name)? else {
                    return Err(EvalError::InvalidParams(format!(
                        "step '{}' expects convolution weights",
                        step.name
                    )));
                };
                plain_conv(&data, k, bias, shape, out_channels, kernel, padding, stride)
            }
            LayerOp::Conv3x3 { out_channels } => {
                let LayerWeights::Conv { kernel: k, bias } = model.get(&step.name)? else {
                    return Err(EvalError::InvalidParams(format!(
                        "step '{}' expects convolution weights",
                        step.name
                    )));
                };
                plain_conv(&data, k, bias, shape, out_channels, 3, 1, 1)
            }
            LayerOp::FusedConvShortcut { out_channels, .. } => {
                let LayerWeights::Fused { kernel, bias, shortcut_weights, shortcut_bias } =
                    model.get(&step.name)?
                else {
                    return Err(EvalError::InvalidParams(format!(
                        "step '{}' expects fused transition weights",
                        step.name
                    )));
                };
                let main = plain_conv(&data, kernel, bias, shape, out_channels, 3, 1, 2);
                let short =
                    plain_shortcut(&data, shortcut_weights, shortcut_bias, shape, out_channels);
                residual = Some(short);
                main
            }
            LayerOp::AvgPool { kernel, stride, .. } => plain_avgpool(&data, shape, kernel, stride),
            LayerOp::GlobalAvgPool { .. } => plain_global_avgpool(&data, shape),
            LayerOp::Linear { out_size, .. } => {
                let LayerWeights::Linear { weights, bias } = model.get(&step.name)? else {
                    return Err(EvalError::InvalidParams(format!(
                        "step '{}' expects linear weights",
                        step.name
                    )));
                };
                (0..out_size)
                    .map(|i| {
                        bias[i]
                            + weights[i]
                                .iter()
                                .zip(&data)
                                .map(|(w, x)| w * x)
                                .sum::<f64>()
                    })
                    .collect()
            }
            LayerOp::Relu { scale, degree } => {
                let gain = scale.max(1) as f64;
                let scaled: Vec<f64> = if scale > 1 {
                    data.iter().map(|x| x / scale as f64).collect()
                } else {
                    data.clone()
                };
                crate::backend::reference::chebyshev_map(
                    &move |x| if x < 0.0 { 0.0 } else { gain * x },
                    -1.0,
                    1.0,
                    degree,
                    &scaled,
                )
            }
            LayerOp::SaveResidual => {
                residual = Some(data.clone());
                data
            }
            LayerOp::AddResidual => {
                let res = residual.take().ok_or_else(|| {
                    EvalError::InvalidParams("residual add without a saved branch".into())
                })?;
                data.iter().zip(&res).map(|(a, b)| a + b).collect()
            }
        };
        shape = step.op.output_shape(shape);
    }
    Ok(data)
}

#[allow(clippy::too_many_arguments)]
fn plain_conv(
    input: &[f64],
    kernel: &[Vec<Vec<Vec<f64>>>],
    bias: &[f64],
    shape: TensorShape,
    out_channels: usize,
    k: usize,
    padding: usize,
    stride: usize,
) -> Vec<f64> {
    let w = shape.width;
    let out_w = (w + 2 * padding - k) / stride + 1;
    let at = |ch: usize, r: isize, c: isize| -> f64 {
        if r < 0 || r >= w as isize || c < 0 || c >= w as isize {
            0.0
        } else {
            input
                .get(ch * w * w + r as usize * w + c as usize)
                .copied()
                .unwrap_or(0.0)
        }
    };
    let mut out = Vec::with_capacity(out_channels * out_w * out_w);
    for (oc, oc_kernel) in kernel.iter().enumerate().take(out_channels) {
        for r in 0..out_w {
            for c in 0..out_w {
                let mut acc = bias[oc];
                for (ic, ch_kernel) in oc_kernel.iter().enumerate().take(shape.channels) {
                    for (u, krow) in ch_kernel.iter().enumerate() {
                        for (v, &kw) in krow.iter().enumerate() {
                            acc += kw
                                * at(
                                    ic,
                                    (r * stride + u) as isize - padding as isize,
                                    (c * stride + v) as isize - padding as isize,
                                );
                        }
                    }
                }
                out.push(acc);
            }
        }
    }
    out
}

fn plain_shortcut(
    input: &[f64],
    weights: &[Vec<f64>],
    bias: &[f64],
    shape: TensorShape,
    out_channels: usize,
) -> Vec<f64> {
    let w = shape.width;
    let out_w = w / 2;
    let mut out = Vec::with_capacity(out_channels * out_w * out_w);
    for oc in 0..out_channels {
        for r in 0..out_w {
            for c in 0..out_w {
                let mut acc = bias[oc];
                for ic in 0..shape.channels {
                    acc += weights[oc][ic] * input[ic * w * w + 2 * r * w + 2 * c];
                }
                out.push(acc);
            }
        }
    }
    out
}

fn plain_avgpool(input: &[f64], shape: TensorShape, k: usize, stride: usize) -> Vec<f64> {
    let w = shape.width;
    let out_w = if w <= 2 { 1 } else { w / stride };
    let mut out = Vec::new();
    for ch in 0..shape.channels {
        for r in 0..out_w {
            for c in 0..out_w {
                let mut acc = 0.0;
                for u in 0..k {
                    for v in 0..k {
                        acc += input[ch * w * w + (r * stride + u) * w + c * stride + v];
                    }
                }
                out.push(acc / (k * k) as f64);
            }
        }
    }
    out
}

fn plain_global_avgpool(input: &[f64], shape: TensorShape) -> Vec<f64> {
    let w = shape.width;
    (0..shape.channels)
        .map(|ch| input[ch * w * w..(ch + 1) * w * w].iter().sum::<f64>() / (w * w) as f64)
        .collect()
}
