//! ResNet-20 over CIFAR-10.
//!
//! An initial 3x3 convolution and three stages of three residual blocks,
//! then global average pooling and the classifier. Stage transitions halve
//! the map and double the channels through the fused convolution+shortcut
//! kernel; the stage-2 transition strides all channels at once, the stage-3
//! transition channel by channel. Four rotation-key groups: initial
//! conv + stage 1, stage 2, stage 3, pooling + classifier.
//!
//! ReLU pre-scales are fixed offline: 8 after the stem and inside blocks,
//! 16 at block outputs, 32 at the late stage-3 block outputs where the
//! residual sums run hotter.

use super::{LayerOp, LayerStep, NetworkPlan, TensorShape};
use crate::params::Network;
use crate::striding::StridingKind;

const ROT_POSITIONS: usize = 16;
const RELU_DEGREE: usize = 119;

pub fn plan() -> NetworkPlan {
    let mut steps = vec![
        LayerStep::plain("layer0_conv1", LayerOp::Conv3x3 { out_channels: 16 }, 0),
        LayerStep::plain("", LayerOp::Relu { scale: 8, degree: RELU_DEGREE }, 0),
    ];

    // stage 1: 16 channels on the 32-wide map; the first block still has
    // budget from the fresh ciphertext and skips the mid-block bootstrap
    identity_block(&mut steps, "layer1_block1", 16, false, 16, 0);
    identity_block(&mut steps, "layer1_block2", 16, true, 16, 0);
    identity_block(&mut steps, "layer1_block3", 16, true, 16, 0);

    // stage 2: transition to 32 channels on the 16-wide map
    transition_block(&mut steps, "layer2_block1", 32, StridingKind::MultiChannel, 16, 1);
    identity_block(&mut steps, "layer2_block2", 32, true, 16, 1);
    identity_block(&mut steps, "layer2_block3", 32, true, 16, 1);

    // stage 3: transition to 64 channels on the 8-wide map
    transition_block(&mut steps, "layer3_block1", 64, StridingKind::SingleChannel, 16, 2);
    identity_block(&mut steps, "layer3_block2", 64, true, 32, 2);
    identity_block(&mut steps, "layer3_block3", 64, true, 32, 2);

    steps.push(LayerStep {
        name: String::new(),
        op: LayerOp::GlobalAvgPool { rot_positions: ROT_POSITIONS },
        bootstrap_before: true,
        bootstrap_after: false,
        rot_group: 3,
    });
    steps.push(LayerStep::plain(
        "layer_fc",
        LayerOp::Linear { out_size: 10, rot_positions: ROT_POSITIONS, optimized: true },
        3,
    ));

    NetworkPlan {
        network: Network::Resnet20,
        input_shape: TensorShape::map(32, 3),
        steps,
        num_groups: 4,
    }
}

/// conv1 -> ReLU -> conv2 -> add residual -> bootstrap -> ReLU.
fn identity_block(
    steps: &mut Vec<LayerStep>,
    name: &str,
    channels: usize,
    bootstrap_after_conv1: bool,
    out_scale: u64,
    group: usize,
) {
    steps.push(LayerStep::plain("", LayerOp::SaveResidual, group));
    steps.push(LayerStep {
        name: format!("{}_conv1", name),
        op: LayerOp::Conv3x3 { out_channels: channels },
        bootstrap_before: false,
        bootstrap_after: bootstrap_after_conv1,
        rot_group: group,
    });
    steps.push(LayerStep::plain("", LayerOp::Relu { scale: 8, degree: RELU_DEGREE }, group));
    steps.push(LayerStep::plain(
        &format!("{}_conv2", name),
        LayerOp::Conv3x3 { out_channels: channels },
        group,
    ));
    steps.push(LayerStep {
        name: String::new(),
        op: LayerOp::AddResidual,
        bootstrap_before: false,
        bootstrap_after: true,
        rot_group: group,
    });
    steps.push(LayerStep::plain("", LayerOp::Relu { scale: out_scale, degree: RELU_DEGREE }, group));
}

/// Fused stride-2 conv + shortcut -> ReLU -> conv2 -> add shortcut ->
/// bootstrap -> ReLU. The fused kernel is bracketed by bootstraps: the input
/// is refreshed before the two branches diverge and the main branch again
/// after, while the shortcut branch rides at its produced level until the
/// residual add evens them out.
fn transition_block(
    steps: &mut Vec<LayerStep>,
    name: &str,
    out_channels: usize,
    striding: StridingKind,
    out_scale: u64,
    group: usize,
) {
    steps.push(LayerStep {
        name: name.to_string(),
        op: LayerOp::FusedConvShortcut { out_channels, striding },
        bootstrap_before: true,
        bootstrap_after: true,
        rot_group: group,
    });
    steps.push(LayerStep::plain("", LayerOp::Relu { scale: 16, degree: RELU_DEGREE }, group));
    steps.push(LayerStep::plain(
        &format!("{}_conv2", name),
        LayerOp::Conv3x3 { out_channels },
        group,
    ));
    steps.push(LayerStep {
        name: String::new(),
        op: LayerOp::AddResidual,
        bootstrap_before: false,
        bootstrap_after: true,
        rot_group: group,
    });
    steps.push(LayerStep::plain("", LayerOp::Relu { scale: out_scale, degree: RELU_DEGREE }, group));
}
