//! LeNet-5 over MNIST.
//!
//! Conv1 -> ReLU -> AvgPool -> Conv2 -> ReLU -> bootstrap -> AvgPool ->
//! FC1 -> bootstrap -> ReLU -> FC2 -> bootstrap -> ReLU -> FC3, with key
//! group swaps before Conv2 and before FC1. The first pool runs on a
//! 24-wide map, so it takes the merge-based striding; the second pool's
//! 8-wide map uses the multi-channel doubling path.

use super::{LayerOp, LayerStep, NetworkPlan, TensorShape};
use crate::params::Network;
use crate::striding::StridingKind;

const ROT_POSITIONS: usize = 16;
const RELU_SCALE: u64 = 16;
const RELU_DEGREE: usize = 59;

pub fn plan() -> NetworkPlan {
    let relu = LayerOp::Relu { scale: RELU_SCALE, degree: RELU_DEGREE };
    let steps = vec![
        LayerStep::plain(
            "conv1",
            LayerOp::Convolution { kernel: 5, padding: 0, stride: 1, out_channels: 6 },
            0,
        ),
        LayerStep::plain("", relu, 0),
        LayerStep::plain(
            "",
            LayerOp::AvgPool { kernel: 2, stride: 2, striding: StridingKind::Basic },
            0,
        ),
        LayerStep::plain(
            "conv2",
            LayerOp::Convolution { kernel: 5, padding: 0, stride: 1, out_channels: 16 },
            1,
        ),
        LayerStep {
            name: String::new(),
            op: relu,
            bootstrap_before: false,
            bootstrap_after: true,
            rot_group: 1,
        },
        LayerStep::plain(
            "",
            LayerOp::AvgPool { kernel: 2, stride: 2, striding: StridingKind::MultiChannel },
            1,
        ),
        LayerStep {
            name: "fc1".to_string(),
            op: LayerOp::Linear { out_size: 120, rot_positions: ROT_POSITIONS, optimized: false },
            bootstrap_before: false,
            bootstrap_after: true,
            rot_group: 2,
        },
        LayerStep::plain("", relu, 2),
        LayerStep {
            name: "fc2".to_string(),
            op: LayerOp::Linear { out_size: 84, rot_positions: ROT_POSITIONS, optimized: false },
            bootstrap_before: false,
            bootstrap_after: true,
            rot_group: 2,
        },
        LayerStep::plain("", relu, 2),
        LayerStep::plain(
            "fc3",
            LayerOp::Linear { out_size: 10, rot_positions: ROT_POSITIONS, optimized: true },
            2,
        ),
    ];
    NetworkPlan {
        network: Network::Lenet5,
        input_shape: TensorShape::map(28, 1),
        steps,
        num_groups: 3,
    }
}
