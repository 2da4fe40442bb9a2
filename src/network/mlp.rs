//! MLP over MNIST: a three-layer linear stack with low-degree Chebyshev
//! activations. The whole network fits the fresh level budget, so there is
//! no bootstrapping and a single rotation-key group covers every layer.

use super::{LayerOp, LayerStep, NetworkPlan, TensorShape};
use crate::params::Network;

const ROT_POSITIONS: usize = 16;

pub fn plan() -> NetworkPlan {
    let steps = vec![
        LayerStep::plain(
            "fc1",
            LayerOp::Linear { out_size: 256, rot_positions: ROT_POSITIONS, optimized: false },
            0,
        ),
        LayerStep::plain("", LayerOp::Relu { scale: 8, degree: 27 }, 0),
        LayerStep::plain(
            "fc2",
            LayerOp::Linear { out_size: 128, rot_positions: ROT_POSITIONS, optimized: false },
            0,
        ),
        LayerStep::plain("", LayerOp::Relu { scale: 8, degree: 27 }, 0),
        LayerStep::plain(
            "fc3",
            LayerOp::Linear { out_size: 10, rot_positions: ROT_POSITIONS, optimized: true },
            0,
        ),
    ];
    NetworkPlan {
        network: Network::Mlp,
        input_shape: TensorShape::vector(784),
        steps,
        num_groups: 1,
    }
}
