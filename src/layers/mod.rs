//! Ciphertext-level neural network layer kernels.
//!
//! Every kernel consumes the current ciphertext plus raw layer weights,
//! encodes the weights at the level they will meet the ciphertext, and
//! returns a freshly owned ciphertext. Level consumption per kernel is fixed
//! by the shapes alone; the network plans account for it statically.

pub mod activation;
pub mod conv;
pub mod linear;
pub mod pool;

pub use activation::relu;
pub use conv::{
    add_ciphertexts, convolution, convolution_3x3, fused_conv_shortcut, shortcut_convolution,
};
pub use linear::{linear, linear_optimized};
pub use pool::{avgpool, global_avgpool};
