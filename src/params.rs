//! Parameter sets: instance sizing, CKKS budgets per network, dataset shapes.
//!
//! The evaluator never chooses CKKS parameters on its own; each network ships
//! a named preset the caller can inspect or override, the same way the crypto
//! layer this crate drives exposes named parameter sets.

use crate::error::{EvalError, Result};

/// Benchmark instance size, selecting the batch to process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceSize {
    Single,
    Small,
    Medium,
    Large,
}

impl InstanceSize {
    pub fn from_arg(v: usize) -> Result<Self> {
        match v {
            0 => Ok(InstanceSize::Single),
            1 => Ok(InstanceSize::Small),
            2 => Ok(InstanceSize::Medium),
            3 => Ok(InstanceSize::Large),
            _ => Err(EvalError::InvalidParams(format!(
                "instance size must be 0..=3, got {}",
                v
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            InstanceSize::Single => "single",
            InstanceSize::Small => "small",
            InstanceSize::Medium => "medium",
            InstanceSize::Large => "large",
        }
    }

    pub fn batch_size(&self) -> usize {
        match self {
            InstanceSize::Single => 1,
            InstanceSize::Small => 15,
            InstanceSize::Medium => 1000,
            InstanceSize::Large => 10000,
        }
    }
}

/// CKKS budget parameters the caller hands to the backend.
///
/// `depth` is the multiplicative budget of a fresh ciphertext; every
/// plaintext multiply, merge, and Chebyshev evaluation consumes from it.
/// `bootstrap_level` is the budget a bootstrapped ciphertext comes back with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CkksParams {
    /// Packed slot count (ring dimension / 2)
    pub num_slots: usize,
    /// Fresh multiplicative budget
    pub depth: usize,
    /// Budget restored by a bootstrap
    pub bootstrap_level: usize,
}

impl CkksParams {
    /// MLP over MNIST: 4096 slots, depth 22, no bootstrapping
    /// (the whole linear stack fits the fresh budget).
    pub fn mlp() -> Self {
        Self { num_slots: 1 << 12, depth: 22, bootstrap_level: 22 }
    }

    /// LeNet-5 over MNIST: 4096 slots. The segment up to the second ReLU
    /// consumes 24 levels; three bootstraps later in the plan restore 12.
    pub fn lenet5() -> Self {
        Self { num_slots: 1 << 12, depth: 26, bootstrap_level: 12 }
    }

    /// ResNet-20 over CIFAR-10: 16384 slots (16 channels of a 32x32 map fill
    /// the ciphertext exactly). Worst bootstrap-free segment is the fused
    /// stage transition at 9 levels plus the following ReLU.
    pub fn resnet20() -> Self {
        Self { num_slots: 1 << 14, depth: 26, bootstrap_level: 13 }
    }
}

/// Which fixed network a binary or driver is working with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mlp,
    Lenet5,
    Resnet20,
}

impl Network {
    pub fn from_arg(s: &str) -> Result<Self> {
        match s {
            "mlp" => Ok(Network::Mlp),
            "lenet5" => Ok(Network::Lenet5),
            "resnet20" => Ok(Network::Resnet20),
            other => Err(EvalError::InvalidParams(format!(
                "unknown network '{}' (expected mlp, lenet5 or resnet20)",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Network::Mlp => "mlp",
            Network::Lenet5 => "lenet5",
            Network::Resnet20 => "resnet20",
        }
    }

    pub fn ckks_params(&self) -> CkksParams {
        match self {
            Network::Mlp => CkksParams::mlp(),
            Network::Lenet5 => CkksParams::lenet5(),
            Network::Resnet20 => CkksParams::resnet20(),
        }
    }

    /// Raw floats per input line.
    pub fn input_dim(&self) -> usize {
        match self {
            Network::Mlp | Network::Lenet5 => 784,
            Network::Resnet20 => 3072,
        }
    }

    /// Slot count an input image is padded to before encryption.
    pub fn padded_dim(&self) -> usize {
        match self {
            Network::Mlp | Network::Lenet5 => 1024,
            Network::Resnet20 => 4096,
        }
    }

    pub fn num_classes(&self) -> usize {
        10
    }
}

/// Per-pixel MNIST normalisation.
pub const MNIST_MEAN: f64 = 0.1307;
pub const MNIST_STD: f64 = 0.3081;

/// Per-channel CIFAR-10 normalisation (R, G, B).
pub const CIFAR10_MEAN: [f64; 3] = [0.4914, 0.4822, 0.4465];
pub const CIFAR10_STD: [f64; 3] = [0.2023, 0.1994, 0.2010];
