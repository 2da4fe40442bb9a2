//! slotnet: packed-ciphertext CNN evaluation over CKKS.
//!
//! A client encrypts an image into one CKKS ciphertext; a server evaluates a
//! fixed network (an MLP or LeNet-5 over MNIST, ResNet-20 over CIFAR-10)
//! without ever seeing the plaintext, and returns a ciphertext that decrypts
//! to class logits.
//!
//! The crate is the tensor evaluator between those two parties:
//!
//! - [`masks`]: the slot masks that gate live regions of a ciphertext
//! - [`striding`]: strided downsampling of slot-tiled feature maps
//! - [`layers`]: convolution, pooling, fully connected and Chebyshev-ReLU
//!   kernels built from slotwise arithmetic and rotations
//! - [`rotation_plan`]: the exact rotation offsets each kernel needs, so
//!   automorphism keys are generated ahead of time and streamed per layer
//! - [`network`]: declarative per-network plans and the level-managing
//!   interpreter that runs them
//! - [`backend`]: the facade over the CKKS primitive library, plus an exact
//!   reference backend that makes the whole pipeline testable
//!
//! The CKKS scheme itself (key generation, encoding, polynomial arithmetic,
//! bootstrapping internals) is deliberately out of scope: everything here
//! talks to it through [`backend::CkksBackend`].
//!
//! Threat model: semi-honest server, computational confidentiality only.
//! ReLU pre-scales are fixed offline in the network plans; the secret-key
//! range probes in [`context::EvalContext`] exist for that offline
//! calibration and are never part of the server path.

pub mod backend;
pub mod context;
pub mod dataset;
pub mod error;
pub mod layers;
pub mod masks;
pub mod network;
pub mod params;
pub mod rotation_plan;
pub mod storage;
pub mod striding;
pub mod weights;

pub use backend::{CkksBackend, ReferenceBackend};
pub use context::EvalContext;
pub use error::{EvalError, Result};
pub use params::{CkksParams, InstanceSize, Network};
