//! Polynomial ReLU.
//!
//! The backend approximates `x < 0 ? 0 : scale * x` on [-1, 1] with a
//! Chebyshev polynomial; inputs whose range exceeds [-1, 1] are pre-scaled
//! by 1/scale so the approximation domain is honoured, and the function's
//! `scale * x` positive branch restores the magnitude. Scales are fixed in
//! the network plans; picking them is an offline calibration step.

use crate::backend::CkksBackend;
use crate::context::EvalContext;
use crate::error::Result;
use crate::masks::MaskKind;

/// Chebyshev ReLU over the first `vector_size` slots.
///
/// Consumes one level for the pre-scale when `scale > 1`, plus the
/// Chebyshev depth for `degree`.
pub fn relu<B: CkksBackend>(
    ctx: &EvalContext<B>,
    ct: &B::Ciphertext,
    scale: u64,
    vector_size: usize,
    degree: usize,
) -> Result<B::Ciphertext> {
    let be = ctx.backend();
    let scaled;
    let input = if scale > 1 {
        let mask = ctx.mask(
            MaskKind::Scale { denom: scale, len: vector_size },
            be.level(ct),
        )?;
        scaled = be.mul_plain(ct, &mask)?;
        &scaled
    } else {
        ct
    };
    let gain = scale.max(1) as f64;
    be.chebyshev(
        &move |x| if x < 0.0 { 0.0 } else { gain * x },
        input,
        -1.0,
        1.0,
        degree,
    )
}
