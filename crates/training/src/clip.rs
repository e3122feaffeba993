use crate::param_vector::ParamVector;
use burn::tensor::backend::Backend;

/// Scale every gradient by `max_norm / (norm + 1e-6)` when that factor is
/// below one. Returns the global norm measured before clipping.
pub fn clip_global_norm<B: Backend>(grads: ParamVector<B>, max_norm: f64) -> (ParamVector<B>, f64) {
    let norm = grads.norm();
    let coef = max_norm / (norm + 1e-6);
    if max_norm > 0.0 && coef < 1.0 {
        (grads.scale(coef), norm)
    } else {
        (grads, norm)
    }
}
