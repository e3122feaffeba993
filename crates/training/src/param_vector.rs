//! Flat, parameter-id keyed vectors over a module's trainable tensors.
//!
//! The architect needs vector arithmetic over whole networks: gradient norms,
//! `w + R * v` shifts for finite differences, and turning a combined vector
//! back into [`GradientsParams`] for an optimizer step. Entries live on the
//! inner (non-autodiff) backend so they never carry a graph.

use burn::module::{AutodiffModule, ModuleMapper, ModuleVisitor, ParamId};
use burn::optim::GradientsParams;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Tensor};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct ParamVector<B: Backend> {
    entries: HashMap<ParamId, Tensor<B, 1>>,
}

impl<B: Backend> Default for ParamVector<B> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<B: Backend> ParamVector<B> {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: &ParamId) -> Option<&Tensor<B, 1>> {
        self.entries.get(id)
    }

    pub fn insert(&mut self, id: ParamId, value: Tensor<B, 1>) {
        self.entries.insert(id, value);
    }

    pub fn num_elements(&self) -> usize {
        self.entries.values().map(|t| t.dims()[0]).sum()
    }

    /// Euclidean norm over every entry.
    pub fn norm(&self) -> f64 {
        self.dot(self).max(0.0).sqrt()
    }

    /// Sum of element-wise products over ids present in both vectors.
    pub fn dot(&self, other: &Self) -> f64 {
        let total = self
            .entries
            .iter()
            .filter_map(|(id, a)| other.entries.get(id).map(|b| (a.clone() * b.clone()).sum()))
            .reduce(|acc, x| acc + x);
        match total {
            Some(t) => t.into_scalar().elem::<f64>(),
            None => 0.0,
        }
    }

    pub fn scale(&self, factor: f64) -> Self {
        Self {
            entries: self
                .entries
                .iter()
                .map(|(id, t)| (*id, t.clone().mul_scalar(factor)))
                .collect(),
        }
    }

    /// `self += alpha * other`; ids only in `other` are inserted.
    pub fn axpy(&mut self, alpha: f64, other: &Self) {
        for (id, t) in &other.entries {
            let scaled = t.clone().mul_scalar(alpha);
            let next = match self.entries.remove(id) {
                Some(current) => current + scaled,
                None => scaled,
            };
            self.entries.insert(*id, next);
        }
    }

    /// `(self - other) / denom`, the central-difference quotient.
    pub fn difference_quotient(&self, other: &Self, denom: f64) -> Self {
        let mut out = self.clone();
        out.axpy(-1.0, other);
        out.scale(1.0 / denom)
    }

    /// Host copy of one entry, mostly for tests and diagnostics.
    pub fn to_vec(&self, id: &ParamId) -> Option<Vec<f32>> {
        self.entries.get(id).map(|t| {
            t.clone()
                .into_data()
                .convert::<f32>()
                .to_vec::<f32>()
                .unwrap_or_default()
        })
    }
}

struct GradCollector<'a, B: AutodiffBackend> {
    grads: &'a B::Gradients,
    out: ParamVector<B::InnerBackend>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradCollector<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, tensor: &Tensor<B, D>) {
        if let Some(grad) = tensor.grad(self.grads) {
            let n = grad.shape().num_elements();
            self.out.insert(id, grad.reshape([n]));
        }
    }
}

/// Gradients of `module`'s parameters, skipping tensors that got none.
pub fn collect_grads<B, M>(module: &M, grads: &B::Gradients) -> ParamVector<B::InnerBackend>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let mut collector = GradCollector::<B> {
        grads,
        out: ParamVector::default(),
    };
    module.visit(&mut collector);
    collector.out
}

struct ValueCollector<B: AutodiffBackend> {
    out: ParamVector<B::InnerBackend>,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for ValueCollector<B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, tensor: &Tensor<B, D>) {
        if tensor.is_require_grad() {
            let n = tensor.shape().num_elements();
            self.out.insert(id, tensor.clone().inner().reshape([n]));
        }
    }
}

/// Current values of the trainable tensors.
pub fn collect_values<B, M>(module: &M) -> ParamVector<B::InnerBackend>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let mut collector = ValueCollector::<B> {
        out: ParamVector::default(),
    };
    module.visit(&mut collector);
    collector.out
}

struct Shift<'a, B: AutodiffBackend> {
    dir: &'a ParamVector<B::InnerBackend>,
    scale: f64,
}

impl<B: AutodiffBackend> ModuleMapper<B> for Shift<'_, B> {
    fn map_float<const D: usize>(&mut self, id: ParamId, tensor: Tensor<B, D>) -> Tensor<B, D> {
        let Some(step) = self.dir.get(&id) else {
            return tensor;
        };
        let require_grad = tensor.is_require_grad();
        let dims = tensor.dims();
        let shifted = tensor.inner() + step.clone().reshape(dims).mul_scalar(self.scale);
        let out = Tensor::from_inner(shifted);
        if require_grad {
            out.require_grad()
        } else {
            out
        }
    }
}

/// `w + scale * dir` for every parameter present in `dir`. Ids and
/// `require_grad` flags are preserved, the result is a fresh graph leaf.
pub fn shift_module<B, M>(module: M, dir: &ParamVector<B::InnerBackend>, scale: f64) -> M
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    module.map(&mut Shift::<B> { dir, scale })
}

struct Register<'a, B: AutodiffBackend> {
    vec: &'a ParamVector<B::InnerBackend>,
    out: GradientsParams,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for Register<'_, B> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, tensor: &Tensor<B, D>) {
        if let Some(g) = self.vec.get(&id) {
            self.out
                .register::<B::InnerBackend, D>(id, g.clone().reshape(tensor.dims()));
        }
    }
}

/// Reshape `vec` onto `module`'s parameters for an optimizer step.
pub fn to_gradients<B, M>(module: &M, vec: &ParamVector<B::InnerBackend>) -> GradientsParams
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let mut register = Register::<B> {
        vec,
        out: GradientsParams::new(),
    };
    module.visit(&mut register);
    register.out
}
