use crate::operations::{FactorizedReduce, MixedOp, ReluConvBn, NUM_OPS};
use burn::module::Module;
use burn::tensor::{backend::Backend, Tensor};

/// A searchable cell: two preprocessed inputs, `steps` intermediate nodes,
/// every node connected to all earlier states through a [`MixedOp`].
#[derive(Module, Debug)]
pub struct SearchCell<B: Backend> {
    /// Used when the previous cell was a reduction cell.
    preprocess0_reduce: Option<FactorizedReduce<B>>,
    preprocess0: Option<ReluConvBn<B>>,
    preprocess1: ReluConvBn<B>,
    edges: Vec<MixedOp<B>>,
    steps: usize,
    multiplier: usize,
    reduction: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct CellShape {
    pub steps: usize,
    pub multiplier: usize,
    pub c_prev_prev: usize,
    pub c_prev: usize,
    pub channels: usize,
    pub reduction: bool,
    pub reduction_prev: bool,
}

impl<B: Backend> SearchCell<B> {
    pub fn new(shape: CellShape, device: &B::Device) -> Self {
        let c = shape.channels;
        let (preprocess0_reduce, preprocess0) = if shape.reduction_prev {
            (Some(FactorizedReduce::new(shape.c_prev_prev, c, device)), None)
        } else {
            (None, Some(ReluConvBn::new(shape.c_prev_prev, c, 1, 1, 0, device)))
        };
        let mut edges = Vec::new();
        for i in 0..shape.steps {
            for j in 0..(2 + i) {
                let stride = if shape.reduction && j < 2 { 2 } else { 1 };
                edges.push(MixedOp::new(c, stride, device));
            }
        }
        Self {
            preprocess0_reduce,
            preprocess0,
            preprocess1: ReluConvBn::new(shape.c_prev, c, 1, 1, 0, device),
            edges,
            steps: shape.steps,
            multiplier: shape.multiplier,
            reduction: shape.reduction,
        }
    }

    pub fn is_reduction(&self) -> bool {
        self.reduction
    }

    /// `weights` is the softmax of this cell kind's alphas, `[edges, ops]`.
    pub fn forward(&self, s0: Tensor<B, 4>, s1: Tensor<B, 4>, weights: Tensor<B, 2>) -> Tensor<B, 4> {
        let s0 = match (&self.preprocess0_reduce, &self.preprocess0) {
            (Some(reduce), _) => reduce.forward(s0),
            (None, Some(conv)) => conv.forward(s0),
            (None, None) => s0,
        };
        let s1 = self.preprocess1.forward(s1);

        let mut states = vec![s0, s1];
        let mut offset = 0;
        for _ in 0..self.steps {
            let mut node: Option<Tensor<B, 4>> = None;
            for (j, h) in states.iter().enumerate() {
                let k = offset + j;
                let w = weights.clone().slice([k..k + 1, 0..NUM_OPS]).reshape([NUM_OPS]);
                let out = self.edges[k].forward(h.clone(), w);
                node = Some(match node {
                    Some(acc) => acc + out,
                    None => out,
                });
            }
            offset += states.len();
            if let Some(node) = node {
                states.push(node);
            }
        }
        let start = states.len().saturating_sub(self.multiplier);
        Tensor::cat(states.split_off(start), 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::num_edges;
    use burn::tensor::Distribution;

    type TestBackend = burn_ndarray::NdArray<f32>;

    fn uniform(edges: usize) -> Tensor<TestBackend, 2> {
        Tensor::ones([edges, NUM_OPS], &Default::default()).div_scalar(NUM_OPS as f32)
    }

    #[test]
    fn reduction_cell_after_reduction_halves_and_concatenates() {
        let device = Default::default();
        let shape = CellShape {
            steps: 2,
            multiplier: 2,
            c_prev_prev: 6,
            c_prev: 8,
            channels: 4,
            reduction: true,
            reduction_prev: true,
        };
        let cell = SearchCell::<TestBackend>::new(shape, &device);
        let s0 = Tensor::random([2, 6, 16, 16], Distribution::Normal(0.0, 1.0), &device);
        let s1 = Tensor::random([2, 8, 8, 8], Distribution::Normal(0.0, 1.0), &device);
        let out = cell.forward(s0, s1, uniform(num_edges(2)));
        assert_eq!(out.dims(), [2, 8, 4, 4]);
    }
}
