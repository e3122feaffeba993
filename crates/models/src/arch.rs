//! Architecture parameters (alphas) of the search network.

use crate::operations::NUM_OPS;
use burn::module::{Module, Param};
use burn::tensor::activation::softmax;
use burn::tensor::{backend::Backend, Distribution, Tensor};

/// Number of mixed edges in a cell with `steps` intermediate nodes.
pub fn num_edges(steps: usize) -> usize {
    (0..steps).map(|i| i + 2).sum()
}

/// Scale of the normal noise the alphas start from.
pub const ALPHA_INIT_SCALE: f64 = 1e-3;

/// One row per edge, one column per candidate operation.
#[derive(Module, Debug)]
pub struct ArchParams<B: Backend> {
    pub alphas_normal: Param<Tensor<B, 2>>,
    pub alphas_reduce: Param<Tensor<B, 2>>,
}

impl<B: Backend> ArchParams<B> {
    pub fn new(steps: usize, device: &B::Device) -> Self {
        let shape = [num_edges(steps), NUM_OPS];
        let init = || {
            Tensor::<B, 2>::random(shape, Distribution::Normal(0.0, 1.0), device)
                .mul_scalar(ALPHA_INIT_SCALE)
        };
        Self {
            alphas_normal: Param::from_tensor(init()),
            alphas_reduce: Param::from_tensor(init()),
        }
    }

    pub fn from_tensors(normal: Tensor<B, 2>, reduce: Tensor<B, 2>) -> Self {
        Self {
            alphas_normal: Param::from_tensor(normal),
            alphas_reduce: Param::from_tensor(reduce),
        }
    }

    pub fn num_edges(&self) -> usize {
        self.alphas_normal.dims()[0]
    }

    /// Row-wise softmax of the normal-cell alphas.
    pub fn normal_weights(&self) -> Tensor<B, 2> {
        softmax(self.alphas_normal.val(), 1)
    }

    /// Row-wise softmax of the reduction-cell alphas.
    pub fn reduce_weights(&self) -> Tensor<B, 2> {
        softmax(self.alphas_reduce.val(), 1)
    }

    /// Softmax weights copied to host memory as `(normal, reduce)` row vectors.
    pub fn weights_to_vec(&self) -> (Vec<Vec<f32>>, Vec<Vec<f32>>) {
        (
            rows(self.normal_weights()),
            rows(self.reduce_weights()),
        )
    }
}

fn rows<B: Backend>(tensor: Tensor<B, 2>) -> Vec<Vec<f32>> {
    let [_, cols] = tensor.dims();
    let flat: Vec<f32> = tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .unwrap_or_default();
    flat.chunks(cols.max(1)).map(<[f32]>::to_vec).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestBackend = burn_ndarray::NdArray<f32>;

    #[test]
    fn four_steps_give_fourteen_edges() {
        assert_eq!(num_edges(4), 14);
        assert_eq!(num_edges(1), 2);
    }

    #[test]
    fn alphas_start_small_and_weights_are_distributions() {
        let arch = ArchParams::<TestBackend>::new(4, &Default::default());
        assert_eq!(arch.alphas_normal.dims(), [14, NUM_OPS]);
        let max: f32 = arch.alphas_reduce.val().abs().max().into_scalar();
        assert!(max < 0.01);

        let (normal, reduce) = arch.weights_to_vec();
        assert_eq!(normal.len(), 14);
        for row in normal.iter().chain(reduce.iter()) {
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
        }
    }
}
