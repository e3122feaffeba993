use crate::arch::ArchParams;
use crate::cell::{CellShape, SearchCell};
use burn::module::Module;
use burn::nn;
use burn::nn::conv::Conv2dConfig;
use burn::nn::PaddingConfig2d;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchNetworkConfig {
    pub init_channels: usize,
    pub num_classes: usize,
    pub layers: usize,
    pub steps: usize,
    pub multiplier: usize,
    pub stem_multiplier: usize,
}

impl Default for SearchNetworkConfig {
    fn default() -> Self {
        Self {
            init_channels: 16,
            num_classes: 10,
            layers: 8,
            steps: 4,
            multiplier: 4,
            stem_multiplier: 3,
        }
    }
}

impl SearchNetworkConfig {
    /// Cell indices that halve the resolution.
    pub fn reduction_layers(&self) -> [usize; 2] {
        [self.layers / 3, 2 * self.layers / 3]
    }
}

/// Stacked search cells over a conv stem, shared alphas per cell kind.
#[derive(Debug, Module)]
pub struct SearchNetwork<B: Backend> {
    stem_conv: nn::conv::Conv2d<B>,
    stem_bn: nn::BatchNorm<B, 2>,
    cells: Vec<SearchCell<B>>,
    classifier: nn::Linear<B>,
    num_classes: usize,
}

impl<B: Backend> SearchNetwork<B> {
    pub fn new(cfg: &SearchNetworkConfig, device: &B::Device) -> Self {
        let c = cfg.init_channels.max(1);
        let steps = cfg.steps.max(1);
        let multiplier = cfg.multiplier.clamp(1, steps);
        let mut c_curr = cfg.stem_multiplier.max(1) * c;
        let stem_conv = Conv2dConfig::new([3, c_curr], [3, 3])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);
        let stem_bn = nn::BatchNormConfig::new(c_curr).init(device);

        let (mut c_prev_prev, mut c_prev) = (c_curr, c_curr);
        c_curr = c;
        let reductions = cfg.reduction_layers();
        let mut reduction_prev = false;
        let mut cells = Vec::with_capacity(cfg.layers);
        for i in 0..cfg.layers {
            let reduction = reductions.contains(&i);
            if reduction {
                c_curr *= 2;
            }
            cells.push(SearchCell::new(
                CellShape {
                    steps,
                    multiplier,
                    c_prev_prev,
                    c_prev,
                    channels: c_curr,
                    reduction,
                    reduction_prev,
                },
                device,
            ));
            reduction_prev = reduction;
            c_prev_prev = c_prev;
            c_prev = multiplier * c_curr;
        }
        let classifier = nn::LinearConfig::new(c_prev, cfg.num_classes.max(1)).init(device);
        Self {
            stem_conv,
            stem_bn,
            cells,
            classifier,
            num_classes: cfg.num_classes.max(1),
        }
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Logits `[batch, num_classes]` for images `[batch, 3, h, w]`.
    pub fn forward(&self, images: Tensor<B, 4>, arch: &ArchParams<B>) -> Tensor<B, 2> {
        let normal = arch.normal_weights();
        let reduce = arch.reduce_weights();
        let stem = self.stem_bn.forward(self.stem_conv.forward(images));
        let (mut s0, mut s1) = (stem.clone(), stem);
        for cell in &self.cells {
            let weights = if cell.is_reduction() {
                reduce.clone()
            } else {
                normal.clone()
            };
            let next = cell.forward(s0, s1.clone(), weights);
            s0 = s1;
            s1 = next;
        }
        let [batch, channels, _, _] = s1.dims();
        // Global average pool.
        let pooled = s1.mean_dim(3).mean_dim(2).reshape([batch, channels]);
        self.classifier.forward(pooled)
    }
}
