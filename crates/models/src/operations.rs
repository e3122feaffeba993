//! Candidate operations of the DARTS search space.

use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{AvgPool2d, AvgPool2dConfig, MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig, PaddingConfig2d};
use burn::tensor::activation::relu;
use burn::tensor::{backend::Backend, Tensor};

/// Operation names in the order the architecture weights index them.
pub const PRIMITIVES: [&str; 8] = [
    "none",
    "max_pool_3x3",
    "avg_pool_3x3",
    "skip_connect",
    "sep_conv_3x3",
    "sep_conv_5x5",
    "dil_conv_3x3",
    "dil_conv_5x5",
];

/// Number of candidate operations per edge.
pub const NUM_OPS: usize = PRIMITIVES.len();

/// Index of the `none` primitive, excluded when deriving a genotype.
pub const NONE_INDEX: usize = 0;

fn conv(
    channels: [usize; 2],
    kernel: usize,
    stride: usize,
    padding: usize,
    dilation: usize,
    groups: usize,
) -> Conv2dConfig {
    Conv2dConfig::new(channels, [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_dilation([dilation, dilation])
        .with_groups(groups)
        .with_bias(false)
}

/// relu -> conv -> batch norm.
#[derive(Module, Debug)]
pub struct ReluConvBn<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> ReluConvBn<B> {
    pub fn new(
        c_in: usize,
        c_out: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
        device: &B::Device,
    ) -> Self {
        Self {
            conv: conv([c_in, c_out], kernel, stride, padding, 1, 1).init(device),
            bn: BatchNormConfig::new(c_out).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(relu(x)))
    }
}

/// Halves the spatial size with two offset stride-2 1x1 convolutions.
#[derive(Module, Debug)]
pub struct FactorizedReduce<B: Backend> {
    conv_1: Conv2d<B>,
    conv_2: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> FactorizedReduce<B> {
    pub fn new(c_in: usize, c_out: usize, device: &B::Device) -> Self {
        let half = c_out / 2;
        Self {
            conv_1: conv([c_in, half], 1, 2, 0, 1, 1).init(device),
            conv_2: conv([c_in, c_out - half], 1, 2, 0, 1, 1).init(device),
            bn: BatchNormConfig::new(c_out).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(x);
        let [n, c, h, w] = x.dims();
        let left = self.conv_1.forward(x.clone());
        // Shift by one pixel; pad back so odd sizes keep both halves aligned.
        let shifted = x.slice([0..n, 0..c, 1.min(h)..h, 1.min(w)..w]);
        let shifted = shifted.pad((0, 1, 0, 1), 0.0);
        let right = self.conv_2.forward(shifted);
        let [_, _, lh, lw] = left.dims();
        let channels = right.dims()[1];
        let right = right.slice([0..n, 0..channels, 0..lh, 0..lw]);
        self.bn.forward(Tensor::cat(vec![left, right], 1))
    }
}

/// Two stacked depthwise-separable convolutions.
#[derive(Module, Debug)]
pub struct SepConv<B: Backend> {
    depthwise_1: Conv2d<B>,
    pointwise_1: Conv2d<B>,
    bn_1: BatchNorm<B, 2>,
    depthwise_2: Conv2d<B>,
    pointwise_2: Conv2d<B>,
    bn_2: BatchNorm<B, 2>,
}

impl<B: Backend> SepConv<B> {
    pub fn new(
        c_in: usize,
        c_out: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
        device: &B::Device,
    ) -> Self {
        Self {
            depthwise_1: conv([c_in, c_in], kernel, stride, padding, 1, c_in).init(device),
            pointwise_1: conv([c_in, c_in], 1, 1, 0, 1, 1).init(device),
            bn_1: BatchNormConfig::new(c_in).init(device),
            depthwise_2: conv([c_in, c_in], kernel, 1, padding, 1, c_in).init(device),
            pointwise_2: conv([c_in, c_out], 1, 1, 0, 1, 1).init(device),
            bn_2: BatchNormConfig::new(c_out).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.depthwise_1.forward(relu(x));
        let x = self.bn_1.forward(self.pointwise_1.forward(x));
        let x = self.depthwise_2.forward(relu(x));
        self.bn_2.forward(self.pointwise_2.forward(x))
    }
}

/// Dilated depthwise-separable convolution.
#[derive(Module, Debug)]
pub struct DilConv<B: Backend> {
    depthwise: Conv2d<B>,
    pointwise: Conv2d<B>,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> DilConv<B> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        c_in: usize,
        c_out: usize,
        kernel: usize,
        stride: usize,
        padding: usize,
        dilation: usize,
        device: &B::Device,
    ) -> Self {
        Self {
            depthwise: conv([c_in, c_in], kernel, stride, padding, dilation, c_in)
                .init(device),
            pointwise: conv([c_in, c_out], 1, 1, 0, 1, 1).init(device),
            bn: BatchNormConfig::new(c_out).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.depthwise.forward(relu(x));
        self.bn.forward(self.pointwise.forward(x))
    }
}

#[derive(Module, Debug)]
pub struct MaxPoolBn<B: Backend> {
    pool: MaxPool2d,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> MaxPoolBn<B> {
    pub fn new(channels: usize, stride: usize, device: &B::Device) -> Self {
        Self {
            pool: MaxPool2dConfig::new([3, 3])
                .with_strides([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            bn: BatchNormConfig::new(channels).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.pool.forward(x))
    }
}

#[derive(Module, Debug)]
pub struct AvgPoolBn<B: Backend> {
    pool: AvgPool2d,
    bn: BatchNorm<B, 2>,
}

impl<B: Backend> AvgPoolBn<B> {
    pub fn new(channels: usize, stride: usize, device: &B::Device) -> Self {
        Self {
            pool: AvgPool2dConfig::new([3, 3])
                .with_strides([stride, stride])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .with_count_include_pad(false)
                .init(),
            bn: BatchNormConfig::new(channels).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.pool.forward(x))
    }
}

/// Softmax-weighted sum of every candidate operation on one edge.
///
/// `skip` is `None` for identity (stride 1) and a [`FactorizedReduce`] on
/// reduction edges. The `none` primitive contributes an all-zero tensor, so it
/// only takes part through the normalisation of the weights.
#[derive(Module, Debug)]
pub struct MixedOp<B: Backend> {
    max_pool: MaxPoolBn<B>,
    avg_pool: AvgPoolBn<B>,
    skip: Option<FactorizedReduce<B>>,
    sep_conv_3x3: SepConv<B>,
    sep_conv_5x5: SepConv<B>,
    dil_conv_3x3: DilConv<B>,
    dil_conv_5x5: DilConv<B>,
}

impl<B: Backend> MixedOp<B> {
    pub fn new(channels: usize, stride: usize, device: &B::Device) -> Self {
        let c = channels;
        Self {
            max_pool: MaxPoolBn::new(c, stride, device),
            avg_pool: AvgPoolBn::new(c, stride, device),
            skip: (stride != 1).then(|| FactorizedReduce::new(c, c, device)),
            sep_conv_3x3: SepConv::new(c, c, 3, stride, 1, device),
            sep_conv_5x5: SepConv::new(c, c, 5, stride, 2, device),
            dil_conv_3x3: DilConv::new(c, c, 3, stride, 2, 2, device),
            dil_conv_5x5: DilConv::new(c, c, 5, stride, 4, 2, device),
        }
    }

    /// `weights` holds one entry per [`PRIMITIVES`] element.
    pub fn forward(&self, x: Tensor<B, 4>, weights: Tensor<B, 1>) -> Tensor<B, 4> {
        let w = |i: usize| weights.clone().slice([i..i + 1]).reshape([1, 1, 1, 1]);
        let skip = match &self.skip {
            Some(reduce) => reduce.forward(x.clone()),
            None => x.clone(),
        };
        self.max_pool.forward(x.clone()) * w(1)
            + self.avg_pool.forward(x.clone()) * w(2)
            + skip * w(3)
            + self.sep_conv_3x3.forward(x.clone()) * w(4)
            + self.sep_conv_5x5.forward(x.clone()) * w(5)
            + self.dil_conv_3x3.forward(x.clone()) * w(6)
            + self.dil_conv_5x5.forward(x) * w(7)
    }
}
