//! CIFAR-style ResNet used as the student.

use burn::module::Module;
use burn::nn;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::PaddingConfig2d;
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResNetConfig {
    pub num_classes: usize,
    pub base_width: usize,
    /// BasicBlocks per stage; each stage after the first halves resolution.
    pub blocks: Vec<usize>,
}

impl Default for ResNetConfig {
    fn default() -> Self {
        Self {
            num_classes: 10,
            base_width: 64,
            blocks: vec![2, 2, 2, 2],
        }
    }
}

fn conv3x3(c_in: usize, c_out: usize, stride: usize) -> Conv2dConfig {
    Conv2dConfig::new([c_in, c_out], [3, 3])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_bias(false)
}

#[derive(Debug, Module)]
pub struct Shortcut<B: Backend> {
    conv: Conv2d<B>,
    bn: nn::BatchNorm<B, 2>,
}

#[derive(Debug, Module)]
pub struct BasicBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: nn::BatchNorm<B, 2>,
    conv2: Conv2d<B>,
    bn2: nn::BatchNorm<B, 2>,
    shortcut: Option<Shortcut<B>>,
}

impl<B: Backend> BasicBlock<B> {
    pub fn new(c_in: usize, c_out: usize, stride: usize, device: &B::Device) -> Self {
        let shortcut = (stride != 1 || c_in != c_out).then(|| Shortcut {
            conv: Conv2dConfig::new([c_in, c_out], [1, 1])
                .with_stride([stride, stride])
                .with_bias(false)
                .init(device),
            bn: nn::BatchNormConfig::new(c_out).init(device),
        });
        Self {
            conv1: conv3x3(c_in, c_out, stride).init(device),
            bn1: nn::BatchNormConfig::new(c_out).init(device),
            conv2: conv3x3(c_out, c_out, 1).init(device),
            bn2: nn::BatchNormConfig::new(c_out).init(device),
            shortcut,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = relu(self.bn1.forward(self.conv1.forward(x.clone())));
        let out = self.bn2.forward(self.conv2.forward(out));
        let identity = match &self.shortcut {
            Some(s) => s.bn.forward(s.conv.forward(x)),
            None => x,
        };
        relu(out + identity)
    }
}

#[derive(Debug, Module)]
pub struct ResNet<B: Backend> {
    stem_conv: Conv2d<B>,
    stem_bn: nn::BatchNorm<B, 2>,
    blocks: Vec<BasicBlock<B>>,
    head: nn::Linear<B>,
}

impl<B: Backend> ResNet<B> {
    pub fn new(cfg: &ResNetConfig, device: &B::Device) -> Self {
        let base = cfg.base_width.max(1);
        let mut blocks = Vec::new();
        let mut c_in = base;
        for (stage, count) in cfg.blocks.iter().enumerate() {
            let c_out = base << stage;
            for b in 0..*count {
                let stride = if stage > 0 && b == 0 { 2 } else { 1 };
                blocks.push(BasicBlock::new(c_in, c_out, stride, device));
                c_in = c_out;
            }
        }
        Self {
            stem_conv: conv3x3(3, base, 1).init(device),
            stem_bn: nn::BatchNormConfig::new(base).init(device),
            blocks,
            head: nn::LinearConfig::new(c_in, cfg.num_classes.max(1)).init(device),
        }
    }

    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = relu(self.stem_bn.forward(self.stem_conv.forward(images)));
        for block in &self.blocks {
            x = block.forward(x);
        }
        let [batch, channels, _, _] = x.dims();
        let pooled = x.mean_dim(3).mean_dim(2).reshape([batch, channels]);
        self.head.forward(pooled)
    }
}
