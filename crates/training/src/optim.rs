//! Optimizer types for the three parameter groups.

use burn::module::AutodiffModule;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{Adam, AdamConfig, Optimizer, Sgd, SgdConfig};
use burn::tensor::backend::AutodiffBackend;
use models::{ArchParams, ResNet, SearchNetwork};

pub type NetworkOptimizer<B> =
    OptimizerAdaptor<Sgd<<B as AutodiffBackend>::InnerBackend>, SearchNetwork<B>, B>;
pub type StudentOptimizer<B> =
    OptimizerAdaptor<Sgd<<B as AutodiffBackend>::InnerBackend>, ResNet<B>, B>;
pub type ArchOptimizer<B> = OptimizerAdaptor<Adam, ArchParams<B>, B>;

/// SGD with heavy-ball momentum (no dampening) and L2 weight decay.
pub fn sgd_config(momentum: f64, weight_decay: f64) -> SgdConfig {
    SgdConfig::new()
        .with_momentum(Some(
            MomentumConfig::new()
                .with_momentum(momentum)
                .with_dampening(0.0)
                .with_nesterov(false),
        ))
        .with_weight_decay(Some(WeightDecayConfig::new(weight_decay as f32)))
}

/// Adam over the alphas with betas (0.5, 0.999).
pub fn arch_adam_config(weight_decay: f64) -> AdamConfig {
    AdamConfig::new()
        .with_beta_1(0.5)
        .with_beta_2(0.999)
        .with_weight_decay(Some(WeightDecayConfig::new(weight_decay as f32)))
}

/// Fresh optimizer carrying a copy of `optim`'s per-parameter state, so a
/// simulated step leaves the real momentum buffers untouched.
pub fn fork_sgd<B, M>(
    config: &SgdConfig,
    optim: &OptimizerAdaptor<Sgd<B::InnerBackend>, M, B>,
) -> OptimizerAdaptor<Sgd<B::InnerBackend>, M, B>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    config.init::<B, M>().load_record(optim.to_record())
}
