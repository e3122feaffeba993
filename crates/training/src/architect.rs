//! Alpha updates: the search-loss term and the teaching term.
//!
//! Both terms approximate the bi-level gradient with a simulated SGD step of
//! the network weights (`w' = w - eta * dw`). The second-order parts are
//! central finite differences along the relevant gradient, with radius
//! `finite_diff_scale / ||v||` (0.01 by default).

use crate::loss::{cross_entropy, loss_value, soft_cross_entropy};
use crate::optim::{arch_adam_config, fork_sgd, ArchOptimizer, NetworkOptimizer, StudentOptimizer};
use crate::param_vector::{collect_grads, shift_module, to_gradients, ParamVector};
use burn::module::Module;
use burn::optim::{GradientsParams, Optimizer, SgdConfig};
use burn::tensor::backend::AutodiffBackend;
use burn_dataset::ClassBatch;
use models::{ArchParams, ResNet, SearchNetwork};

/// Default numerator of the finite-difference radius `scale / ||v||`.
pub const FINITE_DIFF_SCALE: f64 = 0.01;

#[derive(Clone)]
pub struct ArchitectConfig {
    pub arch_learning_rate: f64,
    pub arch_weight_decay: f64,
    /// Settings of the teacher's SGD, replayed for the simulated step.
    pub network_sgd: SgdConfig,
    /// Settings of the student's SGD, replayed for the simulated step.
    pub student_sgd: SgdConfig,
    pub lambda_par: f64,
    /// Finite differences step `finite_diff_scale / ||v||` along `v`.
    pub finite_diff_scale: f64,
}

/// Diagnostics from one alpha update.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ArchStepStats {
    /// Outer loss the update descends (search loss of the teacher, or of the
    /// unrolled student for the teaching term).
    pub loss: f64,
    pub grad_norm: f64,
}

pub struct Architect<B: AutodiffBackend> {
    cfg: ArchitectConfig,
    optim: ArchOptimizer<B>,
}

impl<B: AutodiffBackend> Architect<B> {
    pub fn new(cfg: ArchitectConfig) -> Self {
        let optim = arch_adam_config(cfg.arch_weight_decay).init();
        Self { cfg, optim }
    }

    pub fn optimizer(&self) -> &ArchOptimizer<B> {
        &self.optim
    }

    pub fn set_optimizer(&mut self, optim: ArchOptimizer<B>) {
        self.optim = optim;
    }

    /// First outer term: descend the teacher's search loss with respect to alpha.
    #[allow(clippy::too_many_arguments)]
    pub fn step(
        &mut self,
        arch: ArchParams<B>,
        network: &SearchNetwork<B>,
        network_optim: &NetworkOptimizer<B>,
        train: &ClassBatch<B>,
        search: &ClassBatch<B>,
        eta: f64,
        unrolled: bool,
    ) -> (ArchParams<B>, ArchStepStats) {
        let (dalpha, loss) =
            self.search_gradient(&arch, network, network_optim, train, search, eta, unrolled);
        self.apply(arch, dalpha, 1.0, loss)
    }

    /// Second outer term: descend the search loss of a student that was
    /// taught, for one simulated step, by the unrolled teacher.
    #[allow(clippy::too_many_arguments)]
    pub fn step_teaching(
        &mut self,
        arch: ArchParams<B>,
        network: &SearchNetwork<B>,
        network_optim: &NetworkOptimizer<B>,
        student: &ResNet<B>,
        student_optim: &StudentOptimizer<B>,
        batches: TeachingBatches<'_, B>,
        eta: f64,
        student_eta: f64,
    ) -> (ArchParams<B>, ArchStepStats) {
        let (dalpha, loss) = self.teaching_gradient(
            &arch,
            network,
            network_optim,
            student,
            student_optim,
            batches,
            eta,
            student_eta,
        );
        let scale = self.cfg.lambda_par;
        self.apply(arch, dalpha, scale, loss)
    }

    /// Alpha gradient of the search loss (at `w'` when `unrolled`), plus the
    /// loss value. Nothing is updated.
    #[allow(clippy::too_many_arguments)]
    pub fn search_gradient(
        &self,
        arch: &ArchParams<B>,
        network: &SearchNetwork<B>,
        network_optim: &NetworkOptimizer<B>,
        train: &ClassBatch<B>,
        search: &ClassBatch<B>,
        eta: f64,
        unrolled: bool,
    ) -> (ParamVector<B::InnerBackend>, f64) {
        if unrolled {
            return self.unrolled_search_grad(arch, network, network_optim, train, search, eta);
        }
        let loss = cross_entropy(
            network.clone().no_grad().forward(search.images.clone(), arch),
            search.targets.clone(),
        );
        let value = loss_value(&loss);
        (collect_grads(arch, &loss.backward()), value)
    }

    /// Alpha gradient of the taught student's search loss, before the
    /// `lambda_par` weighting, plus that loss. Empty when the student's
    /// gradient vanishes. Nothing is updated.
    #[allow(clippy::too_many_arguments)]
    pub fn teaching_gradient(
        &self,
        arch: &ArchParams<B>,
        network: &SearchNetwork<B>,
        network_optim: &NetworkOptimizer<B>,
        student: &ResNet<B>,
        student_optim: &StudentOptimizer<B>,
        batches: TeachingBatches<'_, B>,
        eta: f64,
        student_eta: f64,
    ) -> (ParamVector<B::InnerBackend>, f64) {
        let TeachingBatches {
            train,
            search,
            unlabeled,
        } = batches;

        // Teacher after one simulated step on its own training loss.
        let teacher = self.unroll_network(arch, network, network_optim, train, eta);

        // Student after one simulated distillation step.
        let taught = {
            let teacher_logits = teacher
                .clone()
                .no_grad()
                .forward(unlabeled.images.clone(), &arch.clone().no_grad())
                .detach();
            let loss = soft_cross_entropy(student.forward(unlabeled.images.clone()), teacher_logits);
            let grads = GradientsParams::from_grads(loss.backward(), student);
            fork_sgd(&self.cfg.student_sgd, student_optim).step(student_eta, student.clone(), grads)
        };

        let outer = cross_entropy(taught.forward(search.images.clone()), search.targets.clone());
        let outer_value = loss_value(&outer);
        let student_grad = collect_grads(&taught, &outer.backward());

        // Mixed second derivatives of the distillation loss, student x (teacher, alpha).
        let Some((teacher_dir, direct)) =
            self.distill_cross_terms(arch, &teacher, student, &student_grad, unlabeled)
        else {
            return (ParamVector::default(), outer_value);
        };

        // Teacher path: chain through w' = w - eta * dL_train/dw.
        let u = teacher_dir.scale(-student_eta);
        let implicit = self.hessian_vector_product(arch, network, &u, train);

        let mut dalpha = direct.scale(-student_eta);
        dalpha.axpy(-eta, &implicit);
        (dalpha, outer_value)
    }

    fn apply(
        &mut self,
        arch: ArchParams<B>,
        dalpha: ParamVector<B::InnerBackend>,
        scale: f64,
        loss: f64,
    ) -> (ArchParams<B>, ArchStepStats) {
        let dalpha = if scale == 1.0 { dalpha } else { dalpha.scale(scale) };
        let grad_norm = dalpha.norm();
        let stats = ArchStepStats { loss, grad_norm };
        if dalpha.is_empty() || !grad_norm.is_finite() {
            if !grad_norm.is_finite() {
                tracing::warn!("skipping alpha update with non-finite gradient");
            }
            return (arch, stats);
        }
        let grads = to_gradients(&arch, &dalpha);
        let arch = self.optim.step(self.cfg.arch_learning_rate, arch, grads);
        (arch, stats)
    }

    /// `w' = w - eta * (momentum + grad + weight_decay * w)` on the training batch.
    fn unroll_network(
        &self,
        arch: &ArchParams<B>,
        network: &SearchNetwork<B>,
        network_optim: &NetworkOptimizer<B>,
        batch: &ClassBatch<B>,
        eta: f64,
    ) -> SearchNetwork<B> {
        let logits = network.forward(batch.images.clone(), &arch.clone().no_grad());
        let loss = cross_entropy(logits, batch.targets.clone());
        let grads = GradientsParams::from_grads(loss.backward(), network);
        fork_sgd(&self.cfg.network_sgd, network_optim).step(eta, network.clone(), grads)
    }

    fn unrolled_search_grad(
        &self,
        arch: &ArchParams<B>,
        network: &SearchNetwork<B>,
        network_optim: &NetworkOptimizer<B>,
        train: &ClassBatch<B>,
        search: &ClassBatch<B>,
        eta: f64,
    ) -> (ParamVector<B::InnerBackend>, f64) {
        let unrolled = self.unroll_network(arch, network, network_optim, train, eta);
        let loss = cross_entropy(
            unrolled.forward(search.images.clone(), arch),
            search.targets.clone(),
        );
        let value = loss_value(&loss);
        let grads = loss.backward();
        let mut dalpha = collect_grads(arch, &grads);
        let v = collect_grads(&unrolled, &grads);
        let implicit = self.hessian_vector_product(arch, network, &v, train);
        dalpha.axpy(-eta, &implicit);
        (dalpha, value)
    }

    /// Finite-difference `d/dalpha (dL_train/dw . v)` around the current weights.
    pub fn hessian_vector_product(
        &self,
        arch: &ArchParams<B>,
        network: &SearchNetwork<B>,
        v: &ParamVector<B::InnerBackend>,
        batch: &ClassBatch<B>,
    ) -> ParamVector<B::InnerBackend> {
        let Some(r) = self.radius(v) else {
            return ParamVector::default();
        };
        let alpha_grad = |shifted: SearchNetwork<B>| {
            let loss = cross_entropy(
                shifted.no_grad().forward(batch.images.clone(), arch),
                batch.targets.clone(),
            );
            collect_grads(arch, &loss.backward())
        };
        let plus = alpha_grad(shift_module(network.clone(), v, r));
        let minus = alpha_grad(shift_module(network.clone(), v, -r));
        plus.difference_quotient(&minus, 2.0 * r)
    }

    /// Differentiates the distillation loss at `student +/- R * dir` with
    /// respect to the unrolled teacher weights and alpha. Returns `None` when
    /// `dir` has no usable norm.
    fn distill_cross_terms(
        &self,
        arch: &ArchParams<B>,
        teacher: &SearchNetwork<B>,
        student: &ResNet<B>,
        dir: &ParamVector<B::InnerBackend>,
        unlabeled: &ClassBatch<B>,
    ) -> Option<(ParamVector<B::InnerBackend>, ParamVector<B::InnerBackend>)> {
        let r = self.radius(dir)?;
        let grads_at = |scale: f64| {
            let shifted = shift_module(student.clone(), dir, scale).no_grad();
            let teacher_logits = teacher.forward(unlabeled.images.clone(), arch);
            let loss = soft_cross_entropy(shifted.forward(unlabeled.images.clone()), teacher_logits);
            let grads = loss.backward();
            (collect_grads(teacher, &grads), collect_grads(arch, &grads))
        };
        let (teacher_plus, arch_plus) = grads_at(r);
        let (teacher_minus, arch_minus) = grads_at(-r);
        Some((
            teacher_plus.difference_quotient(&teacher_minus, 2.0 * r),
            arch_plus.difference_quotient(&arch_minus, 2.0 * r),
        ))
    }

    fn radius<K: burn::tensor::backend::Backend>(&self, v: &ParamVector<K>) -> Option<f64> {
        let norm = v.norm();
        (norm.is_finite() && norm > 0.0).then(|| self.cfg.finite_diff_scale / norm)
    }
}

/// Batches consumed by [`Architect::step_teaching`].
pub struct TeachingBatches<'a, B: AutodiffBackend> {
    pub train: &'a ClassBatch<B>,
    pub search: &'a ClassBatch<B>,
    pub unlabeled: &'a ClassBatch<B>,
}

impl<B: AutodiffBackend> Clone for TeachingBatches<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B: AutodiffBackend> Copy for TeachingBatches<'_, B> {}
