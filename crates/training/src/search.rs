//! The search loop: alternating alpha, teacher and student updates.

use crate::architect::{Architect, ArchitectConfig, TeachingBatches, FINITE_DIFF_SCALE};
use crate::checkpoint::{self, CheckpointError, Progress};
use crate::clip::clip_global_norm;
use crate::config::{ConfigError, SearchConfig};
use crate::experiment::{init_logging, Experiment, CONFIG_SNAPSHOT};
use crate::loss::{cross_entropy, loss_value, soft_cross_entropy};
use crate::meter::{accuracy, format_sci, AvgMeter};
use crate::optim::{sgd_config, NetworkOptimizer, StudentOptimizer};
use crate::param_vector::{collect_grads, to_gradients};
use crate::schedule::cosine_schedule;
use crate::TrainBackend;
use burn::backend::Autodiff;
use burn::lr_scheduler::cosine::CosineAnnealingLrScheduler;
use burn::lr_scheduler::LrScheduler;
use burn::module::{AutodiffModule, Module};
use burn::optim::{GradientsParams, Optimizer};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn_dataset::{
    split_samples, BatchIter, CyclicBatches, DatasetConfig, DatasetResult, ImageFolder,
};
use models::{ArchParams, Genotype, ResNet, ResNetConfig, SearchNetwork, SearchNetworkConfig};
use std::path::{Path, PathBuf};

/// The four queues a search consumes.
pub struct SearchData {
    pub classes: Vec<String>,
    /// `train/`, one pass per epoch.
    pub train: BatchIter,
    /// `test/`, labelled batches for the outer (architecture) loss.
    pub search: CyclicBatches,
    /// `val/` with training augmentation, fed to the teacher and student unlabelled.
    pub unlabeled: CyclicBatches,
    /// `val/` with evaluation transforms, for end-of-epoch accuracy.
    pub valid: BatchIter,
}

impl SearchData {
    pub fn load(cfg: &SearchConfig) -> DatasetResult<Self> {
        let train_folder = ImageFolder::open(&cfg.data.join("train"))?;
        let test_folder = ImageFolder::open(&cfg.data.join("test"))?;
        let val_folder = ImageFolder::open(&cfg.data.join("val"))?;
        train_folder.ensure_same_classes(&test_folder)?;
        train_folder.ensure_same_classes(&val_folder)?;

        let cutout = cfg.cutout.then_some(cfg.cutout_length);
        let augmented = DatasetConfig::train(cfg.image_size, cutout);
        let plain = DatasetConfig::eval(cfg.image_size);

        let (train_samples, _) =
            split_samples(train_folder.samples().to_vec(), cfg.train_portion, cfg.seed);
        let train = BatchIter::from_samples(train_samples, augmented.clone().with_seed(Some(cfg.seed)));
        let search = CyclicBatches::new(
            BatchIter::from_folder(&test_folder, plain.clone().with_seed(Some(cfg.seed + 1))),
            cfg.batch_size,
        );
        let unlabeled = CyclicBatches::new(
            BatchIter::from_folder(
                &val_folder,
                augmented.with_shuffle(false).with_seed(Some(cfg.seed + 2)),
            ),
            cfg.batch_size,
        );
        let valid = BatchIter::from_folder(&val_folder, plain.with_seed(Some(cfg.seed + 3)));
        Ok(Self {
            classes: train_folder.classes().to_vec(),
            train,
            search,
            unlabeled,
            valid,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }
}

/// Averages over one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EpochStats {
    pub loss: f64,
    pub top1: f64,
    pub top5: f64,
    pub steps: usize,
}

/// Teacher, alphas, student, their optimizers and the teacher's schedule.
pub struct Searcher<B: AutodiffBackend> {
    cfg: SearchConfig,
    device: B::Device,
    classes: Vec<String>,
    network_cfg: SearchNetworkConfig,
    network: SearchNetwork<B>,
    arch: ArchParams<B>,
    student: ResNet<B>,
    network_optim: NetworkOptimizer<B>,
    student_optim: StudentOptimizer<B>,
    architect: Architect<B>,
    scheduler: CosineAnnealingLrScheduler,
}

impl<B: AutodiffBackend> Searcher<B> {
    pub fn new(
        cfg: &SearchConfig,
        classes: &[String],
        device: &B::Device,
    ) -> Result<Self, ConfigError> {
        let num_classes = classes.len();
        let network_cfg = SearchNetworkConfig {
            init_channels: cfg.init_channels,
            num_classes,
            layers: cfg.layers,
            ..Default::default()
        };
        let student_cfg = ResNetConfig {
            num_classes,
            base_width: cfg.student_width,
            ..Default::default()
        };
        Self::with_models(cfg, classes, network_cfg, &student_cfg, device)
    }

    /// Like [`Searcher::new`] with explicit model shapes.
    pub fn with_models(
        cfg: &SearchConfig,
        classes: &[String],
        network_cfg: SearchNetworkConfig,
        student_cfg: &ResNetConfig,
        device: &B::Device,
    ) -> Result<Self, ConfigError> {
        let scheduler = cosine_schedule(cfg)?;
        let network_sgd = sgd_config(cfg.momentum, cfg.weight_decay);
        let student_sgd = sgd_config(cfg.momentum, cfg.weight_decay);
        let architect = Architect::<B>::new(ArchitectConfig {
            arch_learning_rate: cfg.arch_learning_rate,
            arch_weight_decay: cfg.arch_weight_decay,
            network_sgd: network_sgd.clone(),
            student_sgd: student_sgd.clone(),
            lambda_par: cfg.lambda_par,
            finite_diff_scale: FINITE_DIFF_SCALE,
        });
        Ok(Self {
            cfg: cfg.clone(),
            device: device.clone(),
            classes: classes.to_vec(),
            network: SearchNetwork::new(&network_cfg, device),
            arch: ArchParams::new(network_cfg.steps, device),
            student: ResNet::new(student_cfg, device),
            network_optim: network_sgd.init(),
            student_optim: student_sgd.init(),
            architect,
            scheduler,
            network_cfg,
        })
    }

    pub fn network(&self) -> &SearchNetwork<B> {
        &self.network
    }

    pub fn arch(&self) -> &ArchParams<B> {
        &self.arch
    }

    pub fn student(&self) -> &ResNet<B> {
        &self.student
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Advance the cosine schedule by one epoch and return that epoch's rate.
    pub fn next_lr(&mut self) -> f64 {
        self.scheduler.step()
    }

    pub fn genotype(&self) -> Genotype {
        Genotype::from_arch(&self.arch, self.network_cfg.steps, self.network_cfg.multiplier)
    }

    /// Teacher size in millions of parameters.
    pub fn teacher_param_mb(&self) -> f64 {
        self.network.num_params() as f64 / 1e6
    }

    /// One pass over `data.train`. `lr` is the teacher's scheduled rate.
    pub fn train_epoch(&mut self, data: &mut SearchData, lr: f64) -> anyhow::Result<EpochStats> {
        let batch_size = self.cfg.batch_size;
        let report_freq = self.cfg.report_freq.max(1);
        let student_lr = self.cfg.student_lr();
        let mut objs = AvgMeter::new();
        let mut top1 = AvgMeter::new();
        let mut top5 = AvgMeter::new();

        data.train.reset();
        let mut step = 0usize;
        while let Some(batch) = data.train.next_batch::<B>(batch_size, &self.device)? {
            let search = data.search.next::<B>(&self.device)?;
            let unlabeled = data.unlabeled.next::<B>(&self.device)?;
            let n = batch.len();

            let (arch, first) = self.architect.step(
                self.arch.clone(),
                &self.network,
                &self.network_optim,
                &batch,
                &search,
                lr,
                self.cfg.unrolled,
            );
            self.arch = arch;
            let (arch, teaching) = self.architect.step_teaching(
                self.arch.clone(),
                &self.network,
                &self.network_optim,
                &self.student,
                &self.student_optim,
                TeachingBatches {
                    train: &batch,
                    search: &search,
                    unlabeled: &unlabeled,
                },
                lr,
                student_lr,
            );
            self.arch = arch;
            tracing::debug!(
                "step {step}: search loss {:.4} (|da| {:.3e}), taught student loss {:.4} (|da| {:.3e})",
                first.loss,
                first.grad_norm,
                teaching.loss,
                teaching.grad_norm
            );

            // Teacher weights on the training loss, alphas held fixed.
            let arch = self.arch.clone().no_grad();
            let logits = self.network.forward(batch.images.clone(), &arch);
            let loss = cross_entropy(logits.clone(), batch.targets.clone());
            let loss_val = loss_value(&loss);
            let grads = collect_grads(&self.network, &loss.backward());
            let (grads, _) = clip_global_norm(grads, self.cfg.grad_clip);
            let grads = to_gradients(&self.network, &grads);
            self.network = self.network_optim.step(lr, self.network.clone(), grads);

            // Student: distil from the updated teacher, then fit the labels.
            let teacher_logits = self
                .network
                .clone()
                .no_grad()
                .forward(unlabeled.images.clone(), &arch)
                .detach();
            let distill = soft_cross_entropy(self.student.forward(unlabeled.images.clone()), teacher_logits);
            let grads = GradientsParams::from_grads(distill.backward(), &self.student);
            self.student = self.student_optim.step(student_lr, self.student.clone(), grads);
            let supervised =
                cross_entropy(self.student.forward(batch.images.clone()), batch.targets.clone());
            let grads = GradientsParams::from_grads(supervised.backward(), &self.student);
            self.student = self.student_optim.step(student_lr, self.student.clone(), grads);

            let acc = accuracy(logits.detach(), batch.targets.clone(), &[1, 5]);
            objs.update(loss_val, n);
            top1.update(acc[0], n);
            top5.update(acc[1], n);
            if step % report_freq == 0 {
                tracing::info!(
                    "train {:03} {} {:.6} {:.6}",
                    step,
                    format_sci(objs.avg),
                    top1.avg,
                    top5.avg
                );
            }
            step += 1;
        }
        Ok(EpochStats {
            loss: objs.avg,
            top1: top1.avg,
            top5: top5.avg,
            steps: step,
        })
    }

    /// Evaluation pass with inference-mode copies of the teacher and alphas.
    pub fn infer(&self, iter: &mut BatchIter) -> anyhow::Result<EpochStats> {
        evaluate(
            &self.network.valid(),
            &self.arch.valid(),
            iter,
            self.cfg.batch_size,
            self.cfg.report_freq,
            &self.device,
        )
    }

    pub fn save_checkpoint(&self, dir: &Path, epoch: usize) -> Result<(), CheckpointError> {
        checkpoint::save_module(&self.network, dir, checkpoint::WEIGHTS)?;
        checkpoint::save_module(&self.arch, dir, checkpoint::ARCH)?;
        checkpoint::save_module(&self.student, dir, checkpoint::STUDENT)?;
        checkpoint::save_optimizer::<B, SearchNetwork<B>, _>(
            &self.network_optim,
            dir,
            checkpoint::NETWORK_OPTIM,
        )?;
        checkpoint::save_optimizer::<B, ResNet<B>, _>(
            &self.student_optim,
            dir,
            checkpoint::STUDENT_OPTIM,
        )?;
        checkpoint::save_optimizer::<B, ArchParams<B>, _>(
            self.architect.optimizer(),
            dir,
            checkpoint::ARCH_OPTIM,
        )?;
        checkpoint::save_scheduler::<B, _>(&self.scheduler, dir, checkpoint::SCHEDULER)?;
        let genotype = self.genotype();
        checkpoint::write_json(dir, checkpoint::GENOTYPE, &genotype)?;
        let progress = Progress {
            epoch,
            genotype,
            classes: self.classes.clone(),
        };
        checkpoint::write_json(dir, checkpoint::PROGRESS, &progress)
    }

    /// Restore every module, optimizer and the schedule from `dir`; returns
    /// the next epoch.
    pub fn resume(&mut self, dir: &Path) -> Result<usize, CheckpointError> {
        let progress: Progress = checkpoint::read_json(dir, checkpoint::PROGRESS)?;
        if progress.classes != self.classes {
            return Err(CheckpointError::Classes {
                saved: progress.classes,
                found: self.classes.clone(),
            });
        }
        let device = self.device.clone();
        self.network =
            checkpoint::load_module(self.network.clone(), dir, checkpoint::WEIGHTS, &device)?;
        self.arch = checkpoint::load_module(self.arch.clone(), dir, checkpoint::ARCH, &device)?;
        self.student =
            checkpoint::load_module(self.student.clone(), dir, checkpoint::STUDENT, &device)?;
        let fresh = sgd_config(self.cfg.momentum, self.cfg.weight_decay);
        self.network_optim = checkpoint::load_optimizer::<B, SearchNetwork<B>, _>(
            fresh.init(),
            dir,
            checkpoint::NETWORK_OPTIM,
            &device,
        )?;
        self.student_optim = checkpoint::load_optimizer::<B, ResNet<B>, _>(
            fresh.init(),
            dir,
            checkpoint::STUDENT_OPTIM,
            &device,
        )?;
        let arch_optim = checkpoint::load_optimizer::<B, ArchParams<B>, _>(
            crate::optim::arch_adam_config(self.cfg.arch_weight_decay).init(),
            dir,
            checkpoint::ARCH_OPTIM,
            &device,
        )?;
        self.architect.set_optimizer(arch_optim);
        self.scheduler = checkpoint::load_scheduler::<B, _>(
            self.scheduler.clone(),
            dir,
            checkpoint::SCHEDULER,
            &device,
        )?;
        tracing::info!(
            "resumed from {} after epoch {}",
            dir.display(),
            progress.epoch
        );
        Ok(progress.epoch + 1)
    }
}

/// Loss and top-1/top-5 accuracy of `network` over one pass of `iter`.
pub fn evaluate<B: Backend>(
    network: &SearchNetwork<B>,
    arch: &ArchParams<B>,
    iter: &mut BatchIter,
    batch_size: usize,
    report_freq: usize,
    device: &B::Device,
) -> anyhow::Result<EpochStats> {
    let report_freq = report_freq.max(1);
    let mut objs = AvgMeter::new();
    let mut top1 = AvgMeter::new();
    let mut top5 = AvgMeter::new();
    iter.reset();
    let mut step = 0usize;
    while let Some(batch) = iter.next_batch::<B>(batch_size, device)? {
        let n = batch.len();
        let logits = network.forward(batch.images, arch);
        let loss = loss_value(&cross_entropy(logits.clone(), batch.targets.clone()));
        let acc = accuracy(logits, batch.targets, &[1, 5]);
        objs.update(loss, n);
        top1.update(acc[0], n);
        top5.update(acc[1], n);
        if step % report_freq == 0 {
            tracing::info!(
                "valid {:03} {} {:.6} {:.6}",
                step,
                format_sci(objs.avg),
                top1.avg,
                top5.avg
            );
        }
        step += 1;
    }
    Ok(EpochStats {
        loss: objs.avg,
        top1: top1.avg,
        top5: top5.avg,
        steps: step,
    })
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub exp_dir: PathBuf,
    pub genotype: Genotype,
    pub train_acc: f64,
    pub valid_acc: f64,
}

/// Full search on the default training backend.
pub fn run_search(cfg: SearchConfig) -> anyhow::Result<SearchOutcome> {
    let device = <Autodiff<TrainBackend> as Backend>::Device::default();
    run_search_on::<Autodiff<TrainBackend>>(cfg, &device)
}

/// Data and models are built before the experiment directory exists, so a
/// run that cannot start leaves nothing behind.
pub fn run_search_on<B: AutodiffBackend>(
    cfg: SearchConfig,
    device: &B::Device,
) -> anyhow::Result<SearchOutcome> {
    cfg.validate()?;
    let mut data = SearchData::load(&cfg)?;
    B::seed(cfg.seed);
    let mut searcher = Searcher::<B>::new(&cfg, &data.classes, device)?;

    let exp = match &cfg.resume {
        Some(dir) => Experiment::open(dir)?,
        None => Experiment::create(&cfg.output_root, &cfg.save)?,
    };
    let start_epoch = match &cfg.resume {
        Some(dir) => searcher.resume(dir)?,
        None => 0,
    };
    exp.write_config(&cfg)?;
    if !init_logging(&exp.log_path())? {
        tracing::debug!("logging already initialised; {} not attached", exp.log_path().display());
    }
    tracing::info!("experiment dir = {}", exp.dir().display());
    tracing::info!("gpu device = {}", cfg.gpu);
    tracing::info!("args = {:?}", cfg);
    tracing::info!(
        "data: train={} search={} unlabeled={} classes={}",
        data.train.len(),
        data.search.inner().len(),
        data.unlabeled.inner().len(),
        data.num_classes()
    );
    tracing::info!("param size = {:.6}MB", searcher.teacher_param_mb());

    let mut train_acc = 0.0;
    let mut valid_acc = 0.0;
    for epoch in start_epoch..cfg.epochs {
        let lr = searcher.next_lr();
        tracing::info!("epoch {} lr {}", epoch, format_sci(lr));
        tracing::info!("genotype = {}", searcher.genotype());

        let train = searcher.train_epoch(&mut data, lr)?;
        train_acc = train.top1;
        tracing::info!("train_acc {:.6}", train.top1);

        let valid = searcher.infer(&mut data.valid)?;
        valid_acc = valid.top1;
        tracing::info!("test_acc {:.6}", valid.top1);

        searcher.save_checkpoint(exp.dir(), epoch)?;
    }
    let genotype = searcher.genotype();
    tracing::info!("genotype = {}", genotype);
    Ok(SearchOutcome {
        exp_dir: exp.dir().to_path_buf(),
        genotype,
        train_acc,
        valid_acc,
    })
}

/// Accuracy of a saved teacher on an image folder, plus its genotype.
pub fn evaluate_experiment(
    exp_dir: &Path,
    images: &Path,
    batch_size: usize,
) -> anyhow::Result<(EpochStats, Genotype)> {
    type Inner = TrainBackend;
    let device = <Inner as Backend>::Device::default();
    let cfg: SearchConfig = checkpoint::read_json(exp_dir, CONFIG_SNAPSHOT)?;
    let progress: Progress = checkpoint::read_json(exp_dir, checkpoint::PROGRESS)?;
    let folder = ImageFolder::open(images)?;
    folder.ensure_classes(&progress.classes)?;
    let network_cfg = SearchNetworkConfig {
        init_channels: cfg.init_channels,
        num_classes: progress.classes.len(),
        layers: cfg.layers,
        ..Default::default()
    };
    let network = checkpoint::load_module(
        SearchNetwork::<Inner>::new(&network_cfg, &device),
        exp_dir,
        checkpoint::WEIGHTS,
        &device,
    )?;
    let arch = checkpoint::load_module(
        ArchParams::<Inner>::new(network_cfg.steps, &device),
        exp_dir,
        checkpoint::ARCH,
        &device,
    )?;
    let mut iter = BatchIter::from_folder(&folder, DatasetConfig::eval(cfg.image_size));
    let stats = evaluate(&network, &arch, &mut iter, batch_size, cfg.report_freq, &device)?;
    let genotype = Genotype::from_arch(&arch, network_cfg.steps, network_cfg.multiplier);
    Ok((stats, genotype))
}
