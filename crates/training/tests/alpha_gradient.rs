//! The analytic alpha gradients against central differences of the unrolled
//! objectives they differentiate, on a small f64 search network.

use burn::backend::Autodiff;
use burn::module::Module;
use burn::optim::{GradientsParams, Optimizer};
use burn::tensor::backend::Backend;
use burn::tensor::{Distribution, Int, Tensor};
use burn_dataset::ClassBatch;
use models::{ArchParams, ResNet, ResNetConfig, SearchNetwork, SearchNetworkConfig};
use training::architect::{Architect, ArchitectConfig, TeachingBatches};
use training::loss::{cross_entropy, loss_value, soft_cross_entropy};
use training::optim::{sgd_config, NetworkOptimizer, StudentOptimizer};
use training::param_vector::{shift_module, ParamVector};

type Inner = burn_ndarray::NdArray<f64>;
type Ad = Autodiff<Inner>;

const ETA: f64 = 0.025;
const STUDENT_ETA: f64 = 0.05;
const STEP: f64 = 1e-5;

fn batch(n: usize, offset: i64) -> ClassBatch<Ad> {
    let device = Default::default();
    let labels: Vec<i64> = (0..n as i64).map(|i| (i + offset) % 3).collect();
    ClassBatch {
        images: Tensor::random([n, 3, 8, 8], Distribution::Normal(0.0, 1.0), &device),
        targets: Tensor::<Ad, 1, Int>::from_ints(labels.as_slice(), &device),
    }
}

fn network() -> SearchNetwork<Ad> {
    let cfg = SearchNetworkConfig {
        init_channels: 2,
        num_classes: 3,
        layers: 3,
        steps: 2,
        multiplier: 2,
        stem_multiplier: 3,
    };
    SearchNetwork::new(&cfg, &Default::default())
}

fn student() -> ResNet<Ad> {
    let cfg = ResNetConfig {
        num_classes: 3,
        base_width: 2,
        blocks: vec![1, 1],
    };
    ResNet::new(&cfg, &Default::default())
}

/// Tiny radius so the finite-difference Hessian products are exact to
/// many digits.
fn architect() -> Architect<Ad> {
    Architect::new(ArchitectConfig {
        arch_learning_rate: 3e-4,
        arch_weight_decay: 1e-3,
        network_sgd: sgd_config(0.9, 3e-4),
        student_sgd: sgd_config(0.9, 3e-4),
        lambda_par: 1.0,
        finite_diff_scale: 1e-6,
    })
}

/// Random unit-variance direction over both alpha tables.
fn direction(arch: &ArchParams<Ad>) -> ParamVector<Inner> {
    let device = Default::default();
    let mut d = ParamVector::default();
    for (id, n) in [
        (arch.alphas_normal.id, arch.alphas_normal.val().shape().num_elements()),
        (arch.alphas_reduce.id, arch.alphas_reduce.val().shape().num_elements()),
    ] {
        d.insert(id, Tensor::random([n], Distribution::Normal(0.0, 1.0), &device));
    }
    d
}

/// Teacher weights after one fresh SGD step on the training loss at `arch`.
fn unrolled_teacher(
    arch: &ArchParams<Ad>,
    network: &SearchNetwork<Ad>,
    train: &ClassBatch<Ad>,
) -> SearchNetwork<Ad> {
    let loss = cross_entropy(
        network.forward(train.images.clone(), &arch.clone().no_grad()),
        train.targets.clone(),
    );
    let grads = GradientsParams::from_grads(loss.backward(), network);
    let mut optim: NetworkOptimizer<Ad> = sgd_config(0.9, 3e-4).init();
    optim.step(ETA, network.clone(), grads)
}

fn search_objective(
    arch: &ArchParams<Ad>,
    network: &SearchNetwork<Ad>,
    train: &ClassBatch<Ad>,
    search: &ClassBatch<Ad>,
) -> f64 {
    let teacher = unrolled_teacher(arch, network, train);
    loss_value(&cross_entropy(
        teacher.forward(search.images.clone(), arch),
        search.targets.clone(),
    ))
}

fn teaching_objective(
    arch: &ArchParams<Ad>,
    network: &SearchNetwork<Ad>,
    student: &ResNet<Ad>,
    batches: &TeachingBatches<'_, Ad>,
) -> f64 {
    let teacher = unrolled_teacher(arch, network, batches.train);
    let teacher_logits = teacher
        .no_grad()
        .forward(batches.unlabeled.images.clone(), &arch.clone().no_grad())
        .detach();
    let distill = soft_cross_entropy(
        student.forward(batches.unlabeled.images.clone()),
        teacher_logits,
    );
    let grads = GradientsParams::from_grads(distill.backward(), student);
    let mut optim: StudentOptimizer<Ad> = sgd_config(0.9, 3e-4).init();
    let taught = optim.step(STUDENT_ETA, student.clone(), grads);
    loss_value(&cross_entropy(
        taught.forward(batches.search.images.clone()),
        batches.search.targets.clone(),
    ))
}

fn central_difference(
    arch: &ArchParams<Ad>,
    d: &ParamVector<Inner>,
    f: impl Fn(&ArchParams<Ad>) -> f64,
) -> f64 {
    let plus = f(&shift_module(arch.clone(), d, STEP));
    let minus = f(&shift_module(arch.clone(), d, -STEP));
    (plus - minus) / (2.0 * STEP)
}

fn assert_close(analytic: f64, numeric: f64) {
    let tol = 1e-3 * numeric.abs().max(1e-6);
    assert!(
        (analytic - numeric).abs() <= tol,
        "analytic {analytic:e} vs numeric {numeric:e}"
    );
}

#[test]
fn unrolled_search_gradient_matches_central_difference() {
    <Ad as Backend>::seed(11);
    let device = Default::default();
    let network = network();
    let arch = ArchParams::<Ad>::new(2, &device);
    let (train, search) = (batch(2, 0), batch(2, 1));
    let network_optim: NetworkOptimizer<Ad> = sgd_config(0.9, 3e-4).init();
    let d = direction(&arch);

    let (dalpha, loss) =
        architect().search_gradient(&arch, &network, &network_optim, &train, &search, ETA, true);
    assert_eq!(dalpha.len(), 2);
    assert!((loss - search_objective(&arch, &network, &train, &search)).abs() < 1e-9);

    let numeric =
        central_difference(&arch, &d, |a| search_objective(a, &network, &train, &search));
    assert_close(dalpha.dot(&d), numeric);
}

#[test]
fn teaching_gradient_matches_central_difference() {
    <Ad as Backend>::seed(23);
    let device = Default::default();
    let network = network();
    let student = student();
    let arch = ArchParams::<Ad>::new(2, &device);
    let (train, search, unlabeled) = (batch(2, 0), batch(2, 1), batch(2, 2));
    let batches = TeachingBatches {
        train: &train,
        search: &search,
        unlabeled: &unlabeled,
    };
    let network_optim: NetworkOptimizer<Ad> = sgd_config(0.9, 3e-4).init();
    let student_optim: StudentOptimizer<Ad> = sgd_config(0.9, 3e-4).init();
    let d = direction(&arch);

    let (dalpha, loss) = architect().teaching_gradient(
        &arch,
        &network,
        &network_optim,
        &student,
        &student_optim,
        batches,
        ETA,
        STUDENT_ETA,
    );
    assert!(!dalpha.is_empty());
    assert!((loss - teaching_objective(&arch, &network, &student, &batches)).abs() < 1e-9);

    let numeric =
        central_difference(&arch, &d, |a| teaching_objective(a, &network, &student, &batches));
    assert_close(dalpha.dot(&d), numeric);
}
