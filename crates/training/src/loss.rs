use burn::nn::loss::CrossEntropyLossConfig;
use burn::tensor::activation::{log_softmax, softmax};
use burn::tensor::backend::Backend;
use burn::tensor::{ElementConversion, Int, Tensor};

/// Mean cross-entropy of `logits [n, c]` against integer class `targets [n]`.
pub fn cross_entropy<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1> {
    CrossEntropyLossConfig::new()
        .init(&logits.device())
        .forward(logits, targets)
}

/// Distillation loss: cross-entropy of the student's log-probabilities
/// against the teacher's soft labels, averaged over the batch.
pub fn soft_cross_entropy<B: Backend>(
    student_logits: Tensor<B, 2>,
    teacher_logits: Tensor<B, 2>,
) -> Tensor<B, 1> {
    let n = student_logits.dims()[0].max(1);
    let log_probs = log_softmax(student_logits, 1);
    let soft = softmax(teacher_logits, 1);
    (log_probs * soft).sum().neg().div_scalar(n as f64)
}

/// Host value of a single-element loss tensor.
pub fn loss_value<B: Backend>(loss: &Tensor<B, 1>) -> f64 {
    loss.clone().into_scalar().elem::<f64>()
}
