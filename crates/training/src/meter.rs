use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};

/// Running average weighted by sample count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AvgMeter {
    pub sum: f64,
    pub cnt: usize,
    pub avg: f64,
}

impl AvgMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn update(&mut self, value: f64, n: usize) {
        self.sum += value * n as f64;
        self.cnt += n;
        if self.cnt > 0 {
            self.avg = self.sum / self.cnt as f64;
        }
    }
}

/// Top-k accuracy in percent for each `k`. `k` is clamped to the number of
/// classes, so top-5 on a 3-class problem is top-3.
pub fn accuracy<B: Backend>(
    logits: Tensor<B, 2>,
    targets: Tensor<B, 1, Int>,
    topk: &[usize],
) -> Vec<f64> {
    let [n, classes] = logits.dims();
    if n == 0 || classes == 0 {
        return vec![0.0; topk.len()];
    }
    let scores: Vec<f32> = logits
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .unwrap_or_default();
    let labels: Vec<i64> = targets
        .into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .unwrap_or_default();

    // Rank of the true class; ties go to the lower class index.
    let ranks: Vec<usize> = scores
        .chunks(classes)
        .zip(labels.iter())
        .map(|(row, &label)| {
            let label = usize::try_from(label).unwrap_or(usize::MAX);
            match row.get(label) {
                Some(&target) => row
                    .iter()
                    .enumerate()
                    .filter(|&(j, &s)| s > target || (s == target && j < label))
                    .count(),
                None => usize::MAX,
            }
        })
        .collect();

    topk.iter()
        .map(|&k| {
            let k = k.clamp(1, classes);
            let correct = ranks.iter().filter(|&&r| r < k).count();
            100.0 * correct as f64 / n as f64
        })
        .collect()
}

/// `%e`-style scientific notation: six decimals, signed two-digit exponent.
pub fn format_sci(value: f64) -> String {
    let raw = format!("{value:.6e}");
    match raw.split_once('e') {
        Some((mantissa, exp)) => {
            let exp: i32 = exp.parse().unwrap_or(0);
            let sign = if exp < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exp.abs())
        }
        None => raw,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestBackend = burn_ndarray::NdArray<f32>;

    #[test]
    fn meter_weights_by_count() {
        let mut m = AvgMeter::new();
        m.update(1.0, 1);
        m.update(4.0, 3);
        assert_eq!(m.cnt, 4);
        assert!((m.avg - 3.25).abs() < 1e-12);
        m.reset();
        assert_eq!(m, AvgMeter::default());
    }

    #[test]
    fn topk_counts_and_clamps() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::from_floats(
            [[0.9, 0.05, 0.05], [0.1, 0.2, 0.7], [0.3, 0.6, 0.1], [0.5, 0.4, 0.1]],
            &device,
        );
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([0, 1, 1, 2], &device);
        let acc = accuracy(logits, targets, &[1, 2, 5]);
        assert_eq!(acc, vec![50.0, 75.0, 100.0]);
    }

    #[test]
    fn tied_scores_rank_by_class_index() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 2>::zeros([3, 4], &device);
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([0, 1, 3], &device);
        let acc = accuracy(logits, targets, &[1, 2, 4]);
        assert!((acc[0] - 100.0 / 3.0).abs() < 1e-9);
        assert!((acc[1] - 200.0 / 3.0).abs() < 1e-9);
        assert_eq!(acc[2], 100.0);
    }

    #[test]
    fn scientific_format_has_signed_exponent() {
        assert_eq!(format_sci(2.302585), "2.302585e+00");
        assert_eq!(format_sci(0.00125), "1.250000e-03");
        assert_eq!(format_sci(12345.0), "1.234500e+04");
    }
}
