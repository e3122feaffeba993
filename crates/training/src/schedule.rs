use crate::config::{ConfigError, SearchConfig};
use burn::lr_scheduler::cosine::{CosineAnnealingLrScheduler, CosineAnnealingLrSchedulerConfig};

/// Per-epoch cosine annealing of the teacher's rate, from `learning_rate`
/// down to `learning_rate_min` over `epochs` steps.
///
/// The scheduler is stepped once at the start of every epoch and the returned
/// rate is used for that epoch, so epoch 0 trains one step into the curve and
/// the final epoch at the minimum.
pub fn cosine_schedule(cfg: &SearchConfig) -> Result<CosineAnnealingLrScheduler, ConfigError> {
    CosineAnnealingLrSchedulerConfig::new(cfg.learning_rate, cfg.epochs)
        .with_min_lr(cfg.learning_rate_min)
        .init()
        .map_err(ConfigError::Invalid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::lr_scheduler::LrScheduler;

    fn cfg(learning_rate: f64, learning_rate_min: f64, epochs: usize) -> SearchConfig {
        SearchConfig {
            learning_rate,
            learning_rate_min,
            epochs,
            ..Default::default()
        }
    }

    #[test]
    fn decays_to_minimum_on_last_epoch() {
        let mut s = cosine_schedule(&cfg(0.025, 0.001, 4)).unwrap();
        let lrs: Vec<f64> = (0..4).map(|_| s.step()).collect();
        assert!(lrs.windows(2).all(|w| w[0] > w[1]));
        assert!(lrs[0] < 0.025);
        assert!((lrs[3] - 0.001).abs() < 1e-12);
        // Halfway point sits at the midpoint.
        assert!((lrs[1] - 0.013).abs() < 1e-12);
    }

    #[test]
    fn rejects_rates_it_cannot_anneal() {
        assert!(cosine_schedule(&cfg(0.0, 0.0, 4)).is_err());
        assert!(cosine_schedule(&cfg(0.1, 0.2, 4)).is_err());
    }
}
