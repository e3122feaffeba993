//! Batch iteration for training, search and evaluation queues.

use crate::aug::{DatasetConfig, TransformPipeline};
use crate::folder::{load_sample, ImageFolder};
use crate::types::{ClassBatch, DatasetError, DatasetResult, FolderSample};
use burn::tensor::{backend::Backend, Int, Tensor, TensorData};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::time::{Duration, Instant};

pub(crate) const DEFAULT_LOG_EVERY_SAMPLES: usize = 1000;

/// One pass at a time over a list of samples, yielding Burn batches.
pub struct BatchIter {
    samples: Vec<FolderSample>,
    order: Vec<usize>,
    cursor: usize,
    cfg: DatasetConfig,
    pipeline: TransformPipeline,
    rng: StdRng,
    passes: usize,
    processed_samples: usize,
    processed_batches: usize,
    skipped_errors: usize,
    strict: bool,
    started: Instant,
    total_load_time: Duration,
    last_logged_samples: usize,
    log_every_samples: Option<usize>,
    images_buf: Vec<f32>,
    targets_buf: Vec<i64>,
}

impl BatchIter {
    pub fn from_folder(folder: &ImageFolder, cfg: DatasetConfig) -> Self {
        Self::from_samples(folder.samples().to_vec(), cfg)
    }

    pub fn from_samples(samples: Vec<FolderSample>, cfg: DatasetConfig) -> Self {
        let rng = match cfg.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        let log_every_samples = match std::env::var("LBT_DATASET_LOG_EVERY") {
            Ok(val) => {
                if val.eq_ignore_ascii_case("off") || val.trim() == "0" {
                    None
                } else {
                    val.trim().parse::<usize>().ok().filter(|v| *v > 0)
                }
            }
            Err(_) => Some(DEFAULT_LOG_EVERY_SAMPLES),
        };
        let strict = std::env::var("LBT_DATASET_STRICT")
            .ok()
            .map(|v| v.trim().to_ascii_lowercase())
            .map(|v| v == "1" || v == "true" || v == "on")
            .unwrap_or(false);
        let pipeline = TransformPipeline::from_config(&cfg);
        tracing::debug!("dataset pipeline: {}", pipeline.describe());
        let order = (0..samples.len()).collect();
        let mut iter = Self {
            samples,
            order,
            cursor: 0,
            cfg,
            pipeline,
            rng,
            passes: 0,
            processed_samples: 0,
            processed_batches: 0,
            skipped_errors: 0,
            strict,
            started: Instant::now(),
            total_load_time: Duration::ZERO,
            last_logged_samples: 0,
            log_every_samples,
            images_buf: Vec::new(),
            targets_buf: Vec::new(),
        };
        iter.reset();
        iter
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of completed or started passes.
    pub fn passes(&self) -> usize {
        self.passes
    }

    pub fn batches_per_pass(&self, batch_size: usize) -> usize {
        let batch_size = batch_size.max(1);
        if self.cfg.drop_last {
            self.samples.len() / batch_size
        } else {
            self.samples.len().div_ceil(batch_size)
        }
    }

    /// Start a new pass, reshuffling when the config asks for it.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.passes += 1;
        if self.cfg.shuffle {
            self.order.shuffle(&mut self.rng);
        }
    }

    pub fn next_batch<B: Backend>(
        &mut self,
        batch_size: usize,
        device: &B::Device,
    ) -> DatasetResult<Option<ClassBatch<B>>> {
        let batch_size = batch_size.max(1);
        loop {
            if self.cursor >= self.order.len() {
                return Ok(None);
            }
            let end = (self.cursor + batch_size).min(self.order.len());
            if self.cfg.drop_last && end - self.cursor < batch_size {
                self.cursor = self.order.len();
                return Ok(None);
            }
            let picked: Vec<(usize, u64)> = self.order[self.cursor..end]
                .iter()
                .map(|idx| (*idx, self.rng.random::<u64>()))
                .collect();
            self.cursor = end;

            let t_load = Instant::now();
            let samples = &self.samples;
            let pipeline = &self.pipeline;
            let loaded: Vec<_> = picked
                .par_iter()
                .map(|(idx, seed)| {
                    let mut rng = StdRng::seed_from_u64(*seed);
                    (*idx, load_sample(&samples[*idx], pipeline, &mut rng))
                })
                .collect();
            self.total_load_time += t_load.elapsed();

            self.images_buf.clear();
            self.targets_buf.clear();
            for (idx, res) in loaded {
                match res {
                    Ok(sample) => {
                        self.images_buf.extend_from_slice(&sample.image_chw);
                        self.targets_buf.push(sample.label as i64);
                    }
                    Err(e) if !self.strict => {
                        tracing::warn!(
                            "skipping sample {}: {e}",
                            self.samples[idx].path.display()
                        );
                        self.skipped_errors += 1;
                    }
                    Err(e) => return Err(e),
                }
            }

            let batch_len = self.targets_buf.len();
            if batch_len == 0 {
                continue;
            }
            if self.cfg.drop_last && batch_len < batch_size {
                continue;
            }

            let size = self.pipeline.image_size as usize;
            let images = Tensor::<B, 4>::from_data(
                TensorData::new(self.images_buf.clone(), [batch_len, 3, size, size]),
                device,
            );
            let targets = Tensor::<B, 1, Int>::from_data(
                TensorData::new(self.targets_buf.clone(), [batch_len]),
                device,
            );

            self.processed_samples += batch_len;
            self.processed_batches += 1;
            self.maybe_log_progress();

            return Ok(Some(ClassBatch { images, targets }));
        }
    }

    fn maybe_log_progress(&mut self) {
        let Some(threshold) = self.log_every_samples else {
            return;
        };
        let processed_since = self
            .processed_samples
            .saturating_sub(self.last_logged_samples);
        if processed_since < threshold {
            return;
        }
        let secs = self.started.elapsed().as_secs_f32().max(0.001);
        let avg_load_ms = if self.processed_batches > 0 {
            (self.total_load_time.as_secs_f64() * 1000.0) / self.processed_batches as f64
        } else {
            0.0
        };
        tracing::debug!(
            "[dataset] batches={} samples={} skipped_errors={} passes={} rate={:.1} img/s avg_load_ms={:.2}",
            self.processed_batches,
            self.processed_samples,
            self.skipped_errors,
            self.passes,
            self.processed_samples as f32 / secs,
            avg_load_ms
        );
        self.last_logged_samples = self.processed_samples;
    }
}

/// Endless queue over a [`BatchIter`]: a new pass starts whenever one runs dry.
pub struct CyclicBatches {
    inner: BatchIter,
    batch_size: usize,
}

impl CyclicBatches {
    pub fn new(inner: BatchIter, batch_size: usize) -> Self {
        Self {
            inner,
            batch_size: batch_size.max(1),
        }
    }

    pub fn inner(&self) -> &BatchIter {
        &self.inner
    }

    pub fn next<B: Backend>(&mut self, device: &B::Device) -> DatasetResult<ClassBatch<B>> {
        if let Some(batch) = self.inner.next_batch(self.batch_size, device)? {
            return Ok(batch);
        }
        self.inner.reset();
        self.inner
            .next_batch(self.batch_size, device)?
            .ok_or_else(|| {
                DatasetError::Other("cyclic queue has no loadable samples".to_string())
            })
    }
}
