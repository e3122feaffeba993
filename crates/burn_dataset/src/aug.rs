//! Image augmentation and transformation pipeline.

use image::imageops::FilterType;
use rand::Rng;

/// Per-channel mean of the CIFAR-10 training set.
pub const CIFAR_MEAN: [f32; 3] = [0.491_399_68, 0.482_158_27, 0.446_531_24];
/// Per-channel standard deviation of the CIFAR-10 training set.
pub const CIFAR_STD: [f32; 3] = [0.247_032_33, 0.243_485_05, 0.261_587_68];

#[derive(Debug, Clone)]
pub struct DatasetConfig {
    /// Square side length every image is brought to.
    pub image_size: u32,
    /// Zero padding added on each side before the random crop (0 disables cropping).
    pub pad: u32,
    /// Probability of applying a horizontal flip augmentation.
    pub flip_horizontal_prob: f32,
    /// Side length of the cutout square, applied after normalisation.
    pub cutout: Option<u32>,
    /// Per-channel mean subtracted after scaling to [0, 1].
    pub mean: [f32; 3],
    /// Per-channel std divided out after mean subtraction.
    pub std: [f32; 3],
    /// Shuffle samples at the start of every pass.
    pub shuffle: bool,
    /// Seed for reproducible shuffling and augmentation.
    pub seed: Option<u64>,
    /// Drop the last partial batch.
    pub drop_last: bool,
}

impl Default for DatasetConfig {
    fn default() -> Self {
        Self::train(32, None)
    }
}

impl DatasetConfig {
    /// Random crop with 4px padding, horizontal flips, optional cutout, shuffled.
    pub fn train(image_size: u32, cutout: Option<u32>) -> Self {
        Self {
            image_size,
            pad: 4,
            flip_horizontal_prob: 0.5,
            cutout,
            mean: CIFAR_MEAN,
            std: CIFAR_STD,
            shuffle: true,
            seed: None,
            drop_last: false,
        }
    }

    /// Normalisation only, in folder order.
    pub fn eval(image_size: u32) -> Self {
        Self {
            image_size,
            pad: 0,
            flip_horizontal_prob: 0.0,
            cutout: None,
            mean: CIFAR_MEAN,
            std: CIFAR_STD,
            shuffle: false,
            seed: None,
            drop_last: false,
        }
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }
}

#[derive(Debug, Clone)]
pub struct TransformPipeline {
    pub image_size: u32,
    pub pad: u32,
    pub flip_horizontal_prob: f32,
    pub cutout: Option<u32>,
    pub mean: [f32; 3],
    pub std: [f32; 3],
}

impl TransformPipeline {
    pub fn from_config(cfg: &DatasetConfig) -> Self {
        Self {
            image_size: cfg.image_size.max(1),
            pad: cfg.pad,
            flip_horizontal_prob: cfg.flip_horizontal_prob,
            cutout: cfg.cutout.filter(|len| *len > 0),
            mean: cfg.mean,
            std: cfg.std,
        }
    }

    pub fn describe(&self) -> String {
        format!(
            "size={} pad={} flip_p={:.2} cutout={} mean={:?} std={:?}",
            self.image_size,
            self.pad,
            self.flip_horizontal_prob,
            self.cutout
                .map(|c| c.to_string())
                .unwrap_or_else(|| "none".to_string()),
            self.mean,
            self.std
        )
    }

    /// Resize, crop, flip, normalise and cut out; returns CHW floats.
    pub fn apply<R: Rng + ?Sized>(&self, img: image::RgbImage, rng: &mut R) -> Vec<f32> {
        let size = self.image_size;
        let img = if img.dimensions() != (size, size) {
            image::imageops::resize(&img, size, size, FilterType::Triangle)
        } else {
            img
        };
        let mut img = random_crop(&img, size, self.pad, rng);
        if self.flip_horizontal_prob > 0.0 && rng.random::<f32>() < self.flip_horizontal_prob {
            image::imageops::flip_horizontal_in_place(&mut img);
        }
        let mut chw = normalize_chw(&img, self.mean, self.std);
        if let Some(length) = self.cutout {
            apply_cutout(&mut chw, size, length, rng);
        }
        chw
    }
}

/// Zero-pad by `pad` pixels on each side, then crop a random `size x size` window.
fn random_crop<R: Rng + ?Sized>(
    img: &image::RgbImage,
    size: u32,
    pad: u32,
    rng: &mut R,
) -> image::RgbImage {
    if pad == 0 {
        return img.clone();
    }
    let mut canvas = image::RgbImage::new(size + 2 * pad, size + 2 * pad);
    image::imageops::replace(&mut canvas, img, pad.into(), pad.into());
    let x0 = rng.random_range(0..=2 * pad);
    let y0 = rng.random_range(0..=2 * pad);
    image::imageops::crop_imm(&canvas, x0, y0, size, size).to_image()
}

fn normalize_chw(img: &image::RgbImage, mean: [f32; 3], std: [f32; 3]) -> Vec<f32> {
    let (width, height) = img.dimensions();
    let plane = (width * height) as usize;
    let mut chw = vec![0.0f32; plane * 3];
    for (x, y, pixel) in img.enumerate_pixels() {
        let base = (y * width + x) as usize;
        for c in 0..3 {
            let v = pixel[c] as f32 / 255.0;
            chw[c * plane + base] = (v - mean[c]) / std[c];
        }
    }
    chw
}

/// Zero a `length x length` square centred on a random pixel, clipped to the image.
fn apply_cutout<R: Rng + ?Sized>(chw: &mut [f32], size: u32, length: u32, rng: &mut R) {
    let size = size as i64;
    let half = (length / 2) as i64;
    let cy = rng.random_range(0..size);
    let cx = rng.random_range(0..size);
    let y0 = (cy - half).clamp(0, size) as usize;
    let y1 = (cy + half).clamp(0, size) as usize;
    let x0 = (cx - half).clamp(0, size) as usize;
    let x1 = (cx + half).clamp(0, size) as usize;
    let size = size as usize;
    let plane = size * size;
    for c in 0..3 {
        for y in y0..y1 {
            let row = c * plane + y * size;
            chw[row + x0..row + x1].fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn gradient_image(size: u32) -> image::RgbImage {
        image::RgbImage::from_fn(size, size, |x, y| {
            image::Rgb([(x * 20) as u8, (y * 20) as u8, 100])
        })
    }

    #[test]
    fn eval_pipeline_is_deterministic_normalisation() {
        let pipeline = TransformPipeline::from_config(&DatasetConfig::eval(4));
        let mut rng = rand::rngs::StdRng::seed_from_u64(0);
        let out = pipeline.apply(gradient_image(4), &mut rng);
        assert_eq!(out.len(), 3 * 4 * 4);
        let expected = (0.0 - CIFAR_MEAN[0]) / CIFAR_STD[0];
        assert!((out[0] - expected).abs() < 1e-6);
        let blue = (100.0 / 255.0 - CIFAR_MEAN[2]) / CIFAR_STD[2];
        assert!((out[2 * 16 + 5] - blue).abs() < 1e-6);
    }

    #[test]
    fn resizes_to_target_size() {
        let pipeline = TransformPipeline::from_config(&DatasetConfig::train(8, None));
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let out = pipeline.apply(gradient_image(13), &mut rng);
        assert_eq!(out.len(), 3 * 8 * 8);
    }

    #[test]
    fn cutout_zeroes_a_clipped_square() {
        let mut chw = vec![1.0f32; 3 * 6 * 6];
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        apply_cutout(&mut chw, 6, 4, &mut rng);
        let zeros = chw.iter().filter(|v| **v == 0.0).count();
        assert!(zeros > 0);
        assert_eq!(zeros % 3, 0);
        assert!(zeros <= 3 * 16);
    }

    #[test]
    fn crop_without_padding_keeps_image() {
        let img = gradient_image(5);
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        let out = random_crop(&img, 5, 0, &mut rng);
        assert_eq!(out, img);
        let padded = random_crop(&img, 5, 2, &mut rng);
        assert_eq!(padded.dimensions(), (5, 5));
    }
}
