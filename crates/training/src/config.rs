//! Search hyper-parameters and the optional TOML overlay.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Environment variable naming a TOML overlay when `--config` is absent.
pub const CONFIG_ENV: &str = "LBT_SEARCH_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchConfig {
    /// Root holding `train/`, `val/` and `test/` image folders.
    pub data: PathBuf,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub learning_rate_min: f64,
    pub momentum: f64,
    pub weight_decay: f64,
    pub report_freq: usize,
    pub gpu: usize,
    pub epochs: usize,
    pub init_channels: usize,
    pub layers: usize,
    pub image_size: u32,
    pub cutout: bool,
    pub cutout_length: u32,
    pub save: String,
    pub seed: u64,
    pub grad_clip: f64,
    pub train_portion: f32,
    pub unrolled: bool,
    pub arch_learning_rate: f64,
    pub arch_weight_decay: f64,
    /// Weight of the teaching term in the alpha update.
    pub lambda_par: f64,
    /// Falls back to `learning_rate` when unset.
    pub student_learning_rate: Option<f64>,
    pub student_width: usize,
    pub resume: Option<PathBuf>,
    pub output_root: PathBuf,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            data: PathBuf::from("../data"),
            batch_size: 32,
            learning_rate: 0.025,
            learning_rate_min: 0.001,
            momentum: 0.9,
            weight_decay: 3e-4,
            report_freq: 50,
            gpu: 0,
            epochs: 30,
            init_channels: 16,
            layers: 8,
            image_size: 32,
            cutout: false,
            cutout_length: 16,
            save: "EXP".to_string(),
            seed: 2,
            grad_clip: 5.0,
            train_portion: 1.0,
            unrolled: false,
            arch_learning_rate: 3e-4,
            arch_weight_decay: 1e-3,
            lambda_par: 1.0,
            student_learning_rate: None,
            student_width: 64,
            resume: None,
            output_root: PathBuf::from("."),
        }
    }
}

impl SearchConfig {
    pub fn student_lr(&self) -> f64 {
        self.student_learning_rate.unwrap_or(self.learning_rate)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.batch_size == 0 {
            return invalid("batch_size must be > 0");
        }
        if self.epochs == 0 {
            return invalid("epochs must be > 0");
        }
        if self.layers == 0 || self.init_channels == 0 {
            return invalid("layers and init_channels must be > 0");
        }
        if self.image_size == 0 {
            return invalid("image_size must be > 0");
        }
        let rates = [
            ("learning_rate", self.learning_rate),
            ("arch_learning_rate", self.arch_learning_rate),
            ("student_learning_rate", self.student_lr()),
        ];
        for (name, value) in rates {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::Invalid(format!("{name} must be positive")));
            }
        }
        if self.learning_rate_min < 0.0 || self.learning_rate_min > self.learning_rate {
            return invalid("learning_rate_min must be within [0, learning_rate]");
        }
        if !(self.train_portion > 0.0 && self.train_portion <= 1.0) {
            return invalid("train_portion must be within (0, 1]");
        }
        Ok(())
    }

    /// Apply every field set in `file`, leaving the rest untouched.
    pub fn apply_file(&mut self, file: SearchConfigFile) {
        macro_rules! overlay {
            ($($field:ident),* $(,)?) => {
                $(if let Some(v) = file.$field { self.$field = v; })*
            };
        }
        overlay!(
            data,
            batch_size,
            learning_rate,
            learning_rate_min,
            momentum,
            weight_decay,
            report_freq,
            gpu,
            epochs,
            init_channels,
            layers,
            image_size,
            cutout,
            cutout_length,
            save,
            seed,
            grad_clip,
            train_portion,
            unrolled,
            arch_learning_rate,
            arch_weight_decay,
            lambda_par,
            student_width,
            output_root,
        );
        if file.student_learning_rate.is_some() {
            self.student_learning_rate = file.student_learning_rate;
        }
        if file.resume.is_some() {
            self.resume = file.resume;
        }
    }
}

/// TOML overlay; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SearchConfigFile {
    pub data: Option<PathBuf>,
    pub batch_size: Option<usize>,
    pub learning_rate: Option<f64>,
    pub learning_rate_min: Option<f64>,
    pub momentum: Option<f64>,
    pub weight_decay: Option<f64>,
    pub report_freq: Option<usize>,
    pub gpu: Option<usize>,
    pub epochs: Option<usize>,
    pub init_channels: Option<usize>,
    pub layers: Option<usize>,
    pub image_size: Option<u32>,
    pub cutout: Option<bool>,
    pub cutout_length: Option<u32>,
    pub save: Option<String>,
    pub seed: Option<u64>,
    pub grad_clip: Option<f64>,
    pub train_portion: Option<f32>,
    pub unrolled: Option<bool>,
    pub arch_learning_rate: Option<f64>,
    pub arch_weight_decay: Option<f64>,
    pub lambda_par: Option<f64>,
    pub student_learning_rate: Option<f64>,
    pub student_width: Option<usize>,
    pub resume: Option<PathBuf>,
    pub output_root: Option<PathBuf>,
}

impl SearchConfigFile {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The explicit path if given, else the one named by [`CONFIG_ENV`].
    pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
    }
}
