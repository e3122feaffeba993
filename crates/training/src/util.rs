use crate::config::{SearchConfig, SearchConfigFile};
use crate::search::{run_search, SearchOutcome};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

#[derive(Parser, Debug)]
#[command(
    name = "search",
    about = "Learning-by-teaching DARTS architecture search (teacher search network + ResNet student)"
)]
pub struct SearchArgs {
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    /// TOML file whose keys override the flags below (else $LBT_SEARCH_CONFIG).
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Dataset root containing train/, val/ and test/ class folders.
    #[arg(long, default_value = "../data")]
    pub data: PathBuf,
    #[arg(long, default_value_t = 32)]
    pub batch_size: usize,
    /// Initial teacher learning rate.
    #[arg(long, default_value_t = 0.025)]
    pub learning_rate: f64,
    /// Floor of the cosine schedule.
    #[arg(long, default_value_t = 0.001)]
    pub learning_rate_min: f64,
    #[arg(long, default_value_t = 0.9)]
    pub momentum: f64,
    #[arg(long, default_value_t = 3e-4)]
    pub weight_decay: f64,
    /// Log every N steps.
    #[arg(long, default_value_t = 50)]
    pub report_freq: usize,
    /// Device index (informational on ndarray).
    #[arg(long, default_value_t = 0)]
    pub gpu: usize,
    #[arg(long, default_value_t = 30)]
    pub epochs: usize,
    #[arg(long, default_value_t = 16)]
    pub init_channels: usize,
    /// Total number of search cells.
    #[arg(long, default_value_t = 8)]
    pub layers: usize,
    /// Side length images are resized to before augmentation.
    #[arg(long, default_value_t = 32)]
    pub image_size: u32,
    #[arg(long, default_value_t = false)]
    pub cutout: bool,
    #[arg(long, default_value_t = 16)]
    pub cutout_length: u32,
    /// Experiment name; the run directory is Search-<save>-<timestamp>.
    #[arg(long, default_value = "EXP")]
    pub save: String,
    #[arg(long, default_value_t = 2)]
    pub seed: u64,
    /// Global gradient-norm bound for the teacher step.
    #[arg(long, default_value_t = 5.0)]
    pub grad_clip: f64,
    /// Fraction of train/ to use.
    #[arg(long, default_value_t = 1.0)]
    pub train_portion: f32,
    /// Use the second-order (unrolled) search-loss gradient.
    #[arg(long, default_value_t = false)]
    pub unrolled: bool,
    #[arg(long, default_value_t = 3e-4)]
    pub arch_learning_rate: f64,
    #[arg(long, default_value_t = 1e-3)]
    pub arch_weight_decay: f64,
    /// Weight of the teaching term in the alpha update.
    #[arg(long, default_value_t = 1.0)]
    pub lambda_par: f64,
    /// Student learning rate (defaults to --learning-rate).
    #[arg(long)]
    pub student_learning_rate: Option<f64>,
    /// Base width of the ResNet student.
    #[arg(long, default_value_t = 64)]
    pub student_width: usize,
    /// Experiment directory to resume from.
    #[arg(long)]
    pub resume: Option<PathBuf>,
    /// Where new experiment directories are created.
    #[arg(long, default_value = ".")]
    pub output_root: PathBuf,
}

impl SearchArgs {
    /// Flags first, then the TOML overlay on top.
    pub fn to_config(&self) -> anyhow::Result<SearchConfig> {
        let mut cfg = SearchConfig {
            data: self.data.clone(),
            batch_size: self.batch_size,
            learning_rate: self.learning_rate,
            learning_rate_min: self.learning_rate_min,
            momentum: self.momentum,
            weight_decay: self.weight_decay,
            report_freq: self.report_freq,
            gpu: self.gpu,
            epochs: self.epochs,
            init_channels: self.init_channels,
            layers: self.layers,
            image_size: self.image_size,
            cutout: self.cutout,
            cutout_length: self.cutout_length,
            save: self.save.clone(),
            seed: self.seed,
            grad_clip: self.grad_clip,
            train_portion: self.train_portion,
            unrolled: self.unrolled,
            arch_learning_rate: self.arch_learning_rate,
            arch_weight_decay: self.arch_weight_decay,
            lambda_par: self.lambda_par,
            student_learning_rate: self.student_learning_rate,
            student_width: self.student_width,
            resume: self.resume.clone(),
            output_root: self.output_root.clone(),
        };
        if let Some(path) = SearchConfigFile::locate(self.config.as_deref()) {
            cfg.apply_file(SearchConfigFile::from_path(&path)?);
        }
        Ok(cfg)
    }
}

pub fn run_search_cli(args: SearchArgs) -> anyhow::Result<SearchOutcome> {
    validate_backend_choice(args.backend)?;
    let cfg = args.to_config()?;
    let outcome = run_search(cfg)?;
    println!("Search finished in {}", outcome.exp_dir.display());
    Ok(outcome)
}

pub fn validate_backend_choice(kind: BackendKind) -> anyhow::Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            println!("note: built with backend-wgpu; search will still use the WGPU backend despite --backend ndarray");
        }
        _ => {}
    }
    Ok(())
}
