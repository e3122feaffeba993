//! On-disk layout of a search checkpoint.
//!
//! Every file lives directly in the experiment directory:
//! `weights.bin` (teacher), `arch.bin`, `student.bin`, one optimizer record per
//! parameter group, `scheduler.bin`, `progress.json` and `genotype.json`.

use burn::module::{AutodiffModule, Module};
use burn::optim::Optimizer;
use burn::lr_scheduler::LrScheduler;
use burn::record::{BinFileRecorder, FullPrecisionSettings, Recorder};
use burn::tensor::backend::{AutodiffBackend, Backend};
use models::Genotype;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const WEIGHTS: &str = "weights";
pub const ARCH: &str = "arch";
pub const STUDENT: &str = "student";
pub const NETWORK_OPTIM: &str = "network_optim";
pub const STUDENT_OPTIM: &str = "student_optim";
pub const ARCH_OPTIM: &str = "arch_optim";
pub const SCHEDULER: &str = "scheduler";
pub const PROGRESS: &str = "progress.json";
pub const GENOTYPE: &str = "genotype.json";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("recorder failed for {path}: {reason}")]
    Recorder { path: PathBuf, reason: String },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid json at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("missing checkpoint file {0}")]
    Missing(PathBuf),
    #[error("checkpoint was trained on classes {saved:?}, data has {found:?}")]
    Classes {
        saved: Vec<String>,
        found: Vec<String>,
    },
}

/// Last completed epoch, the genotype it produced and the class list the
/// classifier heads were trained on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub epoch: usize,
    pub genotype: Genotype,
    pub classes: Vec<String>,
}

fn recorder() -> BinFileRecorder<FullPrecisionSettings> {
    BinFileRecorder::<FullPrecisionSettings>::new()
}

fn bin_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(name).with_extension("bin")
}

pub fn save_module<B: Backend, M: Module<B>>(
    module: &M,
    dir: &Path,
    name: &str,
) -> Result<(), CheckpointError> {
    module
        .clone()
        .save_file(dir.join(name), &recorder())
        .map_err(|e| CheckpointError::Recorder {
            path: bin_path(dir, name),
            reason: e.to_string(),
        })
}

pub fn load_module<B: Backend, M: Module<B>>(
    module: M,
    dir: &Path,
    name: &str,
    device: &B::Device,
) -> Result<M, CheckpointError> {
    let path = bin_path(dir, name);
    if !path.exists() {
        return Err(CheckpointError::Missing(path));
    }
    module
        .load_file(dir.join(name), &recorder(), device)
        .map_err(|e| CheckpointError::Recorder {
            path,
            reason: e.to_string(),
        })
}

pub fn save_optimizer<B, M, O>(optim: &O, dir: &Path, name: &str) -> Result<(), CheckpointError>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    Recorder::<B>::record(&recorder(), optim.to_record(), dir.join(name))
        .map(|_| ())
        .map_err(|e| CheckpointError::Recorder {
            path: bin_path(dir, name),
            reason: e.to_string(),
        })
}

pub fn load_optimizer<B, M, O>(
    optim: O,
    dir: &Path,
    name: &str,
    device: &B::Device,
) -> Result<O, CheckpointError>
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
    O: Optimizer<M, B>,
{
    let path = bin_path(dir, name);
    if !path.exists() {
        return Err(CheckpointError::Missing(path));
    }
    let record = Recorder::<B>::load(&recorder(), dir.join(name), device).map_err(|e| {
        CheckpointError::Recorder {
            path,
            reason: e.to_string(),
        }
    })?;
    Ok(optim.load_record(record))
}

pub fn save_scheduler<B: Backend, S: LrScheduler>(
    scheduler: &S,
    dir: &Path,
    name: &str,
) -> Result<(), CheckpointError> {
    Recorder::<B>::record(&recorder(), scheduler.to_record::<B>(), dir.join(name))
        .map(|_| ())
        .map_err(|e| CheckpointError::Recorder {
            path: bin_path(dir, name),
            reason: e.to_string(),
        })
}

pub fn load_scheduler<B: Backend, S: LrScheduler>(
    scheduler: S,
    dir: &Path,
    name: &str,
    device: &B::Device,
) -> Result<S, CheckpointError> {
    let path = bin_path(dir, name);
    if !path.exists() {
        return Err(CheckpointError::Missing(path));
    }
    let record = Recorder::<B>::load(&recorder(), dir.join(name), device).map_err(|e| {
        CheckpointError::Recorder {
            path,
            reason: e.to_string(),
        }
    })?;
    Ok(scheduler.load_record::<B>(record))
}

pub fn write_json<T: Serialize>(dir: &Path, name: &str, value: &T) -> Result<(), CheckpointError> {
    let path = dir.join(name);
    let json = serde_json::to_string_pretty(value).map_err(|source| CheckpointError::Json {
        path: path.clone(),
        source,
    })?;
    fs::write(&path, json).map_err(|source| CheckpointError::Io { path, source })
}

pub fn read_json<T: DeserializeOwned>(dir: &Path, name: &str) -> Result<T, CheckpointError> {
    let path = dir.join(name);
    if !path.exists() {
        return Err(CheckpointError::Missing(path));
    }
    let raw = fs::read_to_string(&path).map_err(|source| CheckpointError::Io {
        path: path.clone(),
        source,
    })?;
    serde_json::from_str(&raw).map_err(|source| CheckpointError::Json { path, source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::Autodiff;
    use burn::lr_scheduler::cosine::CosineAnnealingLrSchedulerConfig;
    use models::ArchParams;

    type Ad = Autodiff<burn_ndarray::NdArray<f32>>;

    #[test]
    fn arch_params_survive_save_and_load() {
        let tmp = tempfile::tempdir().unwrap();
        let device = Default::default();
        let arch = ArchParams::<Ad>::new(2, &device);
        save_module(&arch, tmp.path(), ARCH).unwrap();
        assert!(tmp.path().join("arch.bin").exists());

        let fresh = ArchParams::<Ad>::new(2, &device);
        let loaded = load_module(fresh, tmp.path(), ARCH, &device).unwrap();
        let a: Vec<f32> = arch.alphas_normal.val().into_data().to_vec().unwrap();
        let b: Vec<f32> = loaded.alphas_normal.val().into_data().to_vec().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_files_are_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let device = Default::default();
        let err = load_module(ArchParams::<Ad>::new(1, &device), tmp.path(), ARCH, &device)
            .unwrap_err();
        assert!(matches!(err, CheckpointError::Missing(_)));
        assert!(matches!(
            read_json::<Progress>(tmp.path(), PROGRESS),
            Err(CheckpointError::Missing(_))
        ));
    }

    #[test]
    fn scheduler_resumes_mid_schedule() {
        let tmp = tempfile::tempdir().unwrap();
        let device = Default::default();
        let fresh = || {
            CosineAnnealingLrSchedulerConfig::new(0.1, 4)
                .with_min_lr(0.01)
                .init()
                .unwrap()
        };
        let mut running = fresh();
        running.step();
        running.step();
        save_scheduler::<Ad, _>(&running, tmp.path(), SCHEDULER).unwrap();
        assert!(tmp.path().join("scheduler.bin").exists());

        let mut restored = load_scheduler::<Ad, _>(fresh(), tmp.path(), SCHEDULER, &device).unwrap();
        assert_eq!(restored.step(), running.step());
        assert!((restored.step() - 0.01).abs() < 1e-12);
    }

    #[test]
    fn progress_json_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let progress = Progress {
            epoch: 3,
            genotype: Genotype {
                normal: vec![("skip_connect".into(), 0)],
                normal_concat: vec![2],
                reduce: vec![("max_pool_3x3".into(), 1)],
                reduce_concat: vec![2],
            },
            classes: vec!["cat".into(), "dog".into()],
        };
        write_json(tmp.path(), PROGRESS, &progress).unwrap();
        let back: Progress = read_json(tmp.path(), PROGRESS).unwrap();
        assert_eq!(back, progress);
    }
}
