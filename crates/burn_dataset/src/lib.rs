//! Dataset loading, splitting, and Burn-compatible batching for architecture search.
//!
//! This crate provides utilities for:
//! - Indexing `root/<class>/<image>` folders
//! - Portion splits of the training folder
//! - CIFAR-style augmentation (pad + crop, flip, normalise, cutout)
//! - Burn batch iteration, including endless queues that restart on exhaustion

pub mod aug;
pub mod batch;
pub mod folder;
pub mod splits;
pub mod types;

pub use aug::{DatasetConfig, TransformPipeline, CIFAR_MEAN, CIFAR_STD};
pub use batch::{BatchIter, CyclicBatches};
pub use folder::ImageFolder;
pub use splits::split_samples;
pub use types::*;
