//! Core types and error definitions for burn_dataset.

use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("no class directories with images under {path}")]
    EmptyFolder { path: PathBuf },
    #[error("class list of {path} ({found:?}) does not match expected {expected:?}")]
    ClassMismatch {
        path: PathBuf,
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("{0}")]
    Other(String),
}

/// One labelled image inside an [`ImageFolder`](crate::ImageFolder).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FolderSample {
    pub path: PathBuf,
    pub label: usize,
}

/// A decoded and transformed sample, CHW layout.
#[derive(Debug, Clone)]
pub struct DatasetSample {
    pub image_chw: Vec<f32>,
    pub size: u32,
    pub label: usize,
}

/// A batch of images with integer class targets.
pub struct ClassBatch<B: burn::tensor::backend::Backend> {
    /// Shape `[n, 3, size, size]`.
    pub images: burn::tensor::Tensor<B, 4>,
    /// Shape `[n]`.
    pub targets: burn::tensor::Tensor<B, 1, burn::tensor::Int>,
}

impl<B: burn::tensor::backend::Backend> ClassBatch<B> {
    pub fn len(&self) -> usize {
        self.images.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<B: burn::tensor::backend::Backend> Clone for ClassBatch<B> {
    fn clone(&self) -> Self {
        Self {
            images: self.images.clone(),
            targets: self.targets.clone(),
        }
    }
}
