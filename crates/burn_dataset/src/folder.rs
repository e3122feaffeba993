//! Indexing `root/<class>/<image>` dataset folders and loading samples.

use crate::aug::TransformPipeline;
use crate::types::{DatasetError, DatasetResult, DatasetSample, FolderSample};
use rand::rngs::StdRng;
use std::fs;
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "gif", "tif", "tiff", "webp"];

/// A classification dataset laid out as one sub-directory per class.
///
/// Classes are sorted by directory name and labelled by their position in
/// that order, so two folders with the same class directories agree on labels.
#[derive(Debug, Clone)]
pub struct ImageFolder {
    root: PathBuf,
    classes: Vec<String>,
    samples: Vec<FolderSample>,
}

impl ImageFolder {
    pub fn open(root: &Path) -> DatasetResult<Self> {
        let entries = fs::read_dir(root).map_err(|source| DatasetError::Io {
            path: root.to_path_buf(),
            source,
        })?;
        let mut class_dirs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| DatasetError::Io {
                path: root.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|s| s.to_str()) {
                class_dirs.push((name.to_string(), path));
            }
        }
        class_dirs.sort_by(|a, b| a.0.cmp(&b.0));

        let mut classes = Vec::with_capacity(class_dirs.len());
        let mut samples = Vec::new();
        for (label, (name, dir)) in class_dirs.into_iter().enumerate() {
            let mut files = Vec::new();
            collect_images(&dir, &mut files)?;
            files.sort();
            samples.extend(files.into_iter().map(|path| FolderSample { path, label }));
            classes.push(name);
        }

        if samples.is_empty() {
            return Err(DatasetError::EmptyFolder {
                path: root.to_path_buf(),
            });
        }
        Ok(Self {
            root: root.to_path_buf(),
            classes,
            samples,
        })
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn num_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn samples(&self) -> &[FolderSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Fail unless `other` was built from the same class directories.
    pub fn ensure_same_classes(&self, other: &ImageFolder) -> DatasetResult<()> {
        other.ensure_classes(&self.classes)
    }

    /// Fail unless this folder's classes are exactly `expected`, in order.
    pub fn ensure_classes(&self, expected: &[String]) -> DatasetResult<()> {
        if self.classes != expected {
            return Err(DatasetError::ClassMismatch {
                path: self.root.clone(),
                expected: expected.to_vec(),
                found: self.classes.clone(),
            });
        }
        Ok(())
    }
}

fn collect_images(dir: &Path, out: &mut Vec<PathBuf>) -> DatasetResult<()> {
    let entries = fs::read_dir(dir).map_err(|source| DatasetError::Io {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| DatasetError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect_images(&path, out)?;
        } else if is_image(&path) {
            out.push(path);
        }
    }
    Ok(())
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Decode one sample from disk and run it through the transform pipeline.
pub(crate) fn load_sample(
    sample: &FolderSample,
    pipeline: &TransformPipeline,
    rng: &mut StdRng,
) -> DatasetResult<DatasetSample> {
    let img = image::open(&sample.path)
        .map_err(|source| DatasetError::Image {
            path: sample.path.clone(),
            source,
        })?
        .to_rgb8();
    let image_chw = pipeline.apply(img, rng);
    Ok(DatasetSample {
        image_chw,
        size: pipeline.image_size,
        label: sample.label,
    })
}
