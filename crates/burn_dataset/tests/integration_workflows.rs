//! Integration tests for end-to-end burn_dataset workflows.
//!
//! These tests verify that the major workflows work correctly together:
//! 1. Folder indexing -> batch iteration with tensor shapes and labels
//! 2. Seeded shuffling and augmentation reproducibility
//! 3. Cyclic queues restarting on exhaustion
//! 4. Portion splits feeding a batch iterator

use burn_dataset::{
    split_samples, BatchIter, CyclicBatches, DatasetConfig, DatasetError, ImageFolder,
};
use image::{Rgb, RgbImage};
use std::fs;
use std::path::Path;

type Backend = burn_ndarray::NdArray<f32>;

/// Create `root/<class>/img_<i>.png` with `per_class` solid-colour images per class.
fn create_synthetic_folder(root: &Path, classes: &[&str], per_class: usize, size: u32) {
    for (c, class) in classes.iter().enumerate() {
        let dir = root.join(class);
        fs::create_dir_all(&dir).unwrap();
        for i in 0..per_class {
            let shade = (40 * c + 10 * i) as u8;
            let img = RgbImage::from_fn(size, size, |_, _| Rgb([shade, 255 - shade, 128]));
            img.save(dir.join(format!("img_{i:03}.png"))).unwrap();
        }
    }
}

fn targets_of(batch: &burn_dataset::ClassBatch<Backend>) -> Vec<i64> {
    batch
        .targets
        .clone()
        .into_data()
        .to_vec::<i64>()
        .unwrap_or_default()
}

#[test]
fn folder_to_batches_has_expected_shapes() {
    let tmp = tempfile::tempdir().unwrap();
    create_synthetic_folder(tmp.path(), &["cat", "dog"], 3, 6);
    let folder = ImageFolder::open(tmp.path()).unwrap();
    assert_eq!(folder.num_classes(), 2);

    let device = Default::default();
    let mut iter = BatchIter::from_folder(&folder, DatasetConfig::eval(8));
    assert_eq!(iter.batches_per_pass(4), 2);

    let first = iter.next_batch::<Backend>(4, &device).unwrap().unwrap();
    assert_eq!(first.images.dims(), [4, 3, 8, 8]);
    assert_eq!(targets_of(&first), vec![0, 0, 0, 1]);

    let second = iter.next_batch::<Backend>(4, &device).unwrap().unwrap();
    assert_eq!(second.len(), 2);
    assert_eq!(targets_of(&second), vec![1, 1]);

    assert!(iter.next_batch::<Backend>(4, &device).unwrap().is_none());
}

#[test]
fn drop_last_skips_short_batch() {
    let tmp = tempfile::tempdir().unwrap();
    create_synthetic_folder(tmp.path(), &["a"], 5, 4);
    let folder = ImageFolder::open(tmp.path()).unwrap();
    let cfg = DatasetConfig {
        drop_last: true,
        ..DatasetConfig::eval(4)
    };
    let mut iter = BatchIter::from_folder(&folder, cfg);
    let device = Default::default();
    assert_eq!(iter.batches_per_pass(2), 2);
    let mut batches = 0;
    while let Some(batch) = iter.next_batch::<Backend>(2, &device).unwrap() {
        assert_eq!(batch.len(), 2);
        batches += 1;
    }
    assert_eq!(batches, 2);
}

#[test]
fn seeded_iterators_agree() {
    let tmp = tempfile::tempdir().unwrap();
    create_synthetic_folder(tmp.path(), &["a", "b", "c"], 4, 8);
    let folder = ImageFolder::open(tmp.path()).unwrap();
    let cfg = DatasetConfig::train(8, Some(4)).with_seed(Some(7));
    let device = Default::default();

    let mut left = BatchIter::from_folder(&folder, cfg.clone());
    let mut right = BatchIter::from_folder(&folder, cfg);
    for _ in 0..3 {
        let a = left.next_batch::<Backend>(4, &device).unwrap().unwrap();
        let b = right.next_batch::<Backend>(4, &device).unwrap().unwrap();
        assert_eq!(targets_of(&a), targets_of(&b));
        let pa = a.images.into_data().to_vec::<f32>().unwrap();
        let pb = b.images.into_data().to_vec::<f32>().unwrap();
        assert_eq!(pa, pb);
    }
}

#[test]
fn cyclic_queue_restarts_after_exhaustion() {
    let tmp = tempfile::tempdir().unwrap();
    create_synthetic_folder(tmp.path(), &["x", "y"], 1, 4);
    let folder = ImageFolder::open(tmp.path()).unwrap();
    let iter = BatchIter::from_folder(&folder, DatasetConfig::eval(4));
    let mut queue = CyclicBatches::new(iter, 2);
    let device = Default::default();

    for _ in 0..5 {
        let batch = queue.next::<Backend>(&device).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(targets_of(&batch), vec![0, 1]);
    }
    assert_eq!(queue.inner().passes(), 5);
}

#[test]
fn cyclic_queue_over_nothing_errors() {
    let iter = BatchIter::from_samples(Vec::new(), DatasetConfig::eval(4));
    let mut queue = CyclicBatches::new(iter, 2);
    let device = Default::default();
    assert!(matches!(
        queue.next::<Backend>(&device),
        Err(DatasetError::Other(_))
    ));
}

#[test]
fn unreadable_images_are_skipped() {
    let tmp = tempfile::tempdir().unwrap();
    create_synthetic_folder(tmp.path(), &["ok"], 2, 4);
    fs::write(tmp.path().join("ok/broken.png"), b"not a png").unwrap();
    let folder = ImageFolder::open(tmp.path()).unwrap();
    assert_eq!(folder.len(), 3);

    let mut iter = BatchIter::from_folder(&folder, DatasetConfig::eval(4));
    let device = Default::default();
    let batch = iter.next_batch::<Backend>(8, &device).unwrap().unwrap();
    assert_eq!(batch.len(), 2);
}

#[test]
fn portion_split_feeds_iterator_with_every_class() {
    let tmp = tempfile::tempdir().unwrap();
    create_synthetic_folder(tmp.path(), &["a", "b"], 4, 4);
    let folder = ImageFolder::open(tmp.path()).unwrap();
    let (head, tail) = split_samples(folder.samples().to_vec(), 0.5, 2);
    assert_eq!(head.len(), 4);
    assert_eq!(tail.len(), 4);

    let mut iter = BatchIter::from_samples(head, DatasetConfig::eval(4));
    let device = Default::default();
    let batch = iter.next_batch::<Backend>(10, &device).unwrap().unwrap();
    let mut labels = targets_of(&batch);
    labels.sort_unstable();
    assert_eq!(labels, vec![0, 0, 1, 1]);
}
