use image::{Rgb, RgbImage};
use std::fs;
use std::path::Path;
use training::checkpoint::{self, Progress};
use training::search::evaluate_experiment;
use training::{run_search, SearchConfig, SearchData};

fn write_split(root: &Path, split: &str, per_class: usize) {
    for (c, class) in ["circle", "square", "stripe"].iter().enumerate() {
        let dir = root.join(split).join(class);
        fs::create_dir_all(&dir).unwrap();
        for i in 0..per_class {
            let img = RgbImage::from_fn(10, 10, |x, y| {
                let v = match c {
                    0 => ((x + y + i as u32) * 20) as u8,
                    1 => 200,
                    _ => if x % 2 == 0 { 255 } else { 0 },
                };
                Rgb([v, 255 - v, (40 * c) as u8])
            });
            img.save(dir.join(format!("{i}.png"))).unwrap();
        }
    }
}

fn tiny_config(data: &Path, out: &Path) -> SearchConfig {
    SearchConfig {
        data: data.to_path_buf(),
        output_root: out.to_path_buf(),
        batch_size: 3,
        epochs: 1,
        init_channels: 2,
        layers: 3,
        image_size: 8,
        student_width: 2,
        report_freq: 1,
        save: "smoke".to_string(),
        ..Default::default()
    }
}

#[test]
fn search_writes_checkpoint_and_resumes() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_split(data.path(), "train", 2);
    write_split(data.path(), "test", 1);
    write_split(data.path(), "val", 1);

    let outcome = run_search(tiny_config(data.path(), out.path())).unwrap();
    let dir = outcome.exp_dir.clone();
    assert!(dir.starts_with(out.path()));
    for name in [
        "weights.bin",
        "arch.bin",
        "student.bin",
        "network_optim.bin",
        "student_optim.bin",
        "arch_optim.bin",
        "scheduler.bin",
        "progress.json",
        "genotype.json",
        "config.json",
        "log.txt",
    ] {
        assert!(dir.join(name).exists(), "missing {name}");
    }
    assert_eq!(outcome.genotype.normal.len(), 8);
    assert!((0.0..=100.0).contains(&outcome.train_acc));
    assert!((0.0..=100.0).contains(&outcome.valid_acc));

    let progress: Progress = checkpoint::read_json(&dir, checkpoint::PROGRESS).unwrap();
    assert_eq!(progress.epoch, 0);
    assert_eq!(progress.genotype, outcome.genotype);
    assert_eq!(progress.classes, vec!["circle", "square", "stripe"]);

    let (stats, genotype) = evaluate_experiment(&dir, &data.path().join("val"), 2).unwrap();
    assert_eq!(stats.steps, 2);
    assert_eq!(genotype, outcome.genotype);

    // A head trained on three classes must not score a two-class folder.
    let other = tempfile::tempdir().unwrap();
    for class in ["circle", "square"] {
        fs::create_dir_all(other.path().join(class)).unwrap();
        RgbImage::new(8, 8)
            .save(other.path().join(class).join("0.png"))
            .unwrap();
    }
    assert!(evaluate_experiment(&dir, other.path(), 2).is_err());

    let resumed = run_search(SearchConfig {
        epochs: 2,
        resume: Some(dir.clone()),
        unrolled: true,
        ..tiny_config(data.path(), out.path())
    })
    .unwrap();
    assert_eq!(resumed.exp_dir, dir);
    let progress: Progress = checkpoint::read_json(&dir, checkpoint::PROGRESS).unwrap();
    assert_eq!(progress.epoch, 1);
}

#[test]
fn invalid_config_is_rejected_before_any_work() {
    let out = tempfile::tempdir().unwrap();
    let cfg = SearchConfig {
        batch_size: 0,
        output_root: out.path().to_path_buf(),
        ..Default::default()
    };
    assert!(run_search(cfg).is_err());
    assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
}

#[test]
fn mismatched_class_folders_fail() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_split(data.path(), "train", 1);
    write_split(data.path(), "test", 1);
    write_split(data.path(), "val", 1);
    fs::create_dir_all(data.path().join("val/extra")).unwrap();
    RgbImage::new(4, 4)
        .save(data.path().join("val/extra/0.png"))
        .unwrap();
    assert!(run_search(tiny_config(data.path(), out.path())).is_err());
    assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
}

#[test]
fn resume_needs_an_existing_experiment() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_split(data.path(), "train", 1);
    write_split(data.path(), "test", 1);
    write_split(data.path(), "val", 1);
    let missing = out.path().join("Search-never-ran");
    let cfg = SearchConfig {
        resume: Some(missing.clone()),
        ..tiny_config(data.path(), out.path())
    };
    assert!(run_search(cfg).is_err());
    assert!(!missing.exists());
}

#[test]
fn train_portion_keeps_every_class() {
    let data = tempfile::tempdir().unwrap();
    let out = tempfile::tempdir().unwrap();
    write_split(data.path(), "train", 4);
    write_split(data.path(), "test", 1);
    write_split(data.path(), "val", 1);
    let cfg = SearchConfig {
        train_portion: 0.5,
        ..tiny_config(data.path(), out.path())
    };
    let mut loaded = SearchData::load(&cfg).unwrap();
    assert_eq!(loaded.train.len(), 6);

    let device = Default::default();
    let mut labels = Vec::new();
    while let Some(batch) = loaded
        .train
        .next_batch::<burn_ndarray::NdArray<f32>>(4, &device)
        .unwrap()
    {
        labels.extend(batch.targets.into_data().to_vec::<i64>().unwrap());
    }
    labels.sort_unstable();
    assert_eq!(labels, vec![0, 0, 1, 1, 2, 2]);
}
