//! Portion splits over folder samples.

use crate::types::FolderSample;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::collections::BTreeMap;

/// Keep `floor(portion * n_c)` samples of every class `c`, drawn with a seeded
/// shuffle; the rest go to the tail. A class with any samples keeps at least
/// one of them unless `portion` is zero.
pub fn split_samples(
    samples: Vec<FolderSample>,
    portion: f32,
    seed: u64,
) -> (Vec<FolderSample>, Vec<FolderSample>) {
    let portion = if portion.is_finite() {
        portion.clamp(0.0, 1.0)
    } else {
        1.0
    };
    let mut by_class: BTreeMap<usize, Vec<FolderSample>> = BTreeMap::new();
    for sample in samples {
        by_class.entry(sample.label).or_default().push(sample);
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut head = Vec::new();
    let mut tail = Vec::new();
    for (_, mut group) in by_class {
        group.shuffle(&mut rng);
        let mut keep = (portion as f64 * group.len() as f64).floor() as usize;
        if portion > 0.0 {
            keep = keep.max(1);
        }
        let rest = group.split_off(keep.min(group.len()));
        head.extend(group);
        tail.extend(rest);
    }
    (head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    /// Class-sorted, like `ImageFolder::samples`.
    fn samples(per_class: usize, classes: usize) -> Vec<FolderSample> {
        (0..classes)
            .flat_map(|label| {
                (0..per_class).map(move |i| FolderSample {
                    path: PathBuf::from(format!("{label}/{i}.png")),
                    label,
                })
            })
            .collect()
    }

    fn labels(samples: &[FolderSample]) -> BTreeSet<usize> {
        samples.iter().map(|s| s.label).collect()
    }

    #[test]
    fn half_portion_keeps_every_class() {
        let (head, tail) = split_samples(samples(4, 2), 0.5, 2);
        assert_eq!(head.len(), 4);
        assert_eq!(tail.len(), 4);
        assert_eq!(labels(&head), BTreeSet::from([0, 1]));
        assert_eq!(head.iter().filter(|s| s.label == 1).count(), 2);
    }

    #[test]
    fn floor_per_class_with_one_minimum() {
        let (head, tail) = split_samples(samples(3, 3), 0.2, 0);
        assert_eq!(head.len(), 3);
        assert_eq!(labels(&head), BTreeSet::from([0, 1, 2]));
        assert_eq!(tail.len(), 6);
    }

    #[test]
    fn same_seed_same_split() {
        let a = split_samples(samples(6, 2), 0.5, 7).0;
        let b = split_samples(samples(6, 2), 0.5, 7).0;
        let paths = |v: &[FolderSample]| v.iter().map(|s| s.path.clone()).collect::<Vec<_>>();
        assert_eq!(paths(&a), paths(&b));
    }

    #[test]
    fn portion_is_clamped() {
        assert_eq!(split_samples(samples(2, 2), 2.0, 0).0.len(), 4);
        assert_eq!(split_samples(samples(2, 2), -1.0, 0).0.len(), 0);
        assert_eq!(split_samples(samples(2, 2), f32::NAN, 0).0.len(), 4);
    }
}
