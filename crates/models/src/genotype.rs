//! Discrete architecture derived from the softmax of the alphas.

use crate::arch::ArchParams;
use crate::operations::{NONE_INDEX, PRIMITIVES};
use burn::tensor::backend::Backend;
use serde::{Deserialize, Serialize};
use std::fmt;

/// `(operation, input state index)` for one kept edge.
pub type Gene = (String, usize);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Genotype {
    pub normal: Vec<Gene>,
    pub normal_concat: Vec<usize>,
    pub reduce: Vec<Gene>,
    pub reduce_concat: Vec<usize>,
}

impl Genotype {
    pub fn from_arch<B: Backend>(arch: &ArchParams<B>, steps: usize, multiplier: usize) -> Self {
        let (normal, reduce) = arch.weights_to_vec();
        Self::from_weights(&normal, &reduce, steps, multiplier)
    }

    /// Build from row-major softmax weights, one row per edge.
    pub fn from_weights(
        normal: &[Vec<f32>],
        reduce: &[Vec<f32>],
        steps: usize,
        multiplier: usize,
    ) -> Self {
        let first = (2 + steps).saturating_sub(multiplier);
        let concat: Vec<usize> = (first..steps + 2).collect();
        Self {
            normal: parse(normal, steps),
            normal_concat: concat.clone(),
            reduce: parse(reduce, steps),
            reduce_concat: concat,
        }
    }
}

fn best_op(row: &[f32]) -> Option<(usize, f32)> {
    row.iter()
        .copied()
        .enumerate()
        .filter(|(k, _)| *k != NONE_INDEX)
        .fold(None, |best, (k, w)| match best {
            Some((_, bw)) if bw >= w => best,
            _ => Some((k, w)),
        })
}

fn parse(weights: &[Vec<f32>], steps: usize) -> Vec<Gene> {
    let mut gene = Vec::with_capacity(2 * steps);
    let mut start = 0;
    for i in 0..steps {
        let n = i + 2;
        let end = (start + n).min(weights.len());
        let rows = &weights[start.min(end)..end];
        let mut edges: Vec<(usize, usize, f32)> = rows
            .iter()
            .enumerate()
            .filter_map(|(j, row)| best_op(row).map(|(k, w)| (j, k, w)))
            .collect();
        // Stable, so ties keep the lower input index first.
        edges.sort_by(|a, b| b.2.total_cmp(&a.2));
        for (j, k, _) in edges.into_iter().take(2) {
            gene.push((PRIMITIVES[k].to_string(), j));
        }
        start += n;
    }
    gene
}

fn write_genes(f: &mut fmt::Formatter<'_>, genes: &[Gene]) -> fmt::Result {
    write!(f, "[")?;
    for (i, (op, j)) in genes.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "('{op}', {j})")?;
    }
    write!(f, "]")
}

fn write_concat(f: &mut fmt::Formatter<'_>, concat: &[usize]) -> fmt::Result {
    let items: Vec<String> = concat.iter().map(usize::to_string).collect();
    write!(f, "[{}]", items.join(", "))
}

impl fmt::Display for Genotype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Genotype(normal=")?;
        write_genes(f, &self.normal)?;
        write!(f, ", normal_concat=")?;
        write_concat(f, &self.normal_concat)?;
        write!(f, ", reduce=")?;
        write_genes(f, &self.reduce)?;
        write!(f, ", reduce_concat=")?;
        write_concat(f, &self.reduce_concat)?;
        write!(f, ")")
    }
}
