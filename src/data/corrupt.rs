use std::{fs, path::Path};

use anyhow::{Context, Result};
use burn::data::dataset::Dataset;
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use super::cifar::{CifarDataset, CifarItem, NUM_CLASSES, write_records};

/// A view over `inner` whose labels were replaced, each with probability
/// `corrupt_prob`, by a uniform draw over the classes.
///
/// The replacement happens once in [`RandomLabels::new`]; the mask is not
/// kept, so corrupted labels are indistinguishable from clean ones afterwards.
#[derive(Debug)]
pub struct RandomLabels<D> {
    inner: D,
    labels: Vec<usize>,
    num_classes: usize,
    changed: usize,
}

impl<D: Dataset<CifarItem>> RandomLabels<D> {
    pub fn new<R: Rng>(inner: D, corrupt_prob: f64, num_classes: usize, rng: &mut R) -> Self {
        let mut labels: Vec<usize> = inner.iter().map(|item| item.label).collect();
        let mut changed = 0;

        if corrupt_prob > 0.0 {
            let mask: Vec<bool> = (0..labels.len())
                .map(|_| rng.r#gen::<f64>() <= corrupt_prob)
                .collect();
            for (label, _) in labels.iter_mut().zip(mask).filter(|(_, hit)| *hit) {
                let drawn = rng.gen_range(0..num_classes);
                if drawn != *label {
                    changed += 1;
                }
                *label = drawn;
            }
        }

        Self {
            inner,
            labels,
            num_classes,
            changed,
        }
    }

    /// Number of labels that now differ from the source dataset.
    pub fn changed(&self) -> usize {
        self.changed
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

impl<D: Dataset<CifarItem>> Dataset<CifarItem> for RandomLabels<D> {
    fn get(&self, index: usize) -> Option<CifarItem> {
        let label = *self.labels.get(index)?;
        self.inner.get(index).map(|item| CifarItem { label, ..item })
    }

    fn len(&self) -> usize {
        self.labels.len()
    }
}

#[derive(Debug, Clone)]
pub struct IndexedItem<I> {
    pub item: I,
    /// Position of the item in the wrapped dataset.
    pub index: usize,
}

/// Yields every item together with its dataset index.
#[derive(Debug)]
pub struct IndexedDataset<D> {
    inner: D,
}

impl<D> IndexedDataset<D> {
    pub fn new(inner: D) -> Self {
        Self { inner }
    }
}

impl<I, D: Dataset<I>> Dataset<IndexedItem<I>> for IndexedDataset<D> {
    fn get(&self, index: usize) -> Option<IndexedItem<I>> {
        self.inner.get(index).map(|item| IndexedItem { item, index })
    }

    fn len(&self) -> usize {
        self.inner.len()
    }
}

/// Sidecar written next to a corrupted training blob.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CorruptionSummary {
    pub corrupt_prob: f64,
    pub num_classes: usize,
    pub seed: u64,
    pub num_samples: usize,
    pub num_changed: usize,
}

/// Reads the CIFAR-10 training batches from `cifar_dir`, corrupts their
/// labels and writes the result to `output` as a single record file.
pub fn write_corrupted_train_set(
    cifar_dir: &Path,
    output: &Path,
    corrupt_prob: f64,
    seed: u64,
) -> Result<CorruptionSummary> {
    let source = CifarDataset::train(cifar_dir)?;
    tracing::info!(
        "Loaded {} training images from '{}'",
        source.len(),
        cifar_dir.display()
    );

    let mut rng = StdRng::seed_from_u64(seed);
    let corrupted = RandomLabels::new(source, corrupt_prob, NUM_CLASSES, &mut rng);
    write_records(&corrupted, output)?;

    let summary = CorruptionSummary {
        corrupt_prob,
        num_classes: corrupted.num_classes(),
        seed,
        num_samples: corrupted.len(),
        num_changed: corrupted.changed(),
    };
    let summary_path = output.with_extension("json");
    fs::write(&summary_path, serde_json::to_string_pretty(&summary)?)
        .with_context(|| format!("Cannot write '{}'", summary_path.display()))?;

    tracing::info!(
        "Wrote '{}': {}/{} labels changed",
        output.display(),
        summary.num_changed,
        summary.num_samples
    );
    Ok(summary)
}
