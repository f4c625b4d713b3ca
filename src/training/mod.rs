pub mod metrics;
pub mod session;

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use burn::{
    data::{
        dataloader::{DataLoader, DataLoaderBuilder},
        dataset::Dataset,
    },
    module::AutodiffModule,
    optim::{GradientsParams, Optimizer, SgdConfig, decay::WeightDecayConfig},
    prelude::*,
    tensor::backend::AutodiffBackend,
};

use crate::{
    checkpoint::{self, BEST, CheckpointStore},
    config::{ExperimentConfig, ExperimentPaths},
    data::{CifarBatch, CifarBatcher, CifarDataset, IndexedCifarBatch, IndexedDataset},
    model::{FlatParams, ResNet, ResNetConfig, drift, power_sum},
};
use metrics::{EpochMetrics, MetricsLogger};
use session::{EpochOutcome, EpochRunner, StopReason, TrainingSession, Verdict};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Accuracy {
    pub correct: usize,
    pub total: usize,
}

impl Accuracy {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.correct as f64 / self.total as f64 * 100.0
        }
    }
}

/// Number of rows whose highest score is at the target class.
pub fn count_correct<B: Backend>(output: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> usize {
    // argmax(1) keeps the class dim: [batch, 1]
    let predicted = output.argmax(1).flatten::<1>(0, 1);
    predicted
        .equal(targets)
        .int()
        .sum()
        .into_scalar()
        .elem::<i64>() as usize
}

/// Top-1 accuracy of `model` over every batch of `loader`. Run it on a
/// non-autodiff backend so batch norm uses its running statistics.
pub fn evaluate<B: Backend>(
    model: &ResNet<B>,
    loader: &dyn DataLoader<B, CifarBatch<B>>,
) -> Accuracy {
    let mut accuracy = Accuracy::default();
    for batch in loader.iter() {
        accuracy.total += batch.targets.dims()[0];
        let output = model.forward(batch.images);
        accuracy.correct += count_correct(output, batch.targets);
    }
    accuracy
}

fn test_loader<B: Backend>(
    config: &ExperimentConfig,
    cifar_dir: &Path,
    device: &B::Device,
) -> Result<Arc<dyn DataLoader<B, CifarBatch<B>>>> {
    let test_set = CifarDataset::test(cifar_dir)?;
    tracing::info!("Loaded {} test images", test_set.len());

    Ok(DataLoaderBuilder::new(CifarBatcher::default())
        .batch_size(config.batch_size)
        .num_workers(config.test_num_workers)
        .set_device(device.clone())
        .build(test_set))
}

/// Builds a freshly initialized network and stores it as the initial weights
/// of later training runs.
pub fn initialize<B: Backend>(
    model: &ResNetConfig,
    seed: u64,
    output: &Path,
    device: &B::Device,
) -> Result<()> {
    B::seed(seed);
    let model: ResNet<B> = model.init(device);
    tracing::info!("Initialized network with {} free parameters", model.num_free_params());

    let path = checkpoint::save_model(&model, output)?;
    tracing::info!("Wrote initial weights to '{}'", path.display());
    Ok(())
}

struct Trainer<'a, B: AutodiffBackend, O> {
    config: &'a ExperimentConfig,
    model: ResNet<B>,
    optim: O,
    loader: Arc<dyn DataLoader<B, IndexedCifarBatch<B>>>,
    total_steps: usize,
    initial: Tensor<B::InnerBackend, 1>,
    store: &'a CheckpointStore,
    metrics: MetricsLogger,
    train_accuracy: f64,
}

impl<B, O> EpochRunner for Trainer<'_, B, O>
where
    B: AutodiffBackend,
    O: Optimizer<ResNet<B>, B>,
{
    fn run_epoch(&mut self, epoch: usize) -> Result<f64> {
        let mut total_loss = 0.0f64;
        let mut correct = 0usize;
        let mut total = 0usize;

        for (step, IndexedCifarBatch { batch, indices }) in self.loader.iter().enumerate() {
            total += indices.dims()[0];
            let output = self
                .model
                .forward_classification(batch.images, batch.targets);
            let loss = output.loss.clone().into_scalar().elem::<f64>();
            total_loss += loss;

            let grads = output.loss.backward();
            let grads = GradientsParams::from_grads(grads, &self.model);
            self.model = self
                .optim
                .step(self.config.learning_rate, self.model.clone(), grads);

            correct += count_correct(output.output.inner(), output.targets.inner());

            if (step + 1) % self.config.log_interval == 0 {
                println!(
                    "Epoch [{}/{}], Step [{}/{}], Loss: {:.4}, Accuracy: {:.2}%",
                    epoch,
                    self.config.num_epochs,
                    step + 1,
                    self.total_steps,
                    loss,
                    correct as f64 / total as f64 * 100.0,
                );
            }
        }

        self.train_accuracy = if total > 0 {
            correct as f64 / total as f64
        } else {
            0.0
        };
        Ok(total_loss)
    }

    fn end_epoch(&mut self, outcome: &EpochOutcome) -> Result<()> {
        let model = self.model.valid();
        let params = model.flat_params();
        let weight_power = power_sum(params.clone(), self.config.q);
        let drift = drift(params, self.initial.clone(), self.config.q);

        println!("Improvement: {}", outcome.improvement);
        println!("Total Loss: {}", outcome.total_loss);
        println!("Weights: {weight_power}");
        println!("Drift: {drift}");

        match outcome.verdict {
            Verdict::Improved => {
                self.store.save(&model, BEST)?;
                println!("Best epoch: {}", outcome.epoch);
            }
            Verdict::Stalled { stale_epochs } => println!("Stale epochs: {stale_epochs}"),
        }

        self.metrics.log(&EpochMetrics {
            outcome: *outcome,
            train_accuracy: self.train_accuracy,
            weight_power,
            drift,
        })
    }
}

/// Trains on the corrupted set with early stopping, then scores the best
/// checkpoint on the test set.
pub fn train<B: AutodiffBackend>(
    paths: &ExperimentPaths,
    config: &ExperimentConfig,
    device: B::Device,
) -> Result<Accuracy> {
    B::seed(config.seed);
    let store = CheckpointStore::new(&paths.artifact_dir)?;
    store.save_config(config)?;

    tracing::info!("Preparing data");
    let train_set = CifarDataset::from_file(&paths.train_blob)
        .context("Cannot load the corrupted training set; run 'corrupt' first")?;
    let num_samples = train_set.len();
    tracing::info!(
        "Loaded {} training images from '{}'",
        num_samples,
        paths.train_blob.display()
    );

    let train_loader: Arc<dyn DataLoader<B, IndexedCifarBatch<B>>> =
        DataLoaderBuilder::new(CifarBatcher::default())
            .batch_size(config.batch_size)
            .shuffle(config.seed)
            .num_workers(config.num_workers)
            .set_device(device.clone())
            .build(IndexedDataset::new(train_set));
    let test_loader = test_loader::<B::InnerBackend>(config, &paths.cifar_dir, &device)?;

    tracing::info!("Building model");
    let model: ResNet<B> = config.model.init(&device);
    tracing::info!("{} free parameters", model.num_free_params());
    let model = checkpoint::load_model(model, &paths.initial_weights, &device)
        .context("Initial weights are required; run 'init' first")?;
    let initial = model.valid().flat_params();

    let weight_decay = config.weight_decay(num_samples);
    tracing::info!(
        "SGD with lr={} and weight decay {:.6}",
        config.learning_rate,
        weight_decay
    );
    let optim = SgdConfig::new()
        .with_weight_decay(Some(WeightDecayConfig::new(weight_decay)))
        .init::<B, ResNet<B>>();

    let metrics = MetricsLogger::create(store.dir())?;
    tracing::info!("Writing epoch metrics to '{}'", metrics.csv_path().display());

    let mut trainer = Trainer {
        config,
        model,
        optim,
        loader: train_loader,
        total_steps: num_samples.div_ceil(config.batch_size),
        initial,
        store: &store,
        metrics,
        train_accuracy: 0.0,
    };
    let mut session = TrainingSession::new(config.min_improvement, config.patience);

    println!("Training:");
    match session.drive(config.num_epochs, &mut trainer)? {
        StopReason::PatienceExhausted { epoch } => tracing::info!(
            "No improvement for {} epochs, stopped after epoch {}",
            config.patience,
            epoch
        ),
        StopReason::EpochBudget => {
            tracing::info!("Epoch budget of {} exhausted", config.num_epochs)
        }
    }
    if let Some(epoch) = session.best_epoch() {
        tracing::info!(
            "Best loss {} at epoch {} of {} ({} stale epochs at the end)",
            session.best_loss(),
            epoch,
            session.history().len(),
            session.stale_epochs()
        );
    }
    println!("Best loss: {}", session.best_loss());
    println!("Finished Training");

    let model = store.load(
        config.model.init::<B::InnerBackend>(&device),
        BEST,
        &device,
    )?;
    let accuracy = evaluate(&model, test_loader.as_ref());
    println!(
        "Test Accuracy of the model on the {} test images: {} %",
        accuracy.total,
        accuracy.percent()
    );
    Ok(accuracy)
}

/// Scores a stored checkpoint of a finished run on the test set.
pub fn evaluate_checkpoint<B: Backend>(
    store: &CheckpointStore,
    name: &str,
    cifar_dir: &Path,
    device: B::Device,
) -> Result<Accuracy> {
    let config = store.load_config()?;
    let model = store.load(config.model.init::<B>(&device), name, &device)?;
    let loader = test_loader::<B>(&config, cifar_dir, &device)?;

    let accuracy = evaluate(&model, loader.as_ref());
    println!(
        "Test Accuracy of the model on the {} test images: {} %",
        accuracy.total,
        accuracy.percent()
    );
    Ok(accuracy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        data::cifar::{TEST_FILE, tests::item, write_records},
        model::block::BlockKind,
    };
    use burn::backend::{Autodiff, NdArray};

    type TestBackend = NdArray;
    type TestAutodiffBackend = Autodiff<TestBackend>;

    #[test]
    fn counts_argmax_matches() {
        let device = Default::default();
        let output = Tensor::<TestBackend, 2>::from_floats(
            [[0.1, 0.9, 0.0], [0.8, 0.1, 0.1], [0.2, 0.3, 0.5]],
            &device,
        );
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([1, 2, 2], &device);
        assert_eq!(count_correct(output, targets), 2);
    }

    #[test]
    fn counts_on_the_graph_free_inner_tensors() {
        let device = Default::default();
        let output = Tensor::<TestAutodiffBackend, 2>::from_floats(
            [[0.7, 0.3], [0.4, 0.6], [0.9, 0.1]],
            &device,
        )
        .require_grad();
        let targets = Tensor::<TestAutodiffBackend, 1, Int>::from_ints([0, 0, 0], &device);

        let scores: Tensor<TestBackend, 2> = output.inner();
        assert!(!scores.is_require_grad());
        assert_eq!(count_correct(scores, targets.inner()), 2);
    }

    #[test]
    fn accuracy_percent() {
        assert_eq!(Accuracy { correct: 3, total: 4 }.percent(), 75.0);
        assert_eq!(Accuracy::default().percent(), 0.0);
    }

    #[test]
    fn short_run_checkpoints_and_scores_the_test_set() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let paths = ExperimentPaths {
            train_blob: root.join("train.bin"),
            cifar_dir: root.join("cifar"),
            initial_weights: root.join("initial"),
            artifact_dir: root.join("artifacts"),
        };

        let train_set = CifarDataset::new((0..8).map(|i| item(i % 10, (i * 30) as u8)).collect());
        write_records(&train_set, &paths.train_blob).unwrap();
        let test_set = CifarDataset::new((0..4).map(|i| item(i, (i * 60) as u8)).collect());
        write_records(&test_set, paths.cifar_dir.join(TEST_FILE)).unwrap();

        let config = ExperimentConfig::new(ResNetConfig::new(BlockKind::Basic, [1, 1, 1, 1]))
            .with_num_epochs(2)
            .with_batch_size(4)
            .with_num_workers(1)
            .with_test_num_workers(1)
            .with_log_interval(1);
        let device = Default::default();
        initialize::<TestBackend>(&config.model, 1, &paths.initial_weights, &device).unwrap();

        let accuracy = train::<TestAutodiffBackend>(&paths, &config, device).unwrap();

        assert_eq!(accuracy.total, 4);
        let store = CheckpointStore::new(&paths.artifact_dir).unwrap();
        assert!(store.path("best.mpk").exists());
        let csv = std::fs::read_to_string(store.path("metrics.csv")).unwrap();
        assert_eq!(csv.lines().count(), 3);

        let again =
            evaluate_checkpoint::<TestBackend>(&store, BEST, &paths.cifar_dir, Default::default())
                .unwrap();
        assert_eq!(again, accuracy);
    }

    #[test]
    fn training_without_initial_weights_fails() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let paths = ExperimentPaths {
            train_blob: root.join("train.bin"),
            cifar_dir: root.join("cifar"),
            initial_weights: root.join("missing"),
            artifact_dir: root.join("artifacts"),
        };
        write_records(&CifarDataset::new(vec![item(0, 0)]), &paths.train_blob).unwrap();
        write_records(&CifarDataset::new(vec![item(0, 0)]), paths.cifar_dir.join(TEST_FILE))
            .unwrap();
        let config = ExperimentConfig::new(ResNetConfig::new(BlockKind::Basic, [1, 1, 1, 1]));

        assert!(train::<TestAutodiffBackend>(&paths, &config, Default::default()).is_err());
    }
}
