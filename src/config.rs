use std::path::PathBuf;

use burn::prelude::*;
use clap::ValueEnum;

use crate::model::ResNetConfig;

pub static ARTIFACT_DIR: &str = "./artifacts";
pub static CIFAR_DIR: &str = "./data/cifar-10-batches-bin";
pub static TRAIN_BLOB: &str = "./cifar_40_percent_corruption.bin";

#[derive(Config, Debug)]
pub struct ExperimentConfig {
    pub model: ResNetConfig,
    #[config(default = 8000)]
    pub num_epochs: usize,
    #[config(default = 128)]
    pub batch_size: usize,
    #[config(default = 4)]
    pub num_workers: usize,
    #[config(default = 2)]
    pub test_num_workers: usize,
    #[config(default = 42)]
    pub seed: u64,
    #[config(default = 1e-2)]
    pub learning_rate: f64,
    /// Regularization strength; the SGD weight decay is `1 / (n * lambda)`.
    #[config(default = 0.0012)]
    pub lambda: f64,
    /// Exponent of the logged `sum |w|^q` penalty.
    #[config(default = 2.0)]
    pub q: f64,
    /// Epochs without sufficient improvement before training stops.
    #[config(default = 500)]
    pub patience: usize,
    /// Minimum relative drop of the epoch loss that counts as improvement.
    #[config(default = 1e-4)]
    pub min_improvement: f64,
    #[config(default = 100)]
    pub log_interval: usize,
}

impl ExperimentConfig {
    /// SGD weight-decay penalty for a training set of `num_samples` items.
    pub fn weight_decay(&self, num_samples: usize) -> f32 {
        (1.0 / (num_samples as f64 * self.lambda)) as f32
    }
}

/// Where the experiment reads its inputs and writes its artifacts.
#[derive(Debug, Clone)]
pub struct ExperimentPaths {
    pub train_blob: PathBuf,
    pub cifar_dir: PathBuf,
    pub initial_weights: PathBuf,
    pub artifact_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Architecture {
    Resnet18,
    Resnet34,
    Resnet50,
}

impl Architecture {
    pub fn config(self) -> ResNetConfig {
        match self {
            Architecture::Resnet18 => ResNetConfig::resnet18(),
            Architecture::Resnet34 => ResNetConfig::resnet34(),
            Architecture::Resnet50 => ResNetConfig::resnet50(),
        }
    }
}

/// Compute device, picked once on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum DeviceKind {
    #[default]
    Wgpu,
    Cpu,
}
