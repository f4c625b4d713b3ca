use std::path::PathBuf;

use anyhow::Result;
use burn::backend::{Autodiff, NdArray, Wgpu, ndarray::NdArrayDevice, wgpu::WgpuDevice};
use clap::{Args, Parser, Subcommand};

use crate::{
    checkpoint::{BEST, CheckpointStore, INITIAL},
    config::{
        ARTIFACT_DIR, Architecture, CIFAR_DIR, DeviceKind, ExperimentConfig, ExperimentPaths,
        TRAIN_BLOB,
    },
    data::corrupt::write_corrupted_train_set,
    training,
};

#[derive(Parser, Debug)]
#[command(
    name = "resnet-noisy-cifar",
    version,
    about = "Train a ResNet on CIFAR-10 with corrupted labels and early stopping."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a copy of the CIFAR-10 training set with randomized labels
    Corrupt(CorruptArgs),
    /// Write freshly initialized weights for later training runs
    Init(InitArgs),
    /// Train from the initial weights, then score the best checkpoint
    Train(TrainArgs),
    /// Score a checkpoint of a finished run on the test set
    Eval(EvalArgs),
}

#[derive(Args, Debug)]
pub struct CorruptArgs {
    /// Directory of the CIFAR-10 binary distribution
    #[arg(long, default_value = CIFAR_DIR)]
    pub cifar_dir: PathBuf,

    #[arg(long, default_value = TRAIN_BLOB)]
    pub output: PathBuf,

    /// Probability that a label is replaced by a uniform random class
    #[arg(long, default_value_t = 0.4)]
    pub corrupt_prob: f64,

    #[arg(long, default_value_t = 0)]
    pub seed: u64,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    #[arg(long, value_enum, default_value_t = Architecture::Resnet18)]
    pub arch: Architecture,

    /// Checkpoint path, without the `.mpk` extension
    #[arg(long, default_value_t = format!("{ARTIFACT_DIR}/{INITIAL}"))]
    pub output: String,

    #[arg(long, value_enum, default_value_t = DeviceKind::Wgpu)]
    pub device: DeviceKind,

    #[arg(long, default_value_t = 1)]
    pub seed: u64,
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    #[arg(long, default_value = TRAIN_BLOB)]
    pub train_blob: PathBuf,

    #[arg(long, default_value = CIFAR_DIR)]
    pub cifar_dir: PathBuf,

    /// Checkpoint written by `init`, without the `.mpk` extension
    #[arg(long, default_value_t = format!("{ARTIFACT_DIR}/{INITIAL}"))]
    pub initial_weights: String,

    #[arg(long, default_value = ARTIFACT_DIR)]
    pub artifact_dir: PathBuf,

    #[arg(long, value_enum, default_value_t = DeviceKind::Wgpu)]
    pub device: DeviceKind,

    #[arg(long, value_enum, default_value_t = Architecture::Resnet18)]
    pub arch: Architecture,

    #[arg(long, default_value_t = 8000)]
    pub epochs: usize,

    #[arg(long, default_value_t = 500)]
    pub patience: usize,

    #[arg(long, default_value_t = 128)]
    pub batch_size: usize,

    #[arg(long, default_value_t = 4)]
    pub num_workers: usize,

    #[arg(long, default_value_t = 1e-2)]
    pub lr: f64,

    /// Regularization strength behind the weight decay
    #[arg(long, default_value_t = 0.0012)]
    pub lambda: f64,

    /// Exponent of the logged weight penalty
    #[arg(long, default_value_t = 2.0)]
    pub q: f64,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}

impl TrainArgs {
    fn config(&self) -> ExperimentConfig {
        ExperimentConfig::new(self.arch.config())
            .with_num_epochs(self.epochs)
            .with_patience(self.patience)
            .with_batch_size(self.batch_size)
            .with_num_workers(self.num_workers)
            .with_learning_rate(self.lr)
            .with_lambda(self.lambda)
            .with_q(self.q)
            .with_seed(self.seed)
    }

    fn paths(&self) -> ExperimentPaths {
        ExperimentPaths {
            train_blob: self.train_blob.clone(),
            cifar_dir: self.cifar_dir.clone(),
            initial_weights: PathBuf::from(&self.initial_weights),
            artifact_dir: self.artifact_dir.clone(),
        }
    }
}

#[derive(Args, Debug)]
pub struct EvalArgs {
    #[arg(long, default_value = CIFAR_DIR)]
    pub cifar_dir: PathBuf,

    #[arg(long, default_value = ARTIFACT_DIR)]
    pub artifact_dir: PathBuf,

    /// Checkpoint name inside the artifact directory
    #[arg(long, default_value = BEST)]
    pub checkpoint: String,

    #[arg(long, value_enum, default_value_t = DeviceKind::Wgpu)]
    pub device: DeviceKind,
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Corrupt(args) => {
                write_corrupted_train_set(
                    &args.cifar_dir,
                    &args.output,
                    args.corrupt_prob,
                    args.seed,
                )?;
                Ok(())
            }
            Commands::Init(args) => run_init(args),
            Commands::Train(args) => run_train(args),
            Commands::Eval(args) => run_eval(args),
        }
    }
}

fn run_init(args: InitArgs) -> Result<()> {
    let model = args.arch.config();
    let output = PathBuf::from(&args.output);
    match args.device {
        DeviceKind::Wgpu => {
            training::initialize::<Wgpu>(&model, args.seed, &output, &WgpuDevice::default())
        }
        DeviceKind::Cpu => {
            training::initialize::<NdArray>(&model, args.seed, &output, &NdArrayDevice::Cpu)
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    let config = args.config();
    let paths = args.paths();
    tracing::info!("Training {:?} on {:?}", args.arch, args.device);

    match args.device {
        DeviceKind::Wgpu => {
            training::train::<Autodiff<Wgpu>>(&paths, &config, WgpuDevice::default())?;
        }
        DeviceKind::Cpu => {
            training::train::<Autodiff<NdArray>>(&paths, &config, NdArrayDevice::Cpu)?;
        }
    }
    Ok(())
}

fn run_eval(args: EvalArgs) -> Result<()> {
    let store = CheckpointStore::new(&args.artifact_dir)?;
    match args.device {
        DeviceKind::Wgpu => {
            training::evaluate_checkpoint::<Wgpu>(
                &store,
                &args.checkpoint,
                &args.cifar_dir,
                WgpuDevice::default(),
            )?;
        }
        DeviceKind::Cpu => {
            training::evaluate_checkpoint::<NdArray>(
                &store,
                &args.checkpoint,
                &args.cifar_dir,
                NdArrayDevice::Cpu,
            )?;
        }
    }
    Ok(())
}
