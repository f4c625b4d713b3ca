use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use burn::{
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
};

use crate::{config::ExperimentConfig, model::ResNet};

/// Full precision, so a reloaded checkpoint scores exactly like the model
/// that was saved.
type CheckpointRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

pub const BEST: &str = "best";
pub const INITIAL: &str = "initial";
const CONFIG_FILE: &str = "config.json";

/// Writes `model` to `path`; the recorder sets the `.mpk` extension.
pub fn save_model<B: Backend>(model: &ResNet<B>, path: &Path) -> Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create directory '{}'", parent.display()))?;
    }

    CheckpointRecorder::new()
        .record(model.clone().into_record(), path.to_path_buf())
        .with_context(|| format!("Failed to save checkpoint to '{}'", path.display()))?;

    tracing::debug!("Saved checkpoint '{}'", path.display());
    Ok(path.to_path_buf())
}

/// Loads the weights at `path` into `model`. The architecture must match the
/// one the checkpoint was written from.
pub fn load_model<B: Backend>(
    model: ResNet<B>,
    path: &Path,
    device: &B::Device,
) -> Result<ResNet<B>> {
    let record = CheckpointRecorder::new()
        .load(path.to_path_buf(), device)
        .with_context(|| format!("Cannot load checkpoint '{}'", path.display()))?;

    Ok(model.load_record(record))
}

/// The artifact directory of one run: its config and named checkpoints.
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create artifact directory '{}'", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn save<B: Backend>(&self, model: &ResNet<B>, name: &str) -> Result<PathBuf> {
        save_model(model, &self.path(name))
    }

    pub fn load<B: Backend>(
        &self,
        model: ResNet<B>,
        name: &str,
        device: &B::Device,
    ) -> Result<ResNet<B>> {
        load_model(model, &self.path(name), device)
    }

    pub fn save_config(&self, config: &ExperimentConfig) -> Result<()> {
        let path = self.dir.join(CONFIG_FILE);
        config
            .save(&path)
            .with_context(|| format!("Cannot write config to '{}'", path.display()))
    }

    pub fn load_config(&self) -> Result<ExperimentConfig> {
        let path = self.dir.join(CONFIG_FILE);
        ExperimentConfig::load(&path).with_context(|| {
            format!(
                "Cannot read config from '{}'. Has 'train' been run with this artifact directory?",
                path.display()
            )
        })
    }
}
