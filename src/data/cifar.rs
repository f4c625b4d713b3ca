use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use burn::data::dataset::Dataset;

pub const NUM_CLASSES: usize = 10;
pub const CHANNELS: usize = 3;
pub const HEIGHT: usize = 32;
pub const WIDTH: usize = 32;
pub const IMAGE_BYTES: usize = CHANNELS * HEIGHT * WIDTH;
/// One label byte followed by the channel-major pixels.
pub const RECORD_BYTES: usize = IMAGE_BYTES + 1;

pub const TRAIN_FILES: [&str; 5] = [
    "data_batch_1.bin",
    "data_batch_2.bin",
    "data_batch_3.bin",
    "data_batch_4.bin",
    "data_batch_5.bin",
];
pub const TEST_FILE: &str = "test_batch.bin";

#[derive(Debug, Clone, PartialEq)]
pub struct CifarItem {
    /// Pixels in CHW order, red plane first.
    pub image: [u8; IMAGE_BYTES],
    pub label: usize,
}

/// CIFAR-10 images held in memory, read from files in the binary
/// distribution layout.
#[derive(Debug, Clone, Default)]
pub struct CifarDataset {
    items: Vec<CifarItem>,
}

impl CifarDataset {
    pub fn new(items: Vec<CifarItem>) -> Self {
        Self { items }
    }

    /// The five training batches of the binary distribution.
    pub fn train(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let paths: Vec<PathBuf> = TRAIN_FILES.iter().map(|f| dir.join(f)).collect();
        Self::from_files(&paths)
    }

    pub fn test(dir: impl AsRef<Path>) -> Result<Self> {
        Self::from_file(dir.as_ref().join(TEST_FILE))
    }

    pub fn from_files(paths: &[PathBuf]) -> Result<Self> {
        let mut items = Vec::new();
        for path in paths {
            items.extend(Self::from_file(path)?.items);
        }
        Ok(Self::new(items))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)
            .with_context(|| format!("Cannot read CIFAR-10 file '{}'", path.display()))?;
        let items = parse_records(&bytes)
            .with_context(|| format!("Malformed CIFAR-10 file '{}'", path.display()))?;
        tracing::debug!("Read {} images from '{}'", items.len(), path.display());
        Ok(Self { items })
    }
}

impl Dataset<CifarItem> for CifarDataset {
    fn get(&self, index: usize) -> Option<CifarItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

pub fn parse_records(bytes: &[u8]) -> Result<Vec<CifarItem>> {
    if bytes.len() % RECORD_BYTES != 0 {
        bail!(
            "length {} is not a multiple of the {RECORD_BYTES}-byte record size",
            bytes.len()
        );
    }

    bytes
        .chunks_exact(RECORD_BYTES)
        .enumerate()
        .map(|(index, record)| {
            let label = record[0] as usize;
            if label >= NUM_CLASSES {
                bail!("record {index} has label {label}, expected < {NUM_CLASSES}");
            }
            let image: [u8; IMAGE_BYTES] = record[1..].try_into()?;
            Ok(CifarItem { image, label })
        })
        .collect()
}

/// Writes items in the same record layout `parse_records` reads.
pub fn write_records<D: Dataset<CifarItem>>(dataset: &D, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Cannot create directory '{}'", parent.display()))?;
    }

    let file =
        File::create(path).with_context(|| format!("Cannot create '{}'", path.display()))?;
    let mut out = BufWriter::new(file);
    for item in dataset.iter() {
        out.write_all(&[item.label as u8])?;
        out.write_all(&item.image)?;
    }
    out.flush()
        .with_context(|| format!("Cannot write '{}'", path.display()))?;
    Ok(())
}
