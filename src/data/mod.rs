pub mod batcher;
pub mod cifar;
pub mod corrupt;

pub use batcher::{CifarBatch, CifarBatcher, IndexedCifarBatch};
pub use cifar::CifarDataset;
pub use corrupt::IndexedDataset;
