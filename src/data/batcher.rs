use burn::{data::dataloader::batcher::Batcher, prelude::*};

use super::{
    cifar::{CHANNELS, CifarItem, HEIGHT, WIDTH},
    corrupt::IndexedItem,
};

/// Per-channel statistics of the CIFAR-10 training images.
pub const CIFAR_MEAN: [f32; CHANNELS] = [0.4914, 0.4822, 0.4465];
pub const CIFAR_STD: [f32; CHANNELS] = [0.247, 0.243, 0.261];

#[derive(Debug, Clone, Default)]
pub struct CifarBatcher {}

#[derive(Debug, Clone)]
pub struct CifarBatch<B: Backend> {
    /// `[batch, 3, 32, 32]`, normalized per channel.
    pub images: Tensor<B, 4>,
    pub targets: Tensor<B, 1, Int>,
}

#[derive(Debug, Clone)]
pub struct IndexedCifarBatch<B: Backend> {
    pub batch: CifarBatch<B>,
    pub indices: Tensor<B, 1, Int>,
}

impl CifarBatcher {
    fn stack<B: Backend>(&self, items: &[&CifarItem], device: &B::Device) -> CifarBatch<B> {
        let batch_size = items.len();

        let pixels: Vec<f32> = items
            .iter()
            .flat_map(|item| item.image.iter().map(|&p| p as f32))
            .collect();
        let images = Tensor::<B, 4>::from_data(
            TensorData::new(pixels, [batch_size, CHANNELS, HEIGHT, WIDTH])
                .convert::<B::FloatElem>(),
            device,
        );

        let mean = Tensor::<B, 1>::from_floats(CIFAR_MEAN, device).reshape([1, CHANNELS, 1, 1]);
        let std = Tensor::<B, 1>::from_floats(CIFAR_STD, device).reshape([1, CHANNELS, 1, 1]);
        let images = ((images / 255) - mean) / std;

        let targets = int_tensor::<B>(items.iter().map(|item| item.label), device);

        CifarBatch { images, targets }
    }
}

fn int_tensor<B: Backend>(
    values: impl Iterator<Item = usize>,
    device: &B::Device,
) -> Tensor<B, 1, Int> {
    let values: Vec<i64> = values.map(|v| v as i64).collect();
    let len = values.len();
    Tensor::<B, 1, Int>::from_data(
        TensorData::new(values, [len]).convert::<B::IntElem>(),
        device,
    )
}

impl<B: Backend> Batcher<B, CifarItem, CifarBatch<B>> for CifarBatcher {
    fn batch(&self, items: Vec<CifarItem>, device: &B::Device) -> CifarBatch<B> {
        let items: Vec<&CifarItem> = items.iter().collect();
        self.stack(&items, device)
    }
}

impl<B: Backend> Batcher<B, IndexedItem<CifarItem>, IndexedCifarBatch<B>> for CifarBatcher {
    fn batch(
        &self,
        items: Vec<IndexedItem<CifarItem>>,
        device: &B::Device,
    ) -> IndexedCifarBatch<B> {
        let samples: Vec<&CifarItem> = items.iter().map(|indexed| &indexed.item).collect();
        let batch = self.stack(&samples, device);
        let indices = int_tensor::<B>(items.iter().map(|indexed| indexed.index), device);

        IndexedCifarBatch { batch, indices }
    }
}
