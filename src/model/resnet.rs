use burn::{
    nn::{
        BatchNorm, Linear, Relu,
        conv::Conv2d,
        loss::CrossEntropyLossConfig,
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
    },
    prelude::*,
    train::ClassificationOutput,
};

use super::{
    block::{BlockKind, ResidualBlock, ResidualBlockConfig},
    init::{batch_norm, conv2d, linear},
};

const STEM_PLANES: usize = 64;
/// Inner width and stride of the four stages.
const STAGES: [(usize, usize); 4] = [(64, 1), (128, 2), (256, 2), (512, 2)];

#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B, 2>,
    activation: Relu,

    layer1: ResNetLayer<B>,
    layer2: ResNetLayer<B>,
    layer3: ResNetLayer<B>,
    layer4: ResNetLayer<B>,
    avgpool: AdaptiveAvgPool2d,
    fc: Linear<B>,
}

impl<B: Backend> ResNet<B> {
    /// `[batch, 3, h, w]` images to `[batch, num_classes]` scores.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(x);
        let x = self.bn1.forward(x);
        let x = self.activation.forward(x);

        let x = self.layer1.forward(x);
        let x = self.layer2.forward(x);
        let x = self.layer3.forward(x);
        let x = self.layer4.forward(x);

        let x = self.avgpool.forward(x);
        let x = x.flatten(1, 3);

        self.fc.forward(x)
    }

    pub fn forward_classification(
        &self,
        images: Tensor<B, 4>,
        targets: Tensor<B, 1, Int>,
    ) -> ClassificationOutput<B> {
        let output = self.forward(images);
        let loss = CrossEntropyLossConfig::new()
            .init(&output.device())
            .forward(output.clone(), targets.clone());

        ClassificationOutput::new(loss, output, targets)
    }

    pub(crate) fn stem(&self) -> (&Conv2d<B>, &BatchNorm<B, 2>) {
        (&self.conv1, &self.bn1)
    }

    pub(crate) fn layers(&self) -> [&ResNetLayer<B>; 4] {
        [&self.layer1, &self.layer2, &self.layer3, &self.layer4]
    }

    pub(crate) fn classifier(&self) -> &Linear<B> {
        &self.fc
    }
}

#[derive(Config, Debug)]
pub struct ResNetConfig {
    pub block: BlockKind,
    /// Blocks per stage.
    pub num_blocks: [usize; 4],
    #[config(default = 10)]
    pub num_classes: usize,
}

impl ResNetConfig {
    pub fn resnet18() -> Self {
        Self::new(BlockKind::Basic, [2, 2, 2, 2])
    }

    pub fn resnet34() -> Self {
        Self::new(BlockKind::Basic, [3, 4, 6, 3])
    }

    pub fn resnet50() -> Self {
        Self::new(BlockKind::Bottleneck, [3, 4, 6, 3])
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ResNet<B> {
        let mut in_planes = STEM_PLANES;
        let [layer1, layer2, layer3, layer4] = std::array::from_fn(|stage| {
            let (planes, stride) = STAGES[stage];
            let config = ResNetLayerConfig::new(
                self.block,
                in_planes,
                planes,
                self.num_blocks[stage],
                stride,
            );
            in_planes = config.out_planes();
            config.init(device)
        });

        ResNet {
            conv1: conv2d(3, STEM_PLANES, 3, 1, 1, device),
            bn1: batch_norm(STEM_PLANES, device),
            activation: Relu::new(),

            layer1,
            layer2,
            layer3,
            layer4,
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            fc: linear(in_planes, self.num_classes, device),
        }
    }
}

#[derive(Module, Debug)]
pub struct ResNetLayer<B: Backend> {
    pub(crate) blocks: Vec<ResidualBlock<B>>,
}

impl<B: Backend> ResNetLayer<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }
}

#[derive(Config, Debug)]
struct ResNetLayerConfig {
    kind: BlockKind,
    in_planes: usize,
    planes: usize,
    num_blocks: usize,
    stride: usize,
}

impl ResNetLayerConfig {
    /// Channels leaving the stage. An empty stage passes its input through.
    fn out_planes(&self) -> usize {
        if self.num_blocks == 0 {
            self.in_planes
        } else {
            self.planes * self.kind.expansion()
        }
    }

    fn init<B: Backend>(&self, device: &B::Device) -> ResNetLayer<B> {
        let mut in_planes = self.in_planes;
        let blocks = (0..self.num_blocks)
            .map(|i| {
                // only the first block of a stage downsamples
                let stride = if i == 0 { self.stride } else { 1 };
                let config = ResidualBlockConfig::new(self.kind, in_planes, self.planes)
                    .with_stride(stride);
                in_planes = config.out_planes();
                config.init(device)
            })
            .collect();

        ResNetLayer { blocks }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{backend::NdArray, tensor::Distribution};

    type TestBackend = NdArray;

    fn images(batch: usize, side: usize) -> Tensor<TestBackend, 4> {
        Tensor::random(
            [batch, 3, side, side],
            Distribution::Normal(0.0, 1.0),
            &Default::default(),
        )
    }

    #[test]
    fn resnet18_scores_every_class() {
        let model: ResNet<TestBackend> = ResNetConfig::resnet18().init(&Default::default());
        assert_eq!(model.forward(images(2, 32)).dims(), [2, 10]);
    }

    #[test]
    fn bottleneck_network_uses_expanded_classifier() {
        let config = ResNetConfig::new(BlockKind::Bottleneck, [1, 1, 1, 1]).with_num_classes(7);
        let model: ResNet<TestBackend> = config.init(&Default::default());

        assert_eq!(model.classifier().weight.val().dims(), [512 * 4, 7]);
        assert_eq!(model.forward(images(3, 8)).dims(), [3, 7]);
    }

    #[test]
    fn factories_set_stage_depths() {
        let device = Default::default();
        let depths = |model: &ResNet<TestBackend>| model.layers().map(|l| l.blocks.len());

        assert_eq!(depths(&ResNetConfig::resnet18().init(&device)), [2, 2, 2, 2]);
        assert_eq!(depths(&ResNetConfig::resnet34().init(&device)), [3, 4, 6, 3]);

        let resnet50 = ResNetConfig::resnet50();
        assert_eq!(resnet50.block, BlockKind::Bottleneck);
        assert_eq!(resnet50.num_blocks, [3, 4, 6, 3]);
    }

    #[test]
    fn classification_loss_is_finite() {
        let device = Default::default();
        let model: ResNet<TestBackend> =
            ResNetConfig::new(BlockKind::Basic, [1, 1, 1, 1]).init(&device);
        let targets = Tensor::<TestBackend, 1, Int>::from_ints([1, 9], &device);

        let output = model.forward_classification(images(2, 8), targets);
        let loss = output.loss.into_scalar().elem::<f32>();

        assert_eq!(output.output.dims(), [2, 10]);
        // near-uniform scores from the small initialization
        assert!((loss - (10f32).ln()).abs() < 0.5);
    }
}
