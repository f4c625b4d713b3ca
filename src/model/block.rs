use burn::{
    nn::{BatchNorm, Relu, conv::Conv2d},
    prelude::*,
};
use serde::{Deserialize, Serialize};

use super::init::{batch_norm, conv2d};

/// Which residual block a network is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockKind {
    /// Two 3x3 convolutions.
    Basic,
    /// 1x1 reduce, 3x3, 1x1 expand.
    Bottleneck,
}

impl BlockKind {
    /// Ratio of a block's output channels to its inner width.
    pub fn expansion(self) -> usize {
        match self {
            BlockKind::Basic => 1,
            BlockKind::Bottleneck => 4,
        }
    }
}

#[derive(Module, Debug)]
pub enum ResidualBlock<B: Backend> {
    Basic(BasicBlock<B>),
    Bottleneck(Bottleneck<B>),
}

impl<B: Backend> ResidualBlock<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        match self {
            ResidualBlock::Basic(block) => block.forward(x),
            ResidualBlock::Bottleneck(block) => block.forward(x),
        }
    }
}

#[derive(Config, Debug)]
pub struct ResidualBlockConfig {
    kind: BlockKind,
    /// Channels of the incoming feature map.
    in_planes: usize,
    /// Inner width; the block outputs `planes * expansion` channels.
    planes: usize,
    #[config(default = 1)]
    stride: usize,
}

impl ResidualBlockConfig {
    pub fn out_planes(&self) -> usize {
        self.planes * self.kind.expansion()
    }

    fn needs_projection(&self) -> bool {
        self.stride != 1 || self.in_planes != self.out_planes()
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ResidualBlock<B> {
        let shortcut = self.needs_projection().then(|| Projection {
            conv: conv2d(self.in_planes, self.out_planes(), 1, self.stride, 0, device),
            bn: batch_norm(self.out_planes(), device),
        });

        match self.kind {
            BlockKind::Basic => ResidualBlock::Basic(BasicBlock {
                conv1: conv2d(self.in_planes, self.planes, 3, self.stride, 1, device),
                bn1: batch_norm(self.planes, device),
                conv2: conv2d(self.planes, self.planes, 3, 1, 1, device),
                bn2: batch_norm(self.planes, device),
                shortcut,
                activation: Relu::new(),
            }),
            BlockKind::Bottleneck => ResidualBlock::Bottleneck(Bottleneck {
                conv1: conv2d(self.in_planes, self.planes, 1, 1, 0, device),
                bn1: batch_norm(self.planes, device),
                conv2: conv2d(self.planes, self.planes, 3, self.stride, 1, device),
                bn2: batch_norm(self.planes, device),
                conv3: conv2d(self.planes, self.out_planes(), 1, 1, 0, device),
                bn3: batch_norm(self.out_planes(), device),
                shortcut,
                activation: Relu::new(),
            }),
        }
    }
}

#[derive(Module, Debug)]
pub struct BasicBlock<B: Backend> {
    pub(crate) conv1: Conv2d<B>,
    pub(crate) bn1: BatchNorm<B, 2>,
    pub(crate) conv2: Conv2d<B>,
    pub(crate) bn2: BatchNorm<B, 2>,
    pub(crate) shortcut: Option<Projection<B>>,
    activation: Relu,
}

impl<B: Backend> BasicBlock<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let shortcut = match &self.shortcut {
            Some(projection) => projection.forward(x.clone()),
            None => x.clone(),
        };

        let x = self.conv1.forward(x);
        let x = self.bn1.forward(x);
        let x = self.activation.forward(x);

        let x = self.conv2.forward(x);
        let x = self.bn2.forward(x);

        self.activation.forward(x + shortcut)
    }
}

#[derive(Module, Debug)]
pub struct Bottleneck<B: Backend> {
    pub(crate) conv1: Conv2d<B>,
    pub(crate) bn1: BatchNorm<B, 2>,
    pub(crate) conv2: Conv2d<B>,
    pub(crate) bn2: BatchNorm<B, 2>,
    pub(crate) conv3: Conv2d<B>,
    pub(crate) bn3: BatchNorm<B, 2>,
    pub(crate) shortcut: Option<Projection<B>>,
    activation: Relu,
}

impl<B: Backend> Bottleneck<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let shortcut = match &self.shortcut {
            Some(projection) => projection.forward(x.clone()),
            None => x.clone(),
        };

        let x = self.activation.forward(self.bn1.forward(self.conv1.forward(x)));
        let x = self.activation.forward(self.bn2.forward(self.conv2.forward(x)));
        let x = self.bn3.forward(self.conv3.forward(x));

        self.activation.forward(x + shortcut)
    }
}

/// 1x1 convolution + batch norm used when the shortcut has to change shape.
#[derive(Module, Debug)]
pub struct Projection<B: Backend> {
    pub(crate) conv: Conv2d<B>,
    pub(crate) bn: BatchNorm<B, 2>,
}

impl<B: Backend> Projection<B> {
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        self.bn.forward(x)
    }
}
