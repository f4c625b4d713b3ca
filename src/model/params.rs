use burn::{
    nn::{BatchNorm, Linear, conv::Conv2d},
    prelude::*,
};

use super::{
    block::{BasicBlock, Bottleneck, Projection, ResidualBlock},
    resnet::ResNet,
};

/// Trainable parameters flattened in a fixed order. Batch-norm running
/// statistics are not parameters and are left out.
pub trait FlatParams<B: Backend> {
    fn collect_params(&self, params: &mut Vec<Tensor<B, 1>>);

    fn flat_params(&self) -> Tensor<B, 1> {
        let mut params = Vec::new();
        self.collect_params(&mut params);
        Tensor::cat(params, 0)
    }

    fn num_free_params(&self) -> usize {
        let mut params = Vec::new();
        self.collect_params(&mut params);
        params.iter().map(|p| p.dims()[0]).sum()
    }
}

impl<B: Backend> FlatParams<B> for Conv2d<B> {
    fn collect_params(&self, params: &mut Vec<Tensor<B, 1>>) {
        params.push(self.weight.val().flatten(0, 3));
        if let Some(bias) = &self.bias {
            params.push(bias.val());
        }
    }
}

impl<B: Backend> FlatParams<B> for BatchNorm<B, 2> {
    fn collect_params(&self, params: &mut Vec<Tensor<B, 1>>) {
        params.push(self.gamma.val());
        params.push(self.beta.val());
    }
}

impl<B: Backend> FlatParams<B> for Linear<B> {
    fn collect_params(&self, params: &mut Vec<Tensor<B, 1>>) {
        params.push(self.weight.val().flatten(0, 1));
        if let Some(bias) = &self.bias {
            params.push(bias.val());
        }
    }
}

impl<B: Backend> FlatParams<B> for Projection<B> {
    fn collect_params(&self, params: &mut Vec<Tensor<B, 1>>) {
        self.conv.collect_params(params);
        self.bn.collect_params(params);
    }
}

impl<B: Backend> FlatParams<B> for BasicBlock<B> {
    fn collect_params(&self, params: &mut Vec<Tensor<B, 1>>) {
        self.conv1.collect_params(params);
        self.bn1.collect_params(params);
        self.conv2.collect_params(params);
        self.bn2.collect_params(params);
        if let Some(shortcut) = &self.shortcut {
            shortcut.collect_params(params);
        }
    }
}

impl<B: Backend> FlatParams<B> for Bottleneck<B> {
    fn collect_params(&self, params: &mut Vec<Tensor<B, 1>>) {
        self.conv1.collect_params(params);
        self.bn1.collect_params(params);
        self.conv2.collect_params(params);
        self.bn2.collect_params(params);
        self.conv3.collect_params(params);
        self.bn3.collect_params(params);
        if let Some(shortcut) = &self.shortcut {
            shortcut.collect_params(params);
        }
    }
}

impl<B: Backend> FlatParams<B> for ResidualBlock<B> {
    fn collect_params(&self, params: &mut Vec<Tensor<B, 1>>) {
        match self {
            ResidualBlock::Basic(block) => block.collect_params(params),
            ResidualBlock::Bottleneck(block) => block.collect_params(params),
        }
    }
}

impl<B: Backend> FlatParams<B> for ResNet<B> {
    fn collect_params(&self, params: &mut Vec<Tensor<B, 1>>) {
        let (conv, bn) = self.stem();
        conv.collect_params(params);
        bn.collect_params(params);
        for layer in self.layers() {
            for block in &layer.blocks {
                block.collect_params(params);
            }
        }
        self.classifier().collect_params(params);
    }
}

/// `sum |w|^q` over a flattened parameter vector.
pub fn power_sum<B: Backend>(params: Tensor<B, 1>, q: f64) -> f64 {
    params.abs().powf_scalar(q).sum().into_scalar().elem::<f64>()
}

/// `sum |w - w0|^q`, how far the parameters moved from `initial`.
pub fn drift<B: Backend>(params: Tensor<B, 1>, initial: Tensor<B, 1>, q: f64) -> f64 {
    power_sum(params - initial, q)
}
