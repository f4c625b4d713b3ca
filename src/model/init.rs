use burn::{
    nn::{
        BatchNorm, BatchNormConfig, Initializer, Linear, LinearConfig, PaddingConfig2d,
        conv::{Conv2d, Conv2dConfig},
    },
    prelude::*,
};

/// The layer kinds the network is built from. Each kind carries the
/// distributions its parameters are drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Convolution,
    Normalization,
    Linear,
}

impl LayerKind {
    pub fn weight_initializer(self) -> Initializer {
        match self {
            LayerKind::Convolution | LayerKind::Normalization => Initializer::Normal {
                mean: 0.0,
                std: 0.01,
            },
            LayerKind::Linear => Initializer::Uniform {
                min: -0.01,
                max: 0.01,
            },
        }
    }

    /// `None` for layers built without a bias.
    pub fn bias_initializer(self) -> Option<Initializer> {
        match self {
            LayerKind::Convolution => None,
            LayerKind::Normalization => Some(Initializer::Zeros),
            LayerKind::Linear => Some(Initializer::Uniform {
                min: -0.1,
                max: 0.1,
            }),
        }
    }
}

/// Square, bias-free convolution.
pub fn conv2d<B: Backend>(
    in_planes: usize,
    out_planes: usize,
    kernel: usize,
    stride: usize,
    padding: usize,
    device: &B::Device,
) -> Conv2d<B> {
    Conv2dConfig::new([in_planes, out_planes], [kernel, kernel])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(padding, padding))
        .with_bias(false)
        .with_initializer(LayerKind::Convolution.weight_initializer())
        .init(device)
}

pub fn batch_norm<B: Backend>(num_features: usize, device: &B::Device) -> BatchNorm<B, 2> {
    let kind = LayerKind::Normalization;
    let mut norm = BatchNormConfig::new(num_features).init(device);
    norm.gamma = kind.weight_initializer().init([num_features], device);
    if let Some(bias) = kind.bias_initializer() {
        norm.beta = bias.init([num_features], device);
    }
    norm
}

pub fn linear<B: Backend>(d_input: usize, d_output: usize, device: &B::Device) -> Linear<B> {
    let kind = LayerKind::Linear;
    let mut linear = LinearConfig::new(d_input, d_output)
        .with_initializer(kind.weight_initializer())
        .init(device);
    linear.bias = kind
        .bias_initializer()
        .map(|bias| bias.init([d_output], device));
    linear
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray;

    fn range<const D: usize>(tensor: Tensor<TestBackend, D>) -> (f32, f32) {
        let min = tensor.clone().min().into_scalar().elem::<f32>();
        let max = tensor.max().into_scalar().elem::<f32>();
        (min, max)
    }

    #[test]
    fn linear_draws_from_small_uniform_ranges() {
        let device = Default::default();
        let layer = linear::<TestBackend>(64, 32, &device);

        let (min, max) = range(layer.weight.val());
        assert!(min >= -0.01 && max <= 0.01);

        let bias = layer.bias.expect("linear layers carry a bias").val();
        let (min, max) = range(bias);
        assert!(min >= -0.1 && max <= 0.1);
        assert!(max - min > 0.01);
    }

    #[test]
    fn batch_norm_scale_is_small_and_shift_is_zero() {
        let device = Default::default();
        let norm = batch_norm::<TestBackend>(256, &device);

        let (min, max) = range(norm.gamma.val());
        assert!(min > -0.1 && max < 0.1);
        let (min, max) = range(norm.beta.val());
        assert_eq!((min, max), (0.0, 0.0));
    }

    #[test]
    fn convolution_has_no_bias_and_small_weights() {
        let device = Default::default();
        let conv = conv2d::<TestBackend>(16, 32, 3, 1, 1, &device);

        assert!(conv.bias.is_none());
        let weight = conv.weight.val();
        assert_eq!(weight.dims(), [32, 16, 3, 3]);
        let (min, max) = range(weight);
        assert!(min > -0.1 && max < 0.1);
    }
}
