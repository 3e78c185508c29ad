use crate::dataset::{HEIGHT, NUM_CLASSES, WIDTH};
use crate::profiler::{Category, Tracer};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{Initializer, Linear, LinearConfig, Relu};
use burn::prelude::*;

pub trait ModelConfigExt<B: Backend>: Config {
    type Model: Module<B>;
    fn init(&self, device: &B::Device) -> Self::Model;
}

/// Two convolution + max-pooling stages followed by two dense layers.
#[derive(Config, Debug)]
pub struct LeNetConfig {
    #[config(default = 20)]
    pub conv1_channels: usize,
    #[config(default = 50)]
    pub conv2_channels: usize,
    /// Square kernel size of both convolutions.
    #[config(default = 5)]
    pub kernel_size: usize,
    #[config(default = 512)]
    pub hidden_size: usize,
    #[config(default = "NUM_CLASSES")]
    pub num_classes: usize,
}

impl LeNetConfig {
    /// Flattened feature size entering `dense1`, or `None` when the kernel
    /// does not fit the image.
    ///
    /// Each stage is a valid convolution followed by a 2x2 pooling with stride 2,
    /// and must leave at least one pixel per side.
    pub fn flat_size(&self) -> Option<usize> {
        let stage = |side: usize| {
            let convolved = side.checked_sub(self.kernel_size.checked_sub(1)?)?;
            Some(convolved / 2).filter(|&pooled| pooled > 0)
        };
        let height = stage(stage(HEIGHT)?)?;
        let width = stage(stage(WIDTH)?)?;
        Some(self.conv2_channels * height * width)
    }
}

fn xavier() -> Initializer {
    Initializer::XavierUniform { gain: 1.0 }
}

/// Xavier weights, zero bias.
fn conv2d<B: Backend>(
    channels: [usize; 2],
    kernel: [usize; 2],
    device: &B::Device,
) -> Conv2d<B> {
    let mut conv = Conv2dConfig::new(channels, kernel)
        .with_initializer(xavier())
        .init(device);
    conv.bias = conv
        .bias
        .map(|_| Initializer::Zeros.init([channels[1]], device));
    conv
}

/// Xavier weights, zero bias.
fn linear<B: Backend>(d_input: usize, d_output: usize, device: &B::Device) -> Linear<B> {
    let mut linear = LinearConfig::new(d_input, d_output)
        .with_initializer(xavier())
        .init(device);
    linear.bias = linear
        .bias
        .map(|_| Initializer::Zeros.init([d_output], device));
    linear
}

#[derive(Module, Debug)]
pub struct LeNet<B: Backend> {
    pub conv1: Conv2d<B>,
    pub pool1: MaxPool2d,
    pub conv2: Conv2d<B>,
    pub pool2: MaxPool2d,
    pub dense1: Linear<B>,
    pub dense2: Linear<B>,
    pub activation: Relu,
}

impl<B: Backend> ModelConfigExt<B> for LeNetConfig {
    type Model = LeNet<B>;

    /// Returns the initialized model.
    ///
    /// # Panics
    /// If `kernel_size` does not fit a `HEIGHT x WIDTH` image.
    fn init(&self, device: &B::Device) -> Self::Model {
        let Some(flat_size) = self.flat_size() else {
            panic!(
                "kernel size {} does not fit a {HEIGHT}x{WIDTH} image",
                self.kernel_size
            );
        };
        let kernel = [self.kernel_size, self.kernel_size];
        let pool = || MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();
        LeNet {
            conv1: conv2d([1, self.conv1_channels], kernel, device),
            pool1: pool(),
            conv2: conv2d([self.conv1_channels, self.conv2_channels], kernel, device),
            pool2: pool(),
            dense1: linear(flat_size, self.hidden_size, device),
            dense2: linear(self.hidden_size, self.num_classes, device),
            activation: Relu::new(),
        }
    }
}

impl<B: Backend> LeNet<B> {
    /// Every layer runs inside `tracer`, named `<layer>::<Op>`.
    ///
    /// # Shapes
    ///   - Input [batch, 1, HEIGHT, WIDTH]
    ///   - Output [batch, num_classes]
    pub fn forward(&self, images: Tensor<B, 4>, tracer: &mut impl Tracer) -> Tensor<B, 2> {
        let [batch, _channels, _height, _width] = images.dims();
        let forward = Category::Forward;

        let x = tracer.trace("conv1::Conv2d", forward, || self.conv1.forward(images));
        let x = tracer.trace("conv1::Relu", forward, || self.activation.forward(x));
        let x = tracer.trace("pool1::MaxPool2d", forward, || self.pool1.forward(x));

        let x = tracer.trace("conv2::Conv2d", forward, || self.conv2.forward(x));
        let x = tracer.trace("conv2::Relu", forward, || self.activation.forward(x));
        let x = tracer.trace("pool2::MaxPool2d", forward, || self.pool2.forward(x));

        let x: Tensor<B, 2> = tracer.trace("flatten::Flatten", forward, || x.flatten(1, 3));
        let [_batch, flat_size] = x.dims();
        debug_assert_eq!(self.dense1.weight.dims()[0], flat_size);

        let x = tracer.trace("dense1::Linear", forward, || self.dense1.forward(x));
        let x = tracer.trace("dense1::Relu", forward, || self.activation.forward(x));
        let x = tracer.trace("dense2::Linear", forward, || self.dense2.forward(x));

        let [_batch, num_classes] = self.dense2.weight.dims();
        debug_assert_eq!([batch, num_classes], x.dims());
        x
    }
}
