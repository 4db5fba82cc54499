use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Device, Tensor},
};

use super::layers::{join_path, Component, LayerMut, LayerTree};

/// Output channels produced per bottleneck channel.
pub const EXPANSION: usize = 1;

/// ResNet-B bottleneck residual block.
///
/// Unlike the torchvision bottleneck, the first convolution is a 3x3 and the
/// block does not widen its output ([EXPANSION](EXPANSION) is 1).
#[derive(Module, Debug)]
pub struct Bottleneck<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B>,
    conv3: Conv2d<B>,
    bn3: BatchNorm<B>,
    relu: Relu,
    downsample: Option<Downsample<B>>,
}

impl<B: Backend> Bottleneck<B> {
    /// Number of input channels.
    pub fn in_planes(&self) -> usize {
        self.conv1.weight.dims()[1]
    }

    /// Number of output channels.
    pub fn out_planes(&self) -> usize {
        self.conv3.weight.dims()[0]
    }

    /// Stride of the block, carried by the second convolution.
    pub fn stride(&self) -> usize {
        self.conv2.stride[0]
    }

    /// The projection applied to the skip connection, if any.
    pub fn downsample(&self) -> Option<&Downsample<B>> {
        self.downsample.as_ref()
    }
}

impl<B: Backend> Component<B> for Bottleneck<B> {
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = input.clone();

        // Conv block
        let out = self.conv1.forward(input);
        let out = self.bn1.forward(out);
        let out = self.relu.forward(out);
        let out = self.conv2.forward(out);
        let out = self.bn2.forward(out);
        let out = self.relu.forward(out);
        let out = self.conv3.forward(out);
        let out = self.bn3.forward(out);

        // Skip connection
        let out = match &self.downsample {
            Some(downsample) => out + downsample.forward(identity),
            None => out + identity,
        };

        // Activation
        self.relu.forward(out)
    }
}

impl<B: Backend> LayerTree<B> for Bottleneck<B> {
    fn layers_mut(&mut self, prefix: &str) -> Vec<(String, LayerMut<'_, B>)> {
        let mut layers = vec![
            (join_path(prefix, "conv1"), LayerMut::Conv(&mut self.conv1)),
            (join_path(prefix, "bn1"), LayerMut::Norm(&mut self.bn1)),
            (join_path(prefix, "conv2"), LayerMut::Conv(&mut self.conv2)),
            (join_path(prefix, "bn2"), LayerMut::Norm(&mut self.bn2)),
            (join_path(prefix, "conv3"), LayerMut::Conv(&mut self.conv3)),
            (join_path(prefix, "bn3"), LayerMut::Norm(&mut self.bn3)),
        ];
        if let Some(downsample) = &mut self.downsample {
            layers.extend(downsample.layers_mut(&join_path(prefix, "downsample")));
        }
        layers
    }
}

/// [Bottleneck](Bottleneck) block configuration.
#[derive(Config, Debug)]
pub struct BottleneckConfig {
    /// Number of input channels.
    pub in_planes: usize,
    /// Number of bottleneck channels.
    pub planes: usize,
    /// Stride of the 3x3 spatial convolution and of the downsample path.
    #[config(default = 1)]
    pub stride: usize,
}

impl BottleneckConfig {
    /// Number of output channels, `planes * EXPANSION`.
    pub fn out_planes(&self) -> usize {
        self.planes * EXPANSION
    }

    /// Whether the skip connection needs a projection to match the block output.
    pub fn needs_downsample(&self) -> bool {
        self.stride != 1 || self.in_planes != self.out_planes()
    }

    /// Initialize a new [bottleneck](Bottleneck) block.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Bottleneck<B> {
        let out_planes = self.out_planes();

        // conv3x3
        let conv1 = Conv2dConfig::new([self.in_planes, self.planes], [3, 3])
            .with_stride([1, 1])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);
        // conv3x3, carries the block stride
        let conv2 = Conv2dConfig::new([self.planes, self.planes], [3, 3])
            .with_stride([self.stride, self.stride])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_bias(false)
            .init(device);
        // conv1x1
        let conv3 = Conv2dConfig::new([self.planes, out_planes], [1, 1])
            .with_bias(false)
            .init(device);

        let downsample = if self.needs_downsample() {
            Some(DownsampleConfig::new(self.in_planes, out_planes, self.stride).init(device))
        } else {
            None
        };

        Bottleneck {
            conv1,
            bn1: BatchNormConfig::new(self.planes).init(device),
            conv2,
            bn2: BatchNormConfig::new(self.planes).init(device),
            conv3,
            bn3: BatchNormConfig::new(out_planes).init(device),
            relu: Relu::new(),
            downsample,
        }
    }
}

/// Downsample layer applies a 1x1 conv to reduce the resolution [H, W] and adjust the number of channels.
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
}

impl<B: Backend> Downsample<B> {
    pub fn out_channels(&self) -> usize {
        self.conv.weight.dims()[0]
    }

    pub fn stride(&self) -> usize {
        self.conv.stride[0]
    }
}

impl<B: Backend> Component<B> for Downsample<B> {
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let out = self.conv.forward(input);
        self.bn.forward(out)
    }
}

// Indexed like the `nn.Sequential` used by torchvision checkpoints.
impl<B: Backend> LayerTree<B> for Downsample<B> {
    fn layers_mut(&mut self, prefix: &str) -> Vec<(String, LayerMut<'_, B>)> {
        vec![
            (join_path(prefix, "0"), LayerMut::Conv(&mut self.conv)),
            (join_path(prefix, "1"), LayerMut::Norm(&mut self.bn)),
        ]
    }
}

/// [Downsample](Downsample) configuration.
#[derive(Config, Debug)]
pub struct DownsampleConfig {
    pub in_channels: usize,
    pub out_channels: usize,
    pub stride: usize,
}

impl DownsampleConfig {
    /// Initialize a new [downsample](Downsample) layer.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> Downsample<B> {
        // conv1x1 (default padding = valid)
        let conv = Conv2dConfig::new([self.in_channels, self.out_channels], [1, 1])
            .with_stride([self.stride, self.stride])
            .with_padding(PaddingConfig2d::Explicit(0, 0))
            .with_bias(false)
            .init(device);
        let bn = BatchNormConfig::new(self.out_channels).init(device);

        Downsample { conv, bn }
    }
}

/// Collection of sequential residual blocks forming one network stage.
#[derive(Module, Debug)]
pub struct LayerBlock<B: Backend> {
    blocks: Vec<Bottleneck<B>>,
}

impl<B: Backend> LayerBlock<B> {
    pub fn blocks(&self) -> &[Bottleneck<B>] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Number of channels produced by the stage.
    pub fn out_planes(&self) -> usize {
        self.blocks[self.blocks.len() - 1].out_planes()
    }
}

impl<B: Backend> Component<B> for LayerBlock<B> {
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks
            .iter()
            .fold(input, |out, block| block.forward(out))
    }
}

impl<B: Backend> LayerTree<B> for LayerBlock<B> {
    fn layers_mut(&mut self, prefix: &str) -> Vec<(String, LayerMut<'_, B>)> {
        self.blocks
            .iter_mut()
            .enumerate()
            .flat_map(|(idx, block)| block.layers_mut(&join_path(prefix, &idx.to_string())))
            .collect()
    }
}

/// [Stage](LayerBlock) configuration.
#[derive(Config, Debug)]
pub struct LayerBlockConfig {
    pub blocks: Vec<BottleneckConfig>,
}

impl LayerBlockConfig {
    /// Build the configuration of a stage.
    ///
    /// Only the leading block may change the stride or the channel count; the
    /// remaining blocks consume the leading block's output as is.
    ///
    /// # Arguments
    ///
    /// * `in_planes` - Channels produced by the previous stage.
    /// * `planes` - Bottleneck width of the stage.
    /// * `num_blocks` - Number of residual blocks.
    /// * `stride` - Stride of the leading block.
    ///
    /// # Returns
    ///
    /// The stage configuration and the number of channels it produces, to be fed
    /// to the next stage.
    pub fn build(
        in_planes: usize,
        planes: usize,
        num_blocks: usize,
        stride: usize,
    ) -> (Self, usize) {
        let first = BottleneckConfig::new(in_planes, planes).with_stride(stride);
        let out_planes = first.out_planes();

        let blocks = core::iter::once(first)
            .chain((1..num_blocks).map(|_| BottleneckConfig::new(out_planes, planes)))
            .collect();

        (Self { blocks }, out_planes)
    }

    /// Check that the stage is non-empty, that its blocks chain, and that only
    /// the leading block changes shape.
    pub fn try_validate(&self) -> Result<(), String> {
        if self.blocks.is_empty() {
            return Err("stage has no blocks".to_string());
        }

        for (idx, pair) in self.blocks.windows(2).enumerate() {
            let (prev, curr) = (&pair[0], &pair[1]);
            if prev.out_planes() != curr.in_planes {
                return Err(format!(
                    "block[{}].out_planes({}) != block[{}].in_planes({})",
                    idx,
                    prev.out_planes(),
                    idx + 1,
                    curr.in_planes,
                ));
            }
            if curr.needs_downsample() {
                return Err(format!(
                    "block[{}] changes shape but is not the leading block",
                    idx + 1
                ));
            }
        }
        Ok(())
    }

    /// Initialize a new [stage](LayerBlock).
    ///
    /// # Panics
    ///
    /// If [try_validate](LayerBlockConfig::try_validate) fails.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> LayerBlock<B> {
        if let Err(err) = self.try_validate() {
            panic!("invalid stage config: {err}");
        }

        LayerBlock {
            blocks: self.blocks.iter().map(|block| block.init(device)).collect(),
        }
    }
}
