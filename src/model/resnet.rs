use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Linear, LinearConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Device, Tensor},
};

use super::block::{LayerBlock, LayerBlockConfig, EXPANSION};
use super::init::KaimingInit;
use super::layers::{join_path, Component, LayerMut, LayerTree};
use super::state::{self, LoadReport, StateDict};
use crate::error::BackboneError;

/// Residual blocks per stage of the backbone exposed as `resnet50`.
pub const RESNET50_BLOCKS: [usize; 4] = [2, 2, 2, 2];

/// Stage widths (before expansion) and strides of the leading blocks.
const STAGES: [(usize, usize); 4] = [(64, 1), (128, 2), (256, 2), (512, 2)];

/// Feature maps emitted by stages 2, 3 and 4, at strides 8, 16 and 32 of the input.
#[derive(Debug, Clone)]
pub struct FeatureMaps<B: Backend>(pub Tensor<B, 4>, pub Tensor<B, 4>, pub Tensor<B, 4>);

/// Output of a [ResNet](ResNet) forward pass.
#[derive(Debug, Clone)]
pub enum BackboneOutput<B: Backend> {
    /// `[batch, num_classes]` logits, when the classification head is enabled.
    Logits(Tensor<B, 2>),
    /// Multi-scale features otherwise.
    Features(FeatureMaps<B>),
}

impl<B: Backend> BackboneOutput<B> {
    pub fn logits(self) -> Option<Tensor<B, 2>> {
        match self {
            Self::Logits(logits) => Some(logits),
            Self::Features(_) => None,
        }
    }

    pub fn features(self) -> Option<FeatureMaps<B>> {
        match self {
            Self::Features(features) => Some(features),
            Self::Logits(_) => None,
        }
    }
}

/// ResNet-B backbone.
///
/// A 7x7 stem followed by four stages of [bottleneck](super::block::Bottleneck) blocks,
/// with an optional global-pool + linear classification head.
#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B>,
    relu: Relu,
    maxpool: MaxPool2d,
    layer1: LayerBlock<B>,
    layer2: LayerBlock<B>,
    layer3: LayerBlock<B>,
    layer4: LayerBlock<B>,
    avgpool: AdaptiveAvgPool2d,
    fc: Option<Linear<B>>,
}

impl<B: Backend> ResNet<B> {
    /// Run the backbone.
    ///
    /// # Arguments
    ///
    /// * `input` - A `[batch, 3, height, width]` image tensor.
    ///
    /// # Returns
    ///
    /// Logits when the classification head is enabled, the three deepest stage
    /// outputs otherwise.
    ///
    /// # Panics
    ///
    /// If the input does not have 3 channels.
    pub fn forward(&self, input: Tensor<B, 4>) -> BackboneOutput<B> {
        let features = self.forward_features(input);

        match &self.fc {
            Some(fc) => {
                let out = self.avgpool.forward(features.2);
                // Reshape [B, C, 1, 1] -> [B, C]
                let out = out.flatten::<2>(1, 3);
                BackboneOutput::Logits(fc.forward(out))
            }
            None => BackboneOutput::Features(features),
        }
    }

    /// Run the stem and the four stages, regardless of the classification head.
    pub fn forward_features(&self, input: Tensor<B, 4>) -> FeatureMaps<B> {
        let [_, channels, _, _] = input.dims();
        assert_eq!(
            channels, 3,
            "ResNet expects a [batch, 3, height, width] input, got {:?}",
            input.dims()
        );

        // Stem
        let out = self.conv1.forward(input);
        let out = self.bn1.forward(out);
        let out = self.relu.forward(out);
        let out = self.maxpool.forward(out);

        // Residual stages
        let out = self.layer1.forward(out);
        let c3 = self.layer2.forward(out);
        let c4 = self.layer3.forward(c3.clone());
        let c5 = self.layer4.forward(c4.clone());
        log::debug!(
            "features: {:?} {:?} {:?}",
            c3.dims(),
            c4.dims(),
            c5.dims()
        );

        FeatureMaps(c3, c4, c5)
    }

    /// Whether the classification head is enabled.
    pub fn include_top(&self) -> bool {
        self.fc.is_some()
    }

    /// The four stages, in order.
    pub fn stages(&self) -> [&LayerBlock<B>; 4] {
        [&self.layer1, &self.layer2, &self.layer3, &self.layer4]
    }

    /// Snapshot all parameters and running statistics.
    pub fn state_dict(&self) -> StateDict {
        state::state_dict(self)
    }

    /// Overwrite parameters from snapshots, ignoring entries that do not fit this
    /// network.
    pub fn load_state_dict(&mut self, dict: StateDict) -> LoadReport {
        state::load_state_dict(self, dict)
    }

    /// ResNet-B with `[2, 2, 2, 2]` blocks.
    ///
    /// Named `resnet50` after the detection trunk it stands in for; it is built with
    /// the non-expanding bottleneck and is paired with `resnet18.pth` weights.
    ///
    /// # Arguments
    ///
    /// * `num_classes` - Number of output classes of the head.
    /// * `include_top` - Whether to build the classification head.
    /// * `device` - Device to create the module on.
    pub fn resnet50(num_classes: usize, include_top: bool, device: &Device<B>) -> Self {
        ResNetConfig::new(RESNET50_BLOCKS)
            .with_num_classes(num_classes)
            .with_include_top(include_top)
            .init(device)
    }
}

impl<B: Backend> LayerTree<B> for ResNet<B> {
    fn layers_mut(&mut self, prefix: &str) -> Vec<(String, LayerMut<'_, B>)> {
        let mut layers = vec![
            (join_path(prefix, "conv1"), LayerMut::Conv(&mut self.conv1)),
            (join_path(prefix, "bn1"), LayerMut::Norm(&mut self.bn1)),
        ];
        layers.extend(self.layer1.layers_mut(&join_path(prefix, "layer1")));
        layers.extend(self.layer2.layers_mut(&join_path(prefix, "layer2")));
        layers.extend(self.layer3.layers_mut(&join_path(prefix, "layer3")));
        layers.extend(self.layer4.layers_mut(&join_path(prefix, "layer4")));
        if let Some(fc) = &mut self.fc {
            layers.push((join_path(prefix, "fc"), LayerMut::Linear(fc)));
        }
        layers
    }
}

/// [ResNet](ResNet) configuration.
#[derive(Config, Debug)]
pub struct ResNetConfig {
    /// Residual blocks in each of the four stages.
    pub blocks: [usize; 4],

    /// Number of output classes of the classification head.
    #[config(default = 1000)]
    pub num_classes: usize,

    /// Build the classification head instead of emitting multi-scale features.
    #[config(default = false)]
    pub include_top: bool,
}

impl ResNetConfig {
    /// Check the block counts and the head size.
    pub fn try_validate(&self) -> crate::Result<()> {
        if let Some(idx) = self.blocks.iter().position(|&n| n == 0) {
            return Err(BackboneError::InvalidConfig(format!(
                "stage {} has no blocks: {:?}",
                idx + 1,
                self.blocks
            )));
        }
        if self.include_top && self.num_classes == 0 {
            return Err(BackboneError::InvalidConfig(
                "classification head needs at least one class".to_string(),
            ));
        }
        Ok(())
    }

    /// Stage configs, built by threading the running channel count through the
    /// stage builder.
    pub fn stages(&self) -> [LayerBlockConfig; 4] {
        let mut in_planes = 64;
        core::array::from_fn(|idx| {
            let (planes, stride) = STAGES[idx];
            let (stage, out_planes) =
                LayerBlockConfig::build(in_planes, planes, self.blocks[idx], stride);
            in_planes = out_planes;
            stage
        })
    }

    /// Initialize a new [ResNet](ResNet) module.
    ///
    /// Convolutions are drawn from a fan-out normal and batch norms are reset to
    /// identity before the module is returned.
    ///
    /// # Panics
    ///
    /// If [try_validate](ResNetConfig::try_validate) fails.
    pub fn init<B: Backend>(&self, device: &Device<B>) -> ResNet<B> {
        if let Err(err) = self.try_validate() {
            panic!("{err}");
        }

        // 7x7 conv, 64, /2
        let conv1 = Conv2dConfig::new([3, 64], [7, 7])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(3, 3))
            .with_bias(false)
            .init(device);
        let bn1 = BatchNormConfig::new(64).init(device);

        // 3x3 maxpool, /2
        let maxpool = MaxPool2dConfig::new([3, 3])
            .with_strides([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .init();

        let [layer1, layer2, layer3, layer4] = self.stages();

        // Average pooling [B, 512 * expansion, H, W] -> [B, 512 * expansion, 1, 1]
        let avgpool = AdaptiveAvgPool2dConfig::new([1, 1]).init();

        let fc = self
            .include_top
            .then(|| LinearConfig::new(512 * EXPANSION, self.num_classes).init(device));

        let mut model = ResNet {
            conv1,
            bn1,
            relu: Relu::new(),
            maxpool,
            layer1: layer1.init(device),
            layer2: layer2.init(device),
            layer3: layer3.init(device),
            layer4: layer4.init(device),
            avgpool,
            fc,
        };
        model.visit_layers(&mut KaimingInit);

        log::debug!(
            "Built ResNet-B {:?} (include_top: {}, {} parameters)",
            self.blocks,
            self.include_top,
            model.num_params()
        );

        model
    }
}

/// Build a backbone from its per-stage block counts.
///
/// # Arguments
///
/// * `blocks` - Residual blocks in each stage.
/// * `num_classes` - Number of output classes of the head.
/// * `include_top` - Whether to build the classification head.
/// * `device` - Device to create the module on.
pub fn build_backbone<B: Backend>(
    blocks: [usize; 4],
    num_classes: usize,
    include_top: bool,
    device: &Device<B>,
) -> ResNet<B> {
    ResNetConfig::new(blocks)
        .with_num_classes(num_classes)
        .with_include_top(include_top)
        .init(device)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::init::conv_std;
    use crate::model::state::find;
    use crate::tests::{sample_std, TestBackend};

    #[test]
    fn stages_chain_channel_counts() {
        let stages = ResNetConfig::new([2, 3, 1, 2]).stages();

        let expected_in = [64, 64, 128, 256];
        let expected_out = [64, 128, 256, 512];
        let expected_stride = [1, 2, 2, 2];
        for (idx, stage) in stages.iter().enumerate() {
            assert!(stage.try_validate().is_ok());
            let first = &stage.blocks[0];
            assert_eq!(first.in_planes, expected_in[idx]);
            assert_eq!(first.out_planes(), expected_out[idx]);
            assert_eq!(first.stride, expected_stride[idx]);
        }
        let lengths: Vec<usize> = stages.iter().map(|stage| stage.blocks.len()).collect();
        assert_eq!(lengths, [2, 3, 1, 2]);

        // Stage 1 keeps 64 channels at stride 1: identity shortcut throughout.
        assert!(stages[0].blocks.iter().all(|b| !b.needs_downsample()));
        for stage in &stages[1..] {
            assert!(stage.blocks[0].needs_downsample());
            assert!(stage.blocks[1..].iter().all(|b| !b.needs_downsample()));
        }
    }

    #[test]
    fn config_validation() {
        assert!(ResNetConfig::new([2, 2, 2, 2]).try_validate().is_ok());
        assert!(matches!(
            ResNetConfig::new([2, 0, 2, 2]).try_validate(),
            Err(BackboneError::InvalidConfig(_))
        ));
        assert!(matches!(
            ResNetConfig::new([1, 1, 1, 1])
                .with_include_top(true)
                .with_num_classes(0)
                .try_validate(),
            Err(BackboneError::InvalidConfig(_))
        ));
    }

    #[test]
    #[should_panic(expected = "stage 3 has no blocks")]
    fn init_rejects_empty_stage() {
        let device = Default::default();
        let _ = ResNetConfig::new([1, 1, 0, 1]).init::<TestBackend>(&device);
    }

    #[test]
    fn leading_blocks_carry_the_only_projections() {
        let device = Default::default();
        let model = build_backbone::<TestBackend>([2, 2, 2, 2], 10, false, &device);

        for (idx, stage) in model.stages().iter().enumerate() {
            let blocks = stage.blocks();
            assert_eq!(blocks[0].downsample().is_some(), idx > 0);
            for block in &blocks[1..] {
                assert!(block.downsample().is_none());
                assert_eq!(block.stride(), 1);
            }
        }
    }

    #[test]
    fn feature_mode_shapes() {
        let device = Default::default();
        let model = build_backbone::<TestBackend>([1, 1, 1, 1], 1000, false, &device);
        assert!(!model.include_top());

        let input = Tensor::<TestBackend, 4>::ones([2, 3, 64, 96], &device);
        let FeatureMaps(a, b, c) = model.forward(input).features().expect("features");

        assert_eq!(a.dims(), [2, 128, 8, 12]);
        assert_eq!(b.dims(), [2, 256, 4, 6]);
        assert_eq!(c.dims(), [2, 512, 2, 3]);
    }

    #[test]
    fn classification_mode_shape() {
        let device = Default::default();
        let model = build_backbone::<TestBackend>([1, 1, 1, 1], 10, true, &device);
        assert!(model.include_top());

        let input = Tensor::<TestBackend, 4>::ones([2, 3, 64, 64], &device);
        let logits = model.forward(input).logits().expect("logits");

        assert_eq!(logits.dims(), [2, 10]);
    }

    #[test]
    #[should_panic(expected = "expects a [batch, 3, height, width] input")]
    fn forward_rejects_non_rgb_input() {
        let device = Default::default();
        let model = build_backbone::<TestBackend>([1, 1, 1, 1], 10, false, &device);
        let _ = model.forward(Tensor::ones([1, 4, 32, 32], &device));
    }

    #[test]
    fn init_draws_convolutions_from_fan_out_normal() {
        let device = Default::default();
        let model = build_backbone::<TestBackend>([1, 1, 1, 1], 10, true, &device);
        let dict = model.state_dict();

        for (path, kernel, out_channels) in [
            ("conv1.weight", [7, 7], 64),
            ("layer2.blocks.0.downsample.conv.weight", [1, 1], 128),
            ("layer3.blocks.0.conv2.weight", [3, 3], 256),
        ] {
            let values = find(&dict, path)
                .unwrap_or_else(|| panic!("no snapshot for {path}"))
                .to_data()
                .expect("tensor data")
                .to_vec::<f32>()
                .expect("f32 data");
            let expected = conv_std(kernel, out_channels);
            let actual = sample_std(&values);
            assert!(
                (actual - expected).abs() / expected < 0.1,
                "{path}: std {actual} != {expected}"
            );
        }
    }

    #[test]
    fn state_dict_follows_module_layout() {
        let device = Default::default();
        let model = build_backbone::<TestBackend>([2, 2, 2, 2], 1000, true, &device);
        let dict = model.state_dict();

        for path in [
            "conv1.weight",
            "bn1.running_mean",
            "layer1.blocks.1.conv3.weight",
            "layer2.blocks.0.downsample.conv.weight",
            "layer4.blocks.1.bn2.beta",
            "fc.weight",
            "fc.bias",
        ] {
            assert!(find(&dict, path).is_some(), "missing {path}");
        }
        assert!(find(&dict, "layer1.blocks.0.downsample.conv.weight").is_none());
        assert!(find(&dict, "layer3.blocks.1.downsample.conv.weight").is_none());
    }
}
