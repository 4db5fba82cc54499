use burn::{
    module::RunningState,
    tensor::{backend::Backend, Distribution, Tensor},
};

use super::layers::{LayerMut, LayerVisitor};

/// Standard deviation of a convolution weight under fan-out variance scaling.
///
/// `sqrt(2 / (k_h * k_w * out_channels))`, the recommended value for ReLU.
pub fn conv_std(kernel_size: [usize; 2], out_channels: usize) -> f64 {
    let fan_out = kernel_size[0] * kernel_size[1] * out_channels;
    (2.0 / fan_out as f64).sqrt()
}

/// Initialization policy of the backbone.
///
/// Convolution weights are drawn from `Normal(0, conv_std)`; batch norms are reset to
/// the identity transform. Other layers keep the initialization they were built with.
#[derive(Debug, Default, Clone, Copy)]
pub struct KaimingInit;

impl<B: Backend> LayerVisitor<B> for KaimingInit {
    fn visit(&mut self, path: &str, layer: LayerMut<'_, B>) {
        match layer {
            LayerMut::Conv(conv) => {
                let [out_channels, _, k_h, k_w] = conv.weight.dims();
                let std = conv_std([k_h, k_w], out_channels);
                log::trace!("{path}: normal(0, {std:.5})");

                conv.weight = conv.weight.clone().map(|weight| {
                    Tensor::random(
                        weight.shape(),
                        Distribution::Normal(0.0, std),
                        &weight.device(),
                    )
                });
            }
            LayerMut::Norm(norm) => {
                norm.gamma = norm.gamma.clone().map(|gamma| gamma.ones_like());
                norm.beta = norm.beta.clone().map(|beta| beta.zeros_like());

                let mean = norm.running_mean.value();
                norm.running_mean = RunningState::new(mean.zeros_like());
                let var = norm.running_var.value();
                norm.running_var = RunningState::new(var.ones_like());
            }
            LayerMut::Linear(_) => {}
        }
    }
}
