//! ResNet-B convolutional backbone for [burn](https://burn.dev).
//!
//! The network emits the outputs of its three deepest stages (strides 8, 16 and 32)
//! for use by detection necks, or classification logits when built with a head.
//!
//! ```no_run
//! use burn::backend::NdArray;
//! use burn::tensor::Tensor;
//! use resnetb_burn::{load_backbone, FeatureMaps};
//!
//! let device = Default::default();
//! let model = load_backbone::<NdArray>(false, &device).unwrap();
//! let input = Tensor::<NdArray, 4>::zeros([1, 3, 608, 608], &device);
//! let FeatureMaps(c3, c4, c5) = model.forward_features(input);
//! ```
mod error;
pub mod model;

pub use error::{BackboneError, Result};
pub use model::*;
