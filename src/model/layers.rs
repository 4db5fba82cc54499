//! Component interface shared by every building block of the backbone.
//!
//! Modules report their parameterized layers as tagged views paired with a dotted
//! path (e.g. `layer2.0.downsample.0`). Initialization walks these views instead of
//! inspecting module types.

use burn::{
    nn::{conv::Conv2d, BatchNorm, Linear},
    tensor::{backend::Backend, Tensor},
};

/// Mutable view of a parameterized layer.
pub enum LayerMut<'a, B: Backend> {
    Conv(&'a mut Conv2d<B>),
    Norm(&'a mut BatchNorm<B>),
    Linear(&'a mut Linear<B>),
}

/// Receives every layer of a [LayerTree](LayerTree), in declaration order.
pub trait LayerVisitor<B: Backend> {
    fn visit(&mut self, path: &str, layer: LayerMut<'_, B>);
}

/// Enumeration of the parameterized layers owned by a module.
pub trait LayerTree<B: Backend> {
    /// Layers owned by the module, with their paths prefixed by `prefix`.
    fn layers_mut(&mut self, prefix: &str) -> Vec<(String, LayerMut<'_, B>)>;

    /// Apply a visitor to every layer.
    fn visit_layers<V: LayerVisitor<B>>(&mut self, visitor: &mut V)
    where
        Self: Sized,
    {
        for (path, layer) in self.layers_mut("") {
            visitor.visit(&path, layer);
        }
    }
}

/// A building block mapping a `[batch, channels, height, width]` tensor to another.
pub trait Component<B: Backend>: LayerTree<B> {
    fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4>;
}

/// Join a parent path and a child name with a dot.
pub fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}
