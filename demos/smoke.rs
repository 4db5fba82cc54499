use resnetb_burn::{load_backbone, FeatureMaps};

use burn::{backend::NdArray, module::Module, tensor::Tensor};

const HEIGHT: usize = 608;
const WIDTH: usize = 608;

pub fn main() {
    // Load `model_data/resnet18.pth` with `--pretrained`
    let pretrained = std::env::args().any(|arg| arg == "--pretrained");

    // Create the backbone
    let device = Default::default();
    let model = load_backbone::<NdArray>(pretrained, &device)
        .map_err(|err| format!("Failed to build backbone.\nError: {err}"))
        .unwrap();

    // Run a dummy detector-sized input through the stages
    let input = Tensor::<NdArray, 4>::random(
        [1, 3, HEIGHT, WIDTH],
        burn::tensor::Distribution::Default,
        &device,
    );
    let FeatureMaps(a, b, c) = model.forward_features(input);

    println!("{:?}", a.dims());
    println!("{:?}", b.dims());
    println!("{:?}", c.dims());
    println!("Total params: {:.2}M", model.num_params() as f64 / 1e6);
}
