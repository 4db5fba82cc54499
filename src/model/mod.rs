pub mod block;
pub mod init;
pub mod layers;
pub mod resnet;
pub mod state;
pub mod weights;

pub use resnet::*;
pub use state::{LoadReport, StateDict};
pub use weights::*;
