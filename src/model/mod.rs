pub mod block;
pub mod init;
pub mod params;
mod resnet;

pub use params::{FlatParams, drift, power_sum};
pub use resnet::{ResNet, ResNetConfig};
