mod conv_unit;
mod rsu;
mod u2net;

pub use conv_unit::{resize_bilinear, ConvUnit, ConvUnitConfig};
pub use rsu::{Rsu, RsuConfig, RsuLevel};
pub use u2net::{SaliencyMaps, U2Net, U2NetConfig, U2NetRecord};
