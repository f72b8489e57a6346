pub mod decoder;
pub mod framing;
pub mod message;

pub use decoder::WireDecoder;
pub use message::{ChannelSet, DataBlock, Marker, RdaMessage};
