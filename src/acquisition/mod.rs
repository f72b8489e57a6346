pub mod gatherer;
pub mod ring_buffer;

pub use gatherer::Gatherer;
pub use ring_buffer::{BufferLayout, RingBuffer};
