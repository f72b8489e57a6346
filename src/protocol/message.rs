// RDA message model. One fixed binary layout, no versioning field.

/// Ordered channel description received once per connection in a Start
/// message. Immutable afterwards; wire order is authoritative.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSet {
    pub names: Vec<String>,
    pub resolutions: Vec<f64>,
    /// Sampling interval in microseconds as sent by the recorder.
    pub sampling_interval_us: f64,
}

impl ChannelSet {
    pub fn count(&self) -> usize {
        self.names.len()
    }

    /// Sampling rate in Hz derived from the microsecond interval.
    pub fn sampling_rate(&self) -> f64 {
        1_000_000.0 / self.sampling_interval_us
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

/// One annotation attached to a data block.
#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub position: u32,
    pub points: u32,
    pub channel: i32,
    pub kind: String,
    pub description: String,
}

/// One block of freshly arrived samples, de-interleaved to channel-major
/// order (`samples[c][p]`). The block sequence number is assigned by the
/// sender and may skip forward on transmission overflow; it never decreases.
#[derive(Debug, Clone, PartialEq)]
pub struct DataBlock {
    pub sequence: u32,
    pub samples: Vec<Vec<f64>>,
    pub markers: Vec<Marker>,
}

impl DataBlock {
    pub fn points(&self) -> usize {
        self.samples.first().map_or(0, |ch| ch.len())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RdaMessage {
    Start(ChannelSet),
    Data(DataBlock),
    Stop,
}

pub const MSG_START: u32 = 1;
pub const MSG_STOP: u32 = 3;
pub const MSG_DATA: u32 = 4;
pub const HEADER_LEN: usize = 24;
