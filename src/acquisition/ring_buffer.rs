use std::time::Instant;

use crate::error::{Error, Result};
use crate::protocol::DataBlock;

/// Geometry of the rolling sample memory. The sample count per channel is
/// `memory_secs * blocks_per_sec * block_size`, an exact multiple of the
/// block size by construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferLayout {
    pub channels: usize,
    /// Points per block (P), fixed once the Start message arrives.
    pub block_size: usize,
    pub blocks_per_sec: usize,
    pub memory_secs: usize,
    pub sampling_rate: f64,
}

impl BufferLayout {
    /// Samples held per channel (S).
    pub fn samples(&self) -> usize {
        self.memory_secs * self.blocks_per_sec * self.block_size
    }

    /// Block-sequence slots held (K).
    pub fn slots(&self) -> usize {
        self.memory_secs * self.blocks_per_sec
    }

    /// Nominal duration of one block in seconds.
    pub fn block_duration(&self) -> f64 {
        self.block_size as f64 / self.sampling_rate
    }
}

const NO_SEQUENCE: i64 = -1;

/// Fixed-capacity C x S sample store plus a parallel length-K ring of block
/// sequence numbers. Implemented as shift-on-write rather than a circular
/// pointer so reads stay plain contiguous slices. A push moves the matrix
/// and the sequence ring together; slots not yet filled hold NaN (samples)
/// and -1 (sequences) as placeholders.
pub struct RingBuffer {
    layout: BufferLayout,
    data: Vec<Vec<f64>>,
    sequences: Vec<i64>,
    pushes: u64,
    first_sequence: Option<u32>,
    started: Option<Instant>,
}

impl RingBuffer {
    pub fn new(layout: BufferLayout) -> Self {
        RingBuffer {
            layout,
            data: vec![vec![f64::NAN; layout.samples()]; layout.channels],
            sequences: vec![NO_SEQUENCE; layout.slots()],
            pushes: 0,
            first_sequence: None,
            started: None,
        }
    }

    pub fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    /// Returns to the fresh state. Used when the acquisition connection is
    /// re-established; session data (SCP list, coefficients) lives elsewhere
    /// and survives.
    pub fn reset(&mut self) {
        for channel in &mut self.data {
            channel.fill(f64::NAN);
        }
        self.sequences.fill(NO_SEQUENCE);
        self.pushes = 0;
        self.first_sequence = None;
        self.started = None;
    }

    /// Shifts every channel left by exactly one block, appends the new
    /// samples in the vacated tail and records the block sequence number in
    /// the parallel ring. One push is one block; both structures move
    /// together under the same `&mut self`.
    pub fn push(&mut self, block: &DataBlock) -> Result<()> {
        let p = self.layout.block_size;
        if block.samples.len() != self.layout.channels || block.points() != p {
            return Err(Error::Protocol(format!(
                "block shape {}x{} does not match buffer layout {}x{}",
                block.samples.len(),
                block.points(),
                self.layout.channels,
                p
            )));
        }

        let s = self.layout.samples();
        for (channel, incoming) in self.data.iter_mut().zip(&block.samples) {
            channel.copy_within(p.., 0);
            channel[s - p..].copy_from_slice(incoming);
        }
        self.sequences.copy_within(1.., 0);
        let k = self.layout.slots();
        self.sequences[k - 1] = i64::from(block.sequence);

        if self.pushes == 0 {
            self.first_sequence = Some(block.sequence);
            self.started = Some(Instant::now());
        }
        self.pushes += 1;
        Ok(())
    }

    /// Count of samples per channel that hold real data rather than the
    /// not-yet-filled placeholder.
    pub fn filled(&self) -> usize {
        ((self.pushes as usize) * self.layout.block_size).min(self.layout.samples())
    }

    /// The last `n_seconds` of every channel, oldest first.
    pub fn latest(&self, n_seconds: f64) -> Result<Vec<Vec<f64>>> {
        let needed = (n_seconds * self.layout.sampling_rate).round() as usize;
        let available = self.filled();
        if needed > available || needed > self.layout.samples() {
            return Err(Error::InsufficientData { needed, available });
        }
        let s = self.layout.samples();
        Ok(self
            .data
            .iter()
            .map(|channel| channel[s - needed..].to_vec())
            .collect())
    }

    /// The last `n_seconds` of one channel, oldest first.
    pub fn latest_channel(&self, index: usize, n_seconds: f64) -> Result<Vec<f64>> {
        let needed = (n_seconds * self.layout.sampling_rate).round() as usize;
        let available = self.filled();
        if needed > available || needed > self.layout.samples() {
            return Err(Error::InsufficientData { needed, available });
        }
        let channel = &self.data[index];
        Ok(channel[channel.len() - needed..].to_vec())
    }

    /// Full contiguous view of one channel, placeholders included.
    pub fn channel(&self, index: usize) -> &[f64] {
        &self.data[index]
    }

    /// The sequence ring, oldest first; unfilled slots hold -1.
    pub fn sequences(&self) -> &[i64] {
        &self.sequences
    }

    /// True when the sender skipped ahead between the two most recent
    /// blocks: a transmission overflow. Not fatal; the caller logs it.
    pub fn overflow_detected(&self) -> bool {
        let k = self.sequences.len();
        if k < 2 {
            return false;
        }
        let (prev, last) = (self.sequences[k - 2], self.sequences[k - 1]);
        prev != NO_SEQUENCE && last != NO_SEQUENCE && last - prev > 1
    }

    /// Signed difference between theoretical elapsed time (blocks since the
    /// first block times nominal block duration) and measured wall-clock
    /// time. Positive means the stream runs ahead of the wall clock.
    /// Observability only.
    pub fn lag(&self) -> Option<f64> {
        let started = self.started?;
        let first = i64::from(self.first_sequence?);
        let last = *self.sequences.last()?;
        if last == NO_SEQUENCE {
            return None;
        }
        let theoretical = (last - first) as f64 * self.layout.block_duration();
        Some(theoretical - started.elapsed().as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::DataBlock;

    fn layout() -> BufferLayout {
        BufferLayout {
            channels: 2,
            block_size: 4,
            blocks_per_sec: 5,
            memory_secs: 2,
            sampling_rate: 20.0,
        }
    }

    fn block(sequence: u32, base: f64) -> DataBlock {
        DataBlock {
            sequence,
            samples: vec![
                (0..4).map(|i| base + i as f64).collect(),
                (0..4).map(|i| -(base + i as f64)).collect(),
            ],
            markers: vec![],
        }
    }

    #[test]
    fn push_keeps_length_and_appends_block_at_tail() {
        let mut buf = RingBuffer::new(layout());
        let s = buf.layout().samples();
        buf.push(&block(0, 1.0)).unwrap();
        buf.push(&block(1, 5.0)).unwrap();

        assert_eq!(buf.channel(0).len(), s);
        assert_eq!(&buf.channel(0)[s - 4..], &[5.0, 6.0, 7.0, 8.0]);
        assert_eq!(&buf.channel(0)[s - 8..s - 4], &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(&buf.channel(1)[s - 4..], &[-5.0, -6.0, -7.0, -8.0]);
    }

    #[test]
    fn mismatched_block_shape_is_rejected() {
        let mut buf = RingBuffer::new(layout());
        let bad = DataBlock {
            sequence: 0,
            samples: vec![vec![0.0; 3]; 2],
            markers: vec![],
        };
        assert!(matches!(
            buf.push(&bad),
            Err(crate::error::Error::Protocol(_))
        ));
    }

    #[test]
    fn latest_requires_enough_filled_samples() {
        let mut buf = RingBuffer::new(layout());
        buf.push(&block(0, 0.0)).unwrap();

        // One block = 4 samples = 0.2 s. Asking for a second is too much.
        let err = buf.latest(1.0).unwrap_err();
        assert!(matches!(
            err,
            crate::error::Error::InsufficientData {
                needed: 20,
                available: 4
            }
        ));

        let got = buf.latest(0.2).unwrap();
        assert_eq!(got[0], vec![0.0, 1.0, 2.0, 3.0]);
    }

    #[test]
    fn gapless_sequences_never_flag_overflow() {
        let mut buf = RingBuffer::new(layout());
        for seq in 0..buf.layout().slots() as u32 {
            buf.push(&block(seq, 0.0)).unwrap();
            assert!(!buf.overflow_detected());
        }
    }

    #[test]
    fn a_sequence_gap_flags_overflow_exactly_once() {
        let mut buf = RingBuffer::new(layout());
        buf.push(&block(0, 0.0)).unwrap();
        buf.push(&block(1, 0.0)).unwrap();
        buf.push(&block(5, 0.0)).unwrap();
        assert!(buf.overflow_detected());
        buf.push(&block(6, 0.0)).unwrap();
        assert!(!buf.overflow_detected());
    }

    #[test]
    fn reset_restores_placeholders() {
        let mut buf = RingBuffer::new(layout());
        buf.push(&block(3, 1.0)).unwrap();
        buf.reset();
        assert_eq!(buf.filled(), 0);
        assert!(buf.channel(0).iter().all(|v| v.is_nan()));
        assert!(buf.sequences().iter().all(|&s| s == -1));
        assert!(buf.lag().is_none());
    }
}
