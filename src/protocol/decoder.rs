use std::io::Read;

use crate::error::{Error, Result};

use super::message::{
    ChannelSet, DataBlock, Marker, RdaMessage, HEADER_LEN, MSG_DATA, MSG_START, MSG_STOP,
};

/// Turns a blocking byte source into typed RDA messages.
///
/// Every message starts with a fixed 24-byte header: four 32-bit identifier
/// fields (opaque), a 32-bit total message size and a 32-bit type code. The
/// payload is read with exactly `size - 24` bytes accumulated across however
/// many short reads the socket needs. All fields are little-endian.
pub struct WireDecoder<R: Read> {
    src: R,
    channel_count: Option<usize>,
    /// Count of messages with a type code this decoder does not model.
    /// They are consumed and skipped; the caller may log the count.
    pub unknown_messages: u64,
}

impl<R: Read> WireDecoder<R> {
    pub fn new(src: R) -> Self {
        WireDecoder {
            src,
            channel_count: None,
            unknown_messages: 0,
        }
    }

    /// Reads messages until the next Start, Data or Stop arrives.
    pub fn read_message(&mut self) -> Result<RdaMessage> {
        loop {
            let header = self.recv_exact(HEADER_LEN)?;
            let mut cur = Cursor::new(&header);
            // id1..id4 are constants we never interpret
            for _ in 0..4 {
                cur.read_i32()?;
            }
            let size = cur.read_u32()? as usize;
            let kind = cur.read_u32()?;

            if size < HEADER_LEN {
                return Err(Error::Protocol(format!(
                    "message size {} smaller than header",
                    size
                )));
            }
            let payload = self.recv_exact(size - HEADER_LEN)?;

            match kind {
                MSG_START => {
                    let channels = parse_start(&payload)?;
                    self.channel_count = Some(channels.count());
                    return Ok(RdaMessage::Start(channels));
                }
                MSG_DATA => {
                    let channel_count = self.channel_count.ok_or_else(|| {
                        Error::Protocol("data message before start message".into())
                    })?;
                    return Ok(RdaMessage::Data(parse_data(&payload, channel_count)?));
                }
                MSG_STOP => return Ok(RdaMessage::Stop),
                _ => {
                    // Keep-alive and other codes the recorder emits; consume
                    // the payload and move on.
                    self.unknown_messages += 1;
                }
            }
        }
    }

    /// Accumulates exactly `requested` bytes regardless of how many socket
    /// reads that takes. A zero-byte read means the peer is gone.
    fn recv_exact(&mut self, requested: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; requested];
        let mut filled = 0;
        while filled < requested {
            let n = self.src.read(&mut buf[filled..])?;
            if n == 0 {
                return Err(Error::ConnectionBroken);
            }
            filled += n;
        }
        Ok(buf)
    }
}

/// Start payload: channelCount:u32, samplingIntervalMicros:f64, then
/// channelCount resolution f64s, then channelCount NUL-terminated names.
fn parse_start(payload: &[u8]) -> Result<ChannelSet> {
    let mut cur = Cursor::new(payload);
    let channel_count = cur.read_u32()? as usize;
    let sampling_interval_us = cur.read_f64()?;

    let mut resolutions = Vec::with_capacity(channel_count);
    for _ in 0..channel_count {
        resolutions.push(cur.read_f64()?);
    }

    let names = split_nul_strings(cur.rest());
    if names.len() < channel_count {
        return Err(Error::Protocol(format!(
            "start message carries {} channel names, expected {}",
            names.len(),
            channel_count
        )));
    }

    Ok(ChannelSet {
        names: names.into_iter().take(channel_count).collect(),
        resolutions,
        sampling_interval_us,
    })
}

/// Data payload: block:u32, points:u32, markerCount:u32, then
/// points x channelCount f32 samples channel-interleaved (sample i belongs
/// to channel i % channelCount), then markerCount size-prefixed markers.
fn parse_data(payload: &[u8], channel_count: usize) -> Result<DataBlock> {
    let mut cur = Cursor::new(payload);
    let sequence = cur.read_u32()?;
    let points = cur.read_u32()? as usize;
    let marker_count = cur.read_u32()? as usize;

    let mut samples = vec![Vec::with_capacity(points); channel_count];
    for i in 0..points * channel_count {
        let value = cur.read_f32()? as f64;
        samples[i % channel_count].push(value);
    }

    let mut markers = Vec::with_capacity(marker_count);
    for _ in 0..marker_count {
        markers.push(parse_marker(&mut cur)?);
    }

    Ok(DataBlock {
        sequence,
        samples,
        markers,
    })
}

/// Each marker record is prefixed by its own total size (including the
/// 4-byte size field), followed by position:u32, points:u32, channel:i32 and
/// two NUL-terminated strings (type, description).
fn parse_marker(cur: &mut Cursor<'_>) -> Result<Marker> {
    let size = cur.read_u32()? as usize;
    if size < 16 {
        return Err(Error::Protocol(format!("marker record size {} too small", size)));
    }
    let position = cur.read_u32()?;
    let points = cur.read_u32()?;
    let channel = cur.read_i32()?;

    let strings = split_nul_strings(cur.take(size - 16)?);
    let mut it = strings.into_iter();
    let kind = it
        .next()
        .ok_or_else(|| Error::Protocol("marker without type string".into()))?;
    let description = it.next().unwrap_or_default();

    Ok(Marker {
        position,
        points,
        channel,
        kind,
        description,
    })
}

/// Splits a run of C-style zero-terminated strings. Trailing bytes after the
/// last NUL are discarded, matching the recorder's padding behavior.
fn split_nul_strings(raw: &[u8]) -> Vec<String> {
    let mut strings: Vec<String> = raw
        .split(|&b| b == 0)
        .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
        .collect();
    // split() yields one extra chunk after the last NUL (padding or empty).
    strings.pop();
    strings
}

/// The small parse cursor the decoder keeps while splitting one payload.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Cursor { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(Error::Protocol(format!(
                "payload truncated: wanted {} bytes at offset {}, have {}",
                n,
                self.pos,
                self.buf.len()
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }
}
