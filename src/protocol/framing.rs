// Builds valid RDA byte frames. Counterpart of the decoder, used by the
// replay source and by tests; the live recorder is the usual sender.

use super::message::{Marker, HEADER_LEN, MSG_DATA, MSG_START, MSG_STOP};

/// Wraps a payload in the fixed 24-byte header. The four identifier fields
/// are constants the receiving side never interprets.
pub fn frame(kind: u32, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    for _ in 0..4 {
        out.extend(0i32.to_le_bytes());
    }
    out.extend(((HEADER_LEN + payload.len()) as u32).to_le_bytes());
    out.extend(kind.to_le_bytes());
    out.extend(payload);
    out
}

pub fn start_frame(names: &[&str], resolutions: &[f64], sampling_interval_us: f64) -> Vec<u8> {
    let mut payload = Vec::new();
    payload.extend((names.len() as u32).to_le_bytes());
    payload.extend(sampling_interval_us.to_le_bytes());
    for r in resolutions {
        payload.extend(r.to_le_bytes());
    }
    for name in names {
        payload.extend(name.as_bytes());
        payload.push(0);
    }
    frame(MSG_START, &payload)
}

/// `samples` is channel-major; the wire carries them channel-interleaved.
pub fn data_frame(sequence: u32, samples: &[Vec<f64>], markers: &[Marker]) -> Vec<u8> {
    let points = samples.first().map_or(0, |ch| ch.len());

    let mut payload = Vec::new();
    payload.extend(sequence.to_le_bytes());
    payload.extend((points as u32).to_le_bytes());
    payload.extend((markers.len() as u32).to_le_bytes());
    for p in 0..points {
        for channel in samples {
            payload.extend((channel[p] as f32).to_le_bytes());
        }
    }
    for marker in markers {
        payload.extend(marker_record(marker));
    }
    frame(MSG_DATA, &payload)
}

pub fn stop_frame() -> Vec<u8> {
    frame(MSG_STOP, &[])
}

fn marker_record(marker: &Marker) -> Vec<u8> {
    let size = 16 + marker.kind.len() + 1 + marker.description.len() + 1;
    let mut out = Vec::with_capacity(size);
    out.extend((size as u32).to_le_bytes());
    out.extend(marker.position.to_le_bytes());
    out.extend(marker.points.to_le_bytes());
    out.extend(marker.channel.to_le_bytes());
    out.extend(marker.kind.as_bytes());
    out.push(0);
    out.extend(marker.description.as_bytes());
    out.push(0);
    out
}
