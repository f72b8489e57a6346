//! End-to-end path: framed RDA bytes through the decoder into the rolling
//! buffer, then one trial extraction, exactly as the live session does it.

use std::io::Cursor;

use scp_link::acquisition::{BufferLayout, RingBuffer};
use scp_link::processing::trial::{self, ChannelSelection, TrialSettings};
use scp_link::protocol::{framing, RdaMessage, WireDecoder};

const NAMES: [&str; 3] = ["Cz", "VEOG", "A1"];
const SAMPLING_RATE: f64 = 100.0;
const BLOCK_SIZE: usize = 10;
const BLOCKS_PER_SEC: usize = 10;

fn framed_session(blocks: &[Vec<Vec<f64>>]) -> Vec<u8> {
    let mut bytes = framing::start_frame(&NAMES, &[0.1; 3], 1_000_000.0 / SAMPLING_RATE);
    for (seq, block) in blocks.iter().enumerate() {
        bytes.extend(framing::data_frame(seq as u32, block, &[]));
    }
    bytes.extend(framing::stop_frame());
    bytes
}

#[test]
fn framed_stream_fills_the_buffer_and_yields_a_trial() {
    // 3 seconds of a constant 2.0 on Cz, zeros elsewhere.
    let blocks: Vec<Vec<Vec<f64>>> = (0..30)
        .map(|_| {
            vec![
                vec![2.0; BLOCK_SIZE],
                vec![0.0; BLOCK_SIZE],
                vec![0.0; BLOCK_SIZE],
            ]
        })
        .collect();
    let mut decoder = WireDecoder::new(Cursor::new(framed_session(&blocks)));

    let channels = match decoder.read_message().unwrap() {
        RdaMessage::Start(set) => set,
        other => panic!("expected start, got {:?}", other),
    };
    assert_eq!(channels.count(), 3);
    assert_eq!(channels.sampling_rate(), SAMPLING_RATE);

    let layout = BufferLayout {
        channels: channels.count(),
        block_size: BLOCK_SIZE,
        blocks_per_sec: BLOCKS_PER_SEC,
        memory_secs: 3,
        sampling_rate: SAMPLING_RATE,
    };
    let mut buffer = RingBuffer::new(layout);

    let mut pushed = 0;
    loop {
        match decoder.read_message().unwrap() {
            RdaMessage::Data(block) => {
                buffer.push(&block).unwrap();
                pushed += 1;
            }
            RdaMessage::Stop => break,
            RdaMessage::Start(_) => panic!("unexpected second start"),
        }
    }
    assert_eq!(pushed, 30);
    assert!(!buffer.overflow_detected());

    let selection = ChannelSelection {
        interest: channels.index_of("Cz").unwrap(),
        eog: channels.index_of("VEOG").unwrap(),
        reference: vec![channels.index_of("A1").unwrap()],
    };
    let settings = TrialSettings {
        trial_secs: 2.0,
        baseline_secs: 0.25,
        lowpass_hz: 0.5,
        eog_correction: true,
    };
    // Constant signal: baseline correction cancels everything.
    let scp = trial::extract(&buffer, &selection, &settings, 0.0).unwrap();
    assert!(scp.abs() < 1e-12);
}

#[test]
fn sequence_gap_in_the_stream_is_flagged_once() {
    let block = vec![
        vec![0.0; BLOCK_SIZE],
        vec![0.0; BLOCK_SIZE],
        vec![0.0; BLOCK_SIZE],
    ];
    let mut bytes = framing::start_frame(&NAMES, &[0.1; 3], 1_000_000.0 / SAMPLING_RATE);
    for seq in [0u32, 1, 2, 6, 7] {
        bytes.extend(framing::data_frame(seq, &block, &[]));
    }
    bytes.extend(framing::stop_frame());

    let mut decoder = WireDecoder::new(Cursor::new(bytes));
    let RdaMessage::Start(channels) = decoder.read_message().unwrap() else {
        panic!("expected start");
    };
    let mut buffer = RingBuffer::new(BufferLayout {
        channels: channels.count(),
        block_size: BLOCK_SIZE,
        blocks_per_sec: BLOCKS_PER_SEC,
        memory_secs: 1,
        sampling_rate: SAMPLING_RATE,
    });

    let mut overflow_seen = 0;
    loop {
        match decoder.read_message().unwrap() {
            RdaMessage::Data(data) => {
                buffer.push(&data).unwrap();
                if buffer.overflow_detected() {
                    overflow_seen += 1;
                }
            }
            RdaMessage::Stop => break,
            RdaMessage::Start(_) => unreachable!(),
        }
    }
    assert_eq!(overflow_seen, 1);
}
