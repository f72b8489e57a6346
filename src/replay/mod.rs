//! RDA-speaking replay source for bench runs without a recorder. Streams
//! either channels from a CSV file or a simulated recording over the same
//! framed protocol the live recorder uses, at real-time block cadence.

use std::fs::File;
use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use colored::Colorize;
use rand::Rng;

use crate::error::{Error, Result};
use crate::protocol::framing;
use crate::protocol::Marker;

const SAMPLING_RATE: f64 = 500.0;
const BLOCKS_PER_SEC: usize = 50;
const BLOCK_SIZE: usize = (SAMPLING_RATE as usize) / BLOCKS_PER_SEC;

const CHANNEL_NAMES: [&str; 4] = ["Cz", "VEOG", "A1", "A2"];
const RESOLUTION_UV: f64 = 0.1;

// SIMULATED SIGNALS -----------------------------------------------------------

const DRIFT_FREQ: f64 = 0.3;
const ALPHA_FREQ: f64 = 10.0;
const DRIFT_AMPLITUDE: f64 = 8.0;
const ALPHA_AMPLITUDE: f64 = 3.0;
/// Fraction of the EOG mixed into the scalp channels, the quantity a
/// calibration run should recover.
const EOG_LEAKAGE: f64 = 0.15;
const BLINK_AMPLITUDE: f64 = 120.0;
const BLINK_SECS: f64 = 0.3;

struct Simulator {
    time: f64,
    blink_left: usize,
}

impl Simulator {
    fn new() -> Self {
        Simulator {
            time: 0.0,
            blink_left: 0,
        }
    }

    /// One channel-major block of synthetic samples.
    fn next_block(&mut self, rng: &mut impl Rng) -> Vec<Vec<f64>> {
        let mut block = vec![Vec::with_capacity(BLOCK_SIZE); CHANNEL_NAMES.len()];
        let blink_len = (BLINK_SECS * SAMPLING_RATE) as usize;

        for _ in 0..BLOCK_SIZE {
            if self.blink_left == 0 && rng.gen_range(0..10_000) < 2 {
                self.blink_left = blink_len;
            }

            let eog = if self.blink_left > 0 {
                let phase = self.blink_left as f64 / blink_len as f64;
                self.blink_left -= 1;
                BLINK_AMPLITUDE * (std::f64::consts::PI * phase).sin()
            } else {
                rng.gen_range(-2.0..2.0)
            };

            let background = DRIFT_AMPLITUDE
                * (2.0 * std::f64::consts::PI * DRIFT_FREQ * self.time).sin()
                + ALPHA_AMPLITUDE * (2.0 * std::f64::consts::PI * ALPHA_FREQ * self.time).sin();

            for (c, channel) in block.iter_mut().enumerate() {
                if CHANNEL_NAMES[c] == "VEOG" {
                    channel.push(eog);
                } else {
                    let noise = rng.gen_range(-1.0..1.0);
                    channel.push(background + EOG_LEAKAGE * eog + noise);
                }
            }
            self.time += 1.0 / SAMPLING_RATE;
        }
        block
    }
}

// CSV SOURCE ------------------------------------------------------------------

/// Reads a headerless CSV with one column per channel into channel-major
/// vectors. Column count must match the advertised channel set.
fn read_channels_from_csv(path: &str) -> Result<Vec<Vec<f64>>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_reader(File::open(path)?);
    let mut data: Vec<Vec<f64>> = vec![Vec::new(); CHANNEL_NAMES.len()];

    for record in reader.records() {
        let record = record.map_err(|e| Error::Protocol(format!("bad csv row: {}", e)))?;
        if record.len() != CHANNEL_NAMES.len() {
            return Err(Error::Protocol(format!(
                "csv row has {} columns, expected {}",
                record.len(),
                CHANNEL_NAMES.len()
            )));
        }
        for (column, value) in record.iter().enumerate() {
            let sample: f64 = value
                .parse()
                .map_err(|e| Error::Protocol(format!("bad csv value {:?}: {}", value, e)))?;
            data[column].push(sample);
        }
    }
    Ok(data)
}

// STREAMING -------------------------------------------------------------------

pub fn run(addr: &str, csv_path: Option<&str>) -> Result<()> {
    let csv_data = match csv_path {
        Some(path) => {
            let data = read_channels_from_csv(path)?;
            println!(
                "{}",
                format!("Replaying {} samples/channel from {}", data[0].len(), path).cyan()
            );
            Some(data)
        }
        None => {
            println!("{}", "Streaming simulated recording".cyan());
            None
        }
    };

    let listener = TcpListener::bind(addr)?;
    println!("{} {}", "Replay source listening on".cyan(), addr);

    for stream in listener.incoming() {
        let stream = stream?;
        println!("{}", "Client connected".green());
        match stream_to(stream, csv_data.as_deref()) {
            Ok(()) => println!("{}", "Replay finished".green()),
            Err(Error::Io(_)) | Err(Error::ConnectionBroken) => {
                println!("{}", "Client went away".yellow())
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn stream_to(mut stream: TcpStream, csv_data: Option<&[Vec<f64>]>) -> Result<()> {
    let resolutions = vec![RESOLUTION_UV; CHANNEL_NAMES.len()];
    let interval_us = 1_000_000.0 / SAMPLING_RATE;
    stream.write_all(&framing::start_frame(
        &CHANNEL_NAMES,
        &resolutions,
        interval_us,
    ))?;

    let cadence = Duration::from_millis((1000 / BLOCKS_PER_SEC) as u64);
    let mut rng = rand::thread_rng();
    let mut simulator = Simulator::new();
    let mut sequence: u32 = 0;

    loop {
        let block = match csv_data {
            Some(data) => {
                let offset = sequence as usize * BLOCK_SIZE;
                if offset + BLOCK_SIZE > data[0].len() {
                    break;
                }
                data.iter()
                    .map(|ch| ch[offset..offset + BLOCK_SIZE].to_vec())
                    .collect()
            }
            None => simulator.next_block(&mut rng),
        };

        // An occasional annotation so marker handling sees real traffic.
        let markers = if rng.gen_range(0..500) == 0 {
            vec![Marker {
                position: sequence * BLOCK_SIZE as u32,
                points: 1,
                channel: -1,
                kind: "Comment".into(),
                description: "replay".into(),
            }]
        } else {
            Vec::new()
        };

        stream.write_all(&framing::data_frame(sequence, &block, &markers))?;
        sequence += 1;
        thread::sleep(cadence);
    }

    stream.write_all(&framing::stop_frame())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simulator_blocks_have_the_advertised_shape() {
        let mut rng = rand::thread_rng();
        let mut simulator = Simulator::new();
        let block = simulator.next_block(&mut rng);
        assert_eq!(block.len(), CHANNEL_NAMES.len());
        assert!(block.iter().all(|ch| ch.len() == BLOCK_SIZE));
    }

    #[test]
    fn csv_columns_become_channels() {
        let dir = std::env::temp_dir().join("scp-link-replay-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("signals.csv");
        std::fs::write(&path, "1.0,2.0,3.0,4.0\n5.0,6.0,7.0,8.0\n").unwrap();

        let data = read_channels_from_csv(path.to_str().unwrap()).unwrap();
        assert_eq!(data.len(), 4);
        assert_eq!(data[0], vec![1.0, 5.0]);
        assert_eq!(data[3], vec![4.0, 8.0]);
    }

    #[test]
    fn ragged_csv_rows_are_rejected() {
        let dir = std::env::temp_dir().join("scp-link-replay-ragged");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("signals.csv");
        std::fs::write(&path, "1.0,2.0,3.0\n").unwrap();

        let err = read_channels_from_csv(path.to_str().unwrap()).unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
