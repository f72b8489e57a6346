use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use colored::Colorize;

use crate::config::AcquisitionConfig;
use crate::error::{Error, Result};
use crate::protocol::{ChannelSet, RdaMessage, WireDecoder};
use crate::utils::log::log_to_file;

use super::ring_buffer::{BufferLayout, RingBuffer};

// GATHERER COMPONENT ----------------------------------------------------------

/// Blocking RDA client. Connects, waits for the Start message that fixes the
/// channel set and buffer geometry, then feeds decoded blocks into the
/// shared RingBuffer until a Stop message, a broken connection or the stop
/// flag ends the loop.
pub struct Gatherer {
    decoder: WireDecoder<TcpStream>,
    shutdown: TcpStream,
    channels: ChannelSet,
    layout: BufferLayout,
    verbose: bool,
}

impl Gatherer {
    /// Connects and consumes messages until the Start message arrives.
    pub fn connect(config: &AcquisitionConfig) -> Result<Self> {
        println!("{}", format!("Connecting to RDA at {}...", config.addr).cyan());
        let addr = config
            .addr
            .parse()
            .map_err(|e| Error::Protocol(format!("bad RDA address {}: {}", config.addr, e)))?;
        let stream =
            TcpStream::connect_timeout(&addr, Duration::from_secs(config.connect_timeout_secs))?;
        stream.set_read_timeout(None)?;
        let shutdown = stream.try_clone()?;
        let mut decoder = WireDecoder::new(stream);

        let channels = loop {
            match decoder.read_message()? {
                RdaMessage::Start(channels) => break channels,
                RdaMessage::Stop => return Err(Error::ConnectionBroken),
                RdaMessage::Data(_) => {
                    // Unreachable in practice: the decoder refuses data
                    // before start. Keep draining.
                }
            }
        };

        let sampling_rate = channels.sampling_rate();
        let block_size = (sampling_rate / config.blocks_per_sec as f64).round() as usize;
        let layout = BufferLayout {
            channels: channels.count(),
            block_size,
            blocks_per_sec: config.blocks_per_sec,
            memory_secs: config.memory_secs,
            sampling_rate,
        };

        println!("{}", "Start".green());
        println!("Number of channels: {}", channels.count());
        println!("Sampling rate: {} Hz", sampling_rate);
        println!("Channel names: {:?}", channels.names);

        Ok(Gatherer {
            decoder,
            shutdown,
            channels,
            layout,
            verbose: config.verbose,
        })
    }

    pub fn channels(&self) -> &ChannelSet {
        &self.channels
    }

    pub fn layout(&self) -> BufferLayout {
        self.layout
    }

    /// A handle the runtime can use to abort a blocking read from another
    /// thread; the subsequent zero-byte read ends the loop cleanly.
    pub fn shutdown_handle(&self) -> Result<TcpStream> {
        Ok(self.shutdown.try_clone()?)
    }

    /// The acquisition loop. Sole writer of the RingBuffer; the lock is held
    /// only for the duration of one push.
    pub fn run(mut self, buffer: &Mutex<RingBuffer>, stop: &AtomicBool) -> Result<()> {
        let mut logged_unknown = 0;
        while !stop.load(Ordering::Relaxed) {
            match self.decoder.read_message() {
                Ok(RdaMessage::Data(block)) => {
                    let mut guard = buffer.lock().unwrap();
                    guard.push(&block)?;
                    if guard.overflow_detected() {
                        let k = guard.sequences().len();
                        let gap = guard.sequences()[k - 1] - guard.sequences()[k - 2];
                        drop(guard);
                        let msg = format!("*** Overflow with {} datablocks ***", gap);
                        println!("{}", msg.yellow());
                        if self.verbose {
                            log_to_file("acquisition.log", &msg)?;
                        }
                    } else {
                        drop(guard);
                    }
                    if self.verbose {
                        for marker in &block.markers {
                            log_to_file(
                                "acquisition.log",
                                &format!(
                                    "marker at {}: {} ({})",
                                    marker.position, marker.kind, marker.description
                                ),
                            )?;
                        }
                    }
                }
                Ok(RdaMessage::Start(_)) => {
                    // A fresh Start mid-connection means the recorder was
                    // restarted; the rolling memory no longer lines up.
                    buffer.lock().unwrap().reset();
                }
                Ok(RdaMessage::Stop) => {
                    println!("{}", "Stop".red());
                    break;
                }
                Err(Error::ConnectionBroken) if stop.load(Ordering::Relaxed) => break,
                Err(e) => {
                    if let Error::Protocol(ref msg) = e {
                        log_to_file("acquisition.log", &format!("protocol error: {}", msg))?;
                    }
                    return Err(e);
                }
            }
            if self.decoder.unknown_messages > logged_unknown {
                logged_unknown = self.decoder.unknown_messages;
                if self.verbose {
                    log_to_file(
                        "acquisition.log",
                        &format!("skipped {} unknown message(s)", logged_unknown),
                    )?;
                }
            }
        }
        let _ = self.shutdown.shutdown(Shutdown::Both);
        Ok(())
    }
}
