//! Single-byte control channel to the stimulus-presentation process. This
//! side listens; the presentation program dials in once at session start.
//!
//! Wire values: 0 forbids presentation, 1 allows it, the configured quit
//! code requests shutdown and must be acknowledged with its square. Any
//! socket failure drops the link into an inert mode where sends are no-ops
//! and polls return nothing; only an explicit `reconnect` revives it.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::{Duration, Instant};

use colored::Colorize;

use crate::config::StimulusConfig;
use crate::error::{Error, Result};

pub const ALLOW: u8 = 1;
pub const FORBID: u8 = 0;

const QUIT_RETRY_INTERVAL: Duration = Duration::from_millis(100);
const QUIT_RETRY_CEILING: usize = 50;

pub struct StimulusLink {
    listener: TcpListener,
    peer: Option<TcpStream>,
    accept_timeout: Duration,
    poll_timeout: Duration,
    quit_code: u8,
}

impl StimulusLink {
    /// Binds the listening socket without waiting for the peer.
    pub fn bind(config: &StimulusConfig) -> Result<Self> {
        let listener = TcpListener::bind(&config.addr)?;
        listener.set_nonblocking(true)?;
        println!(
            "{} {}",
            "Stimulus link listening on".cyan(),
            config.addr.cyan()
        );
        Ok(StimulusLink {
            listener,
            peer: None,
            accept_timeout: Duration::from_secs(config.accept_timeout_secs),
            poll_timeout: Duration::from_millis(config.poll_timeout_millis),
            quit_code: config.quit_code,
        })
    }

    /// Waits for the presentation program to connect, up to the accept
    /// timeout. Also used to re-establish a dropped link; the caller
    /// decides when, the link never reconnects on its own.
    pub fn accept(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.accept_timeout;
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    // The listener is non-blocking for the accept loop; the
                    // peer stream itself polls via a short read timeout.
                    stream.set_nonblocking(false)?;
                    stream.set_read_timeout(Some(self.poll_timeout))?;
                    println!("{} {}", "Stimulus peer connected from".green(), addr);
                    self.peer = Some(stream);
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if Instant::now() >= deadline {
                        return Err(Error::Protocol(
                            "stimulus peer did not connect before the accept timeout".into(),
                        ));
                    }
                    thread::sleep(Duration::from_millis(20));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        self.peer.is_some()
    }

    /// Transmits the permission level. A broken peer degrades the link
    /// instead of surfacing an error.
    pub fn send_state(&mut self, allowed: bool) {
        let byte = if allowed { ALLOW } else { FORBID };
        self.send_byte(byte);
    }

    /// Quit handshake: transmit the quit code, then wait for the peer to
    /// echo its square. Retransmits every 100ms until the echo arrives or
    /// the retry ceiling is reached. Returns true on a confirmed quit.
    pub fn send_quit(&mut self) -> bool {
        let expected = self.quit_code.wrapping_mul(self.quit_code);
        for _ in 0..QUIT_RETRY_CEILING {
            self.send_byte(self.quit_code);
            let stream = match self.peer.as_mut() {
                Some(s) => s,
                None => return false,
            };
            let mut ack = [0u8; 1];
            match stream.read(&mut ack) {
                Ok(1) if ack[0] == expected => {
                    println!("{}", "Stimulus peer acknowledged quit".green());
                    return true;
                }
                Ok(0) => {
                    self.degrade();
                    return false;
                }
                Ok(_) => {}
                Err(e) if would_block(&e) => {}
                Err(_) => {
                    self.degrade();
                    return false;
                }
            }
            thread::sleep(QUIT_RETRY_INTERVAL);
        }
        println!("{}", "Stimulus peer never acknowledged quit".yellow());
        false
    }

    /// Non-blocking poll for one byte from the peer, bounded by the poll
    /// timeout. Returns nothing when no data is ready or the link is down.
    pub fn poll_response(&mut self) -> Option<u8> {
        let stream = self.peer.as_mut()?;
        let mut byte = [0u8; 1];
        match stream.read(&mut byte) {
            Ok(1) => Some(byte[0]),
            Ok(_) => {
                self.degrade();
                None
            }
            Err(e) if would_block(&e) => None,
            Err(_) => {
                self.degrade();
                None
            }
        }
    }

    fn send_byte(&mut self, byte: u8) {
        let broken = match self.peer.as_mut() {
            Some(stream) => stream.write_all(&[byte]).is_err(),
            None => return,
        };
        if broken {
            self.degrade();
        }
    }

    fn degrade(&mut self) {
        if self.peer.take().is_some() {
            println!("{}", "Stimulus link lost, continuing without it".yellow());
        }
    }
}

fn would_block(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}
