//! Session runtime. Three loops share the session:
//!
//! - the acquisition loop (spawned thread) is the sole writer of the
//!   RingBuffer,
//! - the communication loop (this thread) is the sole writer of the SCP
//!   list and the state machine,
//! - the housekeeping loop (spawned thread) persists the session record at
//!   roughly 10 Hz and watches buffer lag.
//!
//! Calibration runs on a short-lived worker thread and reports back over a
//! channel, so the communication loop never blocks on the coefficient
//! search.

use std::io::BufRead;
use std::net::Shutdown;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;

use colored::Colorize;

use crate::acquisition::{Gatherer, RingBuffer};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::experiment::{CriterionPolicy, Session};
use crate::link::StimulusLink;
use crate::processing::artifact::{self, ChannelEstimate};
use crate::processing::trial::{self, ChannelSelection, TrialSettings};
use crate::utils::log::log_to_file;

const HOUSEKEEPING_TICK: Duration = Duration::from_millis(100);
const LAG_WARN_SECS: f64 = 1.0;

/// Operator actions read from stdin, one letter per line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperatorCommand {
    Toggle,
    Forward,
    Backward,
    Calibrate,
    ResetCoefficients,
    Quit,
}

fn parse_command(line: &str) -> Option<OperatorCommand> {
    match line.trim() {
        "t" => Some(OperatorCommand::Toggle),
        "f" => Some(OperatorCommand::Forward),
        "b" => Some(OperatorCommand::Backward),
        "c" => Some(OperatorCommand::Calibrate),
        "r" => Some(OperatorCommand::ResetCoefficients),
        "q" => Some(OperatorCommand::Quit),
        _ => None,
    }
}

pub fn run_session(config: &Config) -> Result<()> {
    let policy = CriterionPolicy {
        sampling_criterion: config.protocol.sampling_criterion,
        second_interview_delay: config.protocol.second_interview_delay,
        require_sign_match: config.protocol.require_sign_match,
    };
    let session = Session::open(
        &config.subject.subject_id,
        policy,
        &config.protocol.blinding_file,
        &config.protocol.states_dir,
    )?;
    println!(
        "{} {} ({})",
        "Session for".cyan(),
        session.subject_id,
        session.machine.state().description()
    );

    let gatherer = Gatherer::connect(&config.acquisition)?;
    let channels = gatherer.channels().clone();
    let selection = ChannelSelection {
        interest: resolve(&channels, &config.subject.channel_of_interest)?,
        eog: resolve(&channels, &config.subject.eog_channel)?,
        reference: config
            .subject
            .ref_channels
            .iter()
            .map(|name| resolve(&channels, name))
            .collect::<Result<Vec<_>>>()?,
    };
    let settings = TrialSettings {
        trial_secs: config.trial.trial_duration_secs,
        baseline_secs: config.trial.baseline_duration_secs,
        lowpass_hz: config.trial.lowpass_hz,
        eog_correction: config.trial.eog_correction,
    };

    let mut link = StimulusLink::bind(&config.stimulus)?;
    link.accept()?;

    let buffer = Arc::new(Mutex::new(RingBuffer::new(gatherer.layout())));
    let session = Arc::new(Mutex::new(session));
    let stop = Arc::new(AtomicBool::new(false));
    let acquisition_socket = gatherer.shutdown_handle()?;

    // ACQUISITION LOOP --------------------------------------------------------

    let acquisition = {
        let buffer = Arc::clone(&buffer);
        let stop = Arc::clone(&stop);
        thread::spawn(move || gatherer.run(&buffer, &stop))
    };

    // HOUSEKEEPING LOOP -------------------------------------------------------

    let housekeeping = {
        let buffer = Arc::clone(&buffer);
        let session = Arc::clone(&session);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            let mut ticks: u64 = 0;
            while !stop.load(Ordering::Relaxed) {
                {
                    let mut guard = session.lock().unwrap();
                    guard.tick();
                    if let Err(e) = guard.save() {
                        println!("{} {}", "Failed to persist session:".red(), e);
                    }
                }
                if ticks % 50 == 0 {
                    if let Some(lag) = buffer.lock().unwrap().lag() {
                        if lag.abs() > LAG_WARN_SECS {
                            println!(
                                "{}",
                                format!("Buffer lags wall clock by {:.2}s", lag).yellow()
                            );
                        }
                    }
                }
                ticks += 1;
                thread::sleep(HOUSEKEEPING_TICK);
            }
        })
    };

    // Operator input, line-buffered, forwarded as parsed commands.
    let (command_tx, command_rx) = mpsc::channel();
    thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(l) => l,
                Err(_) => break,
            };
            match parse_command(&line) {
                Some(cmd) => {
                    if command_tx.send(cmd).is_err() {
                        break;
                    }
                }
                None if !line.trim().is_empty() => {
                    println!("commands: t toggle, f/b force state, c calibrate, r reset d, q quit")
                }
                None => {}
            }
        }
    });

    // COMMUNICATION LOOP ------------------------------------------------------

    let (calib_tx, calib_rx) = mpsc::channel::<Vec<ChannelEstimate>>();
    let mut calibrating = false;
    link.send_state(session.lock().unwrap().machine.allow_presentation());

    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }

        // A byte from the presentation side confirms one response event.
        if link.poll_response().is_some() {
            let extracted = {
                let guard = buffer.lock().unwrap();
                let d = {
                    let s = session.lock().unwrap();
                    s.eog_coefficients
                        .get(selection.interest)
                        .copied()
                        .unwrap_or(0.0)
                };
                trial::extract(&guard, &selection, &settings, d)
            };
            match extracted {
                Ok(scp) => {
                    let mut guard = session.lock().unwrap();
                    let changed = guard.register_trial(scp);
                    let n = guard.scp_averages.len();
                    println!("{} #{}: {:.4} uV", config.stimulus.target_marker, n, scp);
                    log_to_file(
                        "session.log",
                        &format!("trial {} scp {:.6} state {}", n, scp, guard.machine.state().code()),
                    )?;
                    if changed {
                        announce(&mut link, &guard);
                    }
                    let done = guard.machine.is_done();
                    drop(guard);
                    if done {
                        break;
                    }
                }
                Err(Error::InsufficientData { needed, available }) => {
                    println!(
                        "{}",
                        format!(
                            "Response ignored, buffer holds {}/{} samples",
                            available, needed
                        )
                        .yellow()
                    );
                }
                Err(e) => return Err(e),
            }
        }

        while let Ok(command) = command_rx.try_recv() {
            match command {
                OperatorCommand::Toggle => {
                    let mut guard = session.lock().unwrap();
                    guard.machine.operator_toggle();
                    announce(&mut link, &guard);
                    let done = guard.machine.is_done();
                    drop(guard);
                    if done {
                        stop.store(true, Ordering::Relaxed);
                    }
                }
                OperatorCommand::Forward | OperatorCommand::Backward => {
                    let mut guard = session.lock().unwrap();
                    if command == OperatorCommand::Forward {
                        guard.machine.force_forward();
                    } else {
                        guard.machine.force_backward();
                    }
                    announce(&mut link, &guard);
                }
                OperatorCommand::Calibrate => {
                    if calibrating {
                        println!("{}", "Calibration already running".yellow());
                        continue;
                    }
                    let window = buffer
                        .lock()
                        .unwrap()
                        .latest(config.trial.eog_calibration_secs);
                    match window {
                        Ok(data) => {
                            calibrating = true;
                            let tx = calib_tx.clone();
                            let eog_index = selection.eog;
                            println!("{}", "Calibrating EOG coefficients...".cyan());
                            thread::spawn(move || {
                                let _ = tx.send(artifact::estimate_all(&data, eog_index));
                            });
                        }
                        Err(Error::InsufficientData { needed, available }) => println!(
                            "{}",
                            format!(
                                "Not enough data to calibrate ({}/{} samples)",
                                available, needed
                            )
                            .yellow()
                        ),
                        Err(e) => return Err(e),
                    }
                }
                OperatorCommand::ResetCoefficients => {
                    let mut guard = session.lock().unwrap();
                    guard.eog_coefficients = vec![0.0; channels.count()];
                    println!("{}", "EOG coefficients reset to zero".cyan());
                }
                OperatorCommand::Quit => {
                    stop.store(true, Ordering::Relaxed);
                }
            }
        }

        if let Ok(estimates) = calib_rx.try_recv() {
            calibrating = false;
            let stray = estimates.iter().filter(|e| !e.converged).count();
            if stray > 0 {
                println!(
                    "{}",
                    format!("{} channel(s) did not converge, using best estimates", stray)
                        .yellow()
                );
            }
            let mut guard = session.lock().unwrap();
            guard.eog_coefficients = estimates.iter().map(|e| e.coefficient).collect();
            println!(
                "{} d[{}] = {:.4}",
                "Calibration done,".green(),
                config.subject.channel_of_interest,
                guard.eog_coefficients[selection.interest]
            );
        }

        if session.lock().unwrap().machine.is_done() {
            break;
        }
        thread::sleep(Duration::from_millis(10));
    }

    // TEARDOWN ----------------------------------------------------------------

    stop.store(true, Ordering::Relaxed);
    let _ = acquisition_socket.shutdown(Shutdown::Both);

    {
        let guard = session.lock().unwrap();
        guard.save()?;
        if guard.machine.is_done() {
            for (i, condition) in guard.blinding.ordered_conditions().iter().enumerate() {
                println!("Interview {}: {} ({})", i + 1, guard.blinding.order[i], condition);
            }
        }
    }
    link.send_state(false);
    if session.lock().unwrap().machine.is_done() {
        link.send_quit();
    }

    match acquisition.join() {
        Ok(Ok(())) => {}
        Ok(Err(Error::ConnectionBroken)) => {}
        Ok(Err(e)) => println!("{} {}", "Acquisition ended with".red(), e),
        Err(_) => println!("{}", "Acquisition thread panicked".red()),
    }
    let _ = housekeeping.join();
    println!("{}", "Session closed".green());
    Ok(())
}

fn announce(link: &mut StimulusLink, session: &Session) {
    let state = session.machine.state();
    println!(
        "{} {} ({})",
        "State".cyan(),
        state.code(),
        state.description()
    );
    link.send_state(session.machine.allow_presentation());
}

fn resolve(channels: &crate::protocol::ChannelSet, name: &str) -> Result<usize> {
    channels
        .index_of(name)
        .ok_or_else(|| Error::Protocol(format!("channel {} not present in the stream", name)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_letters_parse() {
        assert_eq!(parse_command(" t "), Some(OperatorCommand::Toggle));
        assert_eq!(parse_command("c"), Some(OperatorCommand::Calibrate));
        assert_eq!(parse_command("q"), Some(OperatorCommand::Quit));
        assert_eq!(parse_command("x"), None);
        assert_eq!(parse_command(""), None);
    }
}
