// src/config/mod.rs
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub subject: SubjectConfig,
    pub acquisition: AcquisitionConfig,
    pub trial: TrialConfig,
    pub protocol: ProtocolConfig,
    pub stimulus: StimulusConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SubjectConfig {
    pub subject_id: String,
    pub channel_of_interest: String,
    pub eog_channel: String,
    /// Channels averaged into the reference that gets subtracted from the
    /// channel of interest before filtering. Empty list disables
    /// rereferencing.
    #[serde(default)]
    pub ref_channels: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AcquisitionConfig {
    pub addr: String,
    #[serde(default = "default_blocks_per_sec")]
    pub blocks_per_sec: usize,
    #[serde(default = "default_memory_secs")]
    pub memory_secs: usize,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default)]
    pub verbose: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TrialConfig {
    /// Seconds of signal entering one response-locked trial window.
    pub trial_duration_secs: f64,
    /// Leading portion of the window whose mean defines the baseline.
    pub baseline_duration_secs: f64,
    /// Low-pass cutoff in Hz; the slow-cortical-potential band.
    #[serde(default = "default_lowpass_hz")]
    pub lowpass_hz: f64,
    #[serde(default = "default_true")]
    pub eog_correction: bool,
    /// Seconds of rolling memory recorded for one calibration run.
    #[serde(default = "default_calibration_secs")]
    pub eog_calibration_secs: f64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProtocolConfig {
    /// Minimum number of collected SCP averages before criterion checks.
    pub sampling_criterion: usize,
    /// Cool-down in trials (not time) between first and second interview.
    pub second_interview_delay: usize,
    /// Stricter criterion variant: the trial average must also match the
    /// condition's sign, so a zero-crossing trial never qualifies.
    #[serde(default = "default_true")]
    pub require_sign_match: bool,
    #[serde(default = "default_blinding_file")]
    pub blinding_file: String,
    #[serde(default = "default_states_dir")]
    pub states_dir: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StimulusConfig {
    /// Address this side listens on; the presentation program connects in.
    pub addr: String,
    #[serde(default = "default_accept_timeout")]
    pub accept_timeout_secs: u64,
    #[serde(default = "default_poll_millis")]
    pub poll_timeout_millis: u64,
    #[serde(default = "default_target_marker")]
    pub target_marker: String,
    #[serde(default = "default_quit_code")]
    pub quit_code: u8,
}

fn default_blocks_per_sec() -> usize {
    50
}
fn default_memory_secs() -> usize {
    5
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_lowpass_hz() -> f64 {
    0.5
}
fn default_calibration_secs() -> f64 {
    10.0
}
fn default_true() -> bool {
    true
}
fn default_blinding_file() -> String {
    "blinding.txt".into()
}
fn default_states_dir() -> String {
    "states".into()
}
fn default_accept_timeout() -> u64 {
    30
}
fn default_poll_millis() -> u64 {
    50
}
fn default_target_marker() -> String {
    "response".into()
}
fn default_quit_code() -> u8 {
    2
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, String> {
    let config_str =
        fs::read_to_string(path).map_err(|e| format!("Failed to read config file: {}", e))?;

    serde_yaml::from_str(&config_str).map_err(|e| format!("Failed to parse config file: {}", e))
}

pub fn save_config<P: AsRef<Path>>(config: &Config, path: P) -> Result<(), String> {
    let yaml = serde_yaml::to_string(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;

    fs::write(path, yaml).map_err(|e| format!("Failed to write config file: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_yaml_fills_defaults() {
        let yaml = r#"
subject:
  subject_id: sub-01
  channel_of_interest: Cz
  eog_channel: VEOG
acquisition:
  addr: 127.0.0.1:51244
trial:
  trial_duration_secs: 2.5
  baseline_duration_secs: 0.25
protocol:
  sampling_criterion: 5
  second_interview_delay: 10
stimulus:
  addr: 127.0.0.1:5005
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.acquisition.blocks_per_sec, 50);
        assert_eq!(config.acquisition.memory_secs, 5);
        assert_eq!(config.trial.lowpass_hz, 0.5);
        assert!(config.trial.eog_correction);
        assert!(config.protocol.require_sign_match);
        assert_eq!(config.stimulus.target_marker, "response");
        assert_eq!(config.stimulus.quit_code, 2);
        assert!(config.subject.ref_channels.is_empty());
    }
}
