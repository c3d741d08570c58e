// Data-driven track configuration.
//
// Every tunable constant of the pipeline lives in `TrackConfig`: the
// reference tempo, grid resolution, bar length, the kick overlay, the style
// selector handed to the rhythm generator, and the output file name. The
// defaults reproduce the fixed EDM layout (128 qpm, sixteenth-note grid,
// 4/4, one kick per bar). A JSON file can override any subset of fields.
//
// The config is passed explicitly into the pipeline. Nothing here reads the
// process environment; that is the binary's job.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::timeline::step_seconds;

/// Tunable parameters for one track build.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackConfig {
    /// Tempo stamped on the assembled track, in quarter notes per minute.
    pub tempo_qpm: f64,
    /// Quantization grid resolution. 4 means sixteenth notes.
    pub steps_per_quarter: u32,
    /// Beats (quarter notes) per bar.
    pub beats_per_bar: u32,
    /// Kick overlay: pitch, velocity and length of the per-bar hit.
    pub kick: KickConfig,
    /// Style selector passed through to the rhythm generator.
    pub drum_style: String,
    /// File name written inside the output directory.
    pub file_name: String,
    /// Run the rhythm and melody builders concurrently.
    pub parallel_builders: bool,
}

/// The deterministic kick overlaid on the generated drum pattern.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KickConfig {
    pub pitch: u8,
    pub velocity: u8,
    /// Length of each kick in seconds.
    pub length: f64,
}

impl Default for KickConfig {
    fn default() -> Self {
        KickConfig {
            pitch: 36,
            velocity: 100,
            length: 0.1,
        }
    }
}

impl Default for TrackConfig {
    fn default() -> Self {
        TrackConfig {
            tempo_qpm: 128.0,
            steps_per_quarter: 4,
            beats_per_bar: 4,
            kick: KickConfig::default(),
            drum_style: "drum_kit".to_string(),
            file_name: "futuristic_edm.mid".to_string(),
            parallel_builders: true,
        }
    }
}

impl TrackConfig {
    /// Load a config from a JSON file. Missing fields keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: TrackConfig =
            serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        config.check()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot work with.
    pub fn check(&self) -> Result<(), ConfigError> {
        if !(self.tempo_qpm.is_finite() && self.tempo_qpm > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "tempo_qpm must be positive, got {}",
                self.tempo_qpm
            )));
        }
        if self.steps_per_quarter == 0 {
            return Err(ConfigError::Invalid("steps_per_quarter must be at least 1".into()));
        }
        if self.beats_per_bar == 0 {
            return Err(ConfigError::Invalid("beats_per_bar must be at least 1".into()));
        }
        if self.kick.pitch > 127 || !(1..=127).contains(&self.kick.velocity) {
            return Err(ConfigError::Invalid(format!(
                "kick pitch {} / velocity {} out of MIDI range",
                self.kick.pitch, self.kick.velocity
            )));
        }
        if !(self.kick.length.is_finite() && self.kick.length > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "kick length must be positive, got {}",
                self.kick.length
            )));
        }
        if self.file_name.is_empty() {
            return Err(ConfigError::Invalid("file_name must not be empty".into()));
        }
        Ok(())
    }

    /// Seconds per quarter note at the reference tempo.
    pub fn quarter_seconds(&self) -> f64 {
        60.0 / self.tempo_qpm
    }

    /// Seconds per bar at the reference tempo.
    pub fn bar_seconds(&self) -> f64 {
        self.quarter_seconds() * f64::from(self.beats_per_bar)
    }

    /// Seconds per quantization step at the reference tempo.
    pub fn step_seconds(&self) -> f64 {
        step_seconds(self.tempo_qpm, self.steps_per_quarter)
    }
}
