// End-to-end track build.
//
// build_track validates the request, runs the rhythm and melody builders
// (concurrently via rayon::join unless the config says otherwise), hands
// both timelines to the assembler and exports the result. Any stage failure
// aborts the whole build; there is no partial track.
//
// The output directory and config are explicit parameters. This module never
// reads the environment, so tests can drive it with stub collaborators and a
// temporary directory.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::assemble::assemble_with;
use crate::config::TrackConfig;
use crate::error::{TrackError, ValidationError};
use crate::export::export_midi;
use crate::generator::{MelodicDecoder, RhythmGenerator};
use crate::melody::build_melodic_track;
use crate::rhythm::build_rhythm_track;
use crate::timeline::NoteTimeline;

/// Caller-facing parameters of one build.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackRequest {
    pub num_bars: u32,
    /// Sampling temperature for the rhythm generator.
    pub temperature: f64,
}

impl Default for TrackRequest {
    fn default() -> Self {
        TrackRequest {
            num_bars: 8,
            temperature: 1.0,
        }
    }
}

/// Longest track a single request may ask for.
pub const MAX_BARS: u32 = 1024;

/// Reject a bar count outside `1..=MAX_BARS`.
pub fn validate_bars(num_bars: u32) -> Result<(), ValidationError> {
    if num_bars == 0 {
        return Err(ValidationError::NoBars(num_bars));
    }
    if num_bars > MAX_BARS {
        return Err(ValidationError::TooManyBars {
            requested: num_bars,
            max: MAX_BARS,
        });
    }
    Ok(())
}

/// Reject a bad bar count or a temperature that is not positive and finite.
pub fn validate_params(num_bars: u32, temperature: f64) -> Result<(), ValidationError> {
    validate_bars(num_bars)?;
    if !(temperature.is_finite() && temperature > 0.0) {
        return Err(ValidationError::BadTemperature(temperature));
    }
    Ok(())
}

/// Generate, shape and assemble a track without writing it.
pub fn build_timeline(
    rhythm: &dyn RhythmGenerator,
    melody: &dyn MelodicDecoder,
    config: &TrackConfig,
    request: &TrackRequest,
) -> Result<NoteTimeline, TrackError> {
    validate_params(request.num_bars, request.temperature)?;

    let run_rhythm = || build_rhythm_track(rhythm, config, request.num_bars, request.temperature);
    let run_melody = || build_melodic_track(melody, request.num_bars);

    let (drums, lead) = if config.parallel_builders {
        rayon::join(run_rhythm, run_melody)
    } else {
        let drums = run_rhythm()?;
        (Ok(drums), run_melody())
    };
    let drums = drums?;
    let lead = lead?;
    info!(
        rhythm_notes = drums.len(),
        melody_notes = lead.len(),
        "both streams generated"
    );

    Ok(assemble_with(&drums, &lead, config))
}

/// Build a track and write it to `output_dir/config.file_name`.
pub fn build_track(
    rhythm: &dyn RhythmGenerator,
    melody: &dyn MelodicDecoder,
    config: &TrackConfig,
    request: &TrackRequest,
    output_dir: &Path,
) -> Result<PathBuf, TrackError> {
    info!(
        bars = request.num_bars,
        temperature = request.temperature,
        output_dir = %output_dir.display(),
        "building track"
    );
    let track = build_timeline(rhythm, melody, config, request)?;
    let stats = track.stats();
    info!(
        notes = stats.total_notes,
        percussion = stats.percussion_notes,
        melodic = stats.melodic_notes,
        seconds = stats.total_time,
        "track assembled"
    );
    export_midi(&track, output_dir, &config.file_name).map_err(TrackError::from)
}
