// Rhythm track builder.
//
// Asks the rhythm generator for a percussion pattern covering bars
// [0, num_bars) and overlays a deterministic kick: one hit at the start of
// every bar, fixed pitch and velocity, on the percussion channel. The
// generated notes and the kicks are concatenated as-is. Coinciding hits are
// kept; nothing is deduplicated.
//
// The kick sits on the bar boundary, not on every beat. Bar boundaries are
// measured at the reference tempo from TrackConfig, so after quantization
// each kick lands exactly on a downbeat step.

use tracing::debug;

use crate::config::TrackConfig;
use crate::error::{Stage, TrackError};
use crate::generator::{GenerationRequest, RhythmGenerator, SectionRange};
use crate::pipeline::validate_params;
use crate::timeline::{NoteEvent, NoteTimeline};

/// The per-bar kick events for `num_bars` bars.
pub fn kick_pattern(config: &TrackConfig, num_bars: u32) -> Vec<NoteEvent> {
    let spacing = config.bar_seconds();
    (0..num_bars)
        .map(|bar| {
            let start = f64::from(bar) * spacing;
            NoteEvent::percussion(
                config.kick.pitch,
                start,
                start + config.kick.length,
                config.kick.velocity,
            )
        })
        .collect()
}

/// Build the percussion timeline: generated pattern plus kick overlay.
///
/// Fails without producing anything if the parameters are invalid, the
/// generator fails, or the generator's output breaks a note invariant.
pub fn build_rhythm_track(
    generator: &dyn RhythmGenerator,
    config: &TrackConfig,
    num_bars: u32,
    temperature: f64,
) -> Result<NoteTimeline, TrackError> {
    validate_params(num_bars, temperature)?;

    let request = GenerationRequest {
        section: SectionRange::bars(num_bars),
        temperature,
        style: config.drum_style.clone(),
        qpm: config.tempo_qpm,
        beats_per_bar: config.beats_per_bar,
    };

    let generated = generator
        .generate(&request)
        .map_err(|e| TrackError::generation(Stage::Rhythm, e))?;
    generated
        .validate()
        .map_err(|e| TrackError::generation(Stage::Rhythm, e.into()))?;
    debug!(
        notes = generated.len(),
        bars = num_bars,
        temperature,
        "rhythm generator returned pattern"
    );

    let mut notes = generated.notes;
    notes.extend(kick_pattern(config, num_bars));

    Ok(NoteTimeline::from_notes(notes))
}
