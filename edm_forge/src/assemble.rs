// Track assembler: merge, tempo stamp, quantize.
//
// The two stream timelines are concatenated (rhythm first) with every note
// attribute preserved, stamped with one global tempo, then snapped onto a
// grid of `steps_per_quarter` equal steps per quarter note.
//
// Quantization rounds each time to the nearest step, ties going to the later
// step. A note whose end rounds onto or before its start is stretched to one
// full step, so no note ever comes out with zero or negative length. Notes
// are never dropped: the output count is always |rhythm| + |melody|.
//
// Seconds on the output are recomputed from integer step indices, which
// keeps them exact multiples of the step duration. The notes may arrive in
// any order and may overlap; each is snapped on its own and keeps its place.

use tracing::debug;

use crate::config::TrackConfig;
use crate::timeline::{NoteTimeline, StepSpan, step_seconds};

/// Concatenate two timelines. Track-level annotations are cleared; the
/// result has not been stamped or quantized yet.
pub fn merge(rhythm: &NoteTimeline, melody: &NoteTimeline) -> NoteTimeline {
    let mut notes = Vec::with_capacity(rhythm.len() + melody.len());
    notes.extend(rhythm.notes.iter().cloned());
    notes.extend(melody.notes.iter().cloned());
    NoteTimeline::from_notes(notes)
}

/// Index of the grid step nearest to `seconds`, ties rounding up.
pub fn nearest_step(seconds: f64, step: f64) -> u64 {
    (seconds / step + 0.5).floor().max(0.0) as u64
}

/// Snap every note onto the grid defined by `tempo_qpm` and
/// `steps_per_quarter`, and stamp both on the result.
pub fn quantize(timeline: &NoteTimeline, tempo_qpm: f64, steps_per_quarter: u32) -> NoteTimeline {
    let step = step_seconds(tempo_qpm, steps_per_quarter);
    let mut stretched = 0usize;

    let notes = timeline
        .notes
        .iter()
        .map(|note| {
            let start_step = nearest_step(note.start_time, step);
            let mut end_step = nearest_step(note.end_time, step);
            if end_step <= start_step {
                end_step = start_step + 1;
                stretched += 1;
            }
            let mut snapped = note.clone();
            snapped.start_time = start_step as f64 * step;
            snapped.end_time = end_step as f64 * step;
            snapped.quantized = Some(StepSpan {
                start_step,
                end_step,
            });
            snapped
        })
        .collect();

    if stretched > 0 {
        debug!(stretched, "extended notes shorter than one step");
    }

    NoteTimeline {
        notes,
        tempo_qpm: Some(tempo_qpm),
        steps_per_quarter: Some(steps_per_quarter),
        beats_per_bar: timeline.beats_per_bar,
    }
}

/// Merge, stamp and quantize using the tempo, meter and grid from `config`.
pub fn assemble_with(
    rhythm: &NoteTimeline,
    melody: &NoteTimeline,
    config: &TrackConfig,
) -> NoteTimeline {
    let merged = merge(rhythm, melody);
    let mut assembled = quantize(&merged, config.tempo_qpm, config.steps_per_quarter);
    assembled.beats_per_bar = Some(config.beats_per_bar);
    debug!(
        rhythm_notes = rhythm.len(),
        melody_notes = melody.len(),
        total_time = assembled.total_time(),
        "assembled track"
    );
    assembled
}

/// Merge, stamp 128 qpm and quantize to sixteenth notes.
pub fn assemble(rhythm: &NoteTimeline, melody: &NoteTimeline) -> NoteTimeline {
    assemble_with(rhythm, melody, &TrackConfig::default())
}
