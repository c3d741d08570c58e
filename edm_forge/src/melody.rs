// Melodic tension builder.
//
// Draws one latent sample from the melodic decoder, decodes it into a
// fragment `num_bars` long, keeps the first decoded timeline, and applies the
// buildup transform: each note's velocity is scaled by `1 + start / total`,
// so the multiplier climbs from 1x at the top of the fragment toward 2x at
// the end. The result is rounded and clamped to 1-127.
//
// The transform touches velocity only. Timing, pitch and channel pass
// through, so total_time is unchanged. It is a pure function of its input:
// the same timeline always yields the same velocities.

use tracing::debug;

use crate::error::{GeneratorError, Stage, TrackError};
use crate::generator::MelodicDecoder;
use crate::pipeline::validate_bars;
use crate::timeline::NoteTimeline;

/// Scale a velocity by `1 + position_factor`, rounding half away from zero
/// and clamping into the MIDI velocity range.
pub fn buildup_velocity(velocity: u8, position_factor: f64) -> u8 {
    let scaled = (f64::from(velocity) * (1.0 + position_factor)).round();
    scaled.clamp(1.0, 127.0) as u8
}

/// Return a copy of `timeline` with the crescendo applied.
///
/// An empty or zero-length timeline passes through unchanged.
pub fn apply_buildup(timeline: &NoteTimeline) -> NoteTimeline {
    let total = timeline.total_time();
    let mut out = timeline.clone();
    if total <= 0.0 {
        return out;
    }
    for note in &mut out.notes {
        let position_factor = note.start_time / total;
        note.velocity = buildup_velocity(note.velocity, position_factor);
    }
    out
}

/// Sample, decode and shape one melodic fragment.
pub fn build_melodic_track(
    decoder: &dyn MelodicDecoder,
    num_bars: u32,
) -> Result<NoteTimeline, TrackError> {
    validate_bars(num_bars)?;
    let fail = |e: GeneratorError| TrackError::generation(Stage::Melody, e);

    let latent = decoder.sample(1).map_err(fail)?;
    let decoded = decoder.decode(&latent, num_bars).map_err(fail)?;
    let fragment = decoded
        .into_iter()
        .next()
        .ok_or(GeneratorError::EmptyDecode)
        .map_err(fail)?;
    fragment.validate().map_err(|e| fail(e.into()))?;
    debug!(
        notes = fragment.len(),
        total_time = fragment.total_time(),
        "decoded melodic fragment"
    );

    Ok(apply_buildup(&fragment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::LatentBatch;
    use crate::timeline::NoteEvent;

    struct FixedDecoder {
        fragments: Vec<NoteTimeline>,
    }

    impl MelodicDecoder for FixedDecoder {
        fn sample(&self, count: usize) -> Result<LatentBatch, GeneratorError> {
            Ok(LatentBatch {
                vectors: vec![vec![0.0; 4]; count],
            })
        }

        fn decode(&self, _: &LatentBatch, _: u32) -> Result<Vec<NoteTimeline>, GeneratorError> {
            Ok(self.fragments.clone())
        }
    }

    struct BrokenDecoder;

    impl MelodicDecoder for BrokenDecoder {
        fn sample(&self, _: usize) -> Result<LatentBatch, GeneratorError> {
            Err(GeneratorError::Inference("checkpoint corrupt".into()))
        }

        fn decode(&self, _: &LatentBatch, _: u32) -> Result<Vec<NoteTimeline>, GeneratorError> {
            unreachable!("decode must not run after a failed sample")
        }
    }

    fn lead(start: f64, end: f64, velocity: u8) -> NoteEvent {
        NoteEvent::melodic(69, start, end, velocity, 0, 81)
    }

    #[test]
    fn two_note_scenario() {
        let timeline = NoteTimeline::from_notes(vec![lead(0.0, 1.0, 80), lead(3.0, 4.0, 80)]);
        let shaped = apply_buildup(&timeline);
        assert_eq!(shaped.notes[0].velocity, 80);
        // 80 * 1.75 = 140, clamped.
        assert_eq!(shaped.notes[1].velocity, 127);
    }

    #[test]
    fn velocities_rise_with_position() {
        let notes: Vec<NoteEvent> = (0..16)
            .map(|i| lead(f64::from(i) * 0.5, f64::from(i) * 0.5 + 0.5, 40))
            .collect();
        let shaped = apply_buildup(&NoteTimeline::from_notes(notes));
        for pair in shaped.notes.windows(2) {
            assert!(pair[0].velocity <= pair[1].velocity);
        }
        assert_eq!(shaped.notes[0].velocity, 40);
        // Last onset at 7.5 of 8.0: 40 * 1.9375 = 77.5, rounds to 78.
        assert_eq!(shaped.notes[15].velocity, 78);
        assert!(shaped.notes.iter().all(|n| (1..=127).contains(&n.velocity)));
    }

    #[test]
    fn buildup_follows_onset_not_list_order() {
        let timeline = NoteTimeline::from_notes(vec![
            lead(3.0, 4.0, 60),
            lead(0.0, 2.5, 60),
            lead(1.0, 3.5, 60),
            lead(2.0, 2.2, 60),
            lead(0.5, 1.0, 60),
        ]);
        let shaped = apply_buildup(&timeline);
        let velocities: Vec<u8> = shaped.notes.iter().map(|n| n.velocity).collect();
        // 60 * (1 + start / 4.0), 67.5 rounding up.
        assert_eq!(velocities, vec![105, 60, 75, 90, 68]);

        let mut by_onset = shaped.notes.clone();
        by_onset.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
        for pair in by_onset.windows(2) {
            assert!(pair[0].velocity <= pair[1].velocity);
        }
    }

    #[test]
    fn buildup_keeps_timing_and_input() {
        let timeline = NoteTimeline::from_notes(vec![lead(2.0, 3.0, 64), lead(0.5, 1.0, 64)]);
        let shaped = apply_buildup(&timeline);
        assert_eq!(shaped.total_time(), timeline.total_time());
        for (before, after) in timeline.notes.iter().zip(&shaped.notes) {
            assert_eq!(before.start_time, after.start_time);
            assert_eq!(before.end_time, after.end_time);
            assert_eq!(before.pitch, after.pitch);
        }
        // The input is untouched.
        assert_eq!(timeline.notes[0].velocity, 64);
        // Same input, same output.
        assert_eq!(apply_buildup(&timeline), shaped);
    }

    #[test]
    fn empty_timeline_is_noop() {
        let empty = NoteTimeline::new();
        assert_eq!(apply_buildup(&empty), empty);
    }

    #[test]
    fn buildup_velocity_edges() {
        assert_eq!(buildup_velocity(1, 0.0), 1);
        assert_eq!(buildup_velocity(127, 0.0), 127);
        assert_eq!(buildup_velocity(127, 0.99), 127);
        assert_eq!(buildup_velocity(64, 0.5), 96);
        // Half rounds up: 3 * 1.5 = 4.5.
        assert_eq!(buildup_velocity(3, 0.5), 5);
    }

    #[test]
    fn first_decoded_fragment_is_used() {
        let decoder = FixedDecoder {
            fragments: vec![
                NoteTimeline::from_notes(vec![lead(0.0, 1.0, 50), lead(1.0, 2.0, 50)]),
                NoteTimeline::from_notes(vec![lead(0.0, 8.0, 90)]),
            ],
        };
        let timeline = build_melodic_track(&decoder, 8).unwrap();
        assert_eq!(timeline.len(), 2);
        assert_eq!(timeline.notes[0].velocity, 50);
        assert_eq!(timeline.notes[1].velocity, 75);
    }

    #[test]
    fn empty_decode_is_a_melody_failure() {
        let decoder = FixedDecoder { fragments: vec![] };
        let err = build_melodic_track(&decoder, 8).unwrap_err();
        assert!(matches!(
            err,
            TrackError::Generation {
                stage: Stage::Melody,
                source: GeneratorError::EmptyDecode
            }
        ));
    }

    #[test]
    fn sampling_failure_is_a_melody_failure() {
        let err = build_melodic_track(&BrokenDecoder, 8).unwrap_err();
        assert!(matches!(
            err,
            TrackError::Generation {
                stage: Stage::Melody,
                source: GeneratorError::Inference(_)
            }
        ));
    }

    #[test]
    fn zero_bars_is_rejected_before_sampling() {
        assert!(matches!(
            build_melodic_track(&BrokenDecoder, 0),
            Err(TrackError::Validation(_))
        ));
    }
}
