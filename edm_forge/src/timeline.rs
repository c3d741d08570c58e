// The note timeline: the representation every pipeline stage shares.
//
// A NoteTimeline is an unordered bag of NoteEvents (start/end in seconds)
// plus two track-level annotations that only the assembler sets: the global
// tempo and, once quantized, the grid resolution. Producers may emit notes
// in any order; consumers treat them as a set of intervals.
//
// total_time() is computed from the notes on every call rather than stored,
// so it can never go stale after a merge or a transform.
//
// Quantized notes also carry their integer step span. Seconds are derived
// from the steps, never the other way round, so exported tick positions are
// exact.

use serde::{Deserialize, Serialize};

/// MIDI channel reserved for drums (channel 10 in 1-based numbering).
pub const PERCUSSION_CHANNEL: u8 = 9;

/// Seconds per grid step at the given tempo and resolution.
pub fn step_seconds(tempo_qpm: f64, steps_per_quarter: u32) -> f64 {
    60.0 / tempo_qpm / f64::from(steps_per_quarter)
}

/// Grid position of a quantized note, in steps from time zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpan {
    pub start_step: u64,
    pub end_step: u64,
}

/// A single musical event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteEvent {
    /// MIDI pitch number (0-127).
    pub pitch: u8,
    /// Onset in seconds.
    pub start_time: f64,
    /// Release in seconds. Always greater than `start_time`.
    pub end_time: f64,
    /// Loudness, 1-127.
    pub velocity: u8,
    /// Instrument/channel id. `PERCUSSION_CHANNEL` is reserved for drums.
    pub instrument: u8,
    /// General MIDI program for melodic instruments. Ignored for drums.
    pub program: u8,
    pub is_percussion: bool,
    /// Set by quantization; `None` for raw generator output.
    pub quantized: Option<StepSpan>,
}

impl NoteEvent {
    /// A drum hit on the percussion channel.
    pub fn percussion(pitch: u8, start_time: f64, end_time: f64, velocity: u8) -> Self {
        NoteEvent {
            pitch,
            start_time,
            end_time,
            velocity,
            instrument: PERCUSSION_CHANNEL,
            program: 0,
            is_percussion: true,
            quantized: None,
        }
    }

    /// A pitched note. `instrument` must not be the percussion channel;
    /// `validate` reports it if it is.
    pub fn melodic(
        pitch: u8,
        start_time: f64,
        end_time: f64,
        velocity: u8,
        instrument: u8,
        program: u8,
    ) -> Self {
        NoteEvent {
            pitch,
            start_time,
            end_time,
            velocity,
            instrument,
            program,
            is_percussion: false,
            quantized: None,
        }
    }

    /// Sounding length in seconds.
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// Check the per-note invariants: pitch and velocity ranges, finite
    /// non-negative times with positive duration, and the percussion channel
    /// rule in both directions.
    pub fn validate(&self) -> Result<(), NoteError> {
        if self.pitch > 127 {
            return Err(NoteError::PitchOutOfRange(self.pitch));
        }
        if !(1..=127).contains(&self.velocity) {
            return Err(NoteError::VelocityOutOfRange(self.velocity));
        }
        if !self.start_time.is_finite() || !self.end_time.is_finite() {
            return Err(NoteError::NonFiniteTime);
        }
        if self.start_time < 0.0 {
            return Err(NoteError::NegativeStart(self.start_time));
        }
        if self.end_time <= self.start_time {
            return Err(NoteError::NonPositiveDuration {
                start: self.start_time,
                end: self.end_time,
            });
        }
        if self.is_percussion != (self.instrument == PERCUSSION_CHANNEL) {
            return Err(NoteError::ChannelMismatch {
                instrument: self.instrument,
                is_percussion: self.is_percussion,
            });
        }
        Ok(())
    }
}

/// Why a single note is invalid.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NoteError {
    #[error("pitch {0} is outside 0-127")]
    PitchOutOfRange(u8),
    #[error("velocity {0} is outside 1-127")]
    VelocityOutOfRange(u8),
    #[error("start or end time is not finite")]
    NonFiniteTime,
    #[error("start time {0} is negative")]
    NegativeStart(f64),
    #[error("end time {end} does not follow start time {start}")]
    NonPositiveDuration { start: f64, end: f64 },
    #[error("instrument {instrument} disagrees with is_percussion = {is_percussion}")]
    ChannelMismatch { instrument: u8, is_percussion: bool },
}

/// Why a timeline is invalid.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TimelineError {
    #[error("note {index}: {source}")]
    InvalidNote {
        index: usize,
        #[source]
        source: NoteError,
    },
    #[error("timeline is marked quantized but has no tempo")]
    QuantizedWithoutTempo,
    #[error("note {index} is not on the {steps_per_quarter}-steps-per-quarter grid")]
    OffGrid { index: usize, steps_per_quarter: u32 },
}

/// An ordered collection of notes plus track-level metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoteTimeline {
    pub notes: Vec<NoteEvent>,
    /// Quarter notes per minute. Absent until the assembler stamps it.
    pub tempo_qpm: Option<f64>,
    /// Grid resolution. Present only once the timeline has been quantized.
    pub steps_per_quarter: Option<u32>,
    /// Time-signature numerator. Absent until the assembler stamps it.
    pub beats_per_bar: Option<u32>,
}

impl NoteTimeline {
    /// An empty, unstamped timeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap `notes` without any track-level annotation.
    pub fn from_notes(notes: Vec<NoteEvent>) -> Self {
        NoteTimeline {
            notes,
            ..Self::default()
        }
    }

    /// Maximum end time across all notes, or 0 when empty.
    pub fn total_time(&self) -> f64 {
        self.notes
            .iter()
            .map(|n| n.end_time)
            .fold(0.0, f64::max)
    }

    /// Number of notes.
    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    /// Whether the notes carry grid step spans.
    pub fn is_quantized(&self) -> bool {
        self.steps_per_quarter.is_some()
    }

    /// Check every note, and for quantized timelines also check that every
    /// note carries a step span whose seconds match its times exactly.
    pub fn validate(&self) -> Result<(), TimelineError> {
        for (index, note) in self.notes.iter().enumerate() {
            note.validate()
                .map_err(|source| TimelineError::InvalidNote { index, source })?;
        }

        let Some(steps_per_quarter) = self.steps_per_quarter else {
            return Ok(());
        };
        let tempo = self.tempo_qpm.ok_or(TimelineError::QuantizedWithoutTempo)?;
        let step = step_seconds(tempo, steps_per_quarter);
        for (index, note) in self.notes.iter().enumerate() {
            let on_grid = match note.quantized {
                Some(span) => {
                    span.end_step > span.start_step
                        && note.start_time == span.start_step as f64 * step
                        && note.end_time == span.end_step as f64 * step
                }
                None => false,
            };
            if !on_grid {
                return Err(TimelineError::OffGrid {
                    index,
                    steps_per_quarter,
                });
            }
        }
        Ok(())
    }

    /// Note counts and duration, for logging.
    pub fn stats(&self) -> TimelineStats {
        let percussion_notes = self.notes.iter().filter(|n| n.is_percussion).count();
        TimelineStats {
            total_notes: self.notes.len(),
            percussion_notes,
            melodic_notes: self.notes.len() - percussion_notes,
            total_time: self.total_time(),
        }
    }

    /// Compact text listing of the notes in onset order, one per line.
    pub fn summary(&self) -> String {
        let mut sorted: Vec<&NoteEvent> = self.notes.iter().collect();
        sorted.sort_by(|a, b| {
            a.start_time
                .total_cmp(&b.start_time)
                .then(a.pitch.cmp(&b.pitch))
        });

        let mut out = String::new();
        for note in sorted {
            let kind = if note.is_percussion { "drum" } else { "note" };
            out.push_str(&format!(
                "{:>8.3}-{:<8.3} {} {:<4} vel {:>3} ch {}\n",
                note.start_time,
                note.end_time,
                kind,
                pitch_name(note.pitch),
                note.velocity,
                note.instrument,
            ));
        }
        out
    }
}

/// Counts describing a timeline's contents.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineStats {
    pub total_notes: usize,
    pub percussion_notes: usize,
    pub melodic_notes: usize,
    pub total_time: f64,
}

/// Compact note name for a MIDI pitch, e.g. "C4", "F#3". Middle C (60) is C4.
pub fn pitch_name(pitch: u8) -> String {
    const NAMES: [&str; 12] = [
        "C", "C#", "D", "Eb", "E", "F", "F#", "G", "Ab", "A", "Bb", "B",
    ];
    let octave = i16::from(pitch / 12) - 1;
    format!("{}{}", NAMES[usize::from(pitch % 12)], octave)
}
