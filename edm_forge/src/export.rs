// MIDI output for assembled timelines.
//
// Converts a NoteTimeline into a Standard MIDI File (format 1) and writes it
// to `<output_dir>/<file_name>`. Track 0 carries the tempo and the time
// signature (the stamped beats per bar over a quarter note, 4/4 if never
// stamped); each (percussion, instrument, program) group then gets its own
// track. Drums always play on MIDI channel 9. Melodic groups take channels
// 0, 1, 2, ... in order of first appearance, skipping 9.
//
// Times become ticks through the stamped tempo (120 qpm if the timeline was
// never stamped). Quantized notes use their integer step spans so grid
// positions convert exactly. At equal ticks a note-off is written before a
// note-on, so repeated notes on one pitch retrigger cleanly. When notes of
// one pitch overlap within a track, the later onset retriggers the key and
// the key is released only at the last of their ends, so an early note-off
// never cuts a longer note short.
//
// The file is encoded fully in memory, written to a temporary file in the
// target directory, and renamed over the destination. A failed export never
// leaves a truncated file under the final name.
//
// Uses the `midly` crate for encoding and parsing.

use std::io::Write;
use std::path::{Path, PathBuf};

use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};
use tracing::{debug, info};

use crate::error::ExportError;
use crate::timeline::{NoteEvent, NoteTimeline, PERCUSSION_CHANNEL};

/// Ticks per quarter note in MIDI output.
pub const TICKS_PER_QUARTER: u16 = 480;

/// Tempo assumed for timelines that were never stamped (the SMF default).
const DEFAULT_TEMPO_QPM: f64 = 120.0;

/// Time-signature numerator for timelines that were never stamped.
const DEFAULT_BEATS_PER_BAR: u32 = 4;

/// Encode `timeline` and write it atomically to `output_dir/file_name`,
/// creating the directory if needed. Returns the written path.
pub fn export_midi(
    timeline: &NoteTimeline,
    output_dir: &Path,
    file_name: &str,
) -> Result<PathBuf, ExportError> {
    let path = output_dir.join(file_name);
    let io_err = |source: std::io::Error| ExportError::Io {
        path: path.clone(),
        source,
    };

    let smf = timeline_to_smf(timeline);
    let mut buf = Vec::new();
    smf.write(&mut buf).map_err(|err| ExportError::Encode {
        path: path.clone(),
        message: err.to_string(),
    })?;

    std::fs::create_dir_all(output_dir).map_err(io_err)?;
    let mut staged = tempfile::NamedTempFile::new_in(output_dir).map_err(io_err)?;
    staged.write_all(&buf).map_err(io_err)?;
    staged.as_file().sync_all().map_err(io_err)?;
    staged.persist(&path).map_err(|err| io_err(err.error))?;

    info!(
        path = %path.display(),
        bytes = buf.len(),
        notes = timeline.len(),
        "wrote MIDI file"
    );
    Ok(path)
}

/// Which output track a note belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TrackKey {
    is_percussion: bool,
    instrument: u8,
    program: u8,
}

impl TrackKey {
    fn of(note: &NoteEvent) -> Self {
        TrackKey {
            is_percussion: note.is_percussion,
            instrument: note.instrument,
            program: if note.is_percussion { 0 } else { note.program },
        }
    }
}

/// Convert a timeline into an in-memory SMF.
pub fn timeline_to_smf(timeline: &NoteTimeline) -> Smf<'static> {
    let tempo_qpm = timeline.tempo_qpm.unwrap_or(DEFAULT_TEMPO_QPM);
    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
    ));

    // Track 0: tempo track
    let tempo_micros = (60_000_000.0 / tempo_qpm).round().clamp(1.0, 16_777_215.0) as u32;
    let numerator = timeline
        .beats_per_bar
        .unwrap_or(DEFAULT_BEATS_PER_BAR)
        .clamp(1, u32::from(u8::MAX)) as u8;
    smf.tracks.push(vec![
        meta(0, MetaMessage::TrackName(b"Tempo")),
        meta(0, MetaMessage::Tempo(u24::new(tempo_micros))),
        // Denominator 2^2: the beat is a quarter note.
        meta(0, MetaMessage::TimeSignature(numerator, 2, 24, 8)),
        meta(0, MetaMessage::EndOfTrack),
    ]);

    // Group notes by instrument, keeping first-appearance order.
    let mut groups: Vec<(TrackKey, Vec<&NoteEvent>)> = Vec::new();
    for note in &timeline.notes {
        let key = TrackKey::of(note);
        match groups.iter_mut().find(|(k, _)| *k == key) {
            Some((_, notes)) => notes.push(note),
            None => groups.push((key, vec![note])),
        }
    }

    let mut melodic_channels = (0u8..16).filter(|&c| c != PERCUSSION_CHANNEL).cycle();
    for (key, notes) in groups {
        let channel = if key.is_percussion {
            PERCUSSION_CHANNEL
        } else {
            melodic_channels.next().unwrap_or(0)
        };
        smf.tracks
            .push(group_track(key, channel, &notes, timeline, tempo_qpm));
    }

    debug!(
        tracks = smf.tracks.len(),
        tempo_qpm,
        "encoded timeline as SMF"
    );
    smf
}

fn meta(delta: u32, message: MetaMessage<'static>) -> TrackEvent<'static> {
    TrackEvent {
        delta: u28::new(delta),
        kind: TrackEventKind::Meta(message),
    }
}

/// Build one instrument track from its notes.
fn group_track(
    key: TrackKey,
    channel: u8,
    notes: &[&NoteEvent],
    timeline: &NoteTimeline,
    tempo_qpm: f64,
) -> Track<'static> {
    let channel = u4::new(channel);
    let mut track: Track<'static> = Vec::new();

    let name: &'static [u8] = if key.is_percussion { b"Drums" } else { b"Melody" };
    track.push(meta(0, MetaMessage::TrackName(name)));
    if !key.is_percussion {
        track.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Midi {
                channel,
                message: MidiMessage::ProgramChange {
                    program: u7::new(key.program.min(127)),
                },
            },
        });
    }

    // (tick, is_on, pitch, velocity); offs sort before ons at the same tick.
    let mut events: Vec<(u32, bool, u8, u8)> = Vec::with_capacity(notes.len() * 2);
    for note in notes {
        let (on, off) = note_ticks(note, timeline, tempo_qpm);
        events.push((on, true, note.pitch, note.velocity));
        events.push((off, false, note.pitch, 0));
    }
    events.sort_by_key(|&(tick, is_on, pitch, _)| (tick, is_on, pitch));

    // Notes currently holding each key.
    let mut held = [0u32; 128];
    let mut last_tick = 0u32;
    let mut emit = |track: &mut Track<'static>, tick: u32, message: MidiMessage| {
        track.push(TrackEvent {
            delta: u28::new(tick - last_tick),
            kind: TrackEventKind::Midi { channel, message },
        });
        last_tick = tick;
    };
    for (tick, is_on, pitch, velocity) in events {
        let pitch = pitch.min(127);
        let key = u7::new(pitch);
        let note_off = MidiMessage::NoteOff {
            key,
            vel: u7::new(0),
        };
        let count = &mut held[usize::from(pitch)];
        if is_on {
            if *count > 0 {
                emit(&mut track, tick, note_off);
            }
            *count += 1;
            emit(
                &mut track,
                tick,
                MidiMessage::NoteOn {
                    key,
                    vel: u7::new(velocity.clamp(1, 127)),
                },
            );
        } else {
            *count = count.saturating_sub(1);
            if *count == 0 {
                emit(&mut track, tick, note_off);
            }
        }
    }

    track.push(meta(0, MetaMessage::EndOfTrack));
    track
}

/// On/off tick positions for a note. Quantized notes convert their step span
/// exactly when the grid divides the tick resolution.
fn note_ticks(note: &NoteEvent, timeline: &NoteTimeline, tempo_qpm: f64) -> (u32, u32) {
    let tpq = u32::from(TICKS_PER_QUARTER);
    if let (Some(span), Some(steps_per_quarter)) = (note.quantized, timeline.steps_per_quarter) {
        if steps_per_quarter > 0 && tpq % steps_per_quarter == 0 {
            let ticks_per_step = u64::from(tpq / steps_per_quarter);
            return (
                clamp_ticks(span.start_step * ticks_per_step),
                clamp_ticks(span.end_step * ticks_per_step),
            );
        }
    }
    let on = seconds_to_ticks(note.start_time, tempo_qpm);
    // A note always spans at least one tick.
    let off = seconds_to_ticks(note.end_time, tempo_qpm).max(on + 1);
    (on, off)
}

/// Largest delta a track event can carry (28 bits).
const MAX_TICK: u64 = (1 << 28) - 1;

fn clamp_ticks(ticks: u64) -> u32 {
    ticks.min(MAX_TICK) as u32
}

/// Convert seconds to ticks at the given tempo, rounding to the nearest tick.
pub fn seconds_to_ticks(seconds: f64, tempo_qpm: f64) -> u32 {
    let quarters = seconds * tempo_qpm / 60.0;
    let ticks = (quarters * f64::from(TICKS_PER_QUARTER)).round().max(0.0);
    clamp_ticks(ticks as u64)
}

// ---------------------------------------------------------------------------
// Read-back
// ---------------------------------------------------------------------------

/// What a written MIDI file contains, as seen by a parser.
#[derive(Debug, Clone, PartialEq)]
pub struct MidiSummary {
    pub ticks_per_quarter: u16,
    pub track_count: usize,
    /// Every tempo meta event, in microseconds per quarter note.
    pub tempos: Vec<u32>,
    /// Note-on events with non-zero velocity.
    pub note_ons: usize,
    /// Note-ons on the percussion channel.
    pub percussion_note_ons: usize,
    /// Tick of the last note-off across all tracks.
    pub end_tick: u32,
}

impl MidiSummary {
    /// Parse an encoded SMF.
    pub fn parse(bytes: &[u8]) -> Result<Self, midly::Error> {
        let smf = Smf::parse(bytes)?;
        let ticks_per_quarter = match smf.header.timing {
            Timing::Metrical(tpq) => tpq.as_int(),
            Timing::Timecode(..) => 0,
        };

        let mut summary = MidiSummary {
            ticks_per_quarter,
            track_count: smf.tracks.len(),
            tempos: Vec::new(),
            note_ons: 0,
            percussion_note_ons: 0,
            end_tick: 0,
        };

        for track in &smf.tracks {
            let mut tick = 0u32;
            for event in track {
                tick = tick.saturating_add(event.delta.as_int());
                match event.kind {
                    TrackEventKind::Meta(MetaMessage::Tempo(micros)) => {
                        summary.tempos.push(micros.as_int());
                    }
                    TrackEventKind::Midi {
                        channel,
                        message: MidiMessage::NoteOn { vel, .. },
                    } if vel.as_int() > 0 => {
                        summary.note_ons += 1;
                        if channel.as_int() == PERCUSSION_CHANNEL {
                            summary.percussion_note_ons += 1;
                        }
                    }
                    TrackEventKind::Midi {
                        message: MidiMessage::NoteOff { .. } | MidiMessage::NoteOn { .. },
                        ..
                    } => {
                        summary.end_tick = summary.end_tick.max(tick);
                    }
                    _ => {}
                }
            }
        }
        Ok(summary)
    }

    /// Musical length in seconds, using the first tempo event.
    pub fn duration_seconds(&self) -> f64 {
        let micros = self.tempos.first().copied().unwrap_or(500_000);
        if self.ticks_per_quarter == 0 {
            return 0.0;
        }
        f64::from(self.end_tick) / f64::from(self.ticks_per_quarter) * f64::from(micros)
            / 1_000_000.0
    }
}

/// Read a MIDI file back and summarize it.
pub fn read_midi_summary(path: &Path) -> Result<MidiSummary, ExportError> {
    let bytes = std::fs::read(path).map_err(|source| ExportError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    MidiSummary::parse(&bytes).map_err(|err| ExportError::Decode {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::assemble;

    fn sample_track() -> NoteTimeline {
        let rhythm = NoteTimeline::from_notes(vec![
            NoteEvent::percussion(36, 0.0, 0.1, 100),
            NoteEvent::percussion(36, 1.875, 1.975, 100),
            NoteEvent::percussion(42, 0.46875, 0.5, 60),
        ]);
        let melody = NoteTimeline::from_notes(vec![
            NoteEvent::melodic(69, 0.0, 0.9375, 80, 0, 81),
            NoteEvent::melodic(72, 0.9375, 3.75, 120, 0, 81),
        ]);
        assemble(&rhythm, &melody)
    }

    #[test]
    fn smf_has_tempo_track_plus_one_per_instrument() {
        let smf = timeline_to_smf(&sample_track());
        // tempo + drums + lead
        assert_eq!(smf.tracks.len(), 3);
        let tempo_events: Vec<u32> = smf.tracks[0]
            .iter()
            .filter_map(|e| match e.kind {
                TrackEventKind::Meta(MetaMessage::Tempo(t)) => Some(t.as_int()),
                _ => None,
            })
            .collect();
        // 60_000_000 / 128
        assert_eq!(tempo_events, vec![468_750]);
    }

    #[test]
    fn drums_on_channel_nine_melody_elsewhere() {
        let smf = timeline_to_smf(&sample_track());
        let channels = |track: &Track<'_>| -> Vec<u8> {
            track
                .iter()
                .filter_map(|e| match e.kind {
                    TrackEventKind::Midi { channel, .. } => Some(channel.as_int()),
                    _ => None,
                })
                .collect()
        };
        assert!(channels(&smf.tracks[1]).iter().all(|&c| c == 9));
        let lead = channels(&smf.tracks[2]);
        assert!(!lead.is_empty());
        assert!(lead.iter().all(|&c| c == 0));
    }

    #[test]
    fn melodic_channels_skip_percussion_channel() {
        let notes: Vec<NoteEvent> = (0..11u8)
            .map(|i| NoteEvent::melodic(60, 0.0, 0.5, 80, i + 20, i))
            .collect();
        let smf = timeline_to_smf(&NoteTimeline::from_notes(notes));
        let used: Vec<u8> = smf.tracks[1..]
            .iter()
            .filter_map(|track| {
                track.iter().find_map(|e| match e.kind {
                    TrackEventKind::Midi { channel, .. } => Some(channel.as_int()),
                    _ => None,
                })
            })
            .collect();
        assert_eq!(used, vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 10, 11]);
    }

    #[test]
    fn quantized_steps_become_exact_ticks() {
        let track = sample_track();
        // Second kick starts at bar 2: 16 steps * 120 ticks.
        let (on, off) = note_ticks(&track.notes[1], &track, 128.0);
        assert_eq!(on, 1920);
        assert_eq!(off, 2040);
    }

    #[test]
    fn unquantized_notes_convert_through_tempo() {
        assert_eq!(seconds_to_ticks(0.5, 120.0), 480);
        assert_eq!(seconds_to_ticks(1.875, 128.0), 1920);
        let raw = NoteTimeline::from_notes(vec![NoteEvent::melodic(60, 1.0, 1.0001, 80, 0, 0)]);
        let (on, off) = note_ticks(&raw.notes[0], &raw, DEFAULT_TEMPO_QPM);
        assert_eq!(on, 960);
        assert_eq!(off, 961);
    }

    #[test]
    fn note_off_precedes_note_on_at_same_tick() {
        let melody = NoteTimeline::from_notes(vec![
            NoteEvent::melodic(60, 0.0, 0.46875, 80, 0, 0),
            NoteEvent::melodic(60, 0.46875, 0.9375, 80, 0, 0),
        ]);
        let smf = timeline_to_smf(&assemble(&NoteTimeline::new(), &melody));
        assert_eq!(
            note_events(&smf.tracks[1]),
            vec![(0, true), (480, false), (0, true), (480, false)]
        );
    }

    /// (delta, is_on) for every note event in a track.
    fn note_events(track: &Track<'_>) -> Vec<(u32, bool)> {
        track
            .iter()
            .filter_map(|e| match e.kind {
                TrackEventKind::Midi {
                    message: MidiMessage::NoteOn { .. },
                    ..
                } => Some((e.delta.as_int(), true)),
                TrackEventKind::Midi {
                    message: MidiMessage::NoteOff { .. },
                    ..
                } => Some((e.delta.as_int(), false)),
                _ => None,
            })
            .collect()
    }

    fn time_signatures(smf: &Smf<'_>) -> Vec<u8> {
        smf.tracks[0]
            .iter()
            .filter_map(|e| match e.kind {
                TrackEventKind::Meta(MetaMessage::TimeSignature(n, ..)) => Some(n),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn overlapping_same_pitch_holds_until_last_end() {
        // A long note with a short one of the same pitch inside it.
        let melody = NoteTimeline::from_notes(vec![
            NoteEvent::melodic(60, 0.0, 0.9375, 80, 0, 0),
            NoteEvent::melodic(60, 0.234375, 0.46875, 80, 0, 0),
        ]);
        let smf = timeline_to_smf(&assemble(&NoteTimeline::new(), &melody));
        // Retrigger at step 2, release at step 8 rather than step 4.
        assert_eq!(
            note_events(&smf.tracks[1]),
            vec![(0, true), (240, false), (0, true), (720, false)]
        );
    }

    #[test]
    fn time_signature_follows_stamped_meter() {
        assert_eq!(time_signatures(&timeline_to_smf(&sample_track())), vec![4]);

        let mut waltz = sample_track();
        waltz.beats_per_bar = Some(3);
        assert_eq!(time_signatures(&timeline_to_smf(&waltz)), vec![3]);

        let unstamped = NoteTimeline::from_notes(vec![NoteEvent::melodic(60, 0.0, 0.5, 80, 0, 0)]);
        assert_eq!(time_signatures(&timeline_to_smf(&unstamped)), vec![4]);
    }

    #[test]
    fn summary_tick_count_saturates() {
        let mut smf = Smf::new(Header::new(
            Format::SingleTrack,
            Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
        ));
        // 17 maximal deltas exceed u32::MAX ticks.
        let mut track: Track<'static> = (0..17)
            .map(|_| TrackEvent {
                delta: u28::new(MAX_TICK as u32),
                kind: TrackEventKind::Midi {
                    channel: u4::new(0),
                    message: MidiMessage::NoteOff {
                        key: u7::new(60),
                        vel: u7::new(0),
                    },
                },
            })
            .collect();
        track.push(meta(0, MetaMessage::EndOfTrack));
        smf.tracks.push(track);
        let mut bytes = Vec::new();
        smf.write(&mut bytes).unwrap();

        let summary = MidiSummary::parse(&bytes).unwrap();
        assert_eq!(summary.end_tick, u32::MAX);
    }

    #[test]
    fn export_writes_parseable_file() {
        let dir = tempfile::tempdir().unwrap();
        let out_dir = dir.path().join("nested").join("out");
        let path = export_midi(&sample_track(), &out_dir, "track.mid").unwrap();
        assert_eq!(path, out_dir.join("track.mid"));

        let summary = read_midi_summary(&path).unwrap();
        assert_eq!(summary.ticks_per_quarter, TICKS_PER_QUARTER);
        assert_eq!(summary.tempos, vec![468_750]);
        assert_eq!(summary.note_ons, 5);
        assert_eq!(summary.percussion_note_ons, 3);
        // Last melody note ends at 3.75 s = 32 steps.
        assert_eq!(summary.end_tick, 32 * 120);
        assert_eq!(summary.duration_seconds(), 3.75);

        // Only the final file remains in the directory.
        let entries: Vec<_> = std::fs::read_dir(&out_dir).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn export_overwrites_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        export_midi(&sample_track(), dir.path(), "track.mid").unwrap();
        let empty = assemble(&NoteTimeline::new(), &NoteTimeline::new());
        let path = export_midi(&empty, dir.path(), "track.mid").unwrap();
        assert_eq!(read_midi_summary(&path).unwrap().note_ons, 0);
    }

    #[test]
    fn export_failure_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the output directory should be.
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, b"x").unwrap();

        let err = export_midi(&sample_track(), &blocker, "track.mid").unwrap_err();
        assert!(matches!(err, ExportError::Io { .. }));
        assert_eq!(err.path(), blocker.join("track.mid"));
    }
}
