// Standard MIDI File import and export for scores.
//
// Import (`parse_midi`, `load_midi`) is the score loader: note on/off pairs
// become exact quarter-note rationals, time-signature meta events lay out the
// measures (4/4 when none is given), notes of one track that start together
// with equal length become chords, and silent gaps inside each measure are
// filled with rests. Each track that carries notes becomes one part. A
// signature change that falls mid-measure takes effect at the next bar line.
//
// Export (`measures_to_smf`, `write_midi`) renders a measure sequence, typically
// a decoded cut, as a single-track file for listening checks.
//
// Uses the `midly` crate for parsing and writing.

use crate::error::MidiError;
use crate::score::{Beats, KeySignature, Measure, Part, Score, TimeSignature, TimedEvent};
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
    num::{u4, u7, u15, u24, u28},
};
use num_rational::Ratio;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::debug;

/// Ticks per quarter note in MIDI output.
const TICKS_PER_QUARTER: u16 = 480;

/// Velocity for every exported note.
const EXPORT_VELOCITY: u8 = 64;

/// Slowest exported tempo. A quarter note at 4 bpm lasts 15 s, the largest
/// whole-bpm value that fits the 24-bit tempo field.
pub const MIN_TEMPO_BPM: u16 = 4;

// ---------------------------------------------------------------------------
// Import
// ---------------------------------------------------------------------------

/// Read and parse a MIDI file. The score is named after the file stem.
pub fn load_midi(path: &Path) -> Result<Score, MidiError> {
    let data = std::fs::read(path)?;
    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    parse_midi(&data, &name)
}

/// A note with absolute start/end ticks.
#[derive(Debug, Clone, Copy)]
struct RawNote {
    pitch: u8,
    start: u64,
    end: u64,
}

struct RawTrack {
    name: String,
    notes: Vec<RawNote>,
}

/// Start position and meter of one measure in the layout.
#[derive(Debug, Clone, Copy)]
struct MeasureSpan {
    start: Beats,
    time_signature: TimeSignature,
}

/// Parse an in-memory Standard MIDI File into a score.
pub fn parse_midi(data: &[u8], name: &str) -> Result<Score, MidiError> {
    let smf = Smf::parse(data)?;
    let ticks_per_quarter = match smf.header.timing {
        Timing::Metrical(tpq) if tpq.as_int() > 0 => tpq.as_int() as u64,
        _ => return Err(MidiError::UnsupportedTiming),
    };

    let mut meter_changes: Vec<(u64, TimeSignature)> = Vec::new();
    let mut key_changes: Vec<(u64, KeySignature)> = Vec::new();
    let mut tracks: Vec<RawTrack> = Vec::new();

    for (index, track) in smf.tracks.iter().enumerate() {
        let mut tick: u64 = 0;
        let mut track_name: Option<String> = None;
        // (pitch, channel) -> start tick
        let mut active: HashMap<(u8, u8), u64> = HashMap::new();
        let mut notes: Vec<RawNote> = Vec::new();

        for event in track {
            tick += event.delta.as_int() as u64;
            match event.kind {
                TrackEventKind::Meta(MetaMessage::TimeSignature(numerator, power, _, _)) => {
                    if numerator > 0 && power < 8 {
                        meter_changes.push((tick, TimeSignature::new(numerator, 1 << power)));
                    }
                }
                TrackEventKind::Meta(MetaMessage::KeySignature(sharps, minor)) => {
                    key_changes.push((tick, KeySignature { sharps, minor }));
                }
                TrackEventKind::Meta(MetaMessage::TrackName(bytes)) => {
                    track_name = Some(String::from_utf8_lossy(bytes).into_owned());
                }
                TrackEventKind::Midi { channel, message } => {
                    let ch = channel.as_int();
                    match message {
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            let pitch = key.as_int();
                            // Re-strike of a sounding key ends the old note.
                            if let Some(start) = active.insert((pitch, ch), tick) {
                                notes.push(RawNote {
                                    pitch,
                                    start,
                                    end: tick,
                                });
                            }
                        }
                        MidiMessage::NoteOn { key, .. } | MidiMessage::NoteOff { key, .. } => {
                            let pitch = key.as_int();
                            if let Some(start) = active.remove(&(pitch, ch)) {
                                notes.push(RawNote {
                                    pitch,
                                    start,
                                    end: tick,
                                });
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        // Close anything still sounding at the end of the track.
        notes.extend(active.into_iter().map(|((pitch, _), start)| RawNote {
            pitch,
            start,
            end: tick,
        }));
        if !notes.is_empty() {
            notes.sort_by_key(|n| (n.start, n.pitch, n.end));
            tracks.push(RawTrack {
                name: track_name.unwrap_or_else(|| format!("Track {}", index)),
                notes,
            });
        }
    }

    meter_changes.sort_by_key(|&(tick, _)| tick);
    key_changes.sort_by_key(|&(tick, _)| tick);

    let end_tick = tracks
        .iter()
        .flat_map(|t| t.notes.iter().map(|n| n.end))
        .max()
        .unwrap_or(0);
    let to_beats = |tick: u64| Ratio::new(tick, ticks_per_quarter);
    let layout = measure_layout(&meter_changes, to_beats(end_tick), ticks_per_quarter);

    let parts: Vec<Part> = tracks
        .iter()
        .map(|track| Part {
            name: track.name.clone(),
            measures: build_measures(track, &layout, &key_changes, ticks_per_quarter),
        })
        .collect();

    debug!(
        score = name,
        parts = parts.len(),
        measures = if parts.is_empty() { 0 } else { layout.len() },
        "parsed MIDI"
    );
    Ok(Score {
        name: name.to_string(),
        parts,
    })
}

/// Lay out measures from the start of the file until `end` is covered.
/// Always yields at least one measure.
fn measure_layout(
    meter_changes: &[(u64, TimeSignature)],
    end: Beats,
    ticks_per_quarter: u64,
) -> Vec<MeasureSpan> {
    let mut spans = Vec::new();
    let mut start: Beats = Ratio::from_integer(0);
    loop {
        let time_signature = meter_changes
            .iter()
            .take_while(|&&(tick, _)| Ratio::new(tick, ticks_per_quarter) <= start)
            .last()
            .map_or(TimeSignature::COMMON, |&(_, ts)| ts);
        spans.push(MeasureSpan {
            start,
            time_signature,
        });
        start += time_signature.measure_length();
        if start >= end {
            break;
        }
    }
    spans
}

fn build_measures(
    track: &RawTrack,
    layout: &[MeasureSpan],
    key_changes: &[(u64, KeySignature)],
    ticks_per_quarter: u64,
) -> Vec<Measure> {
    // measure index -> (offset, duration) -> pitches
    let mut groups: Vec<BTreeMap<(Beats, Beats), Vec<u8>>> = vec![BTreeMap::new(); layout.len()];
    for note in &track.notes {
        let start = Ratio::new(note.start, ticks_per_quarter);
        let index = layout.partition_point(|span| span.start <= start).saturating_sub(1);
        let offset = start - layout[index].start;
        let duration = Ratio::new(note.end - note.start, ticks_per_quarter);
        groups[index].entry((offset, duration)).or_default().push(note.pitch);
    }

    layout
        .iter()
        .zip(groups)
        .enumerate()
        .map(|(index, (span, group))| {
            let mut measure = Measure::new(index as u32 + 1, span.time_signature);
            measure.key_signature = key_changes
                .iter()
                .take_while(|&&(tick, _)| Ratio::new(tick, ticks_per_quarter) <= span.start)
                .last()
                .map(|&(_, key)| key);
            measure.events = group
                .into_iter()
                .map(|((offset, duration), pitches)| {
                    TimedEvent::from_pitches(offset, duration, pitches)
                })
                .collect();
            fill_rests(&mut measure);
            measure
        })
        .collect()
}

/// Insert rests wherever nothing sounds inside the measure's nominal length.
fn fill_rests(measure: &mut Measure) {
    let length = measure.length();
    let mut cursor: Beats = Ratio::from_integer(0);
    let mut rests = Vec::new();
    for event in &measure.events {
        if event.offset > cursor {
            rests.push(TimedEvent::rest(cursor, event.offset - cursor));
        }
        cursor = cursor.max(event.end().min(length));
    }
    if cursor < length {
        rests.push(TimedEvent::rest(cursor, length - cursor));
    }
    measure.events.extend(rests);
    measure.events.sort_by_key(|e| e.offset);
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

/// Render measures to MIDI and write them to a file.
pub fn write_midi(measures: &[Measure], tempo_bpm: u16, path: &Path) -> Result<(), MidiError> {
    std::fs::write(path, to_bytes(measures, tempo_bpm)?)?;
    Ok(())
}

/// Render measures to an in-memory MIDI file.
pub fn to_bytes(measures: &[Measure], tempo_bpm: u16) -> Result<Vec<u8>, MidiError> {
    let smf = measures_to_smf(measures, tempo_bpm);
    let mut buf = Vec::new();
    smf.write_std(&mut buf)?;
    Ok(buf)
}

/// Convert measures to a single-track SMF. Measures are laid end to end by
/// their nominal lengths; notes that run past their bar keep sounding.
/// Tempos below `MIN_TEMPO_BPM` are raised to it.
pub fn measures_to_smf(measures: &[Measure], tempo_bpm: u16) -> Smf<'static> {
    let mut smf = Smf::new(Header::new(
        Format::SingleTrack,
        Timing::Metrical(u15::new(TICKS_PER_QUARTER)),
    ));

    // (tick, ordering, event). At equal ticks, meta first, then note-offs,
    // then note-ons, so a repeated pitch is released before it is re-struck.
    let mut timed: Vec<(u64, u8, TrackEventKind<'static>)> = Vec::new();
    let channel = u4::new(0);
    let mut measure_start: Beats = Ratio::from_integer(0);
    let mut current_meter: Option<TimeSignature> = None;

    for measure in measures {
        let ts = measure.time_signature;
        if current_meter != Some(ts) {
            timed.push((
                to_ticks(measure_start),
                0,
                TrackEventKind::Meta(MetaMessage::TimeSignature(
                    ts.numerator,
                    ts.denominator.trailing_zeros() as u8,
                    24,
                    8,
                )),
            ));
            current_meter = Some(ts);
        }
        for event in &measure.events {
            let on = to_ticks(measure_start + event.offset);
            let off = to_ticks(measure_start + event.end());
            if off <= on {
                continue;
            }
            for &pitch in event.pitches().iter().filter(|&&p| p <= 127) {
                timed.push((
                    off,
                    1,
                    TrackEventKind::Midi {
                        channel,
                        message: MidiMessage::NoteOff {
                            key: u7::new(pitch),
                            vel: u7::new(0),
                        },
                    },
                ));
                timed.push((
                    on,
                    2,
                    TrackEventKind::Midi {
                        channel,
                        message: MidiMessage::NoteOn {
                            key: u7::new(pitch),
                            vel: u7::new(EXPORT_VELOCITY),
                        },
                    },
                ));
            }
        }
        measure_start += measure.length();
    }
    timed.sort_by_key(|&(tick, order, _)| (tick, order));

    let mut track: Track<'static> = Vec::new();
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::TrackName(b"Piano roll")),
    });
    let tempo_microseconds = 60_000_000 / tempo_bpm.max(MIN_TEMPO_BPM) as u32;
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(tempo_microseconds))),
    });

    let mut last_tick: u64 = 0;
    for (tick, _, kind) in timed {
        track.push(TrackEvent {
            delta: u28::new((tick - last_tick) as u32),
            kind,
        });
        last_tick = tick;
    }
    track.push(TrackEvent {
        delta: u28::new(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    smf.tracks.push(track);
    smf
}

fn to_ticks(position: Beats) -> u64 {
    (position * TICKS_PER_QUARTER as u64).to_integer()
}
