use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::events::{ChannelId, CorrelationId, Event, InstrumentNumber, TrackId, param};

/// A note in musical time. Converted to sample-timed events with a `Tempo`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub pitch: u8,
    pub velocity: u8,
    pub start_beat: f32,
    pub duration_beats: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tempo {
    pub bpm: f32,
    pub sample_rate: u32,
}

impl Tempo {
    pub fn new(bpm: f32, sample_rate: u32) -> Self {
        Self { bpm, sample_rate }
    }

    pub fn samples_per_beat(&self) -> f64 {
        if self.bpm <= 0.0 {
            return 0.0;
        }
        (60.0 / self.bpm as f64) * self.sample_rate as f64
    }

    pub fn beats_to_samples(&self, beats: f32) -> u64 {
        (beats.max(0.0) as f64 * self.samples_per_beat()).round() as u64
    }
}

/// Where the generated events go.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NoteTarget {
    pub instrument: InstrumentNumber,
    pub channel: ChannelId,
    pub track: TrackId,
}

/// Merges overlapping notes of the same pitch so that no two voices for one
/// pitch sound at once. The result is ordered by start beat, then pitch.
pub fn normalize_notes(notes: &[Note]) -> Vec<Note> {
    let mut by_pitch: HashMap<u8, Vec<Note>> = HashMap::new();
    for note in notes {
        by_pitch.entry(note.pitch).or_default().push(note.clone());
    }

    let mut result = Vec::with_capacity(notes.len());

    for (_pitch, mut group) in by_pitch {
        group.sort_by(|a, b| a.start_beat.total_cmp(&b.start_beat));

        let mut iter = group.into_iter();
        let Some(mut current) = iter.next() else {
            continue;
        };

        for note in iter {
            let current_end = current.start_beat + current.duration_beats;
            let note_end = note.start_beat + note.duration_beats;

            if note.start_beat <= current_end {
                let new_end = current_end.max(note_end);
                current.duration_beats = new_end - current.start_beat;
                current.velocity = current.velocity.max(note.velocity);
            } else {
                result.push(current);
                current = note;
            }
        }

        result.push(current);
    }

    result.sort_by(|a, b| {
        a.start_beat
            .total_cmp(&b.start_beat)
            .then(a.pitch.cmp(&b.pitch))
    });
    result
}

/// Builds one timed Start event per note, carrying PITCH and VELOCITY.
/// Correlation ids are assigned sequentially from `first_id`.
pub fn notes_to_events(
    notes: &[Note],
    tempo: Tempo,
    target: NoteTarget,
    first_id: CorrelationId,
) -> Vec<Event> {
    normalize_notes(notes)
        .into_iter()
        .enumerate()
        .map(|(i, note)| {
            let start = tempo.beats_to_samples(note.start_beat);
            let end = tempo.beats_to_samples(note.start_beat + note.duration_beats);
            Event::note(
                first_id.wrapping_add(i as CorrelationId),
                target.instrument,
                start,
                end.saturating_sub(start).max(1),
            )
            .on_channel(target.channel)
            .on_track(target.track)
            .with_param(param::PITCH, note.pitch as f32)
            .with_param(param::VELOCITY, note.velocity as f32)
        })
        .collect()
}
