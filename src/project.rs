use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::audio::{InstrumentRegistry, SynthContext};
use crate::error::ScoreError;
use crate::events::{ChannelId, Event, EventKind, InstrumentNumber, ParamSet, TrackId};
use crate::timing::{Note, NoteTarget, Repeat, Scheduler, SchedulerConfig, Tempo, notes_to_events};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentData {
    pub number: InstrumentNumber,
    pub name: String,
    /// Registered instrument type name, e.g. "tone".
    pub kind: String,
    /// Laid over the type's default template.
    #[serde(default)]
    pub template: ParamSet,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackData {
    pub id: TrackId,
    #[serde(default)]
    pub repeat: Repeat,
    /// Instrument and channel for `notes`.
    #[serde(default)]
    pub instrument: InstrumentNumber,
    #[serde(default)]
    pub channel: ChannelId,
    /// Sample-timed events.
    #[serde(default)]
    pub events: Vec<Event>,
    /// Beat-timed notes, converted at the score tempo.
    #[serde(default)]
    pub notes: Vec<Note>,
}

fn default_bpm() -> f32 {
    120.0
}

/// Everything needed to set up a registry and scheduler for one piece.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub name: String,
    #[serde(default = "default_bpm")]
    pub bpm: f32,
    #[serde(default)]
    pub context: SynthContext,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub instruments: Vec<InstrumentData>,
    #[serde(default)]
    pub tracks: Vec<TrackData>,
}

impl Score {
    pub fn load(path: &Path) -> Result<Self, ScoreError> {
        let ron_string = fs::read_to_string(path).map_err(|source| ScoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let score = Self::from_ron(&ron_string)?;
        info!(
            path = %path.display(),
            name = %score.name,
            tracks = score.tracks.len(),
            "score loaded"
        );
        Ok(score)
    }

    pub fn from_ron(source: &str) -> Result<Self, ScoreError> {
        Ok(ron::from_str(source)?)
    }

    pub fn to_ron(&self) -> Result<String, ScoreError> {
        Ok(ron::ser::to_string_pretty(
            self,
            ron::ser::PrettyConfig::default(),
        )?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ScoreError> {
        let ron_string = self.to_ron()?;
        fs::write(path, ron_string).map_err(|source| ScoreError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn tempo(&self) -> Tempo {
        Tempo::new(self.bpm, self.context.sample_rate)
    }

    pub fn build_scheduler(&self) -> Scheduler {
        Scheduler::new(self.scheduler.clone())
    }

    /// Registers the score's instruments and places its events on the
    /// scheduler's tracks. Instrument types must already be registered.
    pub fn apply(
        &self,
        registry: &mut InstrumentRegistry,
        scheduler: &mut Scheduler,
    ) -> Result<(), ScoreError> {
        let mut numbers: HashMap<InstrumentNumber, InstrumentNumber> = HashMap::new();
        for data in &self.instruments {
            let mut template = registry.make_template(&data.kind)?;
            for (id, value) in data.template.iter() {
                template.set(id, value);
            }
            let assigned = registry.add_config(data.number, &data.kind, &data.name, template)?;
            numbers.insert(data.number, assigned);
        }

        let resolve = |track: TrackId, number: InstrumentNumber| {
            numbers
                .get(&number)
                .copied()
                .ok_or(ScoreError::UnknownInstrument {
                    track,
                    instrument: number,
                })
        };

        let mut next_id = self
            .tracks
            .iter()
            .flat_map(|t| t.events.iter())
            .map(|e| e.id)
            .max()
            .map_or(1, |id| id.wrapping_add(1));

        let tempo = self.tempo();
        for data in &self.tracks {
            scheduler.add_track(data.id).set_repeat(data.repeat);

            for event in &data.events {
                let mut event = event.clone();
                match event.kind {
                    // `track` names the target; the event plays on this track's clock
                    EventKind::TrackStart | EventKind::TrackStop => {
                        scheduler.add_track(data.id).insert(event);
                        continue;
                    }
                    kind => {
                        event.track = data.id;
                        if kind.starts_voice() {
                            event.instrument = resolve(data.id, event.instrument)?;
                        }
                    }
                }
                scheduler.add_event(event);
            }

            if !data.notes.is_empty() {
                let target = NoteTarget {
                    instrument: resolve(data.id, data.instrument)?,
                    channel: data.channel,
                    track: data.id,
                };
                let events = notes_to_events(&data.notes, tempo, target, next_id);
                next_id = next_id.wrapping_add(events.len() as u32);
                for event in events {
                    scheduler.add_event(event);
                }
            }

            debug!(
                track = data.id,
                events = data.events.len(),
                notes = data.notes.len(),
                "track applied"
            );
        }

        Ok(())
    }
}
