use serde::{Deserialize, Serialize};

pub type CorrelationId = u32;
pub type TrackId = usize;
pub type ChannelId = usize;
pub type InstrumentNumber = u32;
pub type ParamId = u16;

/// Well-known parameter ids shared by the scheduler, the score loader and the
/// built-in instruments. Instrument types are free to use any other id.
pub mod param {
    use super::ParamId;

    pub const CONTROLLER: ParamId = 0;
    pub const VALUE: ParamId = 1;

    /// MIDI note number
    pub const PITCH: ParamId = 16;
    /// 0 -> 127
    pub const VELOCITY: ParamId = 17;
    /// Hz, overrides PITCH when present
    pub const FREQUENCY: ParamId = 18;
    /// 0.0 -> 1.0
    pub const VOLUME: ParamId = 19;

    pub const WAVE: ParamId = 32;
    /// Seconds
    pub const ATTACK: ParamId = 33;
    /// Seconds
    pub const DECAY: ParamId = 34;
    /// 0.0 -> 1.0
    pub const SUSTAIN: ParamId = 35;
    /// Seconds
    pub const RELEASE: ParamId = 36;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Start,
    Stop,
    Param,
    Restart,
    TrackStart,
    TrackStop,
    Control,
    Cancel,
}

impl EventKind {
    /// Kinds that bring a new voice into existence.
    pub fn starts_voice(self) -> bool {
        matches!(self, EventKind::Start | EventKind::Restart)
    }
}

/// Small id -> value map. Kept as a flat vector: events carry a handful of
/// parameters and lookups are linear scans.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamSet(Vec<(ParamId, f32)>);

impl ParamSet {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn with(mut self, id: ParamId, value: f32) -> Self {
        self.set(id, value);
        self
    }

    pub fn get(&self, id: ParamId) -> Option<f32> {
        self.0.iter().find(|(k, _)| *k == id).map(|(_, v)| *v)
    }

    pub fn get_or(&self, id: ParamId, default: f32) -> f32 {
        self.get(id).unwrap_or(default)
    }

    pub fn set(&mut self, id: ParamId, value: f32) {
        match self.0.iter_mut().find(|(k, _)| *k == id) {
            Some(entry) => entry.1 = value,
            None => self.0.push((id, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParamId, f32)> + '_ {
        self.0.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One timeline action. Events are shared behind `Arc` once they are placed
/// on a track, and never mutated after that.
///
/// For `TrackStart` / `TrackStop` the `track` field names the track being
/// started or stopped rather than the track holding the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    #[serde(default)]
    pub instrument: InstrumentNumber,
    #[serde(default)]
    pub channel: ChannelId,
    #[serde(default)]
    pub track: TrackId,
    #[serde(default)]
    pub id: CorrelationId,
    #[serde(default)]
    pub start: u64,
    #[serde(default)]
    pub duration: u64,
    /// Duration counts down and releases the voice. Untimed voices are held
    /// until an explicit stop.
    #[serde(default)]
    pub timed: bool,
    #[serde(default)]
    pub params: ParamSet,
}

impl Event {
    pub fn new(kind: EventKind, id: CorrelationId, start: u64) -> Self {
        Self {
            kind,
            instrument: 0,
            channel: 0,
            track: 0,
            id,
            start,
            duration: 0,
            timed: false,
            params: ParamSet::new(),
        }
    }

    /// A timed note: starts at `start` and releases itself after `duration`
    /// samples.
    pub fn note(
        id: CorrelationId,
        instrument: InstrumentNumber,
        start: u64,
        duration: u64,
    ) -> Self {
        Self {
            instrument,
            duration,
            timed: true,
            ..Self::new(EventKind::Start, id, start)
        }
    }

    /// A held note for live input: sounds until a matching `stop`.
    pub fn held(id: CorrelationId, instrument: InstrumentNumber) -> Self {
        Self {
            instrument,
            ..Self::new(EventKind::Start, id, 0)
        }
    }

    pub fn stop(id: CorrelationId, start: u64) -> Self {
        Self::new(EventKind::Stop, id, start)
    }

    pub fn track_start(target: TrackId, start: u64) -> Self {
        Self {
            track: target,
            ..Self::new(EventKind::TrackStart, 0, start)
        }
    }

    pub fn track_stop(target: TrackId, start: u64) -> Self {
        Self {
            track: target,
            ..Self::new(EventKind::TrackStop, 0, start)
        }
    }

    pub fn on_track(mut self, track: TrackId) -> Self {
        self.track = track;
        self
    }

    pub fn on_channel(mut self, channel: ChannelId) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_param(mut self, id: ParamId, value: f32) -> Self {
        self.params.set(id, value);
        self
    }

    /// Sample at which the event stops occupying its track. A zero-length
    /// event still occupies the sample it starts on.
    pub fn end(&self) -> u64 {
        self.start + self.duration.max(1)
    }
}
