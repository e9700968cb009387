use tracing::debug;

use super::instrument::InstrumentHandle;
use super::registry::{ChannelState, InstrumentRegistry};
use crate::events::{ChannelId, CorrelationId, Event, TrackId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Off,
    On,
    Releasing,
}

/// Automatic lifecycle changes made while ticking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Duration ran out.
    Released {
        id: Option<CorrelationId>,
    },
    /// Instrument finished and went back to the registry.
    Removed {
        id: Option<CorrelationId>,
    },
}

#[derive(Debug)]
pub struct Voice {
    instrument: InstrumentHandle,
    state: VoiceState,
    remaining: u64,
    timed: bool,
    /// None once a restart has taken the id over.
    id: Option<CorrelationId>,
    channel: ChannelId,
    track: TrackId,
}

impl Voice {
    pub fn state(&self) -> VoiceState {
        self.state
    }

    pub fn id(&self) -> Option<CorrelationId> {
        self.id
    }

    pub fn channel(&self) -> ChannelId {
        self.channel
    }

    pub fn track(&self) -> TrackId {
        self.track
    }

    /// Samples left before an automatic release. Meaningless for untimed
    /// voices.
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    pub fn instrument(&self) -> &InstrumentHandle {
        &self.instrument
    }

    fn release(&mut self) {
        if self.state == VoiceState::On {
            self.instrument.instrument_mut().stop();
            self.state = VoiceState::Releasing;
        }
    }
}

/// The currently sounding voices. Owned by the render thread; every lifecycle
/// change goes through one of these methods.
#[derive(Debug, Default)]
pub struct VoiceTable {
    voices: Vec<Voice>,
}

impl VoiceTable {
    pub fn new() -> Self {
        Self { voices: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            voices: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn contains(&self, id: CorrelationId) -> bool {
        self.find(id).is_some()
    }

    pub fn state(&self, id: CorrelationId) -> Option<VoiceState> {
        self.find(id).map(|idx| self.voices[idx].state)
    }

    pub fn get(&self, id: CorrelationId) -> Option<&Voice> {
        self.find(id).map(|idx| &self.voices[idx])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Voice> {
        self.voices.iter()
    }

    fn find(&self, id: CorrelationId) -> Option<usize> {
        self.voices.iter().position(|v| v.id == Some(id))
    }

    /// Starts `instrument` for `event` and adds the voice in state `On`.
    /// A live voice with the same id wins: the new instrument is handed back
    /// untouched so the caller can deallocate it.
    pub fn start(
        &mut self,
        event: &Event,
        mut instrument: InstrumentHandle,
        channel: &ChannelState,
    ) -> Result<(), InstrumentHandle> {
        if self.contains(event.id) {
            debug!(id = event.id, "voice already active, start ignored");
            return Err(instrument);
        }

        instrument.instrument_mut().start(event, channel);
        self.voices.push(Voice {
            instrument,
            state: VoiceState::On,
            remaining: if event.timed { event.duration } else { 0 },
            timed: event.timed,
            id: Some(event.id),
            channel: event.channel,
            track: event.track,
        });
        Ok(())
    }

    pub fn apply_param(&mut self, event: &Event) -> bool {
        match self.find(event.id) {
            Some(idx) => {
                self.voices[idx].instrument.instrument_mut().apply_param(event);
                true
            }
            None => {
                debug!(id = event.id, "param for inactive voice ignored");
                false
            }
        }
    }

    /// Moves the voice to `Releasing`. Returns false when there is no voice
    /// with that id; releasing twice is harmless.
    pub fn release(&mut self, id: CorrelationId) -> bool {
        match self.find(id) {
            Some(idx) => {
                self.voices[idx].release();
                true
            }
            None => {
                debug!(id, "stop for inactive voice ignored");
                false
            }
        }
    }

    /// Releases the voice and frees its id for a new voice. The detached voice
    /// keeps sounding until its instrument finishes.
    pub fn detach(&mut self, id: CorrelationId) -> bool {
        match self.find(id) {
            Some(idx) => {
                let voice = &mut self.voices[idx];
                voice.release();
                voice.id = None;
                true
            }
            None => false,
        }
    }

    /// All notes off, immediately.
    pub fn cancel_all(&mut self) {
        for voice in self.voices.iter_mut() {
            voice.instrument.instrument_mut().cancel();
            voice.state = VoiceState::Releasing;
        }
    }

    /// Renders one sample of every voice into the registry's bus and retires
    /// finished voices. Returns the number still alive.
    pub fn tick<F>(&mut self, registry: &mut InstrumentRegistry, mut notify: F) -> usize
    where
        F: FnMut(Transition),
    {
        let mut idx = 0;
        while idx < self.voices.len() {
            let voice = &mut self.voices[idx];

            if voice.timed && voice.state == VoiceState::On {
                voice.remaining = voice.remaining.saturating_sub(1);
                if voice.remaining == 0 {
                    voice.release();
                    notify(Transition::Released { id: voice.id });
                }
            }

            voice.instrument.instrument_mut().tick(registry.bus_mut());

            if voice.state == VoiceState::Releasing && voice.instrument.instrument().is_finished() {
                let voice = self.voices.remove(idx);
                notify(Transition::Removed { id: voice.id });
                registry.deallocate(voice.instrument);
            } else {
                idx += 1;
            }
        }
        self.voices.len()
    }

    /// Hands every instrument back to the registry without waiting for it to
    /// finish.
    pub fn clear(&mut self, registry: &InstrumentRegistry) {
        for voice in self.voices.drain(..) {
            registry.deallocate(voice.instrument);
        }
    }
}
