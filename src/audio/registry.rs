use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, warn};

use super::SynthContext;
use super::instrument::{InstrumentHandle, InstrumentType, NullType};
use super::mixer::{Discard, Frame, FrameSink, MixBus};
use crate::RegistryError;
use crate::events::{ChannelId, Event, InstrumentNumber, ParamSet};

pub const DEFAULT_CHANNELS: usize = 16;
pub const DEFAULT_FX_UNITS: usize = 4;

/// Performance controller values for one output channel. Retained
/// independently of any voice so new instruments start from current values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelState {
    /// 0.0 -> 1.0
    pub volume: f32,
    /// -1.0 (left) -> 1.0 (right)
    pub pan: f32,
    pub bank: u16,
    pub patch: u16,
    /// -1.0 -> 1.0
    pub pitch_bend: f32,
    /// 0.0 -> 1.0
    pub aftertouch: f32,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            volume: 1.0,
            pan: 0.0,
            bank: 0,
            patch: 0,
            pitch_bend: 0.0,
            aftertouch: 0.0,
        }
    }
}

pub struct InstrumentConfig {
    pub number: InstrumentNumber,
    pub name: String,
    pub kind: Arc<dyn InstrumentType>,
    pub template: ParamSet,
}

impl std::fmt::Debug for InstrumentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentConfig")
            .field("number", &self.number)
            .field("name", &self.name)
            .field("kind", &self.kind.name())
            .field("template", &self.template)
            .finish()
    }
}

/// Directory of instrument types and playable configurations. Brokers every
/// allocation and all audio routing so the scheduler never touches synthesis
/// internals.
pub struct InstrumentRegistry {
    ctx: SynthContext,
    types: HashMap<String, Arc<dyn InstrumentType>>,
    configs: BTreeMap<InstrumentNumber, Arc<InstrumentConfig>>,
    null_kind: Arc<dyn InstrumentType>,
    channels: Vec<ChannelState>,
    bus: MixBus,
}

impl InstrumentRegistry {
    pub fn new(ctx: SynthContext) -> Self {
        Self::with_sink(ctx, Box::new(Discard))
    }

    pub fn with_sink(ctx: SynthContext, sink: Box<dyn FrameSink>) -> Self {
        Self {
            ctx,
            types: HashMap::new(),
            configs: BTreeMap::new(),
            null_kind: Arc::new(NullType),
            channels: vec![ChannelState::default(); DEFAULT_CHANNELS],
            bus: MixBus::new(DEFAULT_CHANNELS, DEFAULT_FX_UNITS, sink),
        }
    }

    pub fn context(&self) -> &SynthContext {
        &self.ctx
    }

    pub fn add_type(&mut self, kind: Arc<dyn InstrumentType>) -> Result<(), RegistryError> {
        let name = kind.name().to_string();
        if self.types.contains_key(&name) {
            return Err(RegistryError::DuplicateType(name));
        }
        debug!(name = %name, "registered instrument type");
        self.types.insert(name, kind);
        Ok(())
    }

    pub fn instrument_type(&self, name: &str) -> Option<&Arc<dyn InstrumentType>> {
        self.types.get(name)
    }

    pub fn make_template(&self, type_name: &str) -> Result<ParamSet, RegistryError> {
        self.types
            .get(type_name)
            .map(|kind| kind.make_template())
            .ok_or_else(|| RegistryError::UnknownType(type_name.to_string()))
    }

    /// Registers a playable configuration. When `number` is already taken the
    /// next free number is used instead; the number actually assigned is
    /// returned.
    pub fn add_config(
        &mut self,
        number: InstrumentNumber,
        type_name: &str,
        name: &str,
        template: ParamSet,
    ) -> Result<InstrumentNumber, RegistryError> {
        let kind = self
            .types
            .get(type_name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownType(type_name.to_string()))?;

        let assigned = if self.configs.contains_key(&number) {
            let fresh = self.next_free_number();
            warn!(requested = number, assigned = fresh, name, "instrument number in use");
            fresh
        } else {
            number
        };

        self.configs.insert(
            assigned,
            Arc::new(InstrumentConfig {
                number: assigned,
                name: name.to_string(),
                kind,
                template,
            }),
        );
        Ok(assigned)
    }

    /// First unused number after the highest one in use, wrapping past
    /// `u32::MAX`.
    fn next_free_number(&self) -> InstrumentNumber {
        let mut number = self
            .configs
            .keys()
            .next_back()
            .map_or(0, |last| last.wrapping_add(1));
        while self.configs.contains_key(&number) {
            number = number.wrapping_add(1);
        }
        number
    }

    pub fn config(&self, number: InstrumentNumber) -> Option<&Arc<InstrumentConfig>> {
        self.configs.get(&number)
    }

    pub fn config_by_name(&self, name: &str) -> Option<&Arc<InstrumentConfig>> {
        self.configs.values().find(|c| c.name == name)
    }

    pub fn configs(&self) -> impl Iterator<Item = &Arc<InstrumentConfig>> {
        self.configs.values()
    }

    /// Allocates an instance for `config`, or a silent stand-in when there is
    /// no config.
    pub fn allocate(&self, config: Option<&InstrumentConfig>) -> InstrumentHandle {
        match config {
            Some(config) => {
                let instrument = config.kind.make_instrument(&self.ctx, &config.template);
                InstrumentHandle::new(instrument, Arc::clone(&config.kind))
            }
            None => {
                let instrument = self.null_kind.make_instrument(&self.ctx, &ParamSet::new());
                InstrumentHandle::new(instrument, Arc::clone(&self.null_kind))
            }
        }
    }

    /// Resolves an instrument number and allocates; unknown numbers get the
    /// silent stand-in.
    pub fn allocate_number(&self, number: InstrumentNumber) -> InstrumentHandle {
        let config = self.configs.get(&number);
        if config.is_none() {
            debug!(instrument = number, "unknown instrument, using null instrument");
        }
        self.allocate(config.map(|c| c.as_ref()))
    }

    pub fn deallocate(&self, handle: InstrumentHandle) {
        handle.release();
    }

    pub fn manufacture_event(&self, config: &InstrumentConfig) -> Event {
        let mut event = config.kind.make_event(config.number);
        event.instrument = config.number;
        event
    }

    pub fn bus(&self) -> &MixBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut MixBus {
        &mut self.bus
    }

    pub fn output(&mut self, channel: ChannelId, sample: f32) {
        self.bus.output(channel, sample);
    }

    pub fn output2(&mut self, channel: ChannelId, left: f32, right: f32) {
        self.bus.output2(channel, left, right);
    }

    pub fn fx_send(&mut self, unit: usize, sample: f32) {
        self.bus.fx_send(unit, sample);
    }

    /// Mixes and emits one output frame.
    pub fn emit_frame(&mut self) -> Frame {
        self.bus.emit(&self.channels)
    }

    /// Transport reset at the start of a run.
    pub fn start(&mut self) {
        self.bus.clear();
    }

    /// Transport reset at the end of a run.
    pub fn stop(&mut self) {
        self.bus.clear();
        self.bus.reset_counters();
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, channel: ChannelId) -> &ChannelState {
        self.channels.get(channel).unwrap_or(&self.channels[0])
    }

    pub fn channel_mut(&mut self, channel: ChannelId) -> Option<&mut ChannelState> {
        self.channels.get_mut(channel)
    }

    pub fn set_volume(&mut self, channel: ChannelId, volume: f32) {
        if let Some(state) = self.channels.get_mut(channel) {
            state.volume = volume.clamp(0.0, 1.0);
        }
    }

    pub fn set_pan(&mut self, channel: ChannelId, pan: f32) {
        if let Some(state) = self.channels.get_mut(channel) {
            state.pan = pan.clamp(-1.0, 1.0);
        }
    }

    pub fn set_bank(&mut self, channel: ChannelId, bank: u16) {
        if let Some(state) = self.channels.get_mut(channel) {
            state.bank = bank;
        }
    }

    pub fn set_patch(&mut self, channel: ChannelId, patch: u16) {
        if let Some(state) = self.channels.get_mut(channel) {
            state.patch = patch;
        }
    }

    pub fn set_pitch_bend(&mut self, channel: ChannelId, bend: f32) {
        if let Some(state) = self.channels.get_mut(channel) {
            state.pitch_bend = bend.clamp(-1.0, 1.0);
        }
    }

    pub fn set_aftertouch(&mut self, channel: ChannelId, value: f32) {
        if let Some(state) = self.channels.get_mut(channel) {
            state.aftertouch = value.clamp(0.0, 1.0);
        }
    }
}
