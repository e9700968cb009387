mod instrument;
mod mixer;
mod registry;
mod tone;
mod voice;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::RegistryError;

pub use instrument::{Instrument, InstrumentHandle, InstrumentType, NullInstrument, NullType};
pub use mixer::{Discard, Frame, FrameSink, MixBus, pan_to_gains};
pub use registry::{
    ChannelState, DEFAULT_CHANNELS, DEFAULT_FX_UNITS, InstrumentConfig, InstrumentRegistry,
};
pub use tone::{ADSRConfig, Envelope, EnvelopeState, ToneInstrument, ToneType, Wave};
pub use voice::{Transition, Voice, VoiceState, VoiceTable};

/// Values fixed for the lifetime of a registry and handed to every instrument
/// it builds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthContext {
    pub sample_rate: u32,
}

impl Default for SynthContext {
    fn default() -> Self {
        Self { sample_rate: 44100 }
    }
}

impl SynthContext {
    pub fn new(sample_rate: u32) -> Self {
        Self { sample_rate }
    }

    /// Converts seconds to a whole number of samples, rounding to nearest.
    pub fn seconds_to_samples(&self, seconds: f64) -> u64 {
        (seconds.max(0.0) * self.sample_rate as f64).round() as u64
    }
}

/// Registers the instrument types that ship with the crate.
pub fn register_builtin_types(registry: &mut InstrumentRegistry) -> Result<(), RegistryError> {
    registry.add_type(Arc::new(ToneType::new()))
}

pub fn midi_to_freq(note: f32) -> f32 {
    440.0 * 2.0_f32.powf((note - 69.0) / 12.0)
}
