use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::SynthContext;
use super::instrument::{Instrument, InstrumentType};
use super::midi_to_freq;
use super::mixer::MixBus;
use super::registry::ChannelState;
use crate::events::{ChannelId, Event, EventKind, InstrumentNumber, ParamSet, param};

/// Instances kept for reuse by one `ToneType`.
const POOL_LIMIT: usize = 64;

/// Pitch bend range in semitones.
const BEND_RANGE: f32 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Wave {
    Sine,
    Square,
    Saw,
}

impl Wave {
    pub fn from_param(value: f32) -> Self {
        match value.round() as i32 {
            1 => Wave::Square,
            2 => Wave::Saw,
            _ => Wave::Sine,
        }
    }

    pub fn as_param(self) -> f32 {
        match self {
            Wave::Sine => 0.0,
            Wave::Square => 1.0,
            Wave::Saw => 2.0,
        }
    }

    fn sample(self, phase: f32) -> f32 {
        match self {
            Wave::Sine => (phase * 2.0 * std::f32::consts::PI).sin(),
            Wave::Square => {
                if phase < 0.5 {
                    -1.0
                } else {
                    1.0
                }
            }
            Wave::Saw => phase * 2.0 - 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ADSRConfig {
    /// Seconds
    pub attack: f32,
    /// Seconds
    pub decay: f32,
    /// 0.0 -> 1.0
    pub sustain: f32,
    /// Seconds
    pub release: f32,
}

impl Default for ADSRConfig {
    fn default() -> Self {
        Self {
            attack: 0.005,
            decay: 0.05,
            sustain: 0.8,
            release: 0.05,
        }
    }
}

impl ADSRConfig {
    pub fn from_params(params: &ParamSet) -> Self {
        let defaults = Self::default();
        Self {
            attack: params.get_or(param::ATTACK, defaults.attack).max(0.0),
            decay: params.get_or(param::DECAY, defaults.decay).max(0.0),
            sustain: params.get_or(param::SUSTAIN, defaults.sustain).clamp(0.0, 1.0),
            release: params.get_or(param::RELEASE, defaults.release).max(0.0),
        }
    }

    pub fn write_params(&self, params: &mut ParamSet) {
        params.set(param::ATTACK, self.attack);
        params.set(param::DECAY, self.decay);
        params.set(param::SUSTAIN, self.sustain);
        params.set(param::RELEASE, self.release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnvelopeState {
    Idle,
    Attack { time: f32 },
    Decay { time: f32 },
    Sustain,
    Release { time: f32, from: f32 },
}

#[derive(Debug, Clone, Copy)]
pub struct Envelope {
    state: EnvelopeState,
    level: f32,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            state: EnvelopeState::Idle,
            level: 0.0,
        }
    }
}

impl Envelope {
    pub fn state(&self) -> EnvelopeState {
        self.state
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn is_idle(&self) -> bool {
        self.state == EnvelopeState::Idle
    }

    pub fn trigger(&mut self) {
        self.state = EnvelopeState::Attack { time: 0.0 };
        self.level = 0.0;
    }

    /// Starts the release from whatever level the envelope is at.
    pub fn release(&mut self) {
        match self.state {
            EnvelopeState::Idle | EnvelopeState::Release { .. } => {}
            _ => {
                self.state = EnvelopeState::Release {
                    time: 0.0,
                    from: self.level,
                }
            }
        }
    }

    pub fn silence(&mut self) {
        *self = Self::default();
    }

    /// Moves the envelope forward by `dt` seconds and returns the new level.
    pub fn advance(&mut self, adsr: &ADSRConfig, dt: f32) -> f32 {
        match &mut self.state {
            EnvelopeState::Idle => self.level = 0.0,
            EnvelopeState::Attack { time } => {
                *time += dt;
                if *time >= adsr.attack {
                    self.state = EnvelopeState::Decay { time: 0.0 };
                    self.level = 1.0;
                } else {
                    self.level = *time / adsr.attack;
                }
            }
            EnvelopeState::Decay { time } => {
                *time += dt;
                if *time >= adsr.decay {
                    self.state = EnvelopeState::Sustain;
                    self.level = adsr.sustain;
                } else {
                    self.level = 1.0 - (1.0 - adsr.sustain) * (*time / adsr.decay);
                }
            }
            EnvelopeState::Sustain => self.level = adsr.sustain,
            EnvelopeState::Release { time, from } => {
                *time += dt;
                if *time >= adsr.release {
                    self.state = EnvelopeState::Idle;
                    self.level = 0.0;
                } else {
                    self.level = *from * (1.0 - *time / adsr.release);
                }
            }
        }
        self.level
    }
}

/// Single-oscillator voice with an ADSR envelope.
#[derive(Debug)]
pub struct ToneInstrument {
    dt: f32,
    wave: Wave,
    adsr: ADSRConfig,
    envelope: Envelope,
    phase: f32,
    freq: f32,
    bend: f32,
    gain: f32,
    volume: f32,
    channel: ChannelId,
}

impl ToneInstrument {
    pub fn new(ctx: &SynthContext, template: &ParamSet) -> Self {
        let mut tone = Self {
            dt: 1.0 / ctx.sample_rate.max(1) as f32,
            wave: Wave::Sine,
            adsr: ADSRConfig::default(),
            envelope: Envelope::default(),
            phase: 0.0,
            freq: 440.0,
            bend: 1.0,
            gain: 0.0,
            volume: 1.0,
            channel: 0,
        };
        tone.configure(template);
        tone
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn frequency(&self) -> f32 {
        self.freq * self.bend
    }

    fn read_pitch(&mut self, params: &ParamSet) {
        if let Some(freq) = params.get(param::FREQUENCY) {
            self.freq = freq.max(0.0);
        } else if let Some(note) = params.get(param::PITCH) {
            self.freq = midi_to_freq(note);
        }
        if let Some(velocity) = params.get(param::VELOCITY) {
            self.gain = velocity.clamp(0.0, 127.0) / 127.0;
        }
        if let Some(volume) = params.get(param::VOLUME) {
            self.volume = volume.clamp(0.0, 1.0);
        }
    }
}

impl Instrument for ToneInstrument {
    fn start(&mut self, event: &Event, channel: &ChannelState) {
        self.channel = event.channel;
        self.freq = 440.0;
        self.gain = 100.0 / 127.0;
        self.volume = 1.0;
        self.read_pitch(&event.params);
        self.bend = 2.0_f32.powf(channel.pitch_bend * BEND_RANGE / 12.0);
        self.phase = 0.0;
        self.envelope.trigger();
    }

    fn apply_param(&mut self, event: &Event) {
        self.read_pitch(&event.params);
    }

    fn stop(&mut self) {
        self.envelope.release();
    }

    fn cancel(&mut self) {
        self.envelope.silence();
    }

    fn tick(&mut self, bus: &mut MixBus) {
        if self.envelope.is_idle() {
            return;
        }

        let level = self.envelope.advance(&self.adsr, self.dt);
        let sample = self.wave.sample(self.phase) * level * self.gain * self.volume;
        bus.output(self.channel, sample);

        self.phase += self.frequency() * self.dt;
        if self.phase >= 1.0 {
            self.phase -= self.phase.floor();
        }
    }

    fn is_finished(&self) -> bool {
        self.envelope.is_idle()
    }

    fn configure(&mut self, template: &ParamSet) {
        self.wave = Wave::from_param(template.get_or(param::WAVE, 0.0));
        self.adsr = ADSRConfig::from_params(template);
        self.envelope.silence();
        self.phase = 0.0;
    }
}

/// The built-in "tone" instrument type. Released instances are kept in a
/// bounded pool and reconfigured on the next allocation.
#[derive(Default)]
pub struct ToneType {
    pool: Mutex<Vec<Box<dyn Instrument>>>,
}

impl ToneType {
    pub const NAME: &'static str = "tone";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn pooled(&self) -> usize {
        self.pool.lock().len()
    }
}

impl InstrumentType for ToneType {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn make_instrument(&self, ctx: &SynthContext, template: &ParamSet) -> Box<dyn Instrument> {
        let reused = self.pool.lock().pop();
        match reused {
            Some(mut instrument) => {
                instrument.configure(template);
                instrument
            }
            None => Box::new(ToneInstrument::new(ctx, template)),
        }
    }

    fn make_event(&self, number: InstrumentNumber) -> Event {
        Event {
            instrument: number,
            ..Event::new(EventKind::Start, 0, 0)
        }
        .with_param(param::PITCH, 69.0)
        .with_param(param::VELOCITY, 100.0)
    }

    fn make_template(&self) -> ParamSet {
        let mut template = ParamSet::new().with(param::WAVE, Wave::Sine.as_param());
        ADSRConfig::default().write_params(&mut template);
        template
    }

    fn release(&self, instrument: Box<dyn Instrument>) {
        let mut pool = self.pool.lock();
        if pool.len() < POOL_LIMIT {
            pool.push(instrument);
        }
    }
}
