use std::fmt;
use std::sync::Arc;

use super::SynthContext;
use super::mixer::MixBus;
use super::registry::ChannelState;
use crate::events::{Event, EventKind, InstrumentNumber, ParamSet};

/// A live sound generator bound to one voice. Instruments only ever run on the
/// render thread.
pub trait Instrument: Send {
    /// Begin sounding. `channel` carries the controller values current at
    /// start time.
    fn start(&mut self, event: &Event, channel: &ChannelState);

    fn apply_param(&mut self, event: &Event);

    /// Begin release. Must not block.
    fn stop(&mut self);

    /// Immediate silence.
    fn cancel(&mut self) {
        self.stop();
    }

    /// Produce exactly one sample into the bus.
    fn tick(&mut self, bus: &mut MixBus);

    /// True once output after stop/cancel has fully decayed.
    fn is_finished(&self) -> bool;

    /// Re-initialise from a template. Called on instances that come back out of
    /// a pool.
    fn configure(&mut self, _template: &ParamSet) {}
}

/// Factory for one kind of instrument.
pub trait InstrumentType: Send + Sync {
    fn name(&self) -> &str;

    fn make_instrument(&self, ctx: &SynthContext, template: &ParamSet) -> Box<dyn Instrument>;

    fn make_event(&self, number: InstrumentNumber) -> Event {
        Event {
            instrument: number,
            ..Event::new(EventKind::Start, 0, 0)
        }
    }

    fn make_template(&self) -> ParamSet {
        ParamSet::new()
    }

    /// Teardown hook for instances handed back by the registry. The default
    /// frees the instance; pooling types keep it.
    fn release(&self, instrument: Box<dyn Instrument>) {
        drop(instrument);
    }
}

/// Single owner of an allocated instrument. The instrument goes back to its
/// type through `release`; dropping the handle without releasing it just
/// frees the instance.
pub struct InstrumentHandle {
    instrument: Box<dyn Instrument>,
    kind: Arc<dyn InstrumentType>,
}

impl InstrumentHandle {
    pub fn new(instrument: Box<dyn Instrument>, kind: Arc<dyn InstrumentType>) -> Self {
        Self { instrument, kind }
    }

    pub fn kind_name(&self) -> &str {
        self.kind.name()
    }

    pub fn instrument(&self) -> &dyn Instrument {
        self.instrument.as_ref()
    }

    pub fn instrument_mut(&mut self) -> &mut dyn Instrument {
        self.instrument.as_mut()
    }

    pub fn release(self) {
        let Self { instrument, kind } = self;
        kind.release(instrument);
    }
}

impl fmt::Debug for InstrumentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstrumentHandle")
            .field("kind", &self.kind.name())
            .field("finished", &self.instrument.is_finished())
            .finish()
    }
}

/// Stand-in for unresolved instrument references. Silent, and finished as soon
/// as it is stopped.
#[derive(Debug, Default)]
pub struct NullInstrument {
    stopped: bool,
}

impl Instrument for NullInstrument {
    fn start(&mut self, _event: &Event, _channel: &ChannelState) {
        self.stopped = false;
    }

    fn apply_param(&mut self, _event: &Event) {}

    fn stop(&mut self) {
        self.stopped = true;
    }

    fn tick(&mut self, _bus: &mut MixBus) {}

    fn is_finished(&self) -> bool {
        self.stopped
    }
}

#[derive(Debug, Default)]
pub struct NullType;

impl InstrumentType for NullType {
    fn name(&self) -> &str {
        "null"
    }

    fn make_instrument(&self, _ctx: &SynthContext, _template: &ParamSet) -> Box<dyn Instrument> {
        Box::new(NullInstrument::default())
    }
}
