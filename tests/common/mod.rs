#![allow(dead_code)]

use std::sync::Arc;

use parking_lot::Mutex;
use seqcore::audio::{Frame, FrameSink, MixBus};
use seqcore::events::param;
use seqcore::timing::Lifecycle;
use seqcore::{
    ChannelState, Event, Instrument, InstrumentRegistry, InstrumentType, ParamSet, Scheduler,
    SynthContext,
};

/// Writes a rising ramp so every sample is distinguishable. RELEASE in the
/// template is the release length in samples; 0 finishes on stop.
pub struct Ramp {
    value: f32,
    channel: usize,
    release: u32,
    releasing: Option<u32>,
}

impl Instrument for Ramp {
    fn start(&mut self, event: &Event, _channel: &ChannelState) {
        self.channel = event.channel;
        self.value = 0.0;
        self.releasing = None;
    }

    fn apply_param(&mut self, _event: &Event) {}

    fn stop(&mut self) {
        if self.releasing.is_none() {
            self.releasing = Some(self.release);
        }
    }

    fn cancel(&mut self) {
        self.releasing = Some(0);
    }

    fn tick(&mut self, bus: &mut MixBus) {
        self.value += 0.001;
        bus.output(self.channel, self.value);
        if let Some(left) = self.releasing.as_mut() {
            *left = left.saturating_sub(1);
        }
    }

    fn is_finished(&self) -> bool {
        self.releasing == Some(0)
    }
}

#[derive(Default)]
pub struct RampType;

impl InstrumentType for RampType {
    fn name(&self) -> &str {
        "ramp"
    }

    fn make_instrument(&self, _ctx: &SynthContext, template: &ParamSet) -> Box<dyn Instrument> {
        Box::new(Ramp {
            value: 0.0,
            channel: 0,
            release: template.get_or(param::RELEASE, 0.0) as u32,
            releasing: None,
        })
    }
}

/// Frame sink whose contents stay readable from the test thread.
#[derive(Clone, Default)]
pub struct Capture(pub Arc<Mutex<Vec<Frame>>>);

impl Capture {
    pub fn frames(&self) -> Vec<Frame> {
        self.0.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }
}

impl FrameSink for Capture {
    fn write_frame(&mut self, frame: Frame) -> bool {
        self.0.lock().push(frame);
        true
    }
}

/// Registry with the ramp type as instrument 1. `release` is in samples.
pub fn ramp_registry(release: u32, sink: Option<Capture>) -> InstrumentRegistry {
    let ctx = SynthContext::default();
    let mut registry = match sink {
        Some(sink) => InstrumentRegistry::with_sink(ctx, Box::new(sink)),
        None => InstrumentRegistry::new(ctx),
    };
    registry.add_type(Arc::new(RampType)).unwrap();
    let template = ParamSet::new().with(param::RELEASE, release as f32);
    registry.add_config(1, "ramp", "ramp", template).unwrap();
    registry
}

/// Lifecycle notifications seen by an observer, as (tick, what, event id).
#[derive(Clone, Default)]
pub struct Recorder(pub Arc<Mutex<Vec<(u64, Lifecycle, Option<u32>)>>>);

impl Recorder {
    pub fn attach(&self, scheduler: &mut Scheduler) {
        let log = self.0.clone();
        scheduler.set_observer(move |tick: u64, what: Lifecycle, event: Option<&Event>| {
            log.lock().push((tick, what, event.map(|e| e.id)));
        });
    }

    pub fn ticks_of(&self, what: Lifecycle) -> Vec<u64> {
        self.0
            .lock()
            .iter()
            .filter(|(_, w, _)| *w == what)
            .map(|(tick, _, _)| *tick)
            .collect()
    }

    pub fn ticks_of_id(&self, what: Lifecycle, id: u32) -> Vec<u64> {
        self.0
            .lock()
            .iter()
            .filter(|(_, w, e)| *w == what && *e == Some(id))
            .map(|(tick, _, _)| *tick)
            .collect()
    }

    pub fn count(&self, what: Lifecycle) -> usize {
        self.ticks_of(what).len()
    }
}
