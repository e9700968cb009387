use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use super::state_machine::{ControlHandle, RunState};
use super::track::{Advance, Repeat, Track};
use crate::audio::{InstrumentRegistry, Transition, VoiceTable};
use crate::events::{Event, EventKind, TrackId, param};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Samples per track tick. Tracks are polled once per tick.
    pub resolution: u64,
    /// Samples between tick callbacks; 0 disables the callback.
    pub tick_interval: u64,
    /// Cap on live voices. Starts beyond it are rejected.
    pub max_voices: Option<usize>,
    pub immediate_capacity: usize,
    /// Capacity of the engine's update channel.
    pub update_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            resolution: 1,
            tick_interval: 0,
            max_voices: None,
            immediate_capacity: 256,
            update_capacity: 1024,
        }
    }
}

/// Which event sources a run honours and when it ends by itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunMode {
    pub sequence: bool,
    pub immediate: bool,
    /// Stop once no track is enabled and no voice is alive.
    pub once: bool,
}

impl RunMode {
    /// Play the tracks through, then stop.
    pub const ONCE: RunMode = RunMode {
        sequence: true,
        immediate: false,
        once: true,
    };
    /// Immediate events only, until halted.
    pub const LIVE: RunMode = RunMode {
        sequence: false,
        immediate: true,
        once: false,
    };
    /// Tracks and immediate events, until halted.
    pub const PERFORM: RunMode = RunMode {
        sequence: true,
        immediate: true,
        once: false,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    EndReached,
    /// Nothing left to play in a `once` run.
    Idle,
    Halted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub start: u64,
    pub end: u64,
    pub reason: StopReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    RunStarted,
    Dispatched(EventKind),
    VoiceStarted,
    VoiceRejected,
    VoiceReleased,
    VoiceRemoved,
    TrackStarted(TrackId),
    TrackStopped(TrackId),
    TrackLooped(TrackId),
    Paused,
    Resumed,
    RunStopped(StopReason),
}

/// Informational lifecycle callback. Runs on the render thread and must not
/// block.
pub trait Observer: Send {
    fn notify(&mut self, tick: u64, what: Lifecycle, event: Option<&Event>);
}

impl<F> Observer for F
where
    F: FnMut(u64, Lifecycle, Option<&Event>) + Send,
{
    fn notify(&mut self, tick: u64, what: Lifecycle, event: Option<&Event>) {
        self(tick, what, event)
    }
}

/// Receives `Control` events.
pub trait ControlSink: Send {
    fn control(&mut self, event: &Event, registry: &mut InstrumentRegistry);
}

/// Controller numbers understood by `ChannelControls`. Values above 127 are
/// channel messages rather than MIDI continuous controllers.
pub mod controller {
    pub const BANK_SELECT: u32 = 0;
    pub const VOLUME: u32 = 7;
    pub const PAN: u32 = 10;
    pub const ALL_SOUND_OFF: u32 = 120;
    pub const ALL_NOTES_OFF: u32 = 123;
    pub const PROGRAM_CHANGE: u32 = 128;
    pub const PITCH_BEND: u32 = 129;
    pub const AFTERTOUCH: u32 = 130;
}

/// Default control sink: applies MIDI-style channel messages to the
/// registry's channel state. Volume, pan and aftertouch take 0..127 values,
/// pitch bend takes the 14-bit 0..16383 range centred on 8192.
#[derive(Debug, Default, Clone, Copy)]
pub struct ChannelControls;

impl ControlSink for ChannelControls {
    fn control(&mut self, event: &Event, registry: &mut InstrumentRegistry) {
        let Some(number) = event.params.get(param::CONTROLLER) else {
            debug!(id = event.id, "control event without controller number");
            return;
        };
        if !number.is_finite() || number < 0.0 {
            debug!(id = event.id, number, "controller number out of range");
            return;
        }
        let value = event.params.get_or(param::VALUE, 0.0);
        let ch = event.channel;

        match number as u32 {
            controller::VOLUME => registry.set_volume(ch, value / 127.0),
            controller::PAN => registry.set_pan(ch, (value - 64.0) / 63.0),
            controller::BANK_SELECT => registry.set_bank(ch, value.max(0.0) as u16),
            controller::PROGRAM_CHANGE => registry.set_patch(ch, value.max(0.0) as u16),
            controller::PITCH_BEND => registry.set_pitch_bend(ch, (value - 8192.0) / 8192.0),
            controller::AFTERTOUCH => registry.set_aftertouch(ch, value / 127.0),
            controller::ALL_SOUND_OFF | controller::ALL_NOTES_OFF => {
                debug!(channel = ch, "channel mode message has no channel state")
            }
            other => debug!(controller = other, "unhandled controller"),
        }
    }
}

/// Live events pushed from other threads. The lock is held only to push and
/// to swap the whole queue out.
#[derive(Debug, Clone, Default)]
pub struct ImmediateQueue {
    inner: Arc<Mutex<VecDeque<Event>>>,
}

impl ImmediateQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
        }
    }

    pub fn push(&self, event: Event) {
        self.inner.lock().push_back(event);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Swaps the pending events into `scratch`, which must be empty. The queue
    /// keeps the scratch buffer's allocation.
    fn swap_into(&self, scratch: &mut VecDeque<Event>) {
        let mut queue = self.inner.lock();
        if !queue.is_empty() {
            std::mem::swap(&mut *queue, scratch);
        }
    }
}

type TickCallback = Box<dyn FnMut(u64) + Send>;

/// The render loop. Owns the tracks and the voice table; everything it does
/// happens on the thread that calls `run`.
pub struct Scheduler {
    config: SchedulerConfig,
    tracks: Vec<Track>,
    voices: VoiceTable,
    immediate: ImmediateQueue,
    scratch: VecDeque<Event>,
    control: ControlHandle,
    now: u64,
    origin: u64,
    tick_callback: Option<TickCallback>,
    observer: Option<Box<dyn Observer>>,
    controls: Box<dyn ControlSink>,
    draining: Option<TrackId>,
    redrain_from: Option<TrackId>,
    /// A track was started from outside a track drain this tick.
    started_live: bool,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("tracks", &self.tracks.len())
            .field("voices", &self.voices.len())
            .field("now", &self.now)
            .field("state", &self.control.state())
            .finish()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            immediate: ImmediateQueue::with_capacity(config.immediate_capacity),
            scratch: VecDeque::with_capacity(config.immediate_capacity),
            voices: VoiceTable::with_capacity(config.max_voices.unwrap_or(64)),
            tracks: Vec::new(),
            control: ControlHandle::new(),
            now: 0,
            origin: 0,
            tick_callback: None,
            observer: None,
            controls: Box::new(ChannelControls),
            draining: None,
            redrain_from: None,
            started_live: false,
            config,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Current sample clock.
    pub fn now(&self) -> u64 {
        self.now
    }

    pub fn voices(&self) -> &VoiceTable {
        &self.voices
    }

    pub fn voices_mut(&mut self) -> &mut VoiceTable {
        &mut self.voices
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(id)
    }

    pub fn track_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.get_mut(id)
    }

    /// Returns the track with `id`, creating it and any missing lower ids.
    pub fn add_track(&mut self, id: TrackId) -> &mut Track {
        while self.tracks.len() <= id {
            let next = self.tracks.len();
            self.tracks.push(Track::new(next));
        }
        &mut self.tracks[id]
    }

    /// Places the event on the track named by `event.track`. For track
    /// control events that field names the target, so they go on track 0.
    pub fn add_event(&mut self, event: Event) {
        let host = match event.kind {
            EventKind::TrackStart | EventKind::TrackStop => 0,
            _ => event.track,
        };
        self.add_track(host).insert(event);
    }

    pub fn immediate_queue(&self) -> &ImmediateQueue {
        &self.immediate
    }

    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    pub fn state(&self) -> RunState {
        self.control.state()
    }

    pub fn pause(&self) {
        self.control.pause();
    }

    pub fn resume(&self) -> bool {
        self.control.resume()
    }

    pub fn halt(&self) {
        self.control.halt();
    }

    /// `callback` receives the number of ticks elapsed in the current run
    /// every `interval` samples.
    pub fn set_tick_callback<F>(&mut self, interval: u64, callback: F)
    where
        F: FnMut(u64) + Send + 'static,
    {
        self.config.tick_interval = interval;
        self.tick_callback = Some(Box::new(callback));
    }

    pub fn clear_tick_callback(&mut self) {
        self.tick_callback = None;
    }

    pub fn set_observer<O>(&mut self, observer: O)
    where
        O: Observer + 'static,
    {
        self.observer = Some(Box::new(observer));
    }

    pub fn set_control_sink<S>(&mut self, sink: S)
    where
        S: ControlSink + 'static,
    {
        self.controls = Box::new(sink);
    }

    fn notify(&mut self, what: Lifecycle, event: Option<&Event>) {
        if let Some(observer) = self.observer.as_mut() {
            observer.notify(self.now, what, event);
        }
    }

    /// Renders from `start_sample` until `end_sample` (0 = no end), the run
    /// goes idle in a `once` mode, or `halt` is called.
    pub fn run(
        &mut self,
        registry: &mut InstrumentRegistry,
        start_sample: u64,
        end_sample: u64,
        mode: RunMode,
    ) -> RunSummary {
        let resolution = self.config.resolution.max(1);
        self.control.begin_run();
        self.now = start_sample;
        self.origin = start_sample;
        self.started_live = false;

        if mode.sequence {
            self.start_tracks_at(start_sample, resolution);
        }
        registry.start();

        info!(start = start_sample, end = end_sample, ?mode, "run started");
        self.notify(Lifecycle::RunStarted, None);

        let mut ticks: u64 = 0;
        let reason = loop {
            if self.control.is_halt_requested() {
                break StopReason::Halted;
            }

            let boundary = (self.now - self.origin) % resolution == 0;
            if mode.sequence && boundary {
                self.drain_tracks(registry);
            }
            if mode.immediate {
                self.drain_immediate(registry, mode.sequence);
            }

            self.tick_voices(registry);
            registry.emit_frame();

            self.now += 1;
            ticks += 1;

            if mode.sequence && (self.now - self.origin) % resolution == 0 {
                self.advance_tracks();
            }

            let interval = self.config.tick_interval;
            if interval > 0 && ticks % interval == 0 {
                if let Some(callback) = self.tick_callback.as_mut() {
                    callback(ticks);
                }
            }

            if end_sample != 0 && self.now >= end_sample {
                break StopReason::EndReached;
            }
            if mode.once && self.voices.is_empty() && !self.tracks.iter().any(Track::is_enabled) {
                break StopReason::Idle;
            }

            if self.control.is_pause_requested() {
                self.notify(Lifecycle::Paused, None);
                debug!(now = self.now, "paused");
                if !self.control.wait_while_paused() {
                    break StopReason::Halted;
                }
                debug!(now = self.now, "resumed");
                self.notify(Lifecycle::Resumed, None);
            }
        };

        self.control.end_run();
        info!(ticks, now = self.now, ?reason, voices = self.voices.len(), "run stopped");
        self.notify(Lifecycle::RunStopped(reason), None);

        RunSummary {
            ticks,
            start: start_sample,
            end: self.now,
            reason,
        }
    }

    /// Enables track 0 at `start` and replays the track control events it
    /// carries before `start`, so a run can begin mid-timeline.
    fn start_tracks_at(&mut self, start: u64, resolution: u64) {
        for track in self.tracks.iter_mut() {
            track.stop();
        }
        let Some(first) = self.tracks.first_mut() else {
            return;
        };
        first.start(start, resolution);
        self.notify(Lifecycle::TrackStarted(0), None);

        if start == 0 {
            return;
        }

        // Every pass of track 0 carries the same events, so the pass before
        // the current one settles any target the current pass has not reached.
        let length = self.tracks[0].length();
        let repeat = self.tracks[0].repeat();
        let mut pass = start / length;
        if repeat != Repeat::Forever {
            pass = pass.min(u64::from(repeat.passes()) - 1);
        }
        let mut started_at: Vec<Option<u64>> = vec![None; self.tracks.len()];
        for base in (pass.saturating_sub(1)..=pass).map(|p| p * length) {
            for event in self.tracks[0].events() {
                let at = base + event.start;
                if at >= start {
                    break;
                }
                let Some(slot) = started_at.get_mut(event.track) else {
                    continue;
                };
                match event.kind {
                    EventKind::TrackStart => *slot = Some(at),
                    EventKind::TrackStop => *slot = None,
                    _ => {}
                }
            }
        }

        for (id, since) in started_at.into_iter().enumerate().skip(1) {
            if let Some(since) = since {
                self.tracks[id].start(start - since, resolution);
                debug!(track = id, offset = start - since, "track resumed mid-timeline");
                self.notify(Lifecycle::TrackStarted(id), None);
            }
        }
    }

    fn drain_tracks(&mut self, registry: &mut InstrumentRegistry) {
        let mut id = 0;
        let mut redrains = 0;
        while id < self.tracks.len() {
            if self.tracks[id].is_enabled() {
                self.draining = Some(id);
                while let Some(event) = self.tracks[id].next_due_event() {
                    self.dispatch(&event, registry);
                }
            }
            id += 1;

            // a track enabled behind us gets its first window this tick
            if let Some(lower) = self.redrain_from.take() {
                if redrains < self.tracks.len() {
                    redrains += 1;
                    id = id.min(lower);
                }
            }
        }
        self.draining = None;
    }

    fn drain_immediate(&mut self, registry: &mut InstrumentRegistry, sequence: bool) {
        self.immediate.swap_into(&mut self.scratch);
        while let Some(event) = self.scratch.pop_front() {
            self.dispatch(&event, registry);
        }
        // tracks already drained this tick have nothing left in their window
        if std::mem::take(&mut self.started_live) && sequence {
            self.drain_tracks(registry);
        }
    }

    fn tick_voices(&mut self, registry: &mut InstrumentRegistry) {
        let now = self.now;
        let observer = &mut self.observer;
        self.voices.tick(registry, |transition| {
            let Some(observer) = observer.as_mut() else {
                return;
            };
            match transition {
                Transition::Released { .. } => observer.notify(now, Lifecycle::VoiceReleased, None),
                Transition::Removed { .. } => observer.notify(now, Lifecycle::VoiceRemoved, None),
            }
        });
    }

    fn advance_tracks(&mut self) {
        for id in 0..self.tracks.len() {
            match self.tracks[id].advance() {
                Advance::Looped => {
                    trace!(track = id, "track looped");
                    self.notify(Lifecycle::TrackLooped(id), None);
                }
                Advance::Finished => {
                    debug!(track = id, "track finished");
                    self.notify(Lifecycle::TrackStopped(id), None);
                }
                Advance::Continue | Advance::Disabled => {}
            }
        }
    }

    /// Applies one event. Never fails: malformed or stale events are logged
    /// and dropped.
    pub fn dispatch(&mut self, event: &Event, registry: &mut InstrumentRegistry) {
        trace!(now = self.now, kind = ?event.kind, id = event.id, "dispatch");
        self.notify(Lifecycle::Dispatched(event.kind), Some(event));

        match event.kind {
            EventKind::Start => self.start_voice(event, registry, false),
            EventKind::Restart => {
                let replacing = self.voices.detach(event.id);
                self.start_voice(event, registry, replacing);
            }
            EventKind::Stop => {
                if self.voices.release(event.id) {
                    self.notify(Lifecycle::VoiceReleased, Some(event));
                }
            }
            EventKind::Param => {
                self.voices.apply_param(event);
            }
            EventKind::Cancel => self.voices.cancel_all(),
            EventKind::TrackStart => self.start_track(event.track),
            EventKind::TrackStop => self.stop_track(event.track),
            EventKind::Control => self.controls.control(event, registry),
        }
    }

    /// `replacing` is set when a Restart just detached a voice; the
    /// replacement takes its place under the voice limit.
    fn start_voice(&mut self, event: &Event, registry: &mut InstrumentRegistry, replacing: bool) {
        if self.voices.contains(event.id) {
            debug!(id = event.id, "voice already active, start ignored");
            return;
        }
        if let Some(limit) = self.config.max_voices {
            if !replacing && self.voices.len() >= limit {
                warn!(id = event.id, limit, "voice limit reached, start rejected");
                self.notify(Lifecycle::VoiceRejected, Some(event));
                return;
            }
        }

        let handle = registry.allocate_number(event.instrument);
        match self.voices.start(event, handle, registry.channel(event.channel)) {
            Ok(()) => self.notify(Lifecycle::VoiceStarted, Some(event)),
            Err(handle) => registry.deallocate(handle),
        }
    }

    fn start_track(&mut self, target: TrackId) {
        if self.draining == Some(target) {
            debug!(track = target, "track cannot restart itself while playing");
            return;
        }
        let resolution = self.config.resolution.max(1);
        let Some(track) = self.tracks.get_mut(target) else {
            debug!(track = target, "start for unknown track ignored");
            return;
        };
        track.start(0, resolution);
        match self.draining {
            Some(current) if target < current => {
                self.redrain_from = Some(self.redrain_from.map_or(target, |r| r.min(target)));
            }
            Some(_) => {}
            None => self.started_live = true,
        }
        debug!(track = target, now = self.now, "track started");
        self.notify(Lifecycle::TrackStarted(target), None);
    }

    fn stop_track(&mut self, target: TrackId) {
        let Some(track) = self.tracks.get_mut(target) else {
            debug!(track = target, "stop for unknown track ignored");
            return;
        };
        track.stop();
        debug!(track = target, now = self.now, "track stopped");
        self.notify(Lifecycle::TrackStopped(target), None);
    }
}
