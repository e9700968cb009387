use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::events::{Event, TrackId};

/// How many times a track plays through before disabling itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Repeat {
    /// 0 and 1 both mean a single pass.
    Times(u32),
    Forever,
}

impl Default for Repeat {
    fn default() -> Self {
        Repeat::Times(1)
    }
}

impl Repeat {
    pub(crate) fn passes(self) -> u32 {
        match self {
            Repeat::Times(n) => n.max(1),
            Repeat::Forever => u32::MAX,
        }
    }
}

/// Result of moving a track forward by one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Continue,
    /// Reached the end and wrapped back to the first event.
    Looped,
    /// Reached the end with no passes left; the track is now disabled.
    Finished,
    Disabled,
}

impl Advance {
    pub fn is_enabled(self) -> bool {
        matches!(self, Advance::Continue | Advance::Looped)
    }
}

/// One independent timeline. Events are ordered by start time and shared
/// behind `Arc`; the track clock counts samples since the start of the
/// current pass.
#[derive(Debug, Clone)]
pub struct Track {
    id: TrackId,
    events: Vec<Arc<Event>>,
    cursor: usize,
    repeat: Repeat,
    passes_left: u32,
    enabled: bool,
    resolution: u64,
    clock: u64,
    length: u64,
}

impl Track {
    pub fn new(id: TrackId) -> Self {
        Self {
            id,
            events: Vec::new(),
            cursor: 0,
            repeat: Repeat::default(),
            passes_left: 1,
            enabled: false,
            resolution: 1,
            clock: 0,
            length: 1,
        }
    }

    pub fn with_repeat(mut self, repeat: Repeat) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn events(&self) -> &[Arc<Event>] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn repeat(&self) -> Repeat {
        self.repeat
    }

    pub fn set_repeat(&mut self, repeat: Repeat) {
        self.repeat = repeat;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn clock(&self) -> u64 {
        self.clock
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn resolution(&self) -> u64 {
        self.resolution
    }

    /// Length of one pass in samples, a whole number of ticks.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Passes left including the current one. `u32::MAX` for `Forever`.
    pub fn passes_left(&self) -> u32 {
        self.passes_left
    }

    /// Inserts after any events with the same start so ties keep insertion
    /// order.
    pub fn insert(&mut self, event: Event) {
        self.insert_shared(Arc::new(event));
    }

    pub fn insert_shared(&mut self, event: Arc<Event>) {
        let idx = self.events.partition_point(|e| e.start <= event.start);
        if idx < self.cursor {
            self.cursor += 1;
        }
        self.events.insert(idx, event);
        self.recompute_length();
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.cursor = 0;
        self.clock = 0;
        self.recompute_length();
    }

    fn recompute_length(&mut self) {
        let res = self.resolution;
        let end = self.events.iter().map(|e| e.end()).max().unwrap_or(0);
        self.length = end.div_ceil(res).max(1) * res;
    }

    /// Enables the track with its clock at `at`. Offsets past the end of a
    /// pass consume whole passes first.
    pub fn start(&mut self, at: u64, resolution: u64) {
        self.resolution = resolution.max(1);
        self.recompute_length();
        self.passes_left = self.repeat.passes();
        self.enabled = true;

        let mut at = at;
        if at >= self.length {
            let whole = at / self.length;
            if self.repeat != Repeat::Forever {
                if whole >= self.passes_left as u64 {
                    self.enabled = false;
                    self.cursor = self.events.len();
                    self.clock = 0;
                    return;
                }
                self.passes_left -= whole as u32;
            }
            at %= self.length;
        }

        self.clock = at;
        self.cursor = self.events.partition_point(|e| e.start < at);
    }

    pub fn stop(&mut self) {
        self.enabled = false;
    }

    pub fn resume(&mut self) {
        self.enabled = true;
    }

    /// Called once at the end of every tick.
    pub fn advance(&mut self) -> Advance {
        if !self.enabled {
            return Advance::Disabled;
        }

        self.clock += self.resolution;
        if self.clock < self.length {
            return Advance::Continue;
        }

        if self.repeat == Repeat::Forever || self.passes_left > 1 {
            if self.repeat != Repeat::Forever {
                self.passes_left -= 1;
            }
            self.clock -= self.length;
            self.cursor = 0;
            Advance::Looped
        } else {
            self.passes_left = 0;
            self.enabled = false;
            Advance::Finished
        }
    }

    /// The next event inside the current tick window, if any. Call repeatedly
    /// until `None` to drain the window.
    pub fn next_due_event(&mut self) -> Option<Arc<Event>> {
        if !self.enabled {
            return None;
        }
        let event = self.events.get(self.cursor)?;
        if event.start < self.clock + self.resolution {
            self.cursor += 1;
            Some(Arc::clone(event))
        } else {
            None
        }
    }
}
