mod scheduler;
mod sequence;
mod state_machine;
mod track;

pub use scheduler::{
    ChannelControls, ControlSink, ImmediateQueue, Lifecycle, Observer, RunMode, RunSummary,
    Scheduler, SchedulerConfig, StopReason, controller,
};
pub use sequence::{Note, NoteTarget, Tempo, normalize_notes, notes_to_events};
pub use state_machine::{ControlHandle, RunState};
pub use track::{Advance, Repeat, Track};
