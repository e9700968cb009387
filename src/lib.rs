pub mod audio;
pub mod engine;
pub mod error;
pub mod events;
pub mod project;
pub mod timing;

pub use audio::{
    ChannelState, Instrument, InstrumentConfig, InstrumentHandle, InstrumentRegistry,
    InstrumentType, MixBus, SynthContext, ToneType, VoiceState, VoiceTable,
    register_builtin_types,
};
pub use engine::{EngineHandle, EngineUpdate, spawn_engine};
pub use error::{EngineError, RegistryError, ScoreError};
pub use events::{Event, EventKind, ParamSet, param};
pub use project::Score;
pub use timing::{
    ControlHandle, Lifecycle, Repeat, RunMode, RunState, RunSummary, Scheduler, SchedulerConfig,
    StopReason,
};
