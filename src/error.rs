use std::path::PathBuf;

use thiserror::Error;

use crate::events::InstrumentNumber;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown instrument type: {0}")]
    UnknownType(String),

    #[error("instrument type already registered: {0}")]
    DuplicateType(String),
}

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("failed to access score {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse score: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("failed to serialize score: {0}")]
    Serialize(#[from] ron::Error),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("track {track} references unknown instrument {instrument}")]
    UnknownInstrument {
        track: usize,
        instrument: InstrumentNumber,
    },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("failed to spawn render thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("render thread panicked")]
    Panicked,
}
