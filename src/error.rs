use thiserror::Error;

use crate::palette::PaletteKey;

/// Errors reported by grid, tool and palette operations.
///
/// None of these mutate state: an operation that fails leaves the grid and
/// tool exactly as they were.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SequencerError {
    #[error("cell ({row}, {col}) is outside the {rows}x{cols} grid")]
    OutOfRange {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },

    #[error("palette key {key} is not allowed on row {row}")]
    PaletteMismatch { key: PaletteKey, row: usize },

    #[error("palette key {0} not found")]
    NotFound(PaletteKey),
}

/// Errors raised by audio collaborators. Never fatal to playback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AudioError {
    #[error("no audio output device available")]
    NoDevice,

    #[error("audio stream error: {0}")]
    Stream(String),

    #[error("MIDI error: {0}")]
    Midi(String),

    #[error("unknown sample: {0}")]
    UnknownSample(String),

    #[error("MIDI output is not connected")]
    NotConnected,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] ron::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
