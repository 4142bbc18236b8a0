/// colorseq - a color-painted step sequencer library
///
/// Cells of a fixed grid are painted with palette colors; playback walks the
/// grid column by column and triggers one sound per painted cell:
/// - Palette table mapping colors to tones or percussion samples
/// - Grid model with row restrictions per color
/// - Voice dispatch with attack/sustain/release envelopes
/// - Drift-free playback scheduling with synchronous cancellation
/// - Audio (cpal) and MIDI (midir) backends

pub mod audio;
pub mod config;
pub mod error;
pub mod midi;
pub mod palette;
pub mod render;
pub mod sequencer;

// Re-export commonly used types
pub use audio::{midi_to_freq, AudioBackend, NullAudio, SynthBackend, SynthOutput};
pub use config::SequencerConfig;
pub use error::{AudioError, ConfigError, SequencerError};
pub use midi::{midi_note_name, MidiOutputDevice};
pub use palette::{AllowedRows, PaletteEntry, PaletteKey, PaletteTable, Rgb, SampleRef, Sound};
pub use render::{NullRenderer, Renderer};
pub use sequencer::engine::{ColumnHighlight, EventRenderer, PlaybackEngine, PlaybackEvent};
pub use sequencer::{
    CellAssignment, Grid, RowVoice, Sequencer, StartOutcome, ToolState, TriggerCall, VoiceKind,
};
