/// Core sequencer logic - grid state, paint tool and playback
///
/// `Sequencer` is the single owner of everything that changes: the grid, the
/// paint tool and the playback state. It is driven by passing time in
/// (`start(now)`, `poll(now)`), so the same code runs under a real timer
/// thread and under tests.
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::audio::AudioBackend;
use crate::config::SequencerConfig;
use crate::error::{AudioError, ConfigError, SequencerError};
use crate::palette::{PaletteKey, PaletteTable};
use crate::render::Renderer;

pub mod dispatch;
pub mod engine;
pub mod grid;
pub mod playback;

pub use dispatch::{Envelope, EnvelopeConfig, RowVoice, TriggerCall, VoiceDispatcher, VoiceKind};
pub use grid::{CellAssignment, Grid};
pub use playback::{FiredStep, PlaybackScheduler, SchedulerState, StepHandle};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolState {
    Paint(PaletteKey),
    Erase,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
    /// Playback runs and advances columns, but the backend is unavailable.
    VisualOnly(AudioError),
}

pub struct Sequencer {
    palette: Arc<PaletteTable>,
    grid: Grid,
    tool: ToolState,
    dispatcher: VoiceDispatcher,
    scheduler: PlaybackScheduler,
    audio: Box<dyn AudioBackend>,
    renderer: Box<dyn Renderer>,
    audio_degraded: bool,
}

impl Sequencer {
    pub fn new(
        config: &SequencerConfig,
        audio: Box<dyn AudioBackend>,
        renderer: Box<dyn Renderer>,
    ) -> Result<Self, ConfigError> {
        let palette = Arc::new(config.palette_table()?);
        let step = config.step_duration();
        let first_key = palette
            .entries()
            .first()
            .map(|e| e.key.clone())
            .ok_or_else(|| ConfigError::Invalid("palette is empty".into()))?;

        Ok(Self {
            grid: Grid::new(config.rows, config.cols, Arc::clone(&palette)),
            tool: ToolState::Paint(first_key),
            dispatcher: VoiceDispatcher::new(
                Arc::clone(&palette),
                config.row_voices.clone(),
                &config.envelope,
                step,
            ),
            scheduler: PlaybackScheduler::new(config.cols, step),
            palette,
            audio,
            renderer,
            audio_degraded: false,
        })
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn palette(&self) -> &Arc<PaletteTable> {
        &self.palette
    }

    pub fn tool(&self) -> &ToolState {
        &self.tool
    }

    pub fn is_playing(&self) -> bool {
        self.scheduler.is_playing()
    }

    pub fn current_column(&self) -> Option<usize> {
        self.scheduler.current_column()
    }

    pub fn is_audio_degraded(&self) -> bool {
        self.audio_degraded
    }

    pub fn set_audio_backend(&mut self, audio: Box<dyn AudioBackend>) {
        self.audio.release_all();
        self.audio = audio;
        self.audio_degraded = false;
    }

    /// Selecting a color always leaves erase mode.
    pub fn select_color(&mut self, key: &str) -> Result<(), SequencerError> {
        let entry = self.palette.resolve(key)?;
        self.tool = ToolState::Paint(entry.key.clone());
        Ok(())
    }

    pub fn activate_eraser(&mut self) {
        self.tool = ToolState::Erase;
    }

    /// Applies the current tool to one cell. Errors leave the grid untouched
    /// and send no notification.
    pub fn apply_tool(&mut self, row: usize, col: usize) -> Result<(), SequencerError> {
        match &self.tool {
            ToolState::Paint(key) => self.grid.paint(row, col, key)?,
            ToolState::Erase => self.grid.erase(row, col)?,
        }
        self.renderer.grid_changed();
        Ok(())
    }

    pub fn clear(&mut self) {
        self.grid.clear();
        self.renderer.grid_changed();
    }

    pub fn start(&mut self, now: Instant) -> StartOutcome {
        if !self.scheduler.start(now) {
            return StartOutcome::AlreadyRunning;
        }

        match self.audio.prepare() {
            Ok(()) => {
                self.audio_degraded = false;
                StartOutcome::Started
            }
            Err(e) => {
                warn!(error = %e, "audio unavailable, playing visual-only");
                self.audio_degraded = true;
                StartOutcome::VisualOnly(e)
            }
        }
    }

    /// No step fires after this returns. Sound already triggered keeps
    /// ringing; only the highlight is cleared.
    pub fn stop(&mut self) {
        if self.scheduler.stop() {
            self.audio.release_all();
            self.renderer.column_changed(None);
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.scheduler.next_deadline()
    }

    /// Fires every step due by `now`, returning how many fired.
    pub fn poll(&mut self, now: Instant) -> usize {
        let fired = self.scheduler.due_steps(now);
        for step in &fired {
            self.fire_step(step);
        }
        self.audio.release_due(now);
        fired.len()
    }

    fn fire_step(&mut self, step: &FiredStep) {
        // Notes ending on this step boundary must be off before the column's
        // note-ons, or a repeated pitch is cut by its predecessor's note-off.
        self.audio.release_due(step.scheduled_at);

        if step.wrapped {
            debug!(index = step.index, "loop restarted");
            self.renderer.column_changed(None);
            self.renderer.loop_restarted();
        }

        if step.stale {
            debug!(index = step.index, column = step.column, "step fired late, advancing silently");
            self.renderer.column_changed(Some(step.column));
            return;
        }

        let batch = match self
            .dispatcher
            .dispatch_column(&self.grid, step.column, step.scheduled_at)
        {
            Ok(batch) => batch,
            Err(e) => {
                warn!(column = step.column, error = %e, "column dispatch failed");
                Vec::new()
            }
        };

        for call in &batch {
            if let Err(e) = self.audio.trigger(call) {
                if self.audio_degraded {
                    debug!(row = call.row(), error = %e, "trigger failed");
                } else {
                    warn!(row = call.row(), error = %e, "trigger failed, continuing visual-only");
                    self.audio_degraded = true;
                }
            }
        }

        self.renderer.column_changed(Some(step.column));
    }
}

impl Drop for Sequencer {
    fn drop(&mut self) {
        if self.scheduler.is_playing() {
            info!("sequencer dropped while playing");
            self.stop();
        }
    }
}
