/// Playback scheduler - start/stop state machine and step timing
///
/// Step `i` is due at `origin + i * step`, computed from the origin captured
/// at `start()` and never from when step `i - 1` actually fired, so late
/// dispatches do not push later steps back. Each step is armed as its own
/// one-shot with a cancellable handle; `stop()` drops every armed step and
/// bumps the generation so handles held elsewhere go stale.
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Identifies one armed step of one playback run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StepHandle {
    generation: u64,
    index: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmedStep {
    pub handle: StepHandle,
    pub fire_at: Instant,
}

/// A step whose time has come.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiredStep {
    pub index: u64,
    pub column: usize,
    pub scheduled_at: Instant,
    /// Column 0 reached again after a full pass
    pub wrapped: bool,
    /// Fired more than one step after its time; the host stalled
    pub stale: bool,
}

#[derive(Debug)]
pub struct PlaybackState {
    origin: Instant,
    current_column: Option<usize>,
    fired: u64,
    next_to_arm: u64,
    pending: VecDeque<ArmedStep>,
}

impl PlaybackState {
    pub fn pending(&self) -> impl Iterator<Item = &ArmedStep> {
        self.pending.iter()
    }
}

#[derive(Debug)]
pub enum SchedulerState {
    Idle,
    Running(PlaybackState),
}

pub struct PlaybackScheduler {
    cols: usize,
    step: Duration,
    lookahead: usize,
    generation: u64,
    state: SchedulerState,
}

impl PlaybackScheduler {
    /// `lookahead` steps are kept armed at any time; one pass of the grid.
    pub fn new(cols: usize, step: Duration) -> Self {
        Self {
            cols,
            step,
            lookahead: cols.max(1),
            generation: 0,
            state: SchedulerState::Idle,
        }
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.state, SchedulerState::Running(_))
    }

    pub fn current_column(&self) -> Option<usize> {
        match &self.state {
            SchedulerState::Running(playback) => playback.current_column,
            SchedulerState::Idle => None,
        }
    }

    /// Absolute time of step `index` in the current run.
    pub fn fire_time(&self, index: u64) -> Option<Instant> {
        match &self.state {
            SchedulerState::Running(playback) => Some(fire_time(playback.origin, self.step, index)),
            SchedulerState::Idle => None,
        }
    }

    /// Idle -> Running with step 0 due at `now`. Returns false if already running.
    pub fn start(&mut self, now: Instant) -> bool {
        if self.is_playing() {
            debug!("start ignored, already running");
            return false;
        }

        self.generation += 1;
        let mut playback = PlaybackState {
            origin: now,
            current_column: None,
            fired: 0,
            next_to_arm: 0,
            pending: VecDeque::with_capacity(self.lookahead),
        };
        while playback.pending.len() < self.lookahead {
            arm_next(&mut playback, self.generation, self.step);
        }
        self.state = SchedulerState::Running(playback);

        info!(cols = self.cols, step_ms = self.step.as_millis() as u64, "playback started");
        true
    }

    /// Running -> Idle. Every armed step is cancelled before this returns.
    pub fn stop(&mut self) -> bool {
        match std::mem::replace(&mut self.state, SchedulerState::Idle) {
            SchedulerState::Running(playback) => {
                self.generation += 1;
                info!(
                    fired = playback.fired,
                    cancelled = playback.pending.len(),
                    "playback stopped"
                );
                true
            }
            SchedulerState::Idle => false,
        }
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match &self.state {
            SchedulerState::Running(playback) => playback.pending.front().map(|s| s.fire_at),
            SchedulerState::Idle => None,
        }
    }

    /// Fires the armed step behind `handle`. Stale or unknown handles (from a
    /// stopped run, or already fired) return `None`.
    pub fn fire(&mut self, handle: StepHandle) -> Option<FiredStep> {
        if handle.generation != self.generation {
            return None;
        }
        let cols = self.cols;
        let lookahead = self.lookahead;
        let step = self.step;
        let SchedulerState::Running(playback) = &mut self.state else {
            return None;
        };

        let position = playback.pending.iter().position(|s| s.handle == handle)?;
        let armed = playback.pending.remove(position)?;

        let column = (armed.handle.index % cols as u64) as usize;
        let wrapped = armed.handle.index > 0 && column == 0;
        playback.current_column = Some(column);
        playback.fired += 1;

        while playback.pending.len() < lookahead {
            arm_next(playback, handle.generation, step);
        }

        Some(FiredStep {
            index: armed.handle.index,
            column,
            scheduled_at: armed.fire_at,
            wrapped,
            stale: false,
        })
    }

    /// Fires every armed step due at or before `now`, oldest first. Steps
    /// more than one step interval behind `now` are marked stale.
    pub fn due_steps(&mut self, now: Instant) -> Vec<FiredStep> {
        let mut fired = Vec::new();
        while let Some(handle) = self.next_due(now) {
            match self.fire(handle) {
                Some(mut step) => {
                    step.stale = now.saturating_duration_since(step.scheduled_at) > self.step;
                    fired.push(step);
                }
                None => break,
            }
        }
        fired
    }

    fn next_due(&self, now: Instant) -> Option<StepHandle> {
        match &self.state {
            SchedulerState::Running(playback) => playback
                .pending
                .front()
                .filter(|s| s.fire_at <= now)
                .map(|s| s.handle),
            SchedulerState::Idle => None,
        }
    }
}

fn arm_next(playback: &mut PlaybackState, generation: u64, step: Duration) {
    let index = playback.next_to_arm;
    playback.pending.push_back(ArmedStep {
        handle: StepHandle { generation, index },
        fire_at: fire_time(playback.origin, step, index),
    });
    playback.next_to_arm += 1;
}

fn fire_time(origin: Instant, step: Duration, index: u64) -> Instant {
    // u32 steps of even 1ms cover ~50 days; saturate beyond that
    let index = u32::try_from(index).unwrap_or(u32::MAX);
    origin + step * index
}
