/// Playback engine - drives a shared sequencer from a timer thread
///
/// The sequencer lives behind one mutex. The driver thread sleeps until the
/// next armed step (or a command), then polls under the lock; `start`, `stop`
/// and paint calls take the same lock, so a step never observes half an edit
/// and nothing fires once `stop()` has returned.
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, MutexGuard};
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;
use tracing::{debug, warn};

use super::{Sequencer, StartOutcome};
use crate::render::Renderer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    GridChanged,
    ColumnChanged(Option<usize>),
    LoopRestarted,
}

/// Renderer that forwards notifications to a channel for the UI to drain.
pub struct EventRenderer {
    sender: Sender<PlaybackEvent>,
}

impl EventRenderer {
    pub fn new() -> (Self, Receiver<PlaybackEvent>) {
        let (sender, receiver) = channel::unbounded();
        (Self { sender }, receiver)
    }
}

impl Renderer for EventRenderer {
    fn grid_changed(&mut self) {
        let _ = self.sender.send(PlaybackEvent::GridChanged);
    }

    fn column_changed(&mut self, column: Option<usize>) {
        let _ = self.sender.send(PlaybackEvent::ColumnChanged(column));
    }

    fn loop_restarted(&mut self) {
        let _ = self.sender.send(PlaybackEvent::LoopRestarted);
    }
}

/// Highlighted column as a frame-based UI sees it. Events are applied once
/// per frame; a loop restart ends the frame with the highlight cleared and
/// the rest of the events wait for the next one.
#[derive(Debug, Default)]
pub struct ColumnHighlight {
    column: Option<usize>,
    held: VecDeque<PlaybackEvent>,
}

impl ColumnHighlight {
    pub fn column(&self) -> Option<usize> {
        self.column
    }

    /// Applies this frame's events and returns the column to draw.
    pub fn advance(&mut self, events: impl IntoIterator<Item = PlaybackEvent>) -> Option<usize> {
        self.held.extend(events);
        while let Some(event) = self.held.pop_front() {
            match event {
                PlaybackEvent::ColumnChanged(column) => self.column = column,
                PlaybackEvent::LoopRestarted => {
                    self.column = None;
                    break;
                }
                PlaybackEvent::GridChanged => {}
            }
        }
        self.column
    }
}

enum DriverCommand {
    Wake,
    Shutdown,
}

pub struct PlaybackEngine {
    sequencer: Arc<Mutex<Sequencer>>,
    commands: Sender<DriverCommand>,
    events: Option<Receiver<PlaybackEvent>>,
    driver: Option<JoinHandle<()>>,
}

impl PlaybackEngine {
    /// Fails only if the driver thread cannot be spawned.
    pub fn new(sequencer: Sequencer) -> io::Result<Self> {
        let sequencer = Arc::new(Mutex::new(sequencer));
        let (commands, command_rx) = channel::unbounded();

        let shared = Arc::clone(&sequencer);
        let driver = thread::Builder::new()
            .name("colorseq-playback".into())
            .spawn(move || drive(shared, command_rx))
            .map_err(|e| {
                warn!(error = %e, "failed to spawn playback thread");
                e
            })?;

        Ok(Self {
            sequencer,
            commands,
            events: None,
            driver: Some(driver),
        })
    }

    /// Attaches the receiving end of an [`EventRenderer`] so `poll_events`
    /// can drain it.
    pub fn with_events(mut self, events: Receiver<PlaybackEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn lock(&self) -> MutexGuard<'_, Sequencer> {
        self.sequencer.lock()
    }

    pub fn start(&self) -> StartOutcome {
        let outcome = self.sequencer.lock().start(Instant::now());
        let _ = self.commands.send(DriverCommand::Wake);
        outcome
    }

    pub fn stop(&self) {
        self.sequencer.lock().stop();
        let _ = self.commands.send(DriverCommand::Wake);
    }

    pub fn is_running(&self) -> bool {
        self.sequencer.lock().is_playing()
    }

    pub fn poll_events(&self) -> Vec<PlaybackEvent> {
        match &self.events {
            Some(events) => events.try_iter().collect(),
            None => Vec::new(),
        }
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        let _ = self.commands.send(DriverCommand::Shutdown);
        if let Some(driver) = self.driver.take() {
            let _ = driver.join();
        }
    }
}

fn drive(sequencer: Arc<Mutex<Sequencer>>, commands: Receiver<DriverCommand>) {
    loop {
        let deadline = sequencer.lock().next_deadline();
        let command = match deadline {
            Some(deadline) => commands.recv_deadline(deadline),
            None => commands.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match command {
            Ok(DriverCommand::Wake) => continue,
            Ok(DriverCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {
                let fired = sequencer.lock().poll(Instant::now());
                if fired > 1 {
                    debug!(fired, "driver woke late, caught up");
                }
            }
        }
    }
    debug!("playback thread exiting");
}
