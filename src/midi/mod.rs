/// MIDI output using midir
///
/// Lead plays on channel 1, bass on channel 2 and percussion on channel 10
/// with General MIDI drum notes. Note-offs are queued and sent from
/// `release_due`.
use midir::{MidiOutput, MidiOutputConnection};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::audio::AudioBackend;
use crate::error::AudioError;
use crate::sequencer::{TriggerCall, VoiceKind};

const CLIENT_NAME: &str = "colorseq MIDI Output";
const VELOCITY: u8 = 100;
const DRUM_GATE: Duration = Duration::from_millis(100);

const LEAD_CHANNEL: u8 = 0;
const BASS_CHANNEL: u8 = 1;
const DRUM_CHANNEL: u8 = 9;

const GM_KICK: u8 = 36;
const GM_CLOSED_HAT: u8 = 42;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoteMessage {
    pub channel: u8,
    pub note: u8,
    pub velocity: u8,
    pub gate: Duration,
}

impl NoteMessage {
    pub fn for_trigger(call: &TriggerCall) -> Result<Self, AudioError> {
        match call {
            TriggerCall::Tone {
                voice,
                frequency_hz,
                envelope,
                ..
            } => Ok(Self {
                channel: match voice {
                    VoiceKind::Bass => BASS_CHANNEL,
                    _ => LEAD_CHANNEL,
                },
                note: freq_to_midi(*frequency_hz),
                velocity: VELOCITY,
                gate: envelope.duration(),
            }),
            TriggerCall::Percussion { sample, .. } => {
                let note = match sample.name() {
                    "kick" => GM_KICK,
                    "hat" => GM_CLOSED_HAT,
                    other => return Err(AudioError::UnknownSample(other.to_string())),
                };
                Ok(Self {
                    channel: DRUM_CHANNEL,
                    note,
                    velocity: VELOCITY,
                    gate: DRUM_GATE,
                })
            }
        }
    }
}

/// Note-offs waiting for their time, kept in send order.
#[derive(Debug, Default)]
pub struct NoteOffQueue {
    pending: Vec<(Instant, u8, u8)>,
}

impl NoteOffQueue {
    pub fn push(&mut self, at: Instant, channel: u8, note: u8) {
        let position = self.pending.partition_point(|(t, _, _)| *t <= at);
        self.pending.insert(position, (at, channel, note));
    }

    /// Removes and returns every (channel, note) due at or before `now`.
    pub fn take_due(&mut self, now: Instant) -> Vec<(u8, u8)> {
        let split = self.pending.partition_point(|(t, _, _)| *t <= now);
        self.pending
            .drain(..split)
            .map(|(_, channel, note)| (channel, note))
            .collect()
    }

    pub fn take_all(&mut self) -> Vec<(u8, u8)> {
        self.pending
            .drain(..)
            .map(|(_, channel, note)| (channel, note))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

pub struct MidiOutputDevice {
    connection: Option<MidiOutputConnection>,
    note_offs: NoteOffQueue,
}

impl MidiOutputDevice {
    pub fn new() -> Self {
        Self {
            connection: None,
            note_offs: NoteOffQueue::default(),
        }
    }

    pub fn available_ports() -> Vec<String> {
        if let Ok(midi_out) = MidiOutput::new(CLIENT_NAME) {
            midi_out
                .ports()
                .iter()
                .filter_map(|p| midi_out.port_name(p).ok())
                .collect()
        } else {
            vec![]
        }
    }

    pub fn connect(&mut self, port_index: usize) -> Result<(), AudioError> {
        let midi_out = MidiOutput::new(CLIENT_NAME)
            .map_err(|e| AudioError::Midi(format!("failed to create MIDI output: {}", e)))?;

        let ports = midi_out.ports();
        let port = ports
            .get(port_index)
            .ok_or_else(|| AudioError::Midi(format!("invalid port index {}", port_index)))?;
        let port_name = midi_out.port_name(port).unwrap_or_default();

        let connection = midi_out
            .connect(port, "colorseq")
            .map_err(|e| AudioError::Midi(format!("failed to connect: {}", e)))?;

        info!(port = %port_name, "MIDI output connected");
        self.connection = Some(connection);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn send_note_on(&mut self, channel: u8, note: u8, velocity: u8) -> Result<(), AudioError> {
        let conn = self.connection.as_mut().ok_or(AudioError::NotConnected)?;
        conn.send(&[0x90 | (channel & 0x0F), note, velocity])
            .map_err(|e| AudioError::Midi(format!("failed to send note on: {}", e)))
    }

    pub fn send_note_off(&mut self, channel: u8, note: u8) -> Result<(), AudioError> {
        let conn = self.connection.as_mut().ok_or(AudioError::NotConnected)?;
        conn.send(&[0x80 | (channel & 0x0F), note, 0])
            .map_err(|e| AudioError::Midi(format!("failed to send note off: {}", e)))
    }

    fn send_note_offs(&mut self, notes: Vec<(u8, u8)>) {
        for (channel, note) in notes {
            if let Err(e) = self.send_note_off(channel, note) {
                warn!(channel, note, error = %e, "dropping note off");
            }
        }
    }

    pub fn disconnect(&mut self) {
        let held = self.note_offs.take_all();
        self.send_note_offs(held);
        self.connection = None;
    }
}

impl Default for MidiOutputDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MidiOutputDevice {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl AudioBackend for MidiOutputDevice {
    fn prepare(&mut self) -> Result<(), AudioError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(AudioError::NotConnected)
        }
    }

    fn trigger(&mut self, call: &TriggerCall) -> Result<(), AudioError> {
        let message = NoteMessage::for_trigger(call)?;
        self.send_note_on(message.channel, message.note, message.velocity)?;
        self.note_offs
            .push(call.start() + message.gate, message.channel, message.note);
        Ok(())
    }

    fn release_due(&mut self, now: Instant) {
        let due = self.note_offs.take_due(now);
        self.send_note_offs(due);
    }

    fn release_all(&mut self) {
        let held = self.note_offs.take_all();
        self.send_note_offs(held);
    }
}

/// Nearest MIDI note for a frequency, clamped to 0..=127.
pub fn freq_to_midi(frequency_hz: f32) -> u8 {
    let note = 69.0 + 12.0 * (frequency_hz / 440.0).log2();
    note.round().clamp(0.0, 127.0) as u8
}

pub fn midi_note_name(note: u8) -> String {
    let note_names = ["C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B"];
    let octave = (note / 12) as i32 - 1;
    let note_index = (note % 12) as usize;
    format!("{}{}", note_names[note_index], octave)
}
