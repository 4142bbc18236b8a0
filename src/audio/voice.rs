use std::time::Duration;

use crate::error::AudioError;
use crate::sequencer::{Envelope, TriggerCall, VoiceKind};

const KICK_DECAY_SECS: f32 = 0.3;
const HAT_DECAY_SECS: f32 = 0.05;
const VOICE_GAIN: f32 = 0.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Waveform {
    Sine,
    Triangle,
}

#[derive(Debug, Clone, PartialEq)]
enum Source {
    Tone {
        waveform: Waveform,
        frequency_hz: f32,
        envelope: Envelope,
    },
    Kick,
    Hat {
        noise: u32,
    },
}

/// One sounding trigger in the mixer.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveVoice {
    source: Source,
    delay: u32,
    elapsed: u32,
    phase: f32,
}

impl ActiveVoice {
    /// Builds a voice that starts after `delay`. Lead plays a sine, bass a
    /// triangle; percussion uses the built-in "kick" and "hat" one-shots.
    pub fn from_trigger(call: &TriggerCall, delay: Duration, sample_rate: f32) -> Result<Self, AudioError> {
        let source = match call {
            TriggerCall::Tone {
                voice,
                frequency_hz,
                envelope,
                ..
            } => Source::Tone {
                waveform: match voice {
                    VoiceKind::Bass => Waveform::Triangle,
                    _ => Waveform::Sine,
                },
                frequency_hz: *frequency_hz,
                envelope: *envelope,
            },
            TriggerCall::Percussion { sample, .. } => match sample.name() {
                "kick" => Source::Kick,
                "hat" => Source::Hat { noise: 0x9E37_79B9 },
                other => return Err(AudioError::UnknownSample(other.to_string())),
            },
        };

        Ok(Self {
            source,
            delay: (delay.as_secs_f64() * sample_rate as f64).round() as u32,
            elapsed: 0,
            phase: 0.0,
        })
    }

    /// Next output sample, or `None` once the voice has finished.
    pub fn render_sample(&mut self, sample_rate: f32) -> Option<f32> {
        if self.delay > 0 {
            self.delay -= 1;
            return Some(0.0);
        }

        let t = self.elapsed as f32 / sample_rate;
        self.elapsed += 1;

        let sample = match &mut self.source {
            Source::Tone {
                waveform,
                frequency_hz,
                envelope,
            } => {
                if t >= envelope.duration().as_secs_f32() {
                    return None;
                }
                let level = envelope.level_at(Duration::from_secs_f32(t));
                let value = match waveform {
                    Waveform::Sine => (self.phase * 2.0 * std::f32::consts::PI).sin(),
                    Waveform::Triangle => 1.0 - 4.0 * (self.phase - 0.5).abs(),
                };
                self.phase += *frequency_hz / sample_rate;
                if self.phase >= 1.0 {
                    self.phase -= 1.0;
                }
                value * level
            }
            Source::Kick => {
                if t >= KICK_DECAY_SECS {
                    return None;
                }
                // pitch falls from 150Hz toward 50Hz
                let frequency = 50.0 + 100.0 * (-t * 20.0).exp();
                let value = (self.phase * 2.0 * std::f32::consts::PI).sin();
                self.phase += frequency / sample_rate;
                if self.phase >= 1.0 {
                    self.phase -= 1.0;
                }
                value * (1.0 - t / KICK_DECAY_SECS)
            }
            Source::Hat { noise } => {
                if t >= HAT_DECAY_SECS {
                    return None;
                }
                *noise ^= *noise << 13;
                *noise ^= *noise >> 17;
                *noise ^= *noise << 5;
                let value = (*noise as f32 / u32::MAX as f32) * 2.0 - 1.0;
                value * (1.0 - t / HAT_DECAY_SECS)
            }
        };

        Some(sample * VOICE_GAIN)
    }
}
