/// Audio output - backends that turn trigger calls into sound
///
/// The sequencer only decides what to trigger and when; a backend receives the
/// trigger calls. Failures here never stop playback.
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info};

use crate::error::AudioError;
use crate::sequencer::TriggerCall;

mod voice;

use voice::ActiveVoice;

pub trait AudioBackend: Send {
    /// Called on `start()`. An error means playback continues visual-only.
    fn prepare(&mut self) -> Result<(), AudioError> {
        Ok(())
    }

    fn trigger(&mut self, call: &TriggerCall) -> Result<(), AudioError>;

    /// Ends notes whose duration has elapsed by `now`.
    fn release_due(&mut self, _now: Instant) {}

    /// Ends every note still held by the backend.
    fn release_all(&mut self) {}
}

/// Backend that plays nothing. Always ready.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAudio;

impl AudioBackend for NullAudio {
    fn trigger(&mut self, _call: &TriggerCall) -> Result<(), AudioError> {
        Ok(())
    }
}

#[derive(Debug)]
struct VoiceBank {
    voices: Vec<ActiveVoice>,
    sample_rate: f32,
}

impl VoiceBank {
    fn next_sample(&mut self) -> f32 {
        let sample_rate = self.sample_rate;
        let mut mixed = 0.0_f32;
        self.voices.retain_mut(|voice| match voice.render_sample(sample_rate) {
            Some(sample) => {
                mixed += sample;
                true
            }
            None => false,
        });
        mixed.clamp(-1.0, 1.0)
    }
}

/// Owns the cpal output stream. The stream is not `Send`, so this stays on
/// the thread that opened it; hand `backend()` to the sequencer instead.
pub struct SynthOutput {
    _stream: Option<cpal::Stream>,
    bank: Arc<Mutex<VoiceBank>>,
}

impl SynthOutput {
    pub fn new() -> Result<Self, AudioError> {
        let bank = Arc::new(Mutex::new(VoiceBank {
            voices: Vec::new(),
            sample_rate: 44_100.0,
        }));
        let stream = Self::setup_audio_stream(Arc::clone(&bank))?;

        Ok(Self {
            _stream: Some(stream),
            bank,
        })
    }

    fn setup_audio_stream(bank: Arc<Mutex<VoiceBank>>) -> Result<cpal::Stream, AudioError> {
        let host = cpal::default_host();
        let device = host.default_output_device().ok_or(AudioError::NoDevice)?;
        let config = device
            .default_output_config()
            .map_err(|e| AudioError::Stream(e.to_string()))?;

        let sample_rate = config.sample_rate().0 as f32;
        let channels = config.channels() as usize;
        bank.lock().sample_rate = sample_rate;

        let stream = match config.sample_format() {
            cpal::SampleFormat::F32 => device
                .build_output_stream(
                    &config.into(),
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        let mut bank = bank.lock();
                        for frame in data.chunks_mut(channels) {
                            let sample = bank.next_sample();
                            frame.fill(sample);
                        }
                    },
                    |err| error!("audio stream error: {}", err),
                    None,
                )
                .map_err(|e| AudioError::Stream(e.to_string()))?,
            other => {
                return Err(AudioError::Stream(format!(
                    "unsupported sample format {:?}",
                    other
                )))
            }
        };

        stream
            .play()
            .map_err(|e| AudioError::Stream(e.to_string()))?;
        info!(sample_rate, channels, "audio output opened");
        Ok(stream)
    }

    pub fn is_available(&self) -> bool {
        self._stream.is_some()
    }

    pub fn backend(&self) -> SynthBackend {
        SynthBackend {
            bank: Arc::clone(&self.bank),
            available: self.is_available(),
        }
    }
}

impl Default for SynthOutput {
    /// Silent output for hosts without a usable device.
    fn default() -> Self {
        Self::new().unwrap_or_else(|e| {
            info!(error = %e, "no audio output, continuing silent");
            Self {
                _stream: None,
                bank: Arc::new(Mutex::new(VoiceBank {
                    voices: Vec::new(),
                    sample_rate: 44_100.0,
                })),
            }
        })
    }
}

/// `Send` handle feeding voices into a [`SynthOutput`] mixer.
#[derive(Clone)]
pub struct SynthBackend {
    bank: Arc<Mutex<VoiceBank>>,
    available: bool,
}

impl AudioBackend for SynthBackend {
    fn prepare(&mut self) -> Result<(), AudioError> {
        if self.available {
            Ok(())
        } else {
            Err(AudioError::NoDevice)
        }
    }

    fn trigger(&mut self, call: &TriggerCall) -> Result<(), AudioError> {
        if !self.available {
            return Err(AudioError::NoDevice);
        }
        let delay = call.start().saturating_duration_since(Instant::now());
        let mut bank = self.bank.lock();
        let voice = ActiveVoice::from_trigger(call, delay, bank.sample_rate)?;
        bank.voices.push(voice);
        Ok(())
    }
}

pub fn midi_to_freq(note: u8) -> f32 {
    440.0 * 2.0_f32.powf((note as f32 - 69.0) / 12.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequencer::{Envelope, EnvelopeConfig, VoiceKind};
    use std::time::Duration;

    fn offline_backend() -> (SynthBackend, Arc<Mutex<VoiceBank>>) {
        let bank = Arc::new(Mutex::new(VoiceBank {
            voices: Vec::new(),
            sample_rate: 1000.0,
        }));
        let backend = SynthBackend {
            bank: Arc::clone(&bank),
            available: true,
        };
        (backend, bank)
    }

    fn lead() -> TriggerCall {
        TriggerCall::Tone {
            row: 0,
            voice: VoiceKind::Lead,
            frequency_hz: 261.63,
            start: Instant::now(),
            envelope: Envelope::fit(&EnvelopeConfig::default(), Duration::from_millis(250)),
        }
    }

    #[test]
    fn test_midi_to_freq() {
        assert_eq!(midi_to_freq(69), 440.0);
        assert!((midi_to_freq(60) - 261.63).abs() < 0.01);
    }

    #[test]
    fn test_triggered_voices_are_mixed_then_dropped() {
        let (mut backend, bank) = offline_backend();
        backend.trigger(&lead()).unwrap();
        backend.trigger(&lead()).unwrap();
        assert_eq!(bank.lock().voices.len(), 2);

        let mut bank = bank.lock();
        for _ in 0..400 {
            let sample = bank.next_sample();
            assert!((-1.0..=1.0).contains(&sample));
        }
        assert!(bank.voices.is_empty());
    }

    #[test]
    fn test_unavailable_backend_reports_no_device() {
        let (mut backend, bank) = offline_backend();
        backend.available = false;
        assert_eq!(backend.prepare(), Err(AudioError::NoDevice));
        assert_eq!(backend.trigger(&lead()), Err(AudioError::NoDevice));
        assert!(bank.lock().voices.is_empty());
    }

    #[test]
    fn test_null_audio_accepts_everything() {
        let mut audio = NullAudio;
        assert!(audio.prepare().is_ok());
        assert!(audio.trigger(&lead()).is_ok());
    }
}
