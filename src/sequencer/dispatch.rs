/// Voice dispatch - turns a column snapshot into trigger calls
///
/// Pure given a snapshot: no I/O, no clock reads. A cell that cannot be
/// resolved to a sound is skipped so the rest of the column still plays.
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use super::grid::{CellAssignment, Grid};
use crate::error::SequencerError;
use crate::palette::{PaletteTable, SampleRef, Sound};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoiceKind {
    Lead,
    Bass,
    Percussion,
}

/// One entry of the row -> voice table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowVoice {
    pub kind: VoiceKind,
    /// Semitones applied to tone colors on this row
    #[serde(default)]
    pub transpose: i8,
    /// Played when a tone color lands on a percussion row
    #[serde(default)]
    pub default_sample: Option<SampleRef>,
}

impl RowVoice {
    pub fn lead() -> Self {
        Self {
            kind: VoiceKind::Lead,
            transpose: 0,
            default_sample: None,
        }
    }

    pub fn bass() -> Self {
        Self {
            kind: VoiceKind::Bass,
            transpose: -24,
            default_sample: None,
        }
    }

    pub fn percussion() -> Self {
        Self {
            kind: VoiceKind::Percussion,
            transpose: 0,
            default_sample: None,
        }
    }

    pub fn with_transpose(mut self, semitones: i8) -> Self {
        self.transpose = semitones;
        self
    }

    pub fn with_default_sample(mut self, sample: &str) -> Self {
        self.default_sample = Some(sample.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeConfig {
    pub attack_ms: u64,
    pub release_ms: u64,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            attack_ms: 100,
            release_ms: 200,
        }
    }
}

/// Linear attack / sustain plateau / linear release, sized to one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    pub attack: Duration,
    pub sustain: Duration,
    pub release: Duration,
}

impl Envelope {
    /// Fits the configured attack and release into `step`. When they do not
    /// fit, both are scaled down proportionally and the plateau is dropped.
    pub fn fit(config: &EnvelopeConfig, step: Duration) -> Self {
        let attack = Duration::from_millis(config.attack_ms);
        let release = Duration::from_millis(config.release_ms);
        let edges = attack + release;

        if edges.is_zero() {
            return Self {
                attack,
                sustain: step,
                release,
            };
        }

        if edges <= step {
            Self {
                attack,
                sustain: step - edges,
                release,
            }
        } else {
            let ratio = attack.as_secs_f64() / edges.as_secs_f64();
            let attack = step.mul_f64(ratio);
            Self {
                attack,
                sustain: Duration::ZERO,
                release: step - attack,
            }
        }
    }

    pub fn duration(&self) -> Duration {
        self.attack + self.sustain + self.release
    }

    /// Amplitude in 0.0..=1.0 at `elapsed` since the note started.
    pub fn level_at(&self, elapsed: Duration) -> f32 {
        if elapsed < self.attack {
            return (elapsed.as_secs_f32() / self.attack.as_secs_f32()).min(1.0);
        }
        let held = self.attack + self.sustain;
        if elapsed < held {
            return 1.0;
        }
        if elapsed < self.duration() {
            let into_release = (elapsed - held).as_secs_f32();
            return 1.0 - into_release / self.release.as_secs_f32();
        }
        0.0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TriggerCall {
    Tone {
        row: usize,
        voice: VoiceKind,
        frequency_hz: f32,
        start: Instant,
        envelope: Envelope,
    },
    /// Fire-and-forget; the backend decides how long it rings.
    Percussion {
        row: usize,
        sample: SampleRef,
        start: Instant,
    },
}

impl TriggerCall {
    pub fn row(&self) -> usize {
        match self {
            TriggerCall::Tone { row, .. } | TriggerCall::Percussion { row, .. } => *row,
        }
    }

    pub fn voice(&self) -> VoiceKind {
        match self {
            TriggerCall::Tone { voice, .. } => *voice,
            TriggerCall::Percussion { .. } => VoiceKind::Percussion,
        }
    }

    pub fn start(&self) -> Instant {
        match self {
            TriggerCall::Tone { start, .. } | TriggerCall::Percussion { start, .. } => *start,
        }
    }

    pub fn duration(&self) -> Option<Duration> {
        match self {
            TriggerCall::Tone { envelope, .. } => Some(envelope.duration()),
            TriggerCall::Percussion { .. } => None,
        }
    }
}

pub struct VoiceDispatcher {
    palette: Arc<PaletteTable>,
    voices: Vec<RowVoice>,
    envelope: Envelope,
}

impl VoiceDispatcher {
    pub fn new(
        palette: Arc<PaletteTable>,
        voices: Vec<RowVoice>,
        envelope: &EnvelopeConfig,
        step: Duration,
    ) -> Self {
        Self {
            palette,
            voices,
            envelope: Envelope::fit(envelope, step),
        }
    }

    pub fn dispatch_column(
        &self,
        grid: &Grid,
        col: usize,
        at: Instant,
    ) -> Result<Vec<TriggerCall>, SequencerError> {
        let snapshot = grid.column_snapshot(col)?;
        Ok(self.dispatch_snapshot(&snapshot, at))
    }

    /// One trigger per playable cell, in ascending row order.
    pub fn dispatch_snapshot(&self, snapshot: &[(usize, CellAssignment)], at: Instant) -> Vec<TriggerCall> {
        let mut batch: Vec<TriggerCall> = snapshot
            .iter()
            .filter_map(|(row, cell)| self.resolve_cell(*row, cell, at))
            .collect();
        batch.sort_by_key(TriggerCall::row);
        batch
    }

    fn resolve_cell(&self, row: usize, cell: &CellAssignment, at: Instant) -> Option<TriggerCall> {
        let entry = match self.palette.resolve(cell.palette_key.as_str()) {
            Ok(entry) => entry,
            Err(e) => {
                debug!(row, error = %e, "skipping cell");
                return None;
            }
        };
        let Some(voice) = self.voices.get(row) else {
            debug!(row, "no voice configured for row, skipping cell");
            return None;
        };

        match (voice.kind, &entry.sound) {
            (VoiceKind::Percussion, Sound::Sample(sample)) => Some(TriggerCall::Percussion {
                row,
                sample: sample.clone(),
                start: at,
            }),
            (VoiceKind::Percussion, Sound::Tone { .. }) => {
                voice
                    .default_sample
                    .clone()
                    .map(|sample| TriggerCall::Percussion {
                        row,
                        sample,
                        start: at,
                    })
            }
            (kind, Sound::Tone { frequency_hz }) => Some(TriggerCall::Tone {
                row,
                voice: kind,
                frequency_hz: transpose(*frequency_hz, voice.transpose),
                start: at,
                envelope: self.envelope,
            }),
            (_, Sound::Sample(sample)) => {
                debug!(row, sample = sample.name(), "sample color on a pitched row, skipping cell");
                None
            }
        }
    }
}

fn transpose(frequency_hz: f32, semitones: i8) -> f32 {
    if semitones == 0 {
        frequency_hz
    } else {
        frequency_hz * 2.0_f32.powf(semitones as f32 / 12.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::palette::{AllowedRows, PaletteEntry, PaletteKey, Rgb};

    fn palette() -> Arc<PaletteTable> {
        Arc::new(
            PaletteTable::new(vec![
                PaletteEntry::tone("Red", 261.63, Rgb(255, 0, 0), AllowedRows::Any),
                PaletteEntry::sample("White", "hat", Rgb(255, 255, 255), AllowedRows::Any),
            ])
            .unwrap(),
        )
    }

    fn dispatcher(voices: Vec<RowVoice>) -> VoiceDispatcher {
        VoiceDispatcher::new(
            palette(),
            voices,
            &EnvelopeConfig::default(),
            Duration::from_millis(600),
        )
    }

    fn cell(row: usize, key: &str) -> (usize, CellAssignment) {
        (
            row,
            CellAssignment {
                palette_key: PaletteKey::from(key),
                row,
            },
        )
    }

    fn canonical_voices() -> Vec<RowVoice> {
        vec![RowVoice::lead(), RowVoice::bass(), RowVoice::percussion()]
    }

    #[test]
    fn test_lead_tone() {
        let at = Instant::now();
        let batch = dispatcher(canonical_voices()).dispatch_snapshot(&[cell(0, "Red")], at);
        assert_eq!(batch.len(), 1);
        match &batch[0] {
            TriggerCall::Tone {
                voice,
                frequency_hz,
                start,
                ..
            } => {
                assert_eq!(*voice, VoiceKind::Lead);
                assert_eq!(*frequency_hz, 261.63);
                assert_eq!(*start, at);
            }
            other => panic!("expected tone, got {:?}", other),
        }
    }

    #[test]
    fn test_bass_is_transposed_down() {
        let batch =
            dispatcher(canonical_voices()).dispatch_snapshot(&[cell(1, "Red")], Instant::now());
        assert_eq!(batch[0].voice(), VoiceKind::Bass);
        match &batch[0] {
            TriggerCall::Tone { frequency_hz, .. } => {
                assert!((frequency_hz - 261.63 / 4.0).abs() < 0.01)
            }
            other => panic!("expected tone, got {:?}", other),
        }
    }

    #[test]
    fn test_percussion_has_no_envelope() {
        let batch =
            dispatcher(canonical_voices()).dispatch_snapshot(&[cell(2, "White")], Instant::now());
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].voice(), VoiceKind::Percussion);
        assert_eq!(batch[0].duration(), None);
    }

    #[test]
    fn test_missing_key_skipped_without_aborting_column() {
        let batch = dispatcher(canonical_voices()).dispatch_snapshot(
            &[cell(0, "Mauve"), cell(1, "Red"), cell(2, "White")],
            Instant::now(),
        );
        let rows: Vec<usize> = batch.iter().map(TriggerCall::row).collect();
        assert_eq!(rows, vec![1, 2]);
    }

    #[test]
    fn test_tone_on_percussion_row_uses_default_sample() {
        let voices = vec![
            RowVoice::lead(),
            RowVoice::bass(),
            RowVoice::percussion().with_default_sample("kick"),
        ];
        let batch = dispatcher(voices).dispatch_snapshot(&[cell(2, "Red")], Instant::now());
        assert_eq!(
            batch[0],
            TriggerCall::Percussion {
                row: 2,
                sample: "kick".into(),
                start: batch[0].start(),
            }
        );

        let batch =
            dispatcher(canonical_voices()).dispatch_snapshot(&[cell(2, "Red")], Instant::now());
        assert!(batch.is_empty());
    }

    #[test]
    fn test_sample_on_pitched_row_skipped() {
        let batch =
            dispatcher(canonical_voices()).dispatch_snapshot(&[cell(0, "White")], Instant::now());
        assert!(batch.is_empty());
    }

    #[test]
    fn test_four_pitched_rows() {
        let voices = vec![
            RowVoice::lead().with_transpose(12),
            RowVoice::lead(),
            RowVoice::bass().with_transpose(-12),
            RowVoice::bass(),
        ];
        let snapshot: Vec<_> = (0..4).map(|row| cell(row, "Red")).collect();
        let batch = dispatcher(voices).dispatch_snapshot(&snapshot, Instant::now());
        assert_eq!(batch.len(), 4);
        assert!(batch.iter().all(|call| call.duration().is_some()));
    }

    #[test]
    fn test_envelope_fits_long_step() {
        let env = Envelope::fit(&EnvelopeConfig::default(), Duration::from_millis(600));
        assert_eq!(env.attack, Duration::from_millis(100));
        assert_eq!(env.sustain, Duration::from_millis(300));
        assert_eq!(env.release, Duration::from_millis(200));
        assert_eq!(env.duration(), Duration::from_millis(600));
    }

    #[test]
    fn test_envelope_scaled_into_short_step() {
        let env = Envelope::fit(&EnvelopeConfig::default(), Duration::from_millis(150));
        assert_eq!(env.sustain, Duration::ZERO);
        assert_eq!(env.duration(), Duration::from_millis(150));
        assert!(env.attack < env.release);
    }

    #[test]
    fn test_envelope_levels() {
        let env = Envelope::fit(&EnvelopeConfig::default(), Duration::from_millis(600));
        assert_eq!(env.level_at(Duration::ZERO), 0.0);
        assert!((env.level_at(Duration::from_millis(50)) - 0.5).abs() < 1e-3);
        assert_eq!(env.level_at(Duration::from_millis(300)), 1.0);
        assert!((env.level_at(Duration::from_millis(500)) - 0.5).abs() < 1e-3);
        assert_eq!(env.level_at(Duration::from_millis(600)), 0.0);
    }
}
