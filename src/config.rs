/// Sequencer configuration
///
/// Grid dimensions, tempo, the row -> voice table and the palette. Loaded once
/// at startup from a built-in preset or a RON file and validated before any
/// sequencer is built from it.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::audio::midi_to_freq;
use crate::error::ConfigError;
use crate::palette::{AllowedRows, PaletteEntry, PaletteTable, Rgb};
use crate::sequencer::{EnvelopeConfig, RowVoice};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequencerConfig {
    pub rows: usize,
    pub cols: usize,
    pub step_duration_ms: u64,
    pub row_voices: Vec<RowVoice>,
    pub palette: Vec<PaletteEntry>,
    #[serde(default)]
    pub envelope: EnvelopeConfig,
}

impl SequencerConfig {
    /// 3x8 grid at 600ms per column. Ten melodic colors on the lead and bass
    /// rows; white and black are the only colors the drum row accepts.
    pub fn canonical() -> Self {
        let melodic = AllowedRows::only([0, 1]);
        let colors: [(&str, u8, Rgb); 10] = [
            ("Red", 60, Rgb(255, 0, 0)),
            ("Orange-pink", 67, Rgb(255, 153, 102)),
            ("Yellow", 62, Rgb(255, 255, 0)),
            ("Green", 69, Rgb(0, 255, 0)),
            ("Whitish-blue", 64, Rgb(224, 255, 255)),
            ("Blue, bright", 66, Rgb(0, 0, 255)),
            ("Violet", 61, Rgb(238, 130, 238)),
            ("Purplish-violet", 68, Rgb(75, 0, 130)),
            ("Steel color with metallic sheen", 65, Rgb(70, 130, 180)),
            ("Red, dark", 63, Rgb(139, 0, 0)),
        ];

        let mut palette: Vec<PaletteEntry> = colors
            .iter()
            .map(|(key, note, color)| {
                PaletteEntry::tone(key, midi_to_freq(*note), *color, melodic.clone())
            })
            .collect();
        palette.push(PaletteEntry::sample(
            "White",
            "hat",
            Rgb(255, 255, 255),
            AllowedRows::only([2]),
        ));
        palette.push(PaletteEntry::sample(
            "Black",
            "kick",
            Rgb(1, 1, 1),
            AllowedRows::only([2]),
        ));

        Self {
            rows: 3,
            cols: 8,
            step_duration_ms: 600,
            row_voices: vec![RowVoice::lead(), RowVoice::bass(), RowVoice::percussion()],
            palette,
            envelope: EnvelopeConfig::default(),
        }
    }

    /// 3x16 grid at 250ms per column with seven plain colors C4..B4 usable on
    /// any row. A plain color on the drum row plays the kick.
    pub fn classic() -> Self {
        Self {
            rows: 3,
            cols: 16,
            step_duration_ms: 250,
            row_voices: vec![
                RowVoice::lead(),
                RowVoice::bass(),
                RowVoice::percussion().with_default_sample("kick"),
            ],
            palette: Self::plain_colors(AllowedRows::Any)
                .into_iter()
                .chain(std::iter::once(PaletteEntry::sample(
                    "White",
                    "hat",
                    Rgb(255, 255, 255),
                    AllowedRows::only([2]),
                )))
                .collect(),
            envelope: EnvelopeConfig::default(),
        }
    }

    /// 4x16 grid, every row pitched, no percussion row.
    pub fn four_row() -> Self {
        Self {
            rows: 4,
            cols: 16,
            step_duration_ms: 250,
            row_voices: vec![
                RowVoice::lead().with_transpose(12),
                RowVoice::lead(),
                RowVoice::bass().with_transpose(-12),
                RowVoice::bass(),
            ],
            palette: Self::plain_colors(AllowedRows::Any),
            envelope: EnvelopeConfig::default(),
        }
    }

    fn plain_colors(allowed_rows: AllowedRows) -> Vec<PaletteEntry> {
        [
            ("#FF0000", 261.63, Rgb(255, 0, 0)),
            ("#FFA500", 293.66, Rgb(255, 165, 0)),
            ("#FFFF00", 329.63, Rgb(255, 255, 0)),
            ("#00FF00", 349.23, Rgb(0, 255, 0)),
            ("#00FFFF", 392.00, Rgb(0, 255, 255)),
            ("#0000FF", 440.00, Rgb(0, 0, 255)),
            ("#FF00FF", 493.88, Rgb(255, 0, 255)),
        ]
        .iter()
        .map(|(key, hz, color)| PaletteEntry::tone(key, *hz, *color, allowed_rows.clone()))
        .collect()
    }

    pub fn step_duration(&self) -> Duration {
        Duration::from_millis(self.step_duration_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rows == 0 || self.cols == 0 {
            return Err(ConfigError::Invalid(format!(
                "grid must have at least one row and column, got {}x{}",
                self.rows, self.cols
            )));
        }
        if self.step_duration_ms == 0 {
            return Err(ConfigError::Invalid("step duration must be positive".into()));
        }
        if self.row_voices.len() != self.rows {
            return Err(ConfigError::Invalid(format!(
                "{} row voices configured for {} rows",
                self.row_voices.len(),
                self.rows
            )));
        }
        if self.palette.is_empty() {
            return Err(ConfigError::Invalid("palette is empty".into()));
        }
        for entry in &self.palette {
            if let AllowedRows::Only(rows) = &entry.allowed_rows {
                if let Some(row) = rows.iter().find(|&&row| row >= self.rows) {
                    return Err(ConfigError::Invalid(format!(
                        "palette key {} allows row {} outside the grid",
                        entry.key, row
                    )));
                }
            }
        }
        Ok(())
    }

    /// Validates and builds the shared palette table.
    pub fn palette_table(&self) -> Result<PaletteTable, ConfigError> {
        self.validate()?;
        PaletteTable::new(self.palette.clone())
    }

    pub fn from_ron_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = fs::read_to_string(path)?;
        Self::from_ron_str(&source)
    }

    pub fn to_ron_string(&self) -> Result<String, ConfigError> {
        Ok(ron::ser::to_string_pretty(
            self,
            ron::ser::PrettyConfig::default(),
        )?)
    }
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self::canonical()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::palette::Sound;

    #[test]
    fn test_presets_validate() {
        for config in [
            SequencerConfig::canonical(),
            SequencerConfig::classic(),
            SequencerConfig::four_row(),
        ] {
            config.validate().unwrap();
            config.palette_table().unwrap();
        }
    }

    #[test]
    fn test_canonical_red_is_middle_c() {
        let table = SequencerConfig::canonical().palette_table().unwrap();
        match table.resolve("Red").unwrap().sound {
            Sound::Tone { frequency_hz } => assert!((frequency_hz - 261.63).abs() < 0.01),
            ref other => panic!("expected tone, got {:?}", other),
        }
        assert!(!table.resolve("Black").unwrap().allowed_rows.permits(0));
    }

    #[test]
    fn test_voice_table_must_match_rows() {
        let mut config = SequencerConfig::canonical();
        config.row_voices.pop();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_allowed_rows_must_exist() {
        let mut config = SequencerConfig::four_row();
        config.palette.push(PaletteEntry::sample(
            "White",
            "hat",
            Rgb(255, 255, 255),
            AllowedRows::only([4]),
        ));
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_sizes_rejected() {
        let mut config = SequencerConfig::canonical();
        config.cols = 0;
        assert!(config.validate().is_err());

        let mut config = SequencerConfig::canonical();
        config.step_duration_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ron_config_parses() {
        let source = r#"(
            rows: 2,
            cols: 4,
            step_duration_ms: 500,
            row_voices: [
                (kind: Lead),
                (kind: Percussion, default_sample: Some("kick")),
            ],
            palette: [
                (
                    key: "Red",
                    sound: Tone(frequency_hz: 261.63),
                    display_color: (255, 0, 0),
                    allowed_rows: Only([0]),
                ),
                (
                    key: "White",
                    sound: Sample("hat"),
                    display_color: (255, 255, 255),
                    allowed_rows: Any,
                ),
            ],
        )"#;
        let config = SequencerConfig::from_ron_str(source).unwrap();
        assert_eq!(config.rows, 2);
        assert_eq!(config.step_duration(), Duration::from_millis(500));
        assert_eq!(config.envelope, EnvelopeConfig::default());
        assert_eq!(config.row_voices[1].default_sample, Some("kick".into()));
    }

    #[test]
    fn test_bundled_preset_loads() {
        let config = SequencerConfig::from_ron_str(include_str!("../presets/pentatonic.ron")).unwrap();
        assert_eq!((config.rows, config.cols), (3, 16));
        assert_eq!(config.envelope.attack_ms, 50);
        assert_eq!(config.palette_table().unwrap().percussion().count(), 2);
    }

    #[test]
    fn test_invalid_ron_rejected() {
        assert!(matches!(
            SequencerConfig::from_ron_str("(rows: 3"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_preset_survives_ron() {
        let config = SequencerConfig::classic();
        let text = config.to_ron_string().unwrap();
        assert_eq!(SequencerConfig::from_ron_str(&text).unwrap(), config);
    }
}
