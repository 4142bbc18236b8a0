/// Palette table - maps a color key to the sound it plays
///
/// A palette is loaded once and shared read-only (`Arc<PaletteTable>`) by the
/// grid, the dispatcher and the UI. Entries may be restricted to a set of
/// rows, which is how percussion colors are kept off the pitched rows.
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::error::{ConfigError, SequencerError};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaletteKey(String);

impl PaletteKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaletteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.0)
    }
}

impl From<&str> for PaletteKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl Borrow<str> for PaletteKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Name of a percussion one-shot. Resolving it to audio is the backend's job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SampleRef(String);

impl SampleRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SampleRef {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Sound {
    Tone { frequency_hz: f32 },
    Sample(SampleRef),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllowedRows {
    Any,
    Only(BTreeSet<usize>),
}

impl AllowedRows {
    pub fn only(rows: impl IntoIterator<Item = usize>) -> Self {
        AllowedRows::Only(rows.into_iter().collect())
    }

    pub fn permits(&self, row: usize) -> bool {
        match self {
            AllowedRows::Any => true,
            AllowedRows::Only(rows) => rows.contains(&row),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaletteEntry {
    pub key: PaletteKey,
    pub sound: Sound,
    pub display_color: Rgb,
    pub allowed_rows: AllowedRows,
}

impl PaletteEntry {
    pub fn tone(key: &str, frequency_hz: f32, color: Rgb, allowed_rows: AllowedRows) -> Self {
        Self {
            key: key.into(),
            sound: Sound::Tone { frequency_hz },
            display_color: color,
            allowed_rows,
        }
    }

    pub fn sample(key: &str, sample: &str, color: Rgb, allowed_rows: AllowedRows) -> Self {
        Self {
            key: key.into(),
            sound: Sound::Sample(sample.into()),
            display_color: color,
            allowed_rows,
        }
    }

    pub fn is_percussion(&self) -> bool {
        matches!(self.sound, Sound::Sample(_))
    }
}

#[derive(Debug, Clone)]
pub struct PaletteTable {
    entries: Vec<PaletteEntry>,
    index: HashMap<PaletteKey, usize>,
}

impl PaletteTable {
    /// Builds the table, rejecting duplicate keys. Entry order is kept for
    /// display.
    pub fn new(entries: Vec<PaletteEntry>) -> Result<Self, ConfigError> {
        let mut index = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            if index.insert(entry.key.clone(), i).is_some() {
                return Err(ConfigError::Invalid(format!(
                    "duplicate palette key {}",
                    entry.key
                )));
            }
        }
        Ok(Self { entries, index })
    }

    pub fn resolve(&self, key: &str) -> Result<&PaletteEntry, SequencerError> {
        self.index
            .get(key)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| SequencerError::NotFound(key.into()))
    }

    pub fn entries(&self) -> &[PaletteEntry] {
        &self.entries
    }

    /// Tone colors, in display order.
    pub fn melodic(&self) -> impl Iterator<Item = &PaletteEntry> {
        self.entries.iter().filter(|e| !e.is_percussion())
    }

    /// Sample colors, in display order.
    pub fn percussion(&self) -> impl Iterator<Item = &PaletteEntry> {
        self.entries.iter().filter(|e| e.is_percussion())
    }
}
