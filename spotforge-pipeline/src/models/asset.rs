//! Voice and music asset records

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// One character of TTS output with its time span
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CharTiming {
    pub ch: char,
    pub start: f64,
    pub end: f64,
}

/// A sentence with its time span in the voice track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceTiming {
    pub text: String,
    pub start: f64,
    pub end: f64,
}

impl SentenceTiming {
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }
}

/// A word with its time span in the voice track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub word: String,
    pub start: f64,
    pub end: f64,
}

/// Rendered voice-over. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceAsset {
    pub id: Uuid,
    pub path: PathBuf,
    pub duration: f64,
    pub alignment: Vec<CharTiming>,
    pub sentence_timings: Vec<SentenceTiming>,
    pub word_timings: Vec<WordTiming>,
    pub target_duration: f64,
}

/// Which processing step produced a bed variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MusicVariant {
    /// As delivered by the composer
    Raw,
    Trimmed,
    Looped,
    Ducked,
    /// Button-ending cut
    Cut,
}

impl MusicVariant {
    /// Filename prefix for this variant
    pub fn as_str(&self) -> &'static str {
        match self {
            MusicVariant::Raw => "raw",
            MusicVariant::Trimmed => "trimmed",
            MusicVariant::Looped => "looped",
            MusicVariant::Ducked => "ducked",
            MusicVariant::Cut => "cut",
        }
    }
}

/// An instrumental bed variant. The pipeline holds the current one;
/// superseded variants live in the production working directory and are
/// collected with it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicAsset {
    pub id: Uuid,
    pub path: PathBuf,
    pub duration: f64,
    /// Composer target refined by the analyzer when detection succeeds
    pub bpm: f64,
    pub key: Option<String>,
    pub variant: MusicVariant,
}

impl MusicAsset {
    /// Derive the record for a new variant of this bed.
    pub fn variant_of(&self, variant: MusicVariant, path: PathBuf, duration: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            path,
            duration,
            bpm: self.bpm,
            key: self.key.clone(),
            variant,
        }
    }
}
