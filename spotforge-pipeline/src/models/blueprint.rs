//! Musical blueprint: the bar-aligned composition plan
//!
//! Produced deterministically from sentence timings and the LLM's cues
//! (`services::blueprint`). Everything here is in music time: second 0 is
//! the first sample of the bed, and the voice enters at
//! `voice_entry_point = pre_roll_duration`.

use serde::{Deserialize, Serialize};
use spotforge_common::timing::TimeSignature;
use spotforge_common::{Error, Result};

/// Energy trajectory of a section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SectionDirection {
    Building,
    Sustaining,
    Resolving,
    Peak,
}

/// One bar-aligned span of the composition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub name: String,
    /// 1-indexed, inclusive
    pub start_bar: u32,
    /// 1-indexed, inclusive
    pub end_bar: u32,
    pub start_time: f64,
    pub end_time: f64,
    /// 1..=10
    pub energy: u8,
    pub direction: SectionDirection,
    pub instrumentation_notes: String,
    /// Indices into the sentence timing list covered by this section
    pub voice_sentences: Vec<usize>,
}

/// Landmark categories that earn a sync point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPointKind {
    BrandMention,
    CallToAction,
    FinalWord,
}

/// A voice landmark snapped onto the bar grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncPoint {
    pub kind: SyncPointKind,
    /// Landmark time in voice-relative seconds
    pub voice_timestamp: f64,
    /// Grid downbeat nearest the landmark, in music time
    pub nearest_downbeat: f64,
    /// 0-indexed bar of that downbeat
    pub bar: u32,
    /// Beat within the bar (1 = downbeat)
    pub beat: u32,
    /// voice time − downbeat time
    pub offset: f64,
    pub music_action: String,
}

/// Sentence-shaped ducking window in music time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DuckingPoint {
    pub start: f64,
    pub end: f64,
    /// Music gain inside the window
    pub level: f64,
}

/// Mixer-facing summary of the plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixingPlan {
    pub voice_delay_seconds: f64,
    pub music_trim_duration: f64,
    pub ducking_points: Vec<DuckingPoint>,
}

/// Complete bar-aligned plan for one production
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicalBlueprint {
    pub final_bpm: f64,
    pub time_signature: TimeSignature,
    pub bar_duration: f64,
    pub total_bars: u32,
    pub pre_roll_bars: u32,
    pub pre_roll_duration: f64,
    pub post_roll_bars: u32,
    pub post_roll_duration: f64,
    /// Seconds into the bed where the voice enters
    pub voice_entry_point: f64,
    pub sections: Vec<Section>,
    pub sync_points: Vec<SyncPoint>,
    /// Text-to-music prompt, at most 1000 characters
    pub composition_prompt: String,
    pub mixing_plan: MixingPlan,
}

impl MusicalBlueprint {
    pub fn total_duration(&self) -> f64 {
        self.total_bars as f64 * self.bar_duration
    }

    /// Structural invariants every blueprint must satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.pre_roll_bars < 1 || self.post_roll_bars < 1 {
            return Err(Error::Internal(format!(
                "blueprint rolls out of range: pre={} post={}",
                self.pre_roll_bars, self.post_roll_bars
            )));
        }
        if self.composition_prompt.chars().count() > 1000 {
            return Err(Error::Internal(
                "composition prompt exceeds 1000 characters".into(),
            ));
        }
        let mut prev_end = 0u32;
        for section in &self.sections {
            if section.end_bar < section.start_bar {
                return Err(Error::Internal(format!(
                    "section '{}' ends before it starts",
                    section.name
                )));
            }
            if section.start_bar < 1 || section.end_bar > self.total_bars {
                return Err(Error::Internal(format!(
                    "section '{}' outside [1, {}]",
                    section.name, self.total_bars
                )));
            }
            if section.start_bar <= prev_end {
                return Err(Error::Internal(format!(
                    "section '{}' overlaps its predecessor",
                    section.name
                )));
            }
            prev_end = section.end_bar;
        }
        for pair in self.sync_points.windows(2) {
            if pair[1].voice_timestamp < pair[0].voice_timestamp {
                return Err(Error::Internal("sync points out of order".into()));
            }
        }
        Ok(())
    }
}
