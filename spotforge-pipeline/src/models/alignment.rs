//! Music analysis and alignment results

use serde::{Deserialize, Serialize};

/// Per-bar energy measured from the rendered bed
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BarEnergy {
    pub start_time: f64,
    pub end_time: f64,
    pub energy_db: f64,
}

/// Downbeat grid and energy profile of a rendered bed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicAnalysis {
    pub detected_bpm: f64,
    /// Ordered downbeat times in seconds; the authoritative grid
    pub downbeats: Vec<f64>,
    pub bars: Vec<BarEnergy>,
    pub duration: f64,
}

impl MusicAnalysis {
    /// Bar duration implied by the detected tempo grid.
    pub fn bar_duration(&self, beats_per_bar: u32) -> f64 {
        (60.0 / self.detected_bpm) * beats_per_bar as f64
    }

    /// Synthetic grid from a known BPM, used when detection fails.
    pub fn synthetic(bpm: f64, duration: f64, beats_per_bar: u32) -> Self {
        let bar = (60.0 / bpm) * beats_per_bar as f64;
        let mut downbeats = Vec::new();
        let mut t = 0.0;
        while t <= duration + 1e-9 {
            downbeats.push(t);
            t += bar;
        }
        let bars = downbeats
            .windows(2)
            .map(|w| BarEnergy {
                start_time: w[0],
                end_time: w[1],
                energy_db: 0.0,
            })
            .collect();
        Self {
            detected_bpm: bpm,
            downbeats,
            bars,
            duration,
        }
    }
}

/// A ducking window in bed time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DuckSegment {
    pub start: f64,
    pub end: f64,
    /// Music gain inside the window, clamped to [0.05, 1.0]
    pub level: f64,
}

/// The aligner's decision for one production
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignmentResult {
    /// Seconds of bed before the voice enters
    pub voice_delay: f64,
    /// Where the bed ends (button ending)
    pub music_cutoff_time: f64,
    /// 0-indexed bar of the cutoff downbeat
    pub button_ending_bar: u32,
    /// Ordered, non-overlapping, clipped to [0, music_cutoff_time]
    pub ducking_segments: Vec<DuckSegment>,
    /// Informational quality score in [0, 1]
    pub alignment_score: f64,
}
