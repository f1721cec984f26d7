//! Audio toolchain interface
//!
//! One trait covering every audio capability the pipeline consumes,
//! implemented by the ffmpeg child-process adapter for production and by an
//! in-memory fake for orchestration tests. Implementations are idempotent
//! at the filesystem level (outputs are overwritten) and fail atomically:
//! no partial files survive an error.

pub mod ffmpeg;
pub mod memory;

pub use ffmpeg::FfmpegProcessor;
pub use memory::MemoryProcessor;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use spotforge_common::{FadeCurve, Result};
use std::path::{Path, PathBuf};

use crate::models::OutputFormat;

/// One gain window for `apply_volume_curve`; unity gain outside all windows
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeSegment {
    pub start: f64,
    pub end: f64,
    pub multiplier: f64,
}

/// Voice input to `mix`
#[derive(Debug, Clone)]
pub struct VoiceInput {
    pub path: PathBuf,
    /// Seconds of silence before the voice enters
    pub delay: f64,
    pub volume: f64,
    /// Clamped to [0.02, 0.15] by the caller
    pub fade_in: f64,
    /// Clamped to [0.5, 3.0] by the caller
    pub fade_out: f64,
    pub fade_curve: FadeCurve,
}

/// Music input to `mix`
#[derive(Debug, Clone)]
pub struct MusicInput {
    pub path: PathBuf,
    pub volume: f64,
}

/// Options for the final mix
#[derive(Debug, Clone)]
pub struct MixOptions {
    pub voice: Option<VoiceInput>,
    pub music: Option<MusicInput>,
    /// Sidechain-style attenuation keyed on voice presence; off when the
    /// caller already baked a duck curve into the bed
    pub audio_ducking: bool,
    pub ducking_amount: f64,
    pub normalize_loudness: bool,
    pub loudness_target_lufs: f64,
    pub loudness_true_peak: f64,
    /// Fade out and cut so the final length never exceeds this
    pub max_duration: Option<f64>,
    pub output_format: OutputFormat,
}

/// EQ / compression / limiter chain selection for `master`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MasteringPreset {
    Balanced,
    VoiceEnhanced,
    MusicEnhanced,
}

/// Loudness normalization target for `master`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoudnessPreset {
    /// Broadcast delivery, -24 LUFS integrated
    Broadcast,
    /// Streaming / podcast platforms, -16 LUFS integrated
    CrossPlatform,
}

impl LoudnessPreset {
    pub fn target_lufs(&self) -> f64 {
        match self {
            LoudnessPreset::Broadcast => -24.0,
            LoudnessPreset::CrossPlatform => -16.0,
        }
    }
}

/// The audio toolchain capability surface.
pub trait AudioProcessor: Send + Sync {
    /// Duration of an audio file in seconds.
    fn get_duration<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<f64>>;

    /// Write `output` cut to exactly `duration` seconds (±10 ms).
    fn trim<'a>(
        &'a self,
        input: &'a Path,
        duration: f64,
        output: &'a Path,
    ) -> BoxFuture<'a, Result<()>>;

    /// Loop-extend to `duration` seconds, crossfading each join by 50 ms.
    fn extend_by_loop<'a>(
        &'a self,
        input: &'a Path,
        duration: f64,
        output: &'a Path,
    ) -> BoxFuture<'a, Result<()>>;

    /// Speed-only time scaling to `duration`; ratios outside [0.85, 1.25]
    /// are refused with `ScalingRefused`.
    fn stretch_to_duration<'a>(
        &'a self,
        input: &'a Path,
        duration: f64,
        output: &'a Path,
    ) -> BoxFuture<'a, Result<()>>;

    /// Piecewise-constant gain with 20 ms fades across segment boundaries.
    fn apply_volume_curve<'a>(
        &'a self,
        input: &'a Path,
        segments: &'a [VolumeSegment],
        total_duration: f64,
        output: &'a Path,
    ) -> BoxFuture<'a, Result<()>>;

    /// Integrated LUFS of a file.
    fn measure_loudness<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<f64>>;

    /// Combine voice and music per `MixOptions`.
    fn mix<'a>(&'a self, options: &'a MixOptions, output: &'a Path)
        -> BoxFuture<'a, Result<()>>;

    /// Mastering chain plus normalization to the loudness preset.
    fn master<'a>(
        &'a self,
        input: &'a Path,
        preset: MasteringPreset,
        loudness: LoudnessPreset,
        output: &'a Path,
    ) -> BoxFuture<'a, Result<()>>;
}
