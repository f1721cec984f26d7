//! In-memory audio processor
//!
//! A pure fake for driving the orchestration without touching real audio.
//! Durations are size-coded: every "audio" file is written to disk as
//! `round(duration × 1000)` bytes, so filesystem moves, cleanup and
//! re-probing all behave like the real adapter while staying instant.
//! Loudness measurements come from a scripted queue (for two-pass
//! scenarios) with a per-file fallback.

use futures::future::BoxFuture;
use futures::FutureExt;
use spotforge_common::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{
    AudioProcessor, LoudnessPreset, MasteringPreset, MixOptions, VolumeSegment,
};

/// Bytes per second of fake audio
pub const BYTES_PER_SECOND: f64 = 1000.0;

/// Size-coded fake audio toolchain
pub struct MemoryProcessor {
    loudness: Mutex<HashMap<PathBuf, f64>>,
    scripted_loudness: Mutex<VecDeque<f64>>,
    operations: Mutex<Vec<String>>,
    fail_measure: Mutex<bool>,
    default_loudness: f64,
}

impl MemoryProcessor {
    pub fn new() -> Self {
        Self {
            loudness: Mutex::new(HashMap::new()),
            scripted_loudness: Mutex::new(VecDeque::new()),
            operations: Mutex::new(Vec::new()),
            fail_measure: Mutex::new(false),
            default_loudness: -16.0,
        }
    }

    /// Write a fake audio file of the given duration.
    pub fn write_fake(&self, path: &Path, duration: f64) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = (duration * BYTES_PER_SECOND).round().max(0.0) as usize;
        std::fs::write(path, vec![0u8; bytes])?;
        Ok(())
    }

    /// Queue integrated-LUFS values returned by subsequent measurements.
    pub fn script_loudness(&self, values: &[f64]) {
        let mut queue = self.scripted_loudness.lock().expect("loudness queue");
        queue.extend(values.iter().copied());
    }

    /// Make every measurement fail until reset.
    pub fn fail_measurements(&self, fail: bool) {
        *self.fail_measure.lock().expect("measure flag") = fail;
    }

    /// Every capability invocation, oldest first.
    pub fn operations(&self) -> Vec<String> {
        self.operations.lock().expect("operations log").clone()
    }

    fn log(&self, op: impl Into<String>) {
        self.operations.lock().expect("operations log").push(op.into());
    }

    fn duration_from_file(&self, path: &Path) -> Result<f64> {
        let meta = std::fs::metadata(path).map_err(|e| {
            Error::Internal(format!("fake audio missing at {}: {}", path.display(), e))
        })?;
        Ok(meta.len() as f64 / BYTES_PER_SECOND)
    }

    fn set_loudness(&self, path: &Path, lufs: f64) {
        self.loudness
            .lock()
            .expect("loudness map")
            .insert(path.to_path_buf(), lufs);
    }

    fn loudness_of(&self, path: &Path) -> f64 {
        self.loudness
            .lock()
            .expect("loudness map")
            .get(path)
            .copied()
            .unwrap_or(self.default_loudness)
    }
}

impl Default for MemoryProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioProcessor for MemoryProcessor {
    fn get_duration<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<f64>> {
        async move { self.duration_from_file(path) }.boxed()
    }

    fn trim<'a>(
        &'a self,
        input: &'a Path,
        duration: f64,
        output: &'a Path,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let source = self.duration_from_file(input)?;
            let result = duration.min(source);
            self.write_fake(output, result)?;
            self.set_loudness(output, self.loudness_of(input));
            self.log(format!("trim {:.3}", duration));
            Ok(())
        }
        .boxed()
    }

    fn extend_by_loop<'a>(
        &'a self,
        input: &'a Path,
        duration: f64,
        output: &'a Path,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let source = self.duration_from_file(input)?;
            if source <= 0.0 {
                return Err(Error::Internal("cannot loop a zero-length bed".into()));
            }
            self.write_fake(output, duration)?;
            self.set_loudness(output, self.loudness_of(input));
            self.log(format!("extend_by_loop {:.3}", duration));
            Ok(())
        }
        .boxed()
    }

    fn stretch_to_duration<'a>(
        &'a self,
        input: &'a Path,
        duration: f64,
        output: &'a Path,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let source = self.duration_from_file(input)?;
            let ratio = source / duration;
            if ratio < 0.85 - 1e-6 || ratio > 1.25 + 1e-6 {
                return Err(Error::ScalingRefused(format!(
                    "ratio {:.3} outside [0.85, 1.25]",
                    ratio
                )));
            }
            self.write_fake(output, duration)?;
            self.set_loudness(output, self.loudness_of(input));
            self.log(format!("stretch {:.3} -> {:.3}", source, duration));
            Ok(())
        }
        .boxed()
    }

    fn apply_volume_curve<'a>(
        &'a self,
        input: &'a Path,
        segments: &'a [VolumeSegment],
        total_duration: f64,
        output: &'a Path,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let source = self.duration_from_file(input)?;
            let _ = total_duration;
            self.write_fake(output, source)?;
            self.set_loudness(output, self.loudness_of(input));
            self.log(format!("apply_volume_curve segments={}", segments.len()));
            Ok(())
        }
        .boxed()
    }

    fn measure_loudness<'a>(&'a self, path: &'a Path) -> BoxFuture<'a, Result<f64>> {
        async move {
            if *self.fail_measure.lock().expect("measure flag") {
                self.log("measure_loudness (failed)".to_string());
                return Err(Error::LoudnessMeasureFailed("scripted failure".into()));
            }
            let scripted = self.scripted_loudness.lock().expect("loudness queue").pop_front();
            let lufs = scripted.unwrap_or_else(|| self.loudness_of(path));
            self.log(format!("measure_loudness {:.2}", lufs));
            Ok(lufs)
        }
        .boxed()
    }

    fn mix<'a>(
        &'a self,
        options: &'a MixOptions,
        output: &'a Path,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let mut duration = 0.0f64;
            if let Some(voice) = &options.voice {
                let vdur = self.duration_from_file(&voice.path)?;
                duration = duration.max(voice.delay + vdur);
            }
            if let Some(music) = &options.music {
                duration = duration.max(self.duration_from_file(&music.path)?);
            }
            if options.voice.is_none() && options.music.is_none() {
                return Err(Error::Validation("mix needs at least one input".into()));
            }
            if let Some(max) = options.max_duration {
                duration = duration.min(max);
            }
            self.write_fake(output, duration)?;
            let lufs = if options.normalize_loudness {
                options.loudness_target_lufs
            } else {
                self.default_loudness
            };
            self.set_loudness(output, lufs);
            self.log(format!(
                "mix ducking={} normalize={} music_vol={:.3}",
                options.audio_ducking,
                options.normalize_loudness,
                options.music.as_ref().map(|m| m.volume).unwrap_or(0.0)
            ));
            Ok(())
        }
        .boxed()
    }

    fn master<'a>(
        &'a self,
        input: &'a Path,
        preset: MasteringPreset,
        loudness: LoudnessPreset,
        output: &'a Path,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let source = self.duration_from_file(input)?;
            self.write_fake(output, source)?;
            self.set_loudness(output, loudness.target_lufs());
            self.log(format!("master {:?}", preset));
            Ok(())
        }
        .boxed()
    }
}
