//! Music analyzer
//!
//! Detects the downbeat grid and per-bar energy of a rendered bed. The
//! detection is onset-energy based over the bed's low-frequency envelope:
//! decode to mono, low-pass, build an RMS envelope, score tempo candidates
//! by onset autocorrelation (ties toward the composer's target BPM), then
//! pick the downbeat phase that catches the most onset energy.
//!
//! This is a pure analyzer: it never writes the bed. Every failure surfaces
//! as `AnalysisFailed`; callers fall back to the synthetic grid built from
//! the target BPM.

use futures::future::BoxFuture;
use futures::FutureExt;
use spotforge_common::timing::TimeSignature;
use spotforge_common::{Error, Result};
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::models::{BarEnergy, MusicAnalysis};

/// Envelope hop (seconds)
const HOP: f64 = 0.010;
/// Envelope window (seconds)
const WINDOW: f64 = 0.020;
/// Low-pass cutoff for the beat-carrying band (Hz)
const LOW_PASS_HZ: f64 = 150.0;
/// Tempo candidates are scored every half BPM
const BPM_STEP: f64 = 0.5;
/// Candidates within this fraction of the best score tie-break toward the target
const TIE_TOLERANCE: f64 = 0.02;

/// Bed analysis capability, so orchestration tests can substitute a
/// deterministic double for the onset detector.
pub trait BedAnalyzer: Send + Sync {
    fn analyze<'a>(
        &'a self,
        path: &'a Path,
        target_bpm: f64,
        time_sig: TimeSignature,
    ) -> BoxFuture<'a, Result<MusicAnalysis>>;
}

/// Production analyzer: runs the CPU-bound detector off the async runtime.
pub struct OnsetAnalyzer;

impl BedAnalyzer for OnsetAnalyzer {
    fn analyze<'a>(
        &'a self,
        path: &'a Path,
        target_bpm: f64,
        time_sig: TimeSignature,
    ) -> BoxFuture<'a, Result<MusicAnalysis>> {
        let path = path.to_path_buf();
        async move {
            tokio::task::spawn_blocking(move || analyze_bed(&path, target_bpm, time_sig))
                .await
                .map_err(|e| Error::Internal(format!("analysis task panicked: {}", e)))?
        }
        .boxed()
    }
}

/// Analyze a rendered bed. `target_bpm` constrains the tempo search window
/// and wins ties between equally plausible candidates.
pub fn analyze_bed(
    path: &Path,
    target_bpm: f64,
    time_sig: TimeSignature,
) -> Result<MusicAnalysis> {
    let (samples, sample_rate) = decode_mono(path)?;
    let duration = samples.len() as f64 / sample_rate as f64;
    if duration < 2.0 {
        return Err(Error::AnalysisFailed(format!(
            "bed too short to analyze: {:.2}s",
            duration
        )));
    }

    let low = low_pass(&samples, sample_rate, LOW_PASS_HZ);
    let envelope = rms_envelope(&low, sample_rate);
    let peak = envelope.iter().cloned().fold(0.0f64, f64::max);
    if peak < 1e-4 {
        return Err(Error::AnalysisFailed("bed is silent".into()));
    }

    let onsets = onset_strength(&envelope);
    let detected_bpm = detect_bpm(&onsets, target_bpm)?;

    let beat_period = 60.0 / detected_bpm;
    let downbeat_anchor = detect_downbeat_phase(&onsets, beat_period, time_sig);

    let bar_len = beat_period * time_sig.beats_per_bar as f64;
    let mut downbeats = Vec::new();
    let mut t = downbeat_anchor;
    while t <= duration + 1e-9 {
        downbeats.push(t);
        t += bar_len;
    }
    if downbeats.len() < 2 {
        return Err(Error::AnalysisFailed("fewer than two bars detected".into()));
    }

    let bars = downbeats
        .windows(2)
        .map(|w| BarEnergy {
            start_time: w[0],
            end_time: w[1],
            energy_db: band_energy_db(&samples, sample_rate, w[0], w[1]),
        })
        .collect();

    tracing::debug!(
        bed = %path.display(),
        detected_bpm,
        target_bpm,
        downbeats = downbeats.len(),
        "bed analysis complete"
    );

    Ok(MusicAnalysis {
        detected_bpm,
        downbeats,
        bars,
        duration,
    })
}

/// Decode any supported container to mono f32.
fn decode_mono(path: &Path) -> Result<(Vec<f32>, u32)> {
    let file = std::fs::File::open(path)
        .map_err(|e| Error::AnalysisFailed(format!("cannot open bed {}: {}", path.display(), e)))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| Error::AnalysisFailed(format!("probe failed: {}", e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| Error::AnalysisFailed("no audio track in bed".into()))?;
    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let sample_rate = codec_params
        .sample_rate
        .ok_or_else(|| Error::AnalysisFailed("bed has no sample rate".into()))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| Error::AnalysisFailed(format!("decoder init failed: {}", e)))?;

    let mut mono = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(e) => return Err(Error::AnalysisFailed(format!("packet read failed: {}", e))),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(e) => return Err(Error::AnalysisFailed(format!("decode failed: {}", e))),
        };
        let spec = *decoded.spec();
        let channels = spec.channels.count().max(1);
        let buf = sample_buf.get_or_insert_with(|| {
            SampleBuffer::<f32>::new(decoded.capacity() as u64, spec)
        });
        buf.copy_interleaved_ref(decoded);
        for frame in buf.samples().chunks_exact(channels) {
            let sum: f32 = frame.iter().sum();
            mono.push(sum / channels as f32);
        }
    }

    if mono.is_empty() {
        return Err(Error::AnalysisFailed("bed decoded to zero samples".into()));
    }
    Ok((mono, sample_rate))
}

/// One-pole low-pass keeping the beat-carrying band.
fn low_pass(samples: &[f32], sample_rate: u32, cutoff_hz: f64) -> Vec<f32> {
    let alpha = 1.0 - (-2.0 * std::f64::consts::PI * cutoff_hz / sample_rate as f64).exp();
    let alpha = alpha as f32;
    let mut out = Vec::with_capacity(samples.len());
    let mut y = 0.0f32;
    for &x in samples {
        y += alpha * (x - y);
        out.push(y);
    }
    out
}

/// RMS envelope over `WINDOW`-wide windows at `HOP` spacing.
fn rms_envelope(samples: &[f32], sample_rate: u32) -> Vec<f64> {
    let hop = ((sample_rate as f64 * HOP) as usize).max(1);
    let window = ((sample_rate as f64 * WINDOW) as usize).max(1);
    let mut envelope = Vec::with_capacity(samples.len() / hop + 1);
    let mut start = 0usize;
    while start < samples.len() {
        let end = (start + window).min(samples.len());
        let sum_sq: f64 = samples[start..end].iter().map(|&s| (s as f64) * s as f64).sum();
        envelope.push((sum_sq / (end - start) as f64).sqrt());
        start += hop;
    }
    envelope
}

/// Positive envelope difference, normalized to a unit peak.
fn onset_strength(envelope: &[f64]) -> Vec<f64> {
    let mut onsets = vec![0.0; envelope.len()];
    for i in 1..envelope.len() {
        onsets[i] = (envelope[i] - envelope[i - 1]).max(0.0);
    }
    let peak = onsets.iter().cloned().fold(0.0f64, f64::max);
    if peak > 0.0 {
        for o in onsets.iter_mut() {
            *o /= peak;
        }
    }
    onsets
}

fn onset_at(onsets: &[f64], position: f64) -> f64 {
    if position < 0.0 {
        return 0.0;
    }
    let lower = position.floor() as usize;
    if lower + 1 >= onsets.len() {
        return 0.0;
    }
    let frac = position - lower as f64;
    onsets[lower] * (1.0 - frac) + onsets[lower + 1] * frac
}

/// Score tempo candidates by onset autocorrelation within ±20-25% of the
/// target; near-ties resolve toward the target.
fn detect_bpm(onsets: &[f64], target_bpm: f64) -> Result<f64> {
    let lo = (target_bpm * 0.80).max(40.0);
    let hi = (target_bpm * 1.25).min(220.0);
    if lo >= hi {
        return Err(Error::AnalysisFailed(format!(
            "unusable target BPM {}",
            target_bpm
        )));
    }

    let mut candidates = Vec::new();
    let mut bpm = lo;
    while bpm <= hi + 1e-9 {
        let lag = (60.0 / bpm) / HOP;
        let mut score = 0.0;
        let mut i = 0.0;
        while i + lag < onsets.len() as f64 {
            score += onset_at(onsets, i) * onset_at(onsets, i + lag);
            i += 1.0;
        }
        candidates.push((bpm, score));
        bpm += BPM_STEP;
    }

    let best = candidates
        .iter()
        .map(|&(_, s)| s)
        .fold(0.0f64, f64::max);
    if best <= 0.0 {
        return Err(Error::AnalysisFailed("no periodic onsets found".into()));
    }

    let winner = candidates
        .iter()
        .filter(|&&(_, s)| s >= best * (1.0 - TIE_TOLERANCE))
        .min_by(|a, b| {
            let da = (a.0 - target_bpm).abs();
            let db = (b.0 - target_bpm).abs();
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|&(bpm, _)| bpm)
        .expect("candidate list is non-empty");
    Ok(winner)
}

/// Find the downbeat anchor: the beat phase with the most onset energy,
/// refined to the strongest of the `beats_per_bar` possible bar offsets.
fn detect_downbeat_phase(onsets: &[f64], beat_period: f64, time_sig: TimeSignature) -> f64 {
    let period_hops = beat_period / HOP;
    let steps = 32usize;

    // Beat phase
    let mut best_phase = 0.0;
    let mut best_score = -1.0;
    for step in 0..steps {
        let phase = period_hops * step as f64 / steps as f64;
        let mut score = 0.0;
        let mut t = phase;
        while t < onsets.len() as f64 {
            score += onset_at(onsets, t);
            t += period_hops;
        }
        if score > best_score {
            best_score = score;
            best_phase = phase;
        }
    }

    // Bar offset within the beat grid
    let beats = time_sig.beats_per_bar.max(1) as f64;
    let bar_hops = period_hops * beats;
    let mut best_offset = 0u32;
    let mut best_bar_score = -1.0;
    for offset in 0..time_sig.beats_per_bar.max(1) {
        let mut score = 0.0;
        let mut t = best_phase + period_hops * offset as f64;
        while t < onsets.len() as f64 {
            score += onset_at(onsets, t);
            t += bar_hops;
        }
        if score > best_bar_score {
            best_bar_score = score;
            best_offset = offset;
        }
    }

    (best_phase + period_hops * best_offset as f64) * HOP
}

/// Integrated RMS energy of a bar in dBFS.
fn band_energy_db(samples: &[f32], sample_rate: u32, start: f64, end: f64) -> f64 {
    let from = ((start * sample_rate as f64) as usize).min(samples.len());
    let to = ((end * sample_rate as f64) as usize).min(samples.len());
    if to <= from {
        return -120.0;
    }
    let sum_sq: f64 = samples[from..to].iter().map(|&s| (s as f64) * s as f64).sum();
    let rms = (sum_sq / (to - from) as f64).sqrt();
    20.0 * (rms + 1e-10).log10()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    /// Write a click-track WAV: a low thump on every beat at `bpm`, with the
    /// first beat of each bar accented.
    fn write_click_track(path: &Path, bpm: f64, seconds: f64) {
        let sample_rate = 22_050u32;
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        let total = (seconds * sample_rate as f64) as usize;
        let beat_period = 60.0 / bpm;
        let click_len = (0.030 * sample_rate as f64) as usize;

        for n in 0..total {
            let t = n as f64 / sample_rate as f64;
            let beat_index = (t / beat_period).floor() as usize;
            let beat_start = beat_index as f64 * beat_period;
            let into_click = t - beat_start;
            let sample = if into_click < click_len as f64 / sample_rate as f64 {
                let decay = 1.0 - into_click / (click_len as f64 / sample_rate as f64);
                let accent = if beat_index % 4 == 0 { 0.9 } else { 0.45 };
                accent * decay * (2.0 * PI as f64 * 70.0 * t).sin()
            } else {
                0.0
            };
            writer
                .write_sample((sample * i16::MAX as f64) as i16)
                .unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn detects_click_track_tempo_and_grid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bed.wav");
        write_click_track(&path, 120.0, 10.0);

        let analysis = analyze_bed(&path, 120.0, TimeSignature::FOUR_FOUR).unwrap();
        assert!(
            (analysis.detected_bpm - 120.0).abs() <= 2.0,
            "detected {}",
            analysis.detected_bpm
        );
        assert!((analysis.duration - 10.0).abs() < 0.1);
        assert!(analysis.downbeats.len() >= 4);

        // Bar spacing within the advertised ±30 ms
        let bar = 2.0;
        for pair in analysis.downbeats.windows(2) {
            assert!(((pair[1] - pair[0]) - bar).abs() < 0.03);
        }
        assert!(!analysis.bars.is_empty());
    }

    #[test]
    fn grid_anchor_lands_near_the_accent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bed.wav");
        write_click_track(&path, 120.0, 10.0);

        let analysis = analyze_bed(&path, 120.0, TimeSignature::FOUR_FOUR).unwrap();
        // Accented beats sit at whole bars (0, 2, 4 ... seconds)
        let first = analysis.downbeats[0];
        let nearest_bar = (first / 2.0).round() * 2.0;
        assert!(
            (first - nearest_bar).abs() < 0.05,
            "anchor {} off the accent grid",
            first
        );
    }

    #[test]
    fn silence_fails_analysis() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("silent.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22_050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..(22_050 * 3) {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let err = analyze_bed(&path, 120.0, TimeSignature::FOUR_FOUR).unwrap_err();
        assert!(matches!(err, Error::AnalysisFailed(_)));
    }

    #[test]
    fn missing_file_fails_analysis() {
        let err = analyze_bed(
            Path::new("/nonexistent/bed.wav"),
            120.0,
            TimeSignature::FOUR_FOUR,
        )
        .unwrap_err();
        assert!(matches!(err, Error::AnalysisFailed(_)));
    }

    #[test]
    fn synthetic_grid_covers_the_bed() {
        let analysis = MusicAnalysis::synthetic(100.0, 31.2, 4);
        assert_eq!(analysis.detected_bpm, 100.0);
        assert_eq!(analysis.downbeats.len(), 14); // 13 bars + the closing edge
        assert!((analysis.downbeats[1] - 2.4).abs() < 1e-9);
        assert_eq!(analysis.bars.len(), 13);
    }
}
