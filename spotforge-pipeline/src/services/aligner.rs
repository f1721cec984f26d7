//! Voice-to-music aligner
//!
//! Chooses where the voice enters the bed, where the bed ends (the button),
//! and the beat-aware ducking windows. The analyzer's downbeat grid is
//! authoritative; the blueprint's grid only sizes the snap windows.

use spotforge_common::{Error, Result};

use crate::models::{AlignmentResult, DuckSegment, MusicAnalysis, SentenceTiming};

/// Duck boundaries snap to a beat within this window
pub const BEAT_SNAP_WINDOW: f64 = 0.040;
/// Segments closer than this merge into one
pub const MERGE_GAP: f64 = 0.150;
/// Lead applied before each sentence so the duck opens ahead of the voice
const START_PAD: f64 = 0.080;
/// Tail applied after each sentence
const END_PAD: f64 = 0.120;

/// Inputs that come from the blueprint and production settings
#[derive(Debug, Clone)]
pub struct AlignerParams {
    /// The blueprint's ideal voice entry (pre-roll duration)
    pub pre_roll_duration: f64,
    pub post_roll_bars: u32,
    /// Blueprint bar duration; sizes the entry snap window
    pub bar_duration: f64,
    /// Base music gain under voice
    pub duck_level: f64,
    /// Per-sentence cue multipliers (default 1.0 when absent)
    pub multipliers: Vec<f64>,
}

/// Align a voice-over against an analyzed bed.
pub fn align(
    analysis: &MusicAnalysis,
    sentences: &[SentenceTiming],
    params: &AlignerParams,
) -> Result<AlignmentResult> {
    if sentences.is_empty() {
        return Err(Error::AlignmentInfeasible("no sentences to align".into()));
    }
    let detected_bar = analysis.bar_duration(4);
    let first = &sentences[0];
    let last = sentences.last().expect("sentences is non-empty");
    let post_roll = params.post_roll_bars as f64 * detected_bar;

    // Entry: snap the blueprint's candidate onto the detected grid when a
    // downbeat sits within half a bar of it.
    let candidate = params.pre_roll_duration;
    let mut voice_delay = match nearest(&analysis.downbeats, candidate) {
        Some(downbeat) if (downbeat - candidate).abs() <= params.bar_duration / 2.0 => downbeat,
        _ => candidate,
    };
    let mut entry_penalized = false;

    // The first sentence's end must leave the post-roll before the bed runs
    // out; pull the entry toward zero until it does.
    let latest_entry = analysis.duration - post_roll - first.end;
    if voice_delay > latest_entry {
        if latest_entry < 0.0 {
            return Err(Error::AlignmentInfeasible(format!(
                "bed of {:.2}s cannot hold the voice plus {:.2}s post-roll",
                analysis.duration, post_roll
            )));
        }
        voice_delay = latest_entry.max(0.0);
        entry_penalized = true;
    }

    // Button ending: the first downbeat at or past the last word, plus the
    // post-roll bars.
    let t_last_voice = voice_delay + last.end;
    let (music_cutoff_time, button_ending_bar, button_in_bed) =
        match analysis.downbeats.iter().position(|&d| d >= t_last_voice - 1e-9) {
            Some(index) => {
                let cutoff = analysis.downbeats[index] + post_roll;
                if cutoff <= analysis.duration + 1e-9 {
                    (cutoff, (index + params.post_roll_bars as usize) as u32, true)
                } else {
                    (
                        analysis.duration,
                        analysis.downbeats.len().saturating_sub(1) as u32,
                        false,
                    )
                }
            }
            None => (
                analysis.duration,
                analysis.downbeats.len().saturating_sub(1) as u32,
                false,
            ),
        };

    // Beat grid for duck snapping: downbeats plus their half-bar midpoints.
    let mut beat_grid: Vec<f64> = Vec::with_capacity(analysis.downbeats.len() * 2);
    for pair in analysis.downbeats.windows(2) {
        beat_grid.push(pair[0]);
        beat_grid.push((pair[0] + pair[1]) / 2.0);
    }
    if let Some(&last_beat) = analysis.downbeats.last() {
        beat_grid.push(last_beat);
    }

    let ducking_segments = build_duck_segments(
        sentences,
        params,
        voice_delay,
        music_cutoff_time,
        &beat_grid,
    );

    // Score: entry-downbeat closeness, button landing, duck coverage.
    let entry_offset = nearest(&analysis.downbeats, voice_delay)
        .map(|d| (voice_delay - d).abs())
        .unwrap_or(params.bar_duration);
    let half_bar = (detected_bar / 2.0).max(1e-9);
    let mut entry_score = 1.0 - (entry_offset / half_bar).min(1.0);
    if entry_penalized {
        entry_score *= 0.5;
    }
    let button_score = if button_in_bed { 1.0 } else { 0.3 };
    let voice_span = (last.end - first.start).max(1e-9);
    let ducked: f64 = ducking_segments.iter().map(|s| s.end - s.start).sum();
    let coverage_score = (ducked / voice_span).clamp(0.0, 1.0);
    let alignment_score =
        (0.4 * entry_score + 0.3 * button_score + 0.3 * coverage_score).clamp(0.0, 1.0);

    Ok(AlignmentResult {
        voice_delay,
        music_cutoff_time,
        button_ending_bar,
        ducking_segments,
        alignment_score,
    })
}

/// Per-sentence windows: padded, beat-snapped, clipped, merged.
fn build_duck_segments(
    sentences: &[SentenceTiming],
    params: &AlignerParams,
    voice_delay: f64,
    cutoff: f64,
    beat_grid: &[f64],
) -> Vec<DuckSegment> {
    let mut segments: Vec<DuckSegment> = Vec::with_capacity(sentences.len());

    for (i, sentence) in sentences.iter().enumerate() {
        let multiplier = params
            .multipliers
            .get(i)
            .copied()
            .unwrap_or(1.0)
            .clamp(0.1, 3.0);
        let level = (params.duck_level * multiplier).clamp(0.05, 1.0);

        let mut start = voice_delay + sentence.start - START_PAD;
        let mut end = voice_delay + sentence.end + END_PAD;

        // Beats take priority over literal sentence edges inside the window
        if let Some(beat) = nearest(beat_grid, start) {
            if (beat - start).abs() <= BEAT_SNAP_WINDOW {
                start = beat;
            }
        }
        if let Some(beat) = nearest(beat_grid, end) {
            if (beat - end).abs() <= BEAT_SNAP_WINDOW {
                end = beat;
            }
        }

        start = start.clamp(0.0, cutoff);
        end = end.clamp(0.0, cutoff);
        if end <= start {
            continue;
        }

        // Merge into the previous segment when the gap is inaudible
        if let Some(prev) = segments.last_mut() {
            if start - prev.end < MERGE_GAP {
                prev.end = prev.end.max(end);
                prev.level = prev.level.min(level);
                continue;
            }
        }
        segments.push(DuckSegment { start, end, level });
    }
    segments
}

/// Closest value in an ordered list.
fn nearest(values: &[f64], target: f64) -> Option<f64> {
    values
        .iter()
        .copied()
        .min_by(|a, b| {
            let da = (a - target).abs();
            let db = (b - target).abs();
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MusicAnalysis;

    fn grid(bpm: f64, duration: f64) -> MusicAnalysis {
        MusicAnalysis::synthetic(bpm, duration, 4)
    }

    fn sentences(spans: &[(f64, f64)]) -> Vec<SentenceTiming> {
        spans
            .iter()
            .enumerate()
            .map(|(i, (start, end))| SentenceTiming {
                text: format!("sentence {}", i),
                start: *start,
                end: *end,
            })
            .collect()
    }

    fn params(pre_roll: f64, bar: f64) -> AlignerParams {
        AlignerParams {
            pre_roll_duration: pre_roll,
            post_roll_bars: 1,
            bar_duration: bar,
            duck_level: 0.3,
            multipliers: vec![],
        }
    }

    #[test]
    fn entry_snaps_to_the_detected_downbeat() {
        let analysis = grid(100.0, 31.2);
        let voice = sentences(&[(0.0, 3.0), (3.2, 10.0)]);
        // Candidate 4.9 sits 0.1 s off the 4.8 downbeat, well inside ±half bar
        let result = align(&analysis, &voice, &params(4.9, 2.4)).unwrap();
        assert!((result.voice_delay - 4.8).abs() < 1e-9);
        assert!(result.alignment_score > 0.5);
    }

    #[test]
    fn entry_unchanged_when_no_downbeat_is_near() {
        // Downbeats every 4.8 s; candidate 2.0 is 1.6+ from either neighbor
        let analysis = grid(50.0, 48.0);
        let voice = sentences(&[(0.0, 3.0)]);
        let result = align(&analysis, &voice, &params(2.0, 1.0)).unwrap();
        assert!((result.voice_delay - 2.0).abs() < 1e-9);
    }

    #[test]
    fn entry_reduces_toward_zero_when_bed_is_tight() {
        // 12 s bed, voice first sentence ends at 8 s, post-roll 2.4 s:
        // latest entry = 12 - 2.4 - 8 = 1.6
        let analysis = grid(100.0, 12.0);
        let voice = sentences(&[(0.0, 8.0)]);
        let result = align(&analysis, &voice, &params(4.8, 2.4)).unwrap();
        assert!(result.voice_delay <= 1.6 + 1e-9);
        assert!(result.voice_delay >= 0.0);
    }

    #[test]
    fn infeasible_when_voice_outruns_the_bed() {
        let analysis = grid(100.0, 8.0);
        let voice = sentences(&[(0.0, 9.5)]);
        let err = align(&analysis, &voice, &params(4.8, 2.4)).unwrap_err();
        assert!(matches!(err, Error::AlignmentInfeasible(_)));
    }

    #[test]
    fn button_lands_one_post_roll_bar_past_the_last_word() {
        let analysis = grid(100.0, 31.2);
        let voice = sentences(&[(0.0, 3.0), (3.1, 19.0)]);
        let result = align(&analysis, &voice, &params(4.8, 2.4)).unwrap();
        // Last voice at 4.8 + 19.0 = 23.8; first downbeat at 24.0; + 1 bar
        assert!((result.music_cutoff_time - 26.4).abs() < 1e-9);
        assert_eq!(result.button_ending_bar, 11);
    }

    #[test]
    fn button_clamps_to_bed_end_with_score_penalty() {
        let analysis = grid(100.0, 24.5);
        let voice = sentences(&[(0.0, 19.0)]);
        let result = align(&analysis, &voice, &params(4.8, 2.4)).unwrap();
        assert!(result.music_cutoff_time <= 24.5 + 1e-9);
        let roomy = align(&grid(100.0, 31.2), &voice, &params(4.8, 2.4)).unwrap();
        assert!(result.alignment_score < roomy.alignment_score);
    }

    #[test]
    fn duck_segments_are_ordered_and_clipped() {
        let analysis = grid(100.0, 31.2);
        let voice = sentences(&[(0.0, 3.0), (4.0, 8.0), (9.0, 18.0)]);
        let result = align(&analysis, &voice, &params(4.8, 2.4)).unwrap();
        assert!(!result.ducking_segments.is_empty());
        for segment in &result.ducking_segments {
            assert!(segment.start >= 0.0);
            assert!(segment.end <= result.music_cutoff_time + 1e-9);
            assert!(segment.end > segment.start);
            assert!(segment.level >= 0.05 && segment.level <= 1.0);
        }
        for pair in result.ducking_segments.windows(2) {
            assert!(pair[1].start >= pair[0].end);
        }
    }

    #[test]
    fn close_segments_merge() {
        let analysis = grid(100.0, 31.2);
        // Gap between sentences is 0.1 s; padding makes the effective gap
        // negative, well under the merge threshold
        let voice = sentences(&[(0.0, 3.0), (3.1, 6.0)]);
        let result = align(&analysis, &voice, &params(4.8, 2.4)).unwrap();
        assert_eq!(result.ducking_segments.len(), 1);
    }

    #[test]
    fn distant_segments_stay_separate() {
        let analysis = grid(100.0, 40.8);
        let voice = sentences(&[(0.0, 3.0), (8.0, 12.0)]);
        let result = align(&analysis, &voice, &params(4.8, 2.4)).unwrap();
        assert_eq!(result.ducking_segments.len(), 2);
    }

    #[test]
    fn duck_boundary_snaps_to_a_near_beat() {
        let analysis = grid(100.0, 31.2);
        // With delay 4.8 and the 80 ms lead, a sentence start of 2.45
        // gives a raw boundary of 7.17, within 30 ms of the 7.2 half-bar
        // beat, so it snaps.
        let voice = sentences(&[(2.45, 6.0)]);
        let result = align(&analysis, &voice, &params(4.8, 2.4)).unwrap();
        let segment = result.ducking_segments[0];
        assert!((segment.start - 7.2).abs() < 1e-9);
    }

    #[test]
    fn cue_multipliers_scale_and_clamp_levels() {
        let analysis = grid(100.0, 40.8);
        let voice = sentences(&[(0.0, 3.0), (8.0, 12.0)]);
        let mut p = params(4.8, 2.4);
        p.multipliers = vec![0.01, 3.0];
        let result = align(&analysis, &voice, &p).unwrap();
        // 0.01 clamps to 0.1 as a multiplier: 0.3 * 0.1 = 0.03 -> floor 0.05
        assert!((result.ducking_segments[0].level - 0.05).abs() < 1e-9);
        // 3.0 passes: 0.3 * 3.0 = 0.9
        assert!((result.ducking_segments[1].level - 0.9).abs() < 1e-9);
    }

    #[test]
    fn score_stays_in_unit_interval() {
        let analysis = grid(100.0, 31.2);
        let voice = sentences(&[(0.0, 10.0)]);
        let result = align(&analysis, &voice, &params(4.8, 2.4)).unwrap();
        assert!((0.0..=1.0).contains(&result.alignment_score));
    }
}
