//! Bar/beat timing primitives
//!
//! Pure functions over seconds and bars. Everything downstream of the
//! blueprint builder (section snapping, sync points, the voice-to-music
//! aligner) is phrased in terms of this grid, so the functions here carry
//! the invariants the rest of the pipeline assumes:
//!
//! - `build_bar_grid` always returns `total_duration = total_bars ×
//!   bar_duration` exactly.
//! - `optimize_bpm_for_duration` never leaves `[target − range, target +
//!   range]`.
//! - `snap_to_phrase` returns a positive multiple of the phrase length.
//!
//! All durations are f64 seconds; bars are 1-indexed in blueprints but
//! `nearest_downbeat` reports a 0-indexed bar to match raw grid math.

use serde::{Deserialize, Serialize};

/// Musical time signature. Only the beat count matters for bar math.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub beats_per_bar: u32,
    pub beat_unit: u32,
}

impl TimeSignature {
    pub const FOUR_FOUR: TimeSignature = TimeSignature {
        beats_per_bar: 4,
        beat_unit: 4,
    };

    pub const THREE_FOUR: TimeSignature = TimeSignature {
        beats_per_bar: 3,
        beat_unit: 4,
    };
}

impl Default for TimeSignature {
    fn default() -> Self {
        TimeSignature::FOUR_FOUR
    }
}

impl std::fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.beats_per_bar, self.beat_unit)
    }
}

/// Duration of one bar in seconds: `(60 / bpm) × beats_per_bar`.
pub fn bar_duration(bpm: f64, time_sig: TimeSignature) -> f64 {
    debug_assert!(bpm > 0.0, "bpm must be positive");
    (60.0 / bpm) * time_sig.beats_per_bar as f64
}

/// A bar grid long enough to cover a minimum duration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BarGrid {
    pub bar_duration: f64,
    pub total_bars: u32,
    pub total_duration: f64,
}

/// Build the smallest whole-bar grid covering `min_duration` seconds.
pub fn build_bar_grid(bpm: f64, min_duration: f64, time_sig: TimeSignature) -> BarGrid {
    let bar = bar_duration(bpm, time_sig);
    let total_bars = ((min_duration / bar).ceil() as u32).max(1);
    BarGrid {
        bar_duration: bar,
        total_bars,
        total_duration: total_bars as f64 * bar,
    }
}

/// Pick the BPM within `[target − range, target + range]` whose whole-bar
/// grid lands closest to `desired_duration`. Candidates are whole-BPM steps;
/// ties break toward the target.
pub fn optimize_bpm_for_duration(
    target_bpm: f64,
    desired_duration: f64,
    range: f64,
    time_sig: TimeSignature,
) -> f64 {
    let range = range.max(0.0);
    let mut best_bpm = target_bpm;
    let mut best_error = grid_error(target_bpm, desired_duration, time_sig);

    let steps = range.floor() as i32;
    for offset in -steps..=steps {
        let candidate = target_bpm + offset as f64;
        if candidate <= 0.0 {
            continue;
        }
        let error = grid_error(candidate, desired_duration, time_sig);
        let closer = error + 1e-9 < best_error;
        let tie_toward_target = (error - best_error).abs() <= 1e-9
            && (candidate - target_bpm).abs() < (best_bpm - target_bpm).abs();
        if closer || tie_toward_target {
            best_bpm = candidate;
            best_error = error;
        }
    }
    best_bpm
}

fn grid_error(bpm: f64, desired_duration: f64, time_sig: TimeSignature) -> f64 {
    let grid = build_bar_grid(bpm, desired_duration, time_sig);
    (grid.total_duration - desired_duration).abs()
}

/// Options for pre/post-roll sizing.
#[derive(Debug, Clone, Default)]
pub struct RollOptions {
    pub genre: Option<String>,
    pub ad_duration: Option<f64>,
    pub time_sig: Option<TimeSignature>,
}

/// Bed-only bars before the voice enters and after it ends.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrePostRoll {
    pub pre_roll_bars: u32,
    pub post_roll_bars: u32,
    pub pre_roll_duration: f64,
    pub post_roll_duration: f64,
    pub total_music_duration: f64,
}

/// Size the pre/post-roll around a voice-over.
///
/// Defaults to 2 bars of pre-roll and 1 bar of post-roll. Short ads
/// (≤ 15 s) drop to a single pre-roll bar; ambient or cinematic beds get a
/// third bar of room to breathe.
pub fn calculate_pre_post_roll(voice_duration: f64, bpm: f64, opts: &RollOptions) -> PrePostRoll {
    let time_sig = opts.time_sig.unwrap_or_default();
    let bar = bar_duration(bpm, time_sig);

    let mut pre_roll_bars: u32 = 2;
    if let Some(ad_duration) = opts.ad_duration {
        if ad_duration <= 15.0 {
            pre_roll_bars = 1;
        }
    }
    if let Some(genre) = &opts.genre {
        let genre = genre.to_lowercase();
        if genre.contains("ambient") || genre.contains("cinematic") || genre.contains("atmospheric")
        {
            pre_roll_bars = 3;
        }
    }
    let post_roll_bars: u32 = 1;

    let body_bars = ((voice_duration / bar).ceil() as u32).max(1);
    let total_bars = pre_roll_bars + body_bars + post_roll_bars;

    PrePostRoll {
        pre_roll_bars,
        post_roll_bars,
        pre_roll_duration: pre_roll_bars as f64 * bar,
        post_roll_duration: post_roll_bars as f64 * bar,
        total_music_duration: total_bars as f64 * bar,
    }
}

/// A downbeat near a point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Downbeat {
    /// Downbeat time in seconds
    pub time: f64,
    /// 0-indexed bar number on the grid
    pub bar: u32,
    /// `t - time`; negative when the downbeat is ahead of `t`
    pub offset: f64,
}

/// The grid downbeat nearest to `t` (grid anchored at 0).
pub fn nearest_downbeat(t: f64, bpm: f64, time_sig: TimeSignature) -> Downbeat {
    let bar_len = bar_duration(bpm, time_sig);
    let bar = (t / bar_len).round().max(0.0) as u32;
    let time = bar as f64 * bar_len;
    Downbeat {
        time,
        bar,
        offset: t - time,
    }
}

/// All grid downbeat times in `[start, end]`, anchored at 0.
pub fn generate_downbeats(start: f64, end: f64, bpm: f64, time_sig: TimeSignature) -> Vec<f64> {
    let bar_len = bar_duration(bpm, time_sig);
    let mut times = Vec::new();
    if end < start {
        return times;
    }
    let mut bar = (start / bar_len).ceil().max(0.0) as u64;
    // Tolerate start sitting a hair past a grid point
    if bar > 0 && ((bar - 1) as f64 * bar_len - start).abs() < 1e-9 {
        bar -= 1;
    }
    loop {
        let t = bar as f64 * bar_len;
        if t > end + 1e-9 {
            break;
        }
        times.push(t);
        bar += 1;
    }
    times
}

/// Round a bar number to the nearest phrase boundary. Returns at least one
/// whole phrase.
pub fn snap_to_phrase(bar: u32, phrase_len: u32) -> u32 {
    let phrase_len = phrase_len.max(1);
    let snapped = (bar as f64 / phrase_len as f64).round() as u32 * phrase_len;
    snapped.max(phrase_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIG: TimeSignature = TimeSignature::FOUR_FOUR;

    #[test]
    fn bar_duration_at_100_bpm() {
        assert!((bar_duration(100.0, SIG) - 2.4).abs() < 1e-12);
        assert!((bar_duration(120.0, SIG) - 2.0).abs() < 1e-12);
        assert!((bar_duration(120.0, TimeSignature::THREE_FOUR) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn grid_covers_min_duration_exactly_in_bars() {
        let grid = build_bar_grid(100.0, 30.0, SIG);
        assert_eq!(grid.total_bars, 13);
        assert!((grid.total_duration - 31.2).abs() < 1e-9);
        // total_duration is always an exact bar multiple
        assert!(
            (grid.total_duration - grid.total_bars as f64 * grid.bar_duration).abs() < 1e-12
        );
    }

    #[test]
    fn grid_has_at_least_one_bar() {
        let grid = build_bar_grid(100.0, 0.0, SIG);
        assert_eq!(grid.total_bars, 1);
    }

    #[test]
    fn optimized_bpm_stays_in_range() {
        for target in [80.0, 100.0, 128.0] {
            for desired in [12.0, 30.0, 59.5] {
                let bpm = optimize_bpm_for_duration(target, desired, 5.0, SIG);
                assert!(bpm >= target - 5.0 && bpm <= target + 5.0);
            }
        }
    }

    #[test]
    fn optimized_bpm_reduces_duration_error() {
        let target = 100.0;
        let desired = 30.0;
        let bpm = optimize_bpm_for_duration(target, desired, 5.0, SIG);
        let optimized_error = (build_bar_grid(bpm, desired, SIG).total_duration - desired).abs();
        let target_error = (build_bar_grid(target, desired, SIG).total_duration - desired).abs();
        assert!(optimized_error <= target_error + 1e-9);
    }

    #[test]
    fn optimizer_tie_breaks_toward_target() {
        // Zero range degenerates to the target itself
        let bpm = optimize_bpm_for_duration(96.0, 30.0, 0.0, SIG);
        assert!((bpm - 96.0).abs() < 1e-12);
    }

    #[test]
    fn pre_post_roll_defaults() {
        let roll = calculate_pre_post_roll(24.0, 100.0, &RollOptions::default());
        assert_eq!(roll.pre_roll_bars, 2);
        assert_eq!(roll.post_roll_bars, 1);
        assert!((roll.pre_roll_duration - 4.8).abs() < 1e-9);
        // 2 pre + 10 body + 1 post = 13 bars
        assert!((roll.total_music_duration - 31.2).abs() < 1e-9);
    }

    #[test]
    fn short_ads_get_one_pre_roll_bar() {
        let roll = calculate_pre_post_roll(
            10.0,
            100.0,
            &RollOptions {
                ad_duration: Some(15.0),
                ..Default::default()
            },
        );
        assert_eq!(roll.pre_roll_bars, 1);
        assert_eq!(roll.post_roll_bars, 1);
    }

    #[test]
    fn ambient_genres_get_three_pre_roll_bars() {
        let roll = calculate_pre_post_roll(
            24.0,
            100.0,
            &RollOptions {
                genre: Some("Ambient Cinematic".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(roll.pre_roll_bars, 3);
    }

    #[test]
    fn nearest_downbeat_rounds_both_ways() {
        // bar = 2.4 s at 100 BPM
        let near_below = nearest_downbeat(4.7, 100.0, SIG);
        assert_eq!(near_below.bar, 2);
        assert!((near_below.time - 4.8).abs() < 1e-9);
        assert!(near_below.offset < 0.0);

        let near_above = nearest_downbeat(5.0, 100.0, SIG);
        assert_eq!(near_above.bar, 2);
        assert!(near_above.offset > 0.0);
    }

    #[test]
    fn downbeats_are_ordered_and_bounded() {
        let beats = generate_downbeats(0.0, 10.0, 120.0, SIG);
        assert_eq!(beats, vec![0.0, 2.0, 4.0, 6.0, 8.0, 10.0]);
        for pair in beats.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn downbeats_with_offset_start() {
        let beats = generate_downbeats(1.0, 7.0, 120.0, SIG);
        assert_eq!(beats, vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn phrase_snap_is_a_phrase_multiple() {
        for bar in 1..40u32 {
            for len in 1..=4u32 {
                let snapped = snap_to_phrase(bar, len);
                assert_eq!(snapped % len, 0, "bar {} len {}", bar, len);
                assert!(snapped >= 1);
            }
        }
    }

    #[test]
    fn phrase_snap_rounds_to_nearest() {
        assert_eq!(snap_to_phrase(3, 2), 4);
        assert_eq!(snap_to_phrase(5, 4), 4);
        assert_eq!(snap_to_phrase(7, 4), 8);
        assert_eq!(snap_to_phrase(1, 4), 4); // minimum one phrase
    }
}
