//! Duration enforcement
//!
//! Two phases keep the finished ad inside its target duration:
//!
//! - **TTS-time**: the voice alone, against `ad_duration - 2.5 s`, engaging
//!   only when the ratio leaves [0.80, 1.12].
//! - **Mix-time**: the final mix, against `ad_duration`, engaging only when
//!   the mix runs past `ad_duration × 1.05`.
//!
//! Both stretch with a speed-only ratio clamped to [0.85, 1.25]. A refusal
//! from the toolchain is logged and skipped, never fatal.

use spotforge_common::{Error, Result};
use std::path::Path;

use crate::audio::AudioProcessor;

/// Seconds reserved for pre/post-roll breathing room at TTS time
pub const TTS_TARGET_MARGIN: f64 = 2.5;
/// Voice ratio window that needs no correction
pub const TTS_RATIO_LOW: f64 = 0.80;
pub const TTS_RATIO_HIGH: f64 = 1.12;
/// Speed-only scaling clamp
pub const SCALE_MIN: f64 = 0.85;
pub const SCALE_MAX: f64 = 1.25;
/// Mix-time overrun tolerance
pub const MIX_OVERRUN: f64 = 1.05;

/// Desired voice duration, or None when the voice is close enough.
pub fn tts_plan(actual_duration: f64, ad_duration: f64) -> Option<f64> {
    let target = (ad_duration - TTS_TARGET_MARGIN).max(1.0);
    let ratio = actual_duration / target;
    if (TTS_RATIO_LOW..=TTS_RATIO_HIGH).contains(&ratio) {
        return None;
    }
    let clamped = ratio.clamp(SCALE_MIN, SCALE_MAX);
    Some(actual_duration / clamped)
}

/// Desired mix duration, or None when the mix is within tolerance.
pub fn mix_plan(actual_duration: f64, ad_duration: f64) -> Option<f64> {
    if actual_duration <= ad_duration * MIX_OVERRUN {
        return None;
    }
    let ratio = (actual_duration / ad_duration).clamp(SCALE_MIN, SCALE_MAX);
    Some(actual_duration / ratio)
}

/// Apply the TTS-time phase. Returns the new duration when the voice was
/// scaled, None when it was left alone (including a logged refusal).
pub async fn enforce_tts(
    processor: &dyn AudioProcessor,
    input: &Path,
    output: &Path,
    actual_duration: f64,
    ad_duration: f64,
) -> Result<Option<f64>> {
    let Some(desired) = tts_plan(actual_duration, ad_duration) else {
        return Ok(None);
    };
    match processor.stretch_to_duration(input, desired, output).await {
        Ok(()) => {
            tracing::info!(
                from = actual_duration,
                to = desired,
                "voice scaled to the ad duration window"
            );
            Ok(Some(desired))
        }
        Err(Error::ScalingRefused(reason)) => {
            tracing::warn!(reason, "voice scaling refused; keeping original take");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Apply the mix-time phase with the same refusal policy.
pub async fn enforce_mix(
    processor: &dyn AudioProcessor,
    input: &Path,
    output: &Path,
    actual_duration: f64,
    ad_duration: f64,
) -> Result<Option<f64>> {
    let Some(desired) = mix_plan(actual_duration, ad_duration) else {
        return Ok(None);
    };
    match processor.stretch_to_duration(input, desired, output).await {
        Ok(()) => {
            tracing::info!(
                from = actual_duration,
                to = desired,
                "final mix scaled toward the target duration"
            );
            Ok(Some(desired))
        }
        Err(Error::ScalingRefused(reason)) => {
            tracing::warn!(reason, "mix scaling refused; keeping the long cut");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_window_voice_needs_no_scaling() {
        // Target 27.5: anything in [22.0, 30.8] passes
        assert_eq!(tts_plan(27.5, 30.0), None);
        assert_eq!(tts_plan(22.0, 30.0), None);
        assert_eq!(tts_plan(30.8, 30.0), None);
    }

    #[test]
    fn long_voice_scales_down_with_clamp() {
        // 38 s against 27.5: ratio 1.38 clamps to 1.25
        let desired = tts_plan(38.0, 30.0).unwrap();
        assert!((desired - 38.0 / 1.25).abs() < 1e-9);
    }

    #[test]
    fn short_voice_scales_up_with_clamp() {
        // 18 s against 27.5: ratio 0.654 clamps to 0.85
        let desired = tts_plan(18.0, 30.0).unwrap();
        assert!((desired - 18.0 / 0.85).abs() < 1e-9);
        assert!(desired > 18.0);
    }

    #[test]
    fn mix_within_tolerance_is_untouched() {
        assert_eq!(mix_plan(31.0, 30.0), None);
        assert_eq!(mix_plan(31.5, 30.0), None);
    }

    #[test]
    fn overlong_mix_scales_to_target() {
        let desired = mix_plan(33.0, 30.0).unwrap();
        assert!((desired - 30.0).abs() < 1e-9);
    }

    #[test]
    fn extreme_overrun_clamps_the_ratio() {
        // 45 s against 30: ratio 1.5 clamps to 1.25, landing at 36
        let desired = mix_plan(45.0, 30.0).unwrap();
        assert!((desired - 36.0).abs() < 1e-9);
    }
}
