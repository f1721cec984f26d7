//! The audio-mixing stage
//!
//! Runs inside the AUDIO_MIXING worker as one job with per-step progress:
//! bar-aligned pre-trim or loop-extension, beat analysis and alignment
//! (Tier 3 with a Tier-1 sentence-curve fallback), ducking, the mix itself,
//! two-pass loudness convergence (Tier 4), and post-mix duration
//! enforcement. Status moves through ANALYZING, ALIGNING, MIXING,
//! MEASURING and ADJUSTING on the production as the steps land.

use serde::{Deserialize, Serialize};
use spotforge_common::status::StageEvent;
use spotforge_common::{Error, Result};
use std::path::PathBuf;
use uuid::Uuid;

use super::PipelineDeps;
use crate::audio::{MixOptions, MusicInput, VoiceInput, VolumeSegment};
use crate::db::productions;
use crate::models::{
    AlignmentResult, MusicAnalysis, MusicAsset, MusicVariant, MusicalBlueprint, SentenceTiming,
};
use crate::queue::worker::WorkerContext;
use crate::services::aligner::{self, AlignerParams};
use crate::services::duration;

/// Bed length mismatches under this tolerance skip the pre-trim entirely
const BED_LENGTH_TOLERANCE: f64 = 0.05;
/// Loudness deviation that triggers the second pass
const LOUDNESS_TOLERANCE_LU: f64 = 3.0;
/// Music volume correction factors and clamp for the second pass
const VOLUME_DOWN: f64 = 0.7;
const VOLUME_UP: f64 = 1.3;
const MUSIC_VOLUME_MIN: f64 = 0.05;
const MUSIC_VOLUME_MAX: f64 = 0.5;
/// The mix itself never runs past this multiple of the target; the
/// post-mix enforcer closes the remaining gap with a speed-only stretch
const MIX_MAX_FACTOR: f64 = 1.10;

/// What the mixing job hands back to the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MixOutcome {
    pub output_path: PathBuf,
    pub duration: f64,
    pub voice_delay: f64,
    pub first_pass_lufs: Option<f64>,
    pub second_pass_lufs: Option<f64>,
    pub adjusted_music_volume: Option<f64>,
    pub alignment_score: Option<f64>,
}

/// How the alignment step resolved
enum AlignmentOutcome {
    /// Full beat-aware alignment
    Tier3(AlignmentResult),
    /// Sentence-based ducking only; `immediate_entry` drops the pre-roll
    Tier1 { immediate_entry: bool },
}

/// Execute steps 6-11 for one production.
pub async fn run_mixing_stage(
    deps: &PipelineDeps,
    production_id: Uuid,
    ctx: &WorkerContext,
) -> Result<MixOutcome> {
    let mut production = productions::get(&deps.db, production_id).await?;
    let plan = production
        .musical_blueprint
        .clone()
        .ok_or_else(|| Error::Internal("mixing without a musical blueprint".into()))?;
    let voice = production
        .voice_asset
        .clone()
        .ok_or_else(|| Error::Internal("mixing without a voice asset".into()))?;
    let bed = production
        .music_asset
        .clone()
        .ok_or_else(|| Error::Internal("mixing without a music asset".into()))?;
    let cue_multipliers: Vec<f64> = production
        .script
        .as_ref()
        .map(|s| {
            s.blueprint
                .sentence_cues
                .iter()
                .map(|c| c.music_volume)
                .collect()
        })
        .unwrap_or_default();

    let workdir = deps.config.work_dir(production_id);
    std::fs::create_dir_all(&workdir)?;
    let music_dir = deps.config.music_dir();
    std::fs::create_dir_all(&music_dir)?;
    let ext = production.settings.output_format.extension();

    // Step 6: bar-aligned pre-trim or loop-extension to the blueprint total
    let mut current_bed = bed;
    let bed_duration = deps.processor.get_duration(&current_bed.path).await?;
    let target = plan.mixing_plan.music_trim_duration;
    if (bed_duration - target).abs() > BED_LENGTH_TOLERANCE {
        let variant = if bed_duration > target {
            MusicVariant::Trimmed
        } else {
            MusicVariant::Looped
        };
        let out = music_dir.join(format!("{}_{}.{}", variant.as_str(), Uuid::new_v4(), ext));
        match variant {
            MusicVariant::Trimmed => deps.processor.trim(&current_bed.path, target, &out).await?,
            _ => {
                deps.processor
                    .extend_by_loop(&current_bed.path, target, &out)
                    .await?
            }
        }
        tracing::info!(
            production_id = %production_id,
            from = bed_duration,
            to = target,
            variant = variant.as_str(),
            "bed length aligned to the bar grid"
        );
        current_bed = current_bed.variant_of(variant, out, target);
        production.music_asset = Some(current_bed.clone());
    }
    production.set_progress(65);
    deps.save_and_emit(&production, None).await?;
    ctx.progress(20).await;

    // Step 7: analyze and align (Tier 3), degrading to Tier 1 on failure
    production.advance(StageEvent::AnalysisStarted)?;
    production.set_progress(70);
    deps.save_and_emit(&production, None).await?;

    let outcome = match deps
        .analyzer
        .analyze(&current_bed.path, plan.final_bpm, plan.time_signature)
        .await
    {
        Ok(analysis) => {
            production.advance(StageEvent::AlignmentStarted)?;
            production.set_progress(75);
            deps.save_and_emit(&production, None).await?;

            let params = AlignerParams {
                pre_roll_duration: plan.pre_roll_duration,
                post_roll_bars: plan.post_roll_bars,
                bar_duration: plan.bar_duration,
                duck_level: production.settings.ducking_amount,
                multipliers: cue_multipliers,
            };
            match aligner::align(&analysis, &voice.sentence_timings, &params) {
                Ok(alignment) => {
                    if let Some(refined) = refine_bpm(&analysis, &plan) {
                        current_bed.bpm = refined;
                        production.music_asset = Some(current_bed.clone());
                    }
                    AlignmentOutcome::Tier3(alignment)
                }
                Err(Error::AlignmentInfeasible(reason)) => {
                    production.add_warning(format!(
                        "alignment infeasible ({}); voice enters immediately",
                        reason
                    ));
                    AlignmentOutcome::Tier1 {
                        immediate_entry: true,
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::AnalysisFailed(reason)) => {
            production.add_warning(format!(
                "bed analysis failed ({}); sentence-based ducking applied",
                reason
            ));
            AlignmentOutcome::Tier1 {
                immediate_entry: false,
            }
        }
        Err(e) => return Err(e),
    };

    // Voice entry: Tier 3 decides; Tier 1 keeps the blueprint's pre-roll
    // unless the bed cannot hold it at all.
    let voice_delay = match &outcome {
        AlignmentOutcome::Tier3(alignment) => alignment.voice_delay,
        AlignmentOutcome::Tier1 {
            immediate_entry: true,
        } => 0.0,
        AlignmentOutcome::Tier1 { .. } => plan.voice_entry_point,
    };

    // Button ending: cut the bed at the aligner's cutoff when it is shorter
    // than the prepared bed
    if let AlignmentOutcome::Tier3(alignment) = &outcome {
        let prepared = deps.processor.get_duration(&current_bed.path).await?;
        if alignment.music_cutoff_time < prepared - BED_LENGTH_TOLERANCE {
            let out = music_dir.join(format!(
                "{}_{}.{}",
                MusicVariant::Cut.as_str(),
                Uuid::new_v4(),
                ext
            ));
            deps.processor
                .trim(&current_bed.path, alignment.music_cutoff_time, &out)
                .await?;
            current_bed =
                current_bed.variant_of(MusicVariant::Cut, out, alignment.music_cutoff_time);
            production.music_asset = Some(current_bed.clone());
            tracing::info!(
                production_id = %production_id,
                cutoff = alignment.music_cutoff_time,
                bar = alignment.button_ending_bar,
                "bed cut for the button ending"
            );
        }
    }
    ctx.progress(40).await;

    // Step 8: duck the bed, unless the mixer is asked to sidechain live
    if !production.settings.audio_ducking {
        let bed_len = deps.processor.get_duration(&current_bed.path).await?;
        let segments = match &outcome {
            AlignmentOutcome::Tier3(alignment) => alignment
                .ducking_segments
                .iter()
                .map(|s| VolumeSegment {
                    start: s.start,
                    end: s.end,
                    multiplier: s.level,
                })
                .collect::<Vec<_>>(),
            AlignmentOutcome::Tier1 { .. } => {
                tier1_segments(&plan, &voice.sentence_timings, voice_delay, bed_len)
            }
        };
        if !segments.is_empty() {
            let out = music_dir.join(format!(
                "{}_{}.{}",
                MusicVariant::Ducked.as_str(),
                Uuid::new_v4(),
                ext
            ));
            deps.processor
                .apply_volume_curve(&current_bed.path, &segments, bed_len, &out)
                .await?;
            current_bed = current_bed.variant_of(MusicVariant::Ducked, out, bed_len);
            production.music_asset = Some(current_bed.clone());
        }
    }
    deps.save_and_emit(&production, None).await?;
    ctx.progress(55).await;

    // Step 9: the mix
    production.advance(StageEvent::MixStarted)?;
    production.set_progress(80);
    deps.save_and_emit(&production, None).await?;

    let settings = production.settings.clone();
    let mut music_volume = settings.music_volume;
    let build_mix_options = |music_volume: f64, bed: &MusicAsset| MixOptions {
        voice: Some(VoiceInput {
            path: voice.path.clone(),
            delay: voice_delay,
            volume: settings.voice_volume,
            fade_in: settings.fade_in.clamp(0.02, 0.15),
            fade_out: settings.fade_out.clamp(0.5, 3.0),
            fade_curve: settings.fade_curve,
        }),
        music: Some(MusicInput {
            path: bed.path.clone(),
            volume: music_volume,
        }),
        audio_ducking: settings.audio_ducking,
        ducking_amount: settings.ducking_amount,
        normalize_loudness: settings.normalize_loudness,
        loudness_target_lufs: settings.loudness_target_lufs,
        loudness_true_peak: settings.loudness_true_peak,
        max_duration: Some(settings.target_duration_seconds * MIX_MAX_FACTOR),
        output_format: settings.output_format,
    };

    let first_mix = workdir.join(format!("mix_pass1.{}", ext));
    deps.processor
        .mix(&build_mix_options(music_volume, &current_bed), &first_mix)
        .await?;
    let mut final_path = first_mix;
    ctx.progress(70).await;

    // Step 10: two-pass loudness convergence (Tier 4)
    let mut first_pass_lufs = None;
    let mut second_pass_lufs = None;
    let mut adjusted_music_volume = None;
    if settings.normalize_loudness {
        production.advance(StageEvent::MeasurementStarted)?;
        production.set_progress(85);
        deps.save_and_emit(&production, None).await?;

        match deps.processor.measure_loudness(&final_path).await {
            Ok(measured) => {
                first_pass_lufs = Some(measured);
                let deviation = measured - settings.loudness_target_lufs;
                if deviation.abs() > LOUDNESS_TOLERANCE_LU {
                    production.advance(StageEvent::AdjustmentStarted)?;
                    production.set_progress(90);
                    deps.save_and_emit(&production, None).await?;

                    let factor = if deviation > 0.0 { VOLUME_DOWN } else { VOLUME_UP };
                    music_volume =
                        (music_volume * factor).clamp(MUSIC_VOLUME_MIN, MUSIC_VOLUME_MAX);
                    adjusted_music_volume = Some(music_volume);
                    tracing::info!(
                        production_id = %production_id,
                        measured,
                        target = settings.loudness_target_lufs,
                        music_volume,
                        "re-mixing with corrected music volume"
                    );

                    let second_mix = workdir.join(format!("mix_pass2.{}", ext));
                    deps.processor
                        .mix(&build_mix_options(music_volume, &current_bed), &second_mix)
                        .await?;
                    final_path = second_mix;
                    match deps.processor.measure_loudness(&final_path).await {
                        Ok(second) => second_pass_lufs = Some(second),
                        Err(Error::LoudnessMeasureFailed(reason)) => {
                            production.add_warning(format!(
                                "second loudness measurement failed ({}); keeping the re-mix",
                                reason
                            ));
                        }
                        Err(e) => return Err(e),
                    }
                }
            }
            Err(Error::LoudnessMeasureFailed(reason)) => {
                production.add_warning(format!(
                    "loudness measurement failed ({}); keeping the first mix",
                    reason
                ));
            }
            Err(e) => return Err(e),
        }
    }
    production.loudness.first_pass_lufs = first_pass_lufs;
    production.loudness.second_pass_lufs = second_pass_lufs;
    production.loudness.adjusted_music_volume = adjusted_music_volume;
    deps.save_and_emit(&production, None).await?;
    ctx.progress(85).await;

    // Step 11: post-mix duration enforcement
    let mut mix_duration = deps.processor.get_duration(&final_path).await?;
    let stretched = workdir.join(format!("mix_fit.{}", ext));
    if let Some(new_duration) = duration::enforce_mix(
        deps.processor.as_ref(),
        &final_path,
        &stretched,
        mix_duration,
        settings.target_duration_seconds,
    )
    .await?
    {
        final_path = stretched;
        mix_duration = new_duration;
    }
    productions::save(&deps.db, &production).await?;
    ctx.progress(95).await;

    Ok(MixOutcome {
        output_path: final_path,
        duration: mix_duration,
        voice_delay,
        first_pass_lufs,
        second_pass_lufs,
        adjusted_music_volume,
        alignment_score: match &outcome {
            AlignmentOutcome::Tier3(alignment) => Some(alignment.alignment_score),
            AlignmentOutcome::Tier1 { .. } => None,
        },
    })
}

/// Tier-1 duck windows: the blueprint's per-sentence levels re-anchored to
/// the actual voice entry.
fn tier1_segments(
    plan: &MusicalBlueprint,
    sentences: &[SentenceTiming],
    voice_delay: f64,
    bed_len: f64,
) -> Vec<VolumeSegment> {
    sentences
        .iter()
        .enumerate()
        .filter_map(|(i, sentence)| {
            let level = plan
                .mixing_plan
                .ducking_points
                .get(i)
                .map(|p| p.level)
                .unwrap_or(0.3);
            let start = (voice_delay + sentence.start).clamp(0.0, bed_len);
            let end = (voice_delay + sentence.end).clamp(0.0, bed_len);
            (end > start).then_some(VolumeSegment {
                start,
                end,
                multiplier: level,
            })
        })
        .collect()
}

/// Adopt the analyzer's tempo when it differs meaningfully from the plan.
fn refine_bpm(analysis: &MusicAnalysis, plan: &MusicalBlueprint) -> Option<f64> {
    ((analysis.detected_bpm - plan.final_bpm).abs() > 0.5).then_some(analysis.detected_bpm)
}
