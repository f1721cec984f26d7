//! End-to-end pipeline scenarios against fake providers and the in-memory
//! audio processor.

mod helpers;

use futures::future::BoxFuture;
use futures::FutureExt;
use helpers::{
    blueprint_for, FailingAnalyzer, FakeLlm, FakeTtm, FakeTts, Harness, LlmFailure,
    SyntheticAnalyzer,
};
use spotforge_common::{Error, ProductionStatus, Result};
use spotforge_pipeline::models::ProductionSettings;
use spotforge_pipeline::orchestrator::mix::MixOutcome;
use spotforge_pipeline::orchestrator::{self, Orchestrator};
use spotforge_pipeline::providers::{SpeechOutput, SpeechRequest, SpeechSynthesizer};
use sqlx::Row;
use std::sync::Arc;
use std::time::Duration;

const SCRIPT: &str = "Introducing Solstice Coffee. Slow roasted in small batches. \
                      One cup and mornings feel different. Rich, smooth, never bitter. \
                      Try Solstice today.";

fn default_settings() -> ProductionSettings {
    ProductionSettings {
        voice_id: "river".to_string(),
        target_duration_seconds: 30.0,
        ..Default::default()
    }
}

/// Pull the mixing job's result document back out of the queue.
async fn mix_outcome(harness: &Harness) -> MixOutcome {
    let row = sqlx::query("SELECT result FROM jobs WHERE queue = 'audio_mixing' LIMIT 1")
        .fetch_one(&harness.deps.db)
        .await
        .expect("mixing job row");
    let result: String = row.get("result");
    serde_json::from_str(&result).expect("mix outcome")
}

#[tokio::test]
async fn happy_path_thirty_second_ad() {
    let harness = Harness::start(
        Arc::new(FakeLlm::ok(blueprint_for(SCRIPT, 30.0, 100.0))),
        Arc::new(FakeTts::with_rate(FakeTts::rate_for(SCRIPT, 24.0))),
        Arc::new(FakeTtm),
        Arc::new(SyntheticAnalyzer),
    )
    .await;

    let production = harness
        .produce("Promote a coffee brand", "warm", default_settings())
        .await;

    assert_eq!(production.status, ProductionStatus::Completed);
    assert_eq!(production.progress, 100);
    assert!(production.error_kind.is_none());

    let plan = production.musical_blueprint.as_ref().expect("blueprint");
    assert!((plan.bar_duration - 2.4).abs() < 1e-9);
    assert_eq!(plan.total_bars, 13);
    assert_eq!(plan.pre_roll_bars, 2);
    assert_eq!(plan.post_roll_bars, 1);
    assert!((plan.voice_entry_point - 4.8).abs() < 1e-9);

    let duration = production.output_duration.expect("output duration");
    assert!(
        (28.5..=31.5).contains(&duration),
        "final duration {} outside the window",
        duration
    );
    let output = production.output_path.as_ref().expect("output path");
    assert!(output.exists(), "final mix file must exist");
    assert!(output.starts_with(harness.deps.config.productions_dir()));

    // Within one LU of the -16 target, no second pass needed
    let first = production.loudness.first_pass_lufs.expect("measurement");
    assert!((first - (-16.0)).abs() <= 1.0);
    assert!(production.loudness.second_pass_lufs.is_none());

    // Working directory is collected on the terminal state
    assert!(!harness.deps.config.work_dir(production.id).exists());
}

#[tokio::test]
async fn two_pass_loudness_correction() {
    let harness = Harness::start(
        Arc::new(FakeLlm::ok(blueprint_for(SCRIPT, 30.0, 100.0))),
        Arc::new(FakeTts::with_rate(FakeTts::rate_for(SCRIPT, 24.0))),
        Arc::new(FakeTtm),
        Arc::new(SyntheticAnalyzer),
    )
    .await;
    // First mix measures hot at -12; the corrected mix lands at -15.5
    harness.processor.script_loudness(&[-12.0, -15.5]);

    let production = harness
        .produce("Promote a coffee brand", "warm", default_settings())
        .await;

    assert_eq!(production.status, ProductionStatus::Completed);
    assert!((production.loudness.first_pass_lufs.unwrap() - (-12.0)).abs() < 1e-9);
    let second = production.loudness.second_pass_lufs.expect("second pass");
    assert!((second - (-16.0)).abs() <= 2.0);
    // Music volume scaled by 0.7 from the default 0.3
    let adjusted = production.loudness.adjusted_music_volume.expect("adjusted");
    assert!((adjusted - 0.21).abs() < 1e-9);

    let mixes = harness
        .processor
        .operations()
        .iter()
        .filter(|op| op.starts_with("mix "))
        .count();
    assert_eq!(mixes, 2, "exactly one corrective re-mix");
}

#[tokio::test]
async fn analyzer_failure_degrades_to_sentence_ducking() {
    let harness = Harness::start(
        Arc::new(FakeLlm::ok(blueprint_for(SCRIPT, 30.0, 100.0))),
        Arc::new(FakeTts::with_rate(FakeTts::rate_for(SCRIPT, 24.0))),
        Arc::new(FakeTtm),
        Arc::new(FailingAnalyzer),
    )
    .await;

    let production = harness
        .produce("Promote a coffee brand", "warm", default_settings())
        .await;

    assert_eq!(production.status, ProductionStatus::Completed);
    assert!(production
        .warnings
        .iter()
        .any(|w| w.contains("analysis failed")));

    // Tier 1: the voice still enters at the blueprint's pre-roll
    let plan = production.musical_blueprint.as_ref().expect("blueprint");
    let outcome = mix_outcome(&harness).await;
    assert!((outcome.voice_delay - plan.pre_roll_duration).abs() < 1e-9);
    assert!(outcome.alignment_score.is_none());

    // The per-sentence duck curve was still baked into the bed
    assert!(harness
        .processor
        .operations()
        .iter()
        .any(|op| op.starts_with("apply_volume_curve")));
}

#[tokio::test]
async fn overlong_tts_is_scaled_twice() {
    let harness = Harness::start(
        Arc::new(FakeLlm::ok(blueprint_for(SCRIPT, 30.0, 100.0))),
        // 38 seconds of speech against a 30-second ad
        Arc::new(FakeTts::with_rate(FakeTts::rate_for(SCRIPT, 38.0))),
        Arc::new(FakeTtm),
        Arc::new(SyntheticAnalyzer),
    )
    .await;

    let production = harness
        .produce("Promote a coffee brand", "warm", default_settings())
        .await;

    assert_eq!(production.status, ProductionStatus::Completed);

    // Voice phase clamps the stretch at 1.25: 38 -> 30.4
    let voice = production.voice_asset.as_ref().expect("voice asset");
    assert!((voice.duration - 38.0 / 1.25).abs() < 0.01);
    // Sentence timings scaled with the audio
    let last = voice.sentence_timings.last().expect("timings");
    assert!(last.end <= voice.duration + 1e-6);

    // Post-mix enforcement brings the final inside 30 x 1.05
    let duration = production.output_duration.expect("output duration");
    assert!(
        duration <= 30.0 * 1.05 + 1e-6,
        "final duration {} exceeds the ceiling",
        duration
    );
}

#[tokio::test]
async fn llm_quota_falls_back_to_deterministic_blueprint() {
    let harness = Harness::start(
        Arc::new(FakeLlm {
            blueprint: blueprint_for(SCRIPT, 30.0, 100.0),
            failure: LlmFailure::Quota,
        }),
        Arc::new(FakeTts::with_rate(0.06)),
        Arc::new(FakeTtm),
        Arc::new(SyntheticAnalyzer),
    )
    .await;

    let production = harness
        .produce("Promote a coffee brand", "warm", default_settings())
        .await;

    assert_eq!(production.status, ProductionStatus::Completed);
    assert!(production.warnings.iter().any(|w| w.contains("fallback")));

    let script = production.script.as_ref().expect("script");
    assert_eq!(script.blueprint.music.genre, "modern corporate");
    let labels: Vec<&str> = script
        .blueprint
        .music
        .arc
        .iter()
        .map(|s| s.label.as_str())
        .collect();
    assert_eq!(labels, vec!["hook", "build", "peak", "cta"]);

    let plan = production.musical_blueprint.as_ref().expect("blueprint");
    assert_eq!(plan.pre_roll_bars, 2);
    assert_eq!(plan.post_roll_bars, 1);
}

#[tokio::test]
async fn llm_auth_failure_also_degrades_at_the_script_stage() {
    let harness = Harness::start(
        Arc::new(FakeLlm {
            blueprint: blueprint_for(SCRIPT, 30.0, 100.0),
            failure: LlmFailure::Auth,
        }),
        Arc::new(FakeTts::with_rate(0.06)),
        Arc::new(FakeTtm),
        Arc::new(SyntheticAnalyzer),
    )
    .await;

    let production = harness
        .produce("Promote a coffee brand", "warm", default_settings())
        .await;
    assert_eq!(production.status, ProductionStatus::Completed);
    assert!(production.warnings.iter().any(|w| w.contains("AUTH")));
}

/// TTS double that always fails authentication.
struct UnauthorizedTts;

impl SpeechSynthesizer for UnauthorizedTts {
    fn synthesize<'a>(&'a self, _request: &'a SpeechRequest) -> BoxFuture<'a, Result<SpeechOutput>> {
        async move { Err(Error::Auth("tts returned 401".into())) }.boxed()
    }
}

#[tokio::test]
async fn tts_auth_failure_fails_the_production() {
    let harness = Harness::start(
        Arc::new(FakeLlm::ok(blueprint_for(SCRIPT, 30.0, 100.0))),
        Arc::new(UnauthorizedTts),
        Arc::new(FakeTtm),
        Arc::new(SyntheticAnalyzer),
    )
    .await;

    let production = harness
        .produce("Promote a coffee brand", "warm", default_settings())
        .await;

    assert_eq!(production.status, ProductionStatus::Failed);
    assert_eq!(production.error_kind.as_deref(), Some("AUTH"));
    assert!(production.error_message.is_some());
}

#[tokio::test]
async fn cancellation_mid_tts_freezes_progress() {
    let harness = Harness::start(
        Arc::new(FakeLlm::ok(blueprint_for(SCRIPT, 30.0, 100.0))),
        Arc::new(FakeTts {
            seconds_per_char: 0.1,
            delay: Duration::from_secs(30),
        }),
        Arc::new(FakeTtm),
        Arc::new(SyntheticAnalyzer),
    )
    .await;

    let production = orchestrator::submit(
        &harness.deps.db,
        "test",
        "Promote a coffee brand",
        "warm",
        default_settings(),
    )
    .await
    .expect("submit");
    let production_id = production.id;

    let deps = harness.deps.clone();
    let driver = tokio::spawn(async move {
        Orchestrator::new(deps).run_production(production_id).await
    });

    // Wait until the TTS job is actually running
    let mut running = false;
    for _ in 0..100 {
        let count: i64 = sqlx::query(
            "SELECT COUNT(*) AS n FROM jobs WHERE queue = 'tts_generation' AND status = 'RUNNING'",
        )
        .fetch_one(&harness.deps.db)
        .await
        .expect("job probe")
        .get("n");
        if count > 0 {
            running = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(running, "tts job never started");

    orchestrator::cancel(
        &harness.deps.db,
        &harness.deps.queue,
        &harness.deps.events,
        &harness.deps.cancels,
        production_id,
    )
    .await
    .expect("cancel");

    driver.await.expect("driver task").expect("driver result");

    let production = spotforge_pipeline::db::productions::get(&harness.deps.db, production_id)
        .await
        .expect("reload");
    assert_eq!(production.status, ProductionStatus::Cancelled);
    // Progress frozen at the script stage's 20
    assert_eq!(production.progress, 20);
    assert!(production.voice_asset.is_none());

    // No partial voice file survives
    let voice_path = harness
        .deps
        .config
        .audio_dir()
        .join(format!("voice_{}.mp3", production_id));
    assert!(!voice_path.exists());

    // The in-flight job ended CANCELLED
    let status: String =
        sqlx::query("SELECT status FROM jobs WHERE queue = 'tts_generation' LIMIT 1")
            .fetch_one(&harness.deps.db)
            .await
            .expect("job row")
            .get("status");
    assert_eq!(status, "CANCELLED");
}
