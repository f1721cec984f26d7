//! Test doubles and harness for pipeline integration tests
//!
//! Fake providers speak the size-coded audio convention of
//! `MemoryProcessor`: one kilobyte of payload per second of audio, so
//! durations survive every file move without decoding anything.

use futures::future::BoxFuture;
use futures::FutureExt;
use spotforge_common::config::Config;
use spotforge_common::timing::TimeSignature;
use spotforge_common::{Error, EventBus, Result};
use spotforge_pipeline::audio::MemoryProcessor;
use spotforge_pipeline::db;
use spotforge_pipeline::models::{
    AdBlueprint, AdContext, CharTiming, FadeSettings, MusicAnalysis, MusicSpec, Production,
    ProductionSettings, VolumeSettings,
};
use spotforge_pipeline::orchestrator::{self, Orchestrator, PipelineDeps};
use spotforge_pipeline::providers::{
    BlueprintGenerator, ComposeRequest, MusicComposer, ScriptRequest, SpeechOutput, SpeechRequest,
    SpeechSynthesizer,
};
use spotforge_pipeline::queue::worker::CancelRegistry;
use spotforge_pipeline::queue::JobQueue;
use spotforge_pipeline::runtime::{self, Providers};
use spotforge_pipeline::services::analyzer::BedAnalyzer;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const BYTES_PER_SECOND: f64 = 1000.0;

/// A plausible blueprint for tests.
pub fn blueprint_for(script: &str, duration_seconds: f64, target_bpm: f64) -> AdBlueprint {
    AdBlueprint {
        script: script.to_string(),
        context: AdContext {
            duration_seconds,
            ad_category: "beverage".to_string(),
        },
        music: MusicSpec {
            target_bpm,
            genre: "modern corporate".to_string(),
            mood: "warm".to_string(),
            key: None,
            arc: vec![],
            button_ending: true,
            musical_structure: None,
            instrumentation: vec!["piano".to_string(), "strings".to_string()],
            composer_direction: None,
        },
        sentence_cues: vec![],
        fades: FadeSettings::default(),
        volume: VolumeSettings::default(),
        tone: Some("warm".to_string()),
    }
}

/// Scripted LLM failures
#[derive(Clone, Copy, PartialEq)]
pub enum LlmFailure {
    None,
    Quota,
    Auth,
}

pub struct FakeLlm {
    pub blueprint: AdBlueprint,
    pub failure: LlmFailure,
}

impl FakeLlm {
    pub fn ok(blueprint: AdBlueprint) -> Self {
        Self {
            blueprint,
            failure: LlmFailure::None,
        }
    }
}

impl BlueprintGenerator for FakeLlm {
    fn generate<'a>(&'a self, _request: &'a ScriptRequest) -> BoxFuture<'a, Result<AdBlueprint>> {
        async move {
            match self.failure {
                LlmFailure::None => Ok(self.blueprint.clone()),
                LlmFailure::Quota => Err(Error::Quota("llm returned 429".into())),
                LlmFailure::Auth => Err(Error::Auth("llm returned 401".into())),
            }
        }
        .boxed()
    }
}

/// TTS double: duration = characters x seconds_per_char, uniform alignment,
/// size-coded audio bytes.
pub struct FakeTts {
    pub seconds_per_char: f64,
    pub delay: Duration,
}

impl FakeTts {
    pub fn with_rate(seconds_per_char: f64) -> Self {
        Self {
            seconds_per_char,
            delay: Duration::ZERO,
        }
    }

    /// Rate that makes `text` take exactly `duration` seconds to speak.
    pub fn rate_for(text: &str, duration: f64) -> f64 {
        duration / text.chars().count().max(1) as f64
    }
}

impl SpeechSynthesizer for FakeTts {
    fn synthesize<'a>(&'a self, request: &'a SpeechRequest) -> BoxFuture<'a, Result<SpeechOutput>> {
        async move {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            let chars: Vec<char> = request.text.chars().collect();
            let duration = chars.len() as f64 * self.seconds_per_char;
            let alignment = request.with_timestamps.then(|| {
                chars
                    .iter()
                    .enumerate()
                    .map(|(i, &ch)| CharTiming {
                        ch,
                        start: i as f64 * self.seconds_per_char,
                        end: (i + 1) as f64 * self.seconds_per_char,
                    })
                    .collect::<Vec<_>>()
            });
            Ok(SpeechOutput {
                audio: vec![0u8; (duration * BYTES_PER_SECOND).round() as usize],
                alignment,
            })
        }
        .boxed()
    }
}

/// TTM double: size-coded bed of exactly the requested duration.
pub struct FakeTtm;

impl MusicComposer for FakeTtm {
    fn compose<'a>(&'a self, request: &'a ComposeRequest) -> BoxFuture<'a, Result<Vec<u8>>> {
        async move {
            Ok(vec![
                0u8;
                (request.duration_seconds * BYTES_PER_SECOND).round() as usize
            ])
        }
        .boxed()
    }
}

/// Analyzer double: perfect synthetic grid at the target BPM over the
/// size-coded bed duration.
pub struct SyntheticAnalyzer;

impl BedAnalyzer for SyntheticAnalyzer {
    fn analyze<'a>(
        &'a self,
        path: &'a Path,
        target_bpm: f64,
        time_sig: TimeSignature,
    ) -> BoxFuture<'a, Result<MusicAnalysis>> {
        async move {
            let bytes = std::fs::metadata(path)
                .map_err(|e| Error::AnalysisFailed(format!("no bed at {}: {}", path.display(), e)))?
                .len();
            let duration = bytes as f64 / BYTES_PER_SECOND;
            Ok(MusicAnalysis::synthetic(
                target_bpm,
                duration,
                time_sig.beats_per_bar,
            ))
        }
        .boxed()
    }
}

/// Analyzer double that always fails, driving the Tier-1 fallback.
pub struct FailingAnalyzer;

impl BedAnalyzer for FailingAnalyzer {
    fn analyze<'a>(
        &'a self,
        _path: &'a Path,
        _target_bpm: f64,
        _time_sig: TimeSignature,
    ) -> BoxFuture<'a, Result<MusicAnalysis>> {
        async move { Err(Error::AnalysisFailed("bed unreadable for analysis".into())) }.boxed()
    }
}

/// A running pipeline against fakes: worker pools up, scheduler driven by
/// hand so each test controls exactly one production.
pub struct Harness {
    pub deps: PipelineDeps,
    pub processor: Arc<MemoryProcessor>,
    shutdown: CancellationToken,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub async fn start(
        llm: Arc<dyn BlueprintGenerator>,
        tts: Arc<dyn SpeechSynthesizer>,
        ttm: Arc<dyn MusicComposer>,
        analyzer: Arc<dyn BedAnalyzer>,
    ) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config {
            upload_dir: dir.path().to_path_buf(),
            queue_url: format!("sqlite://{}/store.db?mode=rwc", dir.path().display()),
            llm_api_key: None,
            tts_api_key: None,
            ttm_api_key: None,
            log_level: "warn".to_string(),
        };
        config.ensure_dirs().expect("upload tree");

        let pool = db::init_pool(&config.queue_url).await.expect("store");
        let events = EventBus::new(256);
        let queue = JobQueue::new(pool.clone(), events.clone());
        let processor = Arc::new(MemoryProcessor::new());
        let deps = PipelineDeps {
            db: pool,
            queue,
            events,
            config,
            processor: processor.clone(),
            analyzer,
            cancels: CancelRegistry::default(),
        };

        let shutdown = CancellationToken::new();
        let providers = Providers { llm, tts, ttm };
        runtime::spawn_worker_pools(&deps, &providers, &shutdown);

        Self {
            deps,
            processor,
            shutdown,
            _dir: dir,
        }
    }

    /// Submit one production and drive it to a terminal state.
    pub async fn produce(
        &self,
        prompt: &str,
        tone: &str,
        settings: ProductionSettings,
    ) -> Production {
        let production = orchestrator::submit(&self.deps.db, "test", prompt, tone, settings)
            .await
            .expect("submit");
        Orchestrator::new(self.deps.clone())
            .run_production(production.id)
            .await
            .expect("driver");
        db::productions::get(&self.deps.db, production.id)
            .await
            .expect("reload")
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
