//! Job handlers for the four stage queues
//!
//! Each worker maps a provider call (or the mixing stage) into a job
//! result document. Provider errors keep their kinds so the queue can
//! decide retryability and the orchestrator can pick fallback paths.

use futures::future::BoxFuture;
use futures::FutureExt;
use spotforge_common::{Error, Result};
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::productions;
use crate::models::{
    CharTiming, Job, JobPayload, MusicAsset, MusicVariant, SentenceTiming, VoiceAsset, WordTiming,
};
use crate::orchestrator::{mix, PipelineDeps};
use crate::providers::{
    BlueprintGenerator, ComposeRequest, MusicComposer, ScriptRequest, SpeechRequest,
    SpeechSynthesizer,
};
use crate::queue::worker::{JobHandler, WorkerContext};
use crate::services::{duration, sentences};

/// SCRIPT_GENERATION: ask the LLM for the ad blueprint.
pub struct ScriptWorker {
    generator: Arc<dyn BlueprintGenerator>,
}

impl ScriptWorker {
    pub fn new(generator: Arc<dyn BlueprintGenerator>) -> Self {
        Self { generator }
    }
}

impl JobHandler for ScriptWorker {
    fn handle<'a>(
        &'a self,
        job: &'a Job,
        ctx: &'a WorkerContext,
    ) -> BoxFuture<'a, Result<serde_json::Value>> {
        async move {
            let JobPayload::ScriptGeneration {
                prompt,
                duration_seconds,
                tone,
                ..
            } = &job.payload
            else {
                return Err(Error::Internal("script worker got a foreign payload".into()));
            };

            ctx.progress(10).await;
            let request = ScriptRequest {
                prompt: prompt.clone(),
                duration_seconds: *duration_seconds,
                tone: tone.clone(),
            };
            let blueprint = self.generator.generate(&request).await?;
            ctx.progress(90).await;
            Ok(serde_json::to_value(blueprint)?)
        }
        .boxed()
    }
}

/// TTS_GENERATION: synthesize the voice with timestamps, derive sentence
/// and word timings, and enforce the TTS-time duration window.
pub struct VoiceWorker {
    deps: PipelineDeps,
    synthesizer: Arc<dyn SpeechSynthesizer>,
}

impl VoiceWorker {
    pub fn new(deps: PipelineDeps, synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        Self { deps, synthesizer }
    }
}

impl JobHandler for VoiceWorker {
    fn handle<'a>(
        &'a self,
        job: &'a Job,
        ctx: &'a WorkerContext,
    ) -> BoxFuture<'a, Result<serde_json::Value>> {
        async move {
            let JobPayload::TtsGeneration {
                production_id,
                voice_id,
            } = &job.payload
            else {
                return Err(Error::Internal("voice worker got a foreign payload".into()));
            };

            let production = productions::get(&self.deps.db, *production_id).await?;
            let script = production
                .script
                .as_ref()
                .ok_or_else(|| Error::Internal("voice stage without a script".into()))?;
            let text = script.text.clone();
            let ad_duration = production.settings.target_duration_seconds;

            ctx.progress(10).await;
            let speech = self
                .synthesizer
                .synthesize(&SpeechRequest {
                    voice_id: voice_id.clone(),
                    text: text.clone(),
                    with_timestamps: true,
                })
                .await?;
            ctx.progress(50).await;

            let audio_dir = self.deps.config.audio_dir();
            std::fs::create_dir_all(&audio_dir)?;
            let voice_path = audio_dir.join(format!("voice_{}.mp3", production_id));
            write_atomic(&voice_path, &speech.audio)?;

            // Timings: the character alignment when usable, a proportional
            // estimate otherwise
            let mut alignment = speech.alignment.unwrap_or_default();
            let (mut sentence_timings, mut word_timings) = if alignment.is_empty() {
                tracing::warn!(
                    production_id = %production_id,
                    "provider returned no alignment; estimating timings"
                );
                estimated_timings(&text, 0.0)
            } else {
                match sentences::extract_sentence_timings(&text, &alignment) {
                    Ok(sentence_timings) => {
                        let word_timings = sentences::extract_word_timings(&text, &alignment)?;
                        (sentence_timings, word_timings)
                    }
                    Err(Error::AlignmentMismatch(reason)) => {
                        tracing::warn!(
                            production_id = %production_id,
                            reason,
                            "alignment mismatch; estimating timings"
                        );
                        alignment.clear();
                        estimated_timings(&text, 0.0)
                    }
                    Err(e) => return Err(e),
                }
            };

            let mut actual = self.deps.processor.get_duration(&voice_path).await?;
            if sentence_timings.is_empty()
                || sentence_timings.last().map(|s| s.end).unwrap_or(0.0) <= 0.0
            {
                let (s, w) = estimated_timings(&text, actual);
                sentence_timings = s;
                word_timings = w;
            }
            ctx.progress(70).await;

            // TTS-time duration enforcement, with timings scaled alongside
            let fitted = audio_dir.join(format!("voice_{}_fit.mp3", production_id));
            if let Some(new_duration) = duration::enforce_tts(
                self.deps.processor.as_ref(),
                &voice_path,
                &fitted,
                actual,
                ad_duration,
            )
            .await?
            {
                std::fs::rename(&fitted, &voice_path)?;
                let factor = new_duration / actual;
                scale_timings(
                    &mut alignment,
                    &mut sentence_timings,
                    &mut word_timings,
                    factor,
                );
                actual = new_duration;
            }
            ctx.progress(95).await;

            let asset = VoiceAsset {
                id: Uuid::new_v4(),
                path: voice_path,
                duration: actual,
                alignment,
                sentence_timings,
                word_timings,
                target_duration: (ad_duration - duration::TTS_TARGET_MARGIN).max(1.0),
            };
            Ok(serde_json::to_value(asset)?)
        }
        .boxed()
    }
}

/// MUSIC_GENERATION: compose the bed from the blueprint's prompt.
pub struct MusicWorker {
    deps: PipelineDeps,
    composer: Arc<dyn MusicComposer>,
}

impl MusicWorker {
    pub fn new(deps: PipelineDeps, composer: Arc<dyn MusicComposer>) -> Self {
        Self { deps, composer }
    }
}

impl JobHandler for MusicWorker {
    fn handle<'a>(
        &'a self,
        job: &'a Job,
        ctx: &'a WorkerContext,
    ) -> BoxFuture<'a, Result<serde_json::Value>> {
        async move {
            let JobPayload::MusicGeneration {
                production_id,
                prompt,
                duration_seconds,
            } = &job.payload
            else {
                return Err(Error::Internal("music worker got a foreign payload".into()));
            };

            ctx.progress(10).await;
            let audio = self
                .composer
                .compose(&ComposeRequest {
                    prompt: prompt.clone(),
                    duration_seconds: *duration_seconds,
                })
                .await?;
            ctx.progress(70).await;

            let music_dir = self.deps.config.music_dir();
            std::fs::create_dir_all(&music_dir)?;
            let bed_path = music_dir.join(format!(
                "{}_{}.mp3",
                MusicVariant::Raw.as_str(),
                Uuid::new_v4()
            ));
            write_atomic(&bed_path, &audio)?;

            let bed_duration = self.deps.processor.get_duration(&bed_path).await?;
            let production = productions::get(&self.deps.db, *production_id).await?;
            let (bpm, key) = production
                .musical_blueprint
                .as_ref()
                .map(|plan| {
                    let key = production
                        .script
                        .as_ref()
                        .and_then(|s| s.blueprint.music.key.clone());
                    (plan.final_bpm, key)
                })
                .unwrap_or((100.0, None));

            let asset = MusicAsset {
                id: Uuid::new_v4(),
                path: bed_path,
                duration: bed_duration,
                bpm,
                key,
                variant: MusicVariant::Raw,
            };
            ctx.progress(95).await;
            Ok(serde_json::to_value(asset)?)
        }
        .boxed()
    }
}

/// AUDIO_MIXING: steps 6-11 of the pipeline in one job.
pub struct MixWorker {
    deps: PipelineDeps,
}

impl MixWorker {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }
}

impl JobHandler for MixWorker {
    fn handle<'a>(
        &'a self,
        job: &'a Job,
        ctx: &'a WorkerContext,
    ) -> BoxFuture<'a, Result<serde_json::Value>> {
        async move {
            let JobPayload::AudioMixing { production_id } = &job.payload else {
                return Err(Error::Internal("mix worker got a foreign payload".into()));
            };
            let outcome = mix::run_mixing_stage(&self.deps, *production_id, ctx).await?;
            Ok(serde_json::to_value(outcome)?)
        }
        .boxed()
    }
}

/// Write provider bytes with the same staging discipline as the toolchain.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let staging = path.with_file_name(format!(
        ".{}.{}.part",
        path.file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "out".into()),
        Uuid::new_v4().simple()
    ));
    std::fs::write(&staging, bytes)?;
    std::fs::rename(&staging, path)?;
    Ok(())
}

fn estimated_timings(text: &str, duration: f64) -> (Vec<SentenceTiming>, Vec<WordTiming>) {
    (
        sentences::estimate_sentence_timings(text, duration),
        sentences::estimate_word_timings(text, duration),
    )
}

fn scale_timings(
    alignment: &mut [CharTiming],
    sentence_timings: &mut [SentenceTiming],
    word_timings: &mut [WordTiming],
    factor: f64,
) {
    for c in alignment.iter_mut() {
        c.start *= factor;
        c.end *= factor;
    }
    for s in sentence_timings.iter_mut() {
        s.start *= factor;
        s.end *= factor;
    }
    for w in word_timings.iter_mut() {
        w.start *= factor;
        w.end *= factor;
    }
}
