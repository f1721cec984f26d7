//! Pipeline orchestrator
//!
//! Drives one production from PENDING to a terminal state: enqueue script
//! generation, TTS, music composition and the audio-mixing job, persisting
//! status and progress after every step and translating job failures into
//! either a FAILED production or a graceful degradation with a warning
//! note. Parallelism lives across productions; within one production the
//! stages run strictly in order.

pub mod mix;

use chrono::Utc;
use spotforge_common::config::Config;
use spotforge_common::status::StageEvent;
use spotforge_common::{Error, ErrorKind, EventBus, PipelineEvent, ProductionStatus, Result};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::audio::AudioProcessor;
use crate::db::productions;
use crate::services::analyzer::BedAnalyzer;
use crate::models::{
    AdBlueprint, EnqueueOptions, Job, JobPayload, JobStatus, MusicAsset, Production,
    ProductionSettings, Script, TtsRecord, VoiceAsset,
};
use crate::queue::worker::CancelRegistry;
use crate::queue::JobQueue;
use crate::services::blueprint;

/// Everything a stage needs to run
#[derive(Clone)]
pub struct PipelineDeps {
    pub db: SqlitePool,
    pub queue: JobQueue,
    pub events: EventBus,
    pub config: Config,
    pub processor: Arc<dyn AudioProcessor>,
    pub analyzer: Arc<dyn BedAnalyzer>,
    pub cancels: CancelRegistry,
}

impl PipelineDeps {
    /// Persist and broadcast the production's current state.
    pub async fn save_and_emit(&self, production: &Production, note: Option<String>) -> Result<()> {
        productions::save(&self.db, production).await?;
        self.events.emit_lossy(PipelineEvent::ProductionProgress {
            production_id: production.id,
            stage: production.status,
            percent: production.progress,
            note,
            timestamp: Utc::now(),
        });
        Ok(())
    }
}

/// Create and persist a new production in PENDING.
pub async fn submit(
    db: &SqlitePool,
    owner_id: &str,
    prompt: &str,
    tone: &str,
    settings: ProductionSettings,
) -> Result<Production> {
    if prompt.trim().is_empty() {
        return Err(Error::Validation("prompt must not be empty".into()));
    }
    settings.validate()?;
    let production = Production::new(owner_id, prompt, tone, settings);
    productions::save(db, &production).await?;
    tracing::info!(production_id = %production.id, "production submitted");
    Ok(production)
}

/// Cancel a production: mark it CANCELLED, cancel its queued jobs, and trip
/// the shared token so in-flight workers abort at their next suspension
/// point. Progress freezes at its last reported value.
///
/// Takes its collaborators individually so the CLI can cancel without
/// standing up an audio toolchain.
pub async fn cancel(
    db: &SqlitePool,
    queue: &JobQueue,
    events: &EventBus,
    cancels: &CancelRegistry,
    production_id: Uuid,
) -> Result<()> {
    let mut production = productions::get(db, production_id).await?;
    if production.is_terminal() {
        return Ok(());
    }
    production.advance(StageEvent::Cancelled)?;
    productions::save(db, &production).await?;
    events.emit_lossy(PipelineEvent::ProductionProgress {
        production_id,
        stage: production.status,
        percent: production.progress,
        note: Some("cancelled by user".into()),
        timestamp: Utc::now(),
    });
    let cancelled_jobs = queue.cancel_production_jobs(production_id).await?;
    cancels.cancel(production_id);
    tracing::info!(
        production_id = %production_id,
        cancelled_jobs,
        "production cancelled"
    );
    Ok(())
}

/// The per-production driver
pub struct Orchestrator {
    deps: PipelineDeps,
}

impl Orchestrator {
    pub fn new(deps: PipelineDeps) -> Self {
        Self { deps }
    }

    pub fn deps(&self) -> &PipelineDeps {
        &self.deps
    }

    /// Drive one production to a terminal state.
    pub async fn run_production(&self, production_id: Uuid) -> Result<()> {
        let mut production = productions::get(&self.deps.db, production_id).await?;
        if production.is_terminal() {
            return Ok(());
        }
        let cancel = self.deps.cancels.token(production_id);

        let outcome = self.drive(&mut production, &cancel).await;

        // Re-read the authoritative status; the cancel API may have flipped
        // it while a stage was in flight.
        let latest = productions::get(&self.deps.db, production_id).await?;
        if latest.status == ProductionStatus::Cancelled || cancel.is_cancelled() {
            self.cleanup(production_id);
            self.deps.cancels.remove(production_id);
            return Ok(());
        }

        if let Err(error) = outcome {
            let kind = error.kind();
            tracing::error!(
                production_id = %production_id,
                kind = %kind,
                error = %error,
                "production failed"
            );
            let mut failed = latest;
            failed.fail(kind, error.to_string());
            productions::save(&self.deps.db, &failed).await?;
            self.deps.events.emit_lossy(PipelineEvent::ProductionFailed {
                production_id,
                kind: kind.as_str().to_string(),
                message: error.to_string(),
                timestamp: Utc::now(),
            });
        }

        self.cleanup(production_id);
        self.deps.cancels.remove(production_id);
        Ok(())
    }

    async fn drive(
        &self,
        production: &mut Production,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.phase_script(production, cancel).await?;
        self.bail_if_cancelled(cancel)?;

        self.phase_voice(production, cancel).await?;
        self.bail_if_cancelled(cancel)?;

        self.phase_blueprint(production).await?;

        self.phase_music(production, cancel).await?;
        self.bail_if_cancelled(cancel)?;

        self.phase_mix(production, cancel).await?;
        Ok(())
    }

    fn bail_if_cancelled(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            Err(Error::Internal("production cancelled".into()))
        } else {
            Ok(())
        }
    }

    /// Stage 1: script generation, with the deterministic fallback on a
    /// non-retryable generator failure.
    async fn phase_script(
        &self,
        production: &mut Production,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let job_id = self
            .deps
            .queue
            .enqueue(
                JobPayload::ScriptGeneration {
                    production_id: production.id,
                    prompt: production.prompt.clone(),
                    duration_seconds: production.settings.target_duration_seconds,
                    tone: production.tone.clone(),
                },
                EnqueueOptions::default(),
            )
            .await?;
        let job = self.deps.queue.wait(job_id, cancel).await?;

        let mut note = None;
        let ad_blueprint: AdBlueprint = match job.status {
            JobStatus::Completed => parse_result(&job)?,
            JobStatus::Failed if fallback_applies(&job) => {
                let kind = job
                    .last_error_kind
                    .clone()
                    .unwrap_or_else(|| "UNKNOWN".into());
                tracing::warn!(
                    production_id = %production.id,
                    kind = %kind,
                    "blueprint generator unavailable; assembling fallback plan"
                );
                let message = format!("blueprint generator failed ({}); fallback plan used", kind);
                production.add_warning(message.clone());
                note = Some(message);
                blueprint::fallback_blueprint(
                    &production.prompt,
                    production.settings.target_duration_seconds,
                    &production.tone,
                )
            }
            _ => return Err(error_from_job(&job)),
        };

        production.script = Some(Script::new(ad_blueprint));
        production.advance(StageEvent::ScriptReady)?;
        production.set_progress(20);
        self.deps.save_and_emit(production, note).await
    }

    /// Stage 2: TTS with timestamps and TTS-time duration enforcement.
    async fn phase_voice(
        &self,
        production: &mut Production,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let job_id = self
            .deps
            .queue
            .enqueue(
                JobPayload::TtsGeneration {
                    production_id: production.id,
                    voice_id: production.settings.voice_id.clone(),
                },
                EnqueueOptions::default(),
            )
            .await?;
        let job = self.deps.queue.wait(job_id, cancel).await?;
        if job.status != JobStatus::Completed {
            return Err(error_from_job(&job));
        }

        let voice: VoiceAsset = parse_result(&job)?;
        if let Some(script) = production.script.as_mut() {
            script.last_tts = Some(TtsRecord {
                sentence_timings: voice.sentence_timings.clone(),
                word_timings: voice.word_timings.clone(),
                actual_duration: voice.duration,
                scaled_ratio: None,
            });
        }
        production.voice_asset = Some(voice);
        production.advance(StageEvent::VoiceReady)?;
        production.set_progress(40);
        self.deps.save_and_emit(production, None).await
    }

    /// Stage 3: the in-process musical blueprint. Happens-before the music
    /// job enqueue.
    async fn phase_blueprint(&self, production: &mut Production) -> Result<()> {
        let script = production
            .script
            .as_ref()
            .ok_or_else(|| Error::Internal("blueprint stage without a script".into()))?;
        let voice = production
            .voice_asset
            .as_ref()
            .ok_or_else(|| Error::Internal("blueprint stage without a voice asset".into()))?;

        let plan = blueprint::build(
            &script.blueprint,
            &voice.sentence_timings,
            voice.duration,
        )?;
        tracing::info!(
            production_id = %production.id,
            bpm = plan.final_bpm,
            total_bars = plan.total_bars,
            "musical blueprint computed"
        );
        production.musical_blueprint = Some(plan);
        self.deps.save_and_emit(production, None).await
    }

    /// Stage 4: text-to-music with the blueprint's composition prompt.
    async fn phase_music(
        &self,
        production: &mut Production,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let plan = production
            .musical_blueprint
            .as_ref()
            .ok_or_else(|| Error::Internal("music stage without a blueprint".into()))?;
        let job_id = self
            .deps
            .queue
            .enqueue(
                JobPayload::MusicGeneration {
                    production_id: production.id,
                    prompt: plan.composition_prompt.clone(),
                    duration_seconds: plan.total_duration(),
                },
                EnqueueOptions::default(),
            )
            .await?;
        let job = self.deps.queue.wait(job_id, cancel).await?;
        if job.status != JobStatus::Completed {
            return Err(error_from_job(&job));
        }

        let music: MusicAsset = parse_result(&job)?;
        production.music_asset = Some(music);
        production.advance(StageEvent::MusicReady)?;
        production.set_progress(60);
        self.deps.save_and_emit(production, None).await
    }

    /// Stage 5: the audio-mixing job (steps 6-11), then finalization.
    async fn phase_mix(
        &self,
        production: &mut Production,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let job_id = self
            .deps
            .queue
            .enqueue(
                JobPayload::AudioMixing {
                    production_id: production.id,
                },
                EnqueueOptions::default(),
            )
            .await?;
        let job = self.deps.queue.wait(job_id, cancel).await?;
        if job.status != JobStatus::Completed {
            return Err(error_from_job(&job));
        }
        let outcome: mix::MixOutcome = parse_result(&job)?;

        // The mixing job mutated warnings, loudness and intermediate
        // statuses; reload before finalizing.
        *production = productions::get(&self.deps.db, production.id).await?;

        let final_dir = self.deps.config.productions_dir();
        std::fs::create_dir_all(&final_dir)?;
        let final_path = final_dir.join(format!(
            "production_{}_{}.{}",
            production.id,
            Uuid::new_v4().simple(),
            production.settings.output_format.extension()
        ));
        std::fs::rename(&outcome.output_path, &final_path)?;

        production.output_path = Some(final_path.clone());
        production.output_duration = Some((outcome.duration * 10.0).round() / 10.0);
        production.advance(StageEvent::Finalized)?;
        production.set_progress(100);
        self.deps.save_and_emit(production, None).await?;

        self.deps.events.emit_lossy(PipelineEvent::ProductionCompleted {
            production_id: production.id,
            output_path: self.deps.config.public_url(&final_path),
            duration_seconds: outcome.duration,
            timestamp: Utc::now(),
        });
        tracing::info!(
            production_id = %production.id,
            output = %final_path.display(),
            duration = outcome.duration,
            "production completed"
        );
        Ok(())
    }

    /// Remove the production's working directory. Intermediate bed variants
    /// live there; superseded ones go with it.
    fn cleanup(&self, production_id: Uuid) {
        let workdir = self.deps.config.work_dir(production_id);
        if workdir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&workdir) {
                tracing::warn!(
                    production_id = %production_id,
                    error = %e,
                    "failed to clean working directory"
                );
            }
        }
    }
}

/// True when a failed script job should degrade to the fallback blueprint:
/// schema-invalid output, quota, or auth troubles at the generator.
fn fallback_applies(job: &Job) -> bool {
    matches!(
        job.last_error_kind
            .as_deref()
            .and_then(ErrorKind::parse),
        Some(ErrorKind::Validation) | Some(ErrorKind::Quota) | Some(ErrorKind::Auth)
    )
}

/// Reconstruct the stage error from a terminal job row.
fn error_from_job(job: &Job) -> Error {
    let message = job
        .last_error
        .clone()
        .unwrap_or_else(|| format!("job {} ended as {}", job.id, job.status.as_str()));
    if job.status == JobStatus::Cancelled {
        return Error::Internal(format!("job {} cancelled", job.id));
    }
    match job.last_error_kind.as_deref().and_then(ErrorKind::parse) {
        Some(ErrorKind::Auth) => Error::Auth(message),
        Some(ErrorKind::Quota) => Error::Quota(message),
        Some(ErrorKind::Timeout) => Error::Timeout(message),
        Some(ErrorKind::TransientProvider) => Error::TransientProvider(message),
        Some(ErrorKind::StageStuck) => Error::StageStuck(message),
        Some(ErrorKind::Validation) => Error::Validation(message),
        Some(ErrorKind::ConfigMissing) => Error::ConfigMissing(message),
        Some(ErrorKind::AnalysisFailed) => Error::AnalysisFailed(message),
        Some(ErrorKind::AlignmentInfeasible) => Error::AlignmentInfeasible(message),
        Some(ErrorKind::ScalingRefused) => Error::ScalingRefused(message),
        Some(ErrorKind::LoudnessMeasureFailed) => Error::LoudnessMeasureFailed(message),
        _ => Error::Internal(message),
    }
}

fn parse_result<T: serde::de::DeserializeOwned>(job: &Job) -> Result<T> {
    let value = job
        .result
        .clone()
        .ok_or_else(|| Error::Internal(format!("job {} completed without a result", job.id)))?;
    Ok(serde_json::from_value(value)?)
}
