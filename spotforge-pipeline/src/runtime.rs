//! Worker runtime assembly
//!
//! Wires the four stage queues to their handlers and runs the scheduler
//! that picks up PENDING productions and drives each one through the
//! orchestrator. Parallelism is across productions; the scheduler spawns
//! one driver task per production and never two for the same id.

use spotforge_common::Result;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db::productions;
use crate::models::JobKind;
use crate::orchestrator::{Orchestrator, PipelineDeps};
use crate::providers::{BlueprintGenerator, MusicComposer, SpeechSynthesizer};
use crate::queue::worker::{WorkerPool, WorkerPoolConfig};
use crate::workers::{MixWorker, MusicWorker, ScriptWorker, VoiceWorker};

/// How often the scheduler polls for new PENDING productions
const SCHEDULE_INTERVAL: Duration = Duration::from_millis(500);

/// The three external collaborators, behind their capability traits
pub struct Providers {
    pub llm: Arc<dyn BlueprintGenerator>,
    pub tts: Arc<dyn SpeechSynthesizer>,
    pub ttm: Arc<dyn MusicComposer>,
}

/// Spawn the four stage pools against their handlers.
pub fn spawn_worker_pools(
    deps: &PipelineDeps,
    providers: &Providers,
    shutdown: &CancellationToken,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();
    let pools: [(JobKind, Arc<dyn crate::queue::worker::JobHandler>); 4] = [
        (
            JobKind::ScriptGeneration,
            Arc::new(ScriptWorker::new(Arc::clone(&providers.llm))),
        ),
        (
            JobKind::TtsGeneration,
            Arc::new(VoiceWorker::new(deps.clone(), Arc::clone(&providers.tts))),
        ),
        (
            JobKind::MusicGeneration,
            Arc::new(MusicWorker::new(deps.clone(), Arc::clone(&providers.ttm))),
        ),
        (JobKind::AudioMixing, Arc::new(MixWorker::new(deps.clone()))),
    ];
    for (kind, handler) in pools {
        let pool = WorkerPool::new(
            deps.queue.clone(),
            kind,
            WorkerPoolConfig::for_kind(kind),
            handler,
            deps.cancels.clone(),
            shutdown.clone(),
        );
        handles.extend(pool.spawn());
        tracing::info!(queue = %kind, "worker pool started");
    }
    handles
}

/// Run worker pools and the production scheduler until shutdown.
pub async fn serve(
    deps: PipelineDeps,
    providers: Providers,
    shutdown: CancellationToken,
) -> Result<()> {
    deps.config.ensure_dirs()?;
    let handles = spawn_worker_pools(&deps, &providers, &shutdown);

    // Scheduler: pick up PENDING productions and drive them
    let orchestrator = Arc::new(Orchestrator::new(deps.clone()));
    let in_flight: Arc<Mutex<HashSet<Uuid>>> = Arc::new(Mutex::new(HashSet::new()));

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(SCHEDULE_INTERVAL) => {}
        }

        let pending = match productions::pending_ids(&deps.db).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(error = %e, "pending scan failed");
                continue;
            }
        };
        for id in pending {
            let claimed = {
                let mut set = in_flight.lock().expect("scheduler set poisoned");
                set.insert(id)
            };
            if !claimed {
                continue;
            }
            let orchestrator = Arc::clone(&orchestrator);
            let in_flight = Arc::clone(&in_flight);
            tokio::spawn(async move {
                if let Err(e) = orchestrator.run_production(id).await {
                    tracing::error!(production_id = %id, error = %e, "driver task failed");
                }
                in_flight.lock().expect("scheduler set poisoned").remove(&id);
            });
        }
    }

    tracing::info!("runtime shutting down");
    for handle in handles {
        handle.abort();
    }
    Ok(())
}
