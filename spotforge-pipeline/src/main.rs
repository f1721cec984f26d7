//! spotforge - audio ad production pipeline
//!
//! Operator CLI plus the worker runtime. `submit`, `status` and `cancel`
//! talk to the shared durable store; `serve` runs the worker pools and the
//! production scheduler.
//!
//! Exit codes: 0 ok, 2 validation, 3 not found, 4 transient, 5 permanent
//! failure.

use clap::{Parser, Subcommand};
use spotforge_common::config::Config;
use spotforge_common::{Error, EventBus};
use spotforge_pipeline::audio::{
    AudioProcessor, FfmpegProcessor, LoudnessPreset, MasteringPreset,
};
use spotforge_pipeline::db;
use spotforge_pipeline::models::ProductionSettings;
use spotforge_pipeline::orchestrator::{self, PipelineDeps};
use spotforge_pipeline::providers::{
    HttpBlueprintGenerator, HttpMusicComposer, HttpSpeechSynthesizer,
};
use spotforge_pipeline::queue::worker::CancelRegistry;
use spotforge_pipeline::queue::JobQueue;
use spotforge_pipeline::runtime::{self, Providers};
use spotforge_pipeline::services::analyzer::OnsetAnalyzer;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "spotforge", about = "Audio ad production pipeline")]
struct Cli {
    /// Root directory for persisted audio
    #[arg(long, env = "UPLOAD_DIR")]
    upload_dir: Option<PathBuf>,

    /// SQLite URL for the durable store
    #[arg(long, env = "QUEUE_URL")]
    queue_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a new production and print its id
    Submit {
        /// Natural-language brief for the ad
        prompt: String,
        /// TTS voice id
        #[arg(long)]
        voice: String,
        /// Target ad duration in seconds
        #[arg(long, default_value_t = 30.0)]
        duration: f64,
        /// Tone of voice for the script
        #[arg(long, default_value = "confident")]
        tone: String,
        /// Owner recorded on the production
        #[arg(long, default_value = "cli")]
        owner: String,
    },
    /// Print a production's stage and progress
    Status {
        id: String,
    },
    /// Cancel a production
    Cancel {
        id: String,
    },
    /// Apply the mastering chain to a finished file
    Master {
        input: PathBuf,
        output: PathBuf,
        /// balanced, voiceenhanced or musicenhanced
        #[arg(long, default_value = "balanced")]
        preset: String,
        /// broadcast (-24 LUFS) or crossplatform (-16 LUFS)
        #[arg(long, default_value = "crossplatform")]
        loudness: String,
    },
    /// Run the worker pools and the production scheduler
    Serve,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(upload_dir) = cli.upload_dir.clone() {
        config.queue_url = std::env::var("QUEUE_URL").unwrap_or_else(|_| {
            format!(
                "sqlite://{}?mode=rwc",
                upload_dir.join("spotforge.db").display()
            )
        });
        config.upload_dir = upload_dir;
    }
    if let Some(queue_url) = cli.queue_url.clone() {
        config.queue_url = queue_url;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match run(cli, config).await {
        Ok(()) => {}
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(exit_code(&e));
        }
    }
}

async fn run(cli: Cli, config: Config) -> spotforge_common::Result<()> {
    config.ensure_dirs()?;
    let pool = db::init_pool(&config.queue_url).await?;
    let events = EventBus::new(256);
    let queue = JobQueue::new(pool.clone(), events.clone());
    let cancels = CancelRegistry::default();

    match cli.command {
        Command::Submit {
            prompt,
            voice,
            duration,
            tone,
            owner,
        } => {
            let settings = ProductionSettings {
                voice_id: voice,
                target_duration_seconds: duration,
                ..Default::default()
            };
            let production = orchestrator::submit(&pool, &owner, &prompt, &tone, settings).await?;
            println!("{}", production.id);
            Ok(())
        }

        Command::Status { id } => {
            let id = parse_id(&id)?;
            let production = db::productions::get(&pool, id).await?;
            println!(
                "{} {} {}%",
                production.id, production.status, production.progress
            );
            if let (Some(kind), Some(message)) =
                (&production.error_kind, &production.error_message)
            {
                println!("error: {} {}", kind, message);
            }
            for warning in &production.warnings {
                println!("warning: {}", warning);
            }
            if let Some(path) = &production.output_path {
                println!(
                    "output: {} ({:.1}s)",
                    config.public_url(path),
                    production.output_duration.unwrap_or_default()
                );
            }
            Ok(())
        }

        Command::Cancel { id } => {
            let id = parse_id(&id)?;
            orchestrator::cancel(&pool, &queue, &events, &cancels, id).await?;
            println!("cancelled {}", id);
            Ok(())
        }

        Command::Master {
            input,
            output,
            preset,
            loudness,
        } => {
            let preset = match preset.to_lowercase().as_str() {
                "balanced" => MasteringPreset::Balanced,
                "voiceenhanced" => MasteringPreset::VoiceEnhanced,
                "musicenhanced" => MasteringPreset::MusicEnhanced,
                other => {
                    return Err(Error::Validation(format!(
                        "unknown mastering preset '{}'",
                        other
                    )))
                }
            };
            let loudness = match loudness.to_lowercase().as_str() {
                "broadcast" => LoudnessPreset::Broadcast,
                "crossplatform" => LoudnessPreset::CrossPlatform,
                other => {
                    return Err(Error::Validation(format!(
                        "unknown loudness preset '{}'",
                        other
                    )))
                }
            };
            let processor = FfmpegProcessor::new()?;
            processor.master(&input, preset, loudness, &output).await?;
            println!("mastered {}", output.display());
            Ok(())
        }

        Command::Serve => {
            let processor = Arc::new(FfmpegProcessor::new()?);
            let providers = Providers {
                llm: Arc::new(HttpBlueprintGenerator::new(config.require_llm_key()?)?),
                tts: Arc::new(HttpSpeechSynthesizer::new(config.require_tts_key()?)?),
                ttm: Arc::new(HttpMusicComposer::new(config.require_ttm_key()?)?),
            };
            let deps = PipelineDeps {
                db: pool,
                queue,
                events,
                config,
                processor,
                analyzer: Arc::new(OnsetAnalyzer),
                cancels,
            };

            let shutdown = CancellationToken::new();
            let signal_token = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("shutdown requested");
                    signal_token.cancel();
                }
            });

            tracing::info!(
                upload_dir = %deps.config.upload_dir.display(),
                "spotforge pipeline starting"
            );
            runtime::serve(deps, providers, shutdown).await
        }
    }
}

fn parse_id(raw: &str) -> spotforge_common::Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| Error::Validation(format!("'{}' is not a production id", raw)))
}

/// CLI exit codes by error class.
fn exit_code(error: &Error) -> i32 {
    match error {
        Error::Validation(_) => 2,
        Error::NotFound(_) => 3,
        Error::Timeout(_) | Error::TransientProvider(_) | Error::Database(_) | Error::Io(_) => 4,
        _ => 5,
    }
}
