//! Job records for the durable queue

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Which stage a job executes. Jobs belong to queues named by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    ScriptGeneration,
    TtsGeneration,
    MusicGeneration,
    AudioMixing,
}

impl JobKind {
    pub fn queue_name(&self) -> &'static str {
        match self {
            JobKind::ScriptGeneration => "script_generation",
            JobKind::TtsGeneration => "tts_generation",
            JobKind::MusicGeneration => "music_generation",
            JobKind::AudioMixing => "audio_mixing",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "script_generation" => Some(JobKind::ScriptGeneration),
            "tts_generation" => Some(JobKind::TtsGeneration),
            "music_generation" => Some(JobKind::MusicGeneration),
            "audio_mixing" => Some(JobKind::AudioMixing),
            _ => None,
        }
    }

    pub fn all() -> &'static [JobKind] {
        &[
            JobKind::ScriptGeneration,
            JobKind::TtsGeneration,
            JobKind::MusicGeneration,
            JobKind::AudioMixing,
        ]
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.queue_name())
    }
}

/// Lifecycle of one job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(JobStatus::Pending),
            "RUNNING" => Some(JobStatus::Running),
            "COMPLETED" => Some(JobStatus::Completed),
            "FAILED" => Some(JobStatus::Failed),
            "CANCELLED" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// Stage-specific job payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    ScriptGeneration {
        production_id: Uuid,
        prompt: String,
        duration_seconds: f64,
        tone: String,
    },
    TtsGeneration {
        production_id: Uuid,
        voice_id: String,
    },
    MusicGeneration {
        production_id: Uuid,
        prompt: String,
        duration_seconds: f64,
    },
    AudioMixing {
        production_id: Uuid,
    },
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::ScriptGeneration { .. } => JobKind::ScriptGeneration,
            JobPayload::TtsGeneration { .. } => JobKind::TtsGeneration,
            JobPayload::MusicGeneration { .. } => JobKind::MusicGeneration,
            JobPayload::AudioMixing { .. } => JobKind::AudioMixing,
        }
    }

    pub fn production_id(&self) -> Uuid {
        match self {
            JobPayload::ScriptGeneration { production_id, .. }
            | JobPayload::TtsGeneration { production_id, .. }
            | JobPayload::MusicGeneration { production_id, .. }
            | JobPayload::AudioMixing { production_id } => *production_id,
        }
    }
}

/// Options for `enqueue`
#[derive(Debug, Clone)]
pub struct EnqueueOptions {
    pub max_attempts: u32,
    /// Initial delay before the job becomes reservable
    pub delay: Option<Duration>,
}

impl Default for EnqueueOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: None,
        }
    }
}

/// One invocation of one stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub payload: JobPayload,
    pub status: JobStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub progress: u8,
    pub last_error: Option<String>,
    pub last_error_kind: Option<String>,
    pub result: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Not reservable before this time; carries the retry backoff
    pub next_run_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_round_trips_with_kind_tag() {
        let payload = JobPayload::TtsGeneration {
            production_id: Uuid::new_v4(),
            voice_id: "river".to_string(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "tts_generation");
        let back: JobPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn queue_names_round_trip() {
        for kind in JobKind::all() {
            assert_eq!(JobKind::parse(kind.queue_name()), Some(*kind));
        }
    }
}
