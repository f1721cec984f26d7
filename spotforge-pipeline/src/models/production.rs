//! Production: the root entity of one pipeline run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spotforge_common::status::{advance, StageEvent};
use spotforge_common::{Error, ErrorKind, FadeCurve, ProductionStatus, Result};
use std::path::PathBuf;
use uuid::Uuid;

use super::asset::{MusicAsset, VoiceAsset};
use super::blueprint::MusicalBlueprint;
use super::script::Script;

/// Final mix container format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Mp3,
    Wav,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp3 => "mp3",
            OutputFormat::Wav => "wav",
        }
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Mp3
    }
}

/// User-provided settings for one production
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductionSettings {
    pub voice_id: String,
    pub voice_volume: f64,
    pub music_volume: f64,
    pub fade_in: f64,
    pub fade_out: f64,
    pub fade_curve: FadeCurve,
    /// Let the mixer sidechain-duck instead of a baked curve
    pub audio_ducking: bool,
    pub ducking_amount: f64,
    pub output_format: OutputFormat,
    pub normalize_loudness: bool,
    pub loudness_target_lufs: f64,
    pub loudness_true_peak: f64,
    pub target_duration_seconds: f64,
}

impl Default for ProductionSettings {
    fn default() -> Self {
        Self {
            voice_id: "default".to_string(),
            voice_volume: 1.0,
            music_volume: 0.3,
            fade_in: 0.05,
            fade_out: 1.5,
            fade_curve: FadeCurve::default(),
            audio_ducking: false,
            ducking_amount: 0.3,
            output_format: OutputFormat::default(),
            normalize_loudness: true,
            loudness_target_lufs: -16.0,
            loudness_true_peak: -1.5,
            target_duration_seconds: 30.0,
        }
    }
}

impl ProductionSettings {
    pub fn validate(&self) -> Result<()> {
        if self.target_duration_seconds < 5.0 {
            return Err(Error::Validation(format!(
                "target duration must be at least 5 seconds, got {}",
                self.target_duration_seconds
            )));
        }
        if !(0.0..=2.0).contains(&self.voice_volume) || !(0.0..=2.0).contains(&self.music_volume) {
            return Err(Error::Validation("volumes must lie in [0, 2]".into()));
        }
        if !(0.0..=1.0).contains(&self.ducking_amount) {
            return Err(Error::Validation("ducking amount must lie in [0, 1]".into()));
        }
        Ok(())
    }
}

/// Loudness measurements recorded during the two-pass mix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct LoudnessReport {
    pub first_pass_lufs: Option<f64>,
    pub second_pass_lufs: Option<f64>,
    /// Music volume after the correction step, when one was taken
    pub adjusted_music_volume: Option<f64>,
}

/// The root entity of one pipeline run. Mutated only by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Production {
    pub id: Uuid,
    pub owner_id: String,
    pub prompt: String,
    pub tone: String,
    pub status: ProductionStatus,
    pub progress: u8,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    /// Soft-failure notes surfaced to the user
    pub warnings: Vec<String>,
    pub script: Option<Script>,
    pub musical_blueprint: Option<MusicalBlueprint>,
    pub voice_asset: Option<VoiceAsset>,
    pub music_asset: Option<MusicAsset>,
    pub output_path: Option<PathBuf>,
    pub output_duration: Option<f64>,
    pub loudness: LoudnessReport,
    pub settings: ProductionSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Production {
    pub fn new(owner_id: &str, prompt: &str, tone: &str, settings: ProductionSettings) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            prompt: prompt.to_string(),
            tone: tone.to_string(),
            status: ProductionStatus::Pending,
            progress: 0,
            error_kind: None,
            error_message: None,
            warnings: Vec::new(),
            script: None,
            musical_blueprint: None,
            voice_asset: None,
            music_asset: None,
            output_path: None,
            output_duration: None,
            loudness: LoudnessReport::default(),
            settings,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a stage event through the shared transition function.
    pub fn advance(&mut self, event: StageEvent) -> Result<()> {
        let next = advance(self.status, event)
            .map_err(|e| Error::Internal(format!("production {}: {}", self.id, e)))?;
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Progress only moves forward within a run.
    pub fn set_progress(&mut self, percent: u8) {
        let percent = percent.min(100);
        if percent > self.progress {
            self.progress = percent;
            self.updated_at = Utc::now();
        }
    }

    pub fn add_warning(&mut self, note: impl Into<String>) {
        self.warnings.push(note.into());
        self.updated_at = Utc::now();
    }

    /// Force the production into FAILED with the terminal error recorded.
    pub fn fail(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.status = ProductionStatus::Failed;
        self.error_kind = Some(kind.as_str().to_string());
        self.error_message = Some(message.into());
        self.updated_at = Utc::now();
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_monotonic() {
        let mut p = Production::new("owner", "promo", "warm", ProductionSettings::default());
        p.set_progress(40);
        p.set_progress(20);
        assert_eq!(p.progress, 40);
        p.set_progress(80);
        assert_eq!(p.progress, 80);
        p.set_progress(200);
        assert_eq!(p.progress, 100);
    }

    #[test]
    fn advance_rejects_backward_moves() {
        let mut p = Production::new("owner", "promo", "warm", ProductionSettings::default());
        p.advance(StageEvent::ScriptReady).unwrap();
        p.advance(StageEvent::VoiceReady).unwrap();
        assert!(p.advance(StageEvent::ScriptReady).is_err());
        assert_eq!(p.status, ProductionStatus::Voice);
    }

    #[test]
    fn fail_records_kind_and_message() {
        let mut p = Production::new("owner", "promo", "warm", ProductionSettings::default());
        p.fail(ErrorKind::StageStuck, "tts stage timed out twice");
        assert_eq!(p.status, ProductionStatus::Failed);
        assert_eq!(p.error_kind.as_deref(), Some("STAGE_STUCK"));
        assert!(p.is_terminal());
    }

    #[test]
    fn settings_validation() {
        let mut s = ProductionSettings::default();
        s.target_duration_seconds = 3.0;
        assert!(s.validate().is_err());
        let mut s = ProductionSettings::default();
        s.ducking_amount = 1.5;
        assert!(s.validate().is_err());
        assert!(ProductionSettings::default().validate().is_ok());
    }
}
