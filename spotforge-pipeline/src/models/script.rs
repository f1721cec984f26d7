//! Script and ad-production blueprint types
//!
//! The blueprint is the LLM's structured plan for one advertisement. All
//! enumerated vocabulary is modeled as tagged variants; unknown values fail
//! deserialization at the boundary instead of drifting through the pipeline
//! as free-form strings.

use serde::{Deserialize, Serialize};
use spotforge_common::{Error, FadeCurve, Result};
use uuid::Uuid;

use super::asset::{SentenceTiming, WordTiming};

/// Musical role a sentence plays in the ad
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MusicalFunction {
    Hook,
    Build,
    Peak,
    Resolve,
    Transition,
    Pause,
}

/// How the bed should end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndingType {
    /// Definitive close on a downbeat
    Button,
    /// Held final chord
    Sustain,
    /// Short accent hit after the close
    Stinger,
    /// Natural decay to silence
    Decay,
}

impl Default for EndingType {
    fn default() -> Self {
        EndingType::Button
    }
}

/// How the bed should open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntroType {
    /// Full instrumentation from bar one
    Instrumental,
    /// Sparse pad building into the body
    Ambient,
    /// Rhythm-first opening
    Percussive,
    /// Voice nearly immediately, minimal lead-in
    ColdOpen,
}

impl Default for IntroType {
    fn default() -> Self {
        IntroType::Instrumental
    }
}

/// Explicit musical structure from the blueprint generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MusicalStructure {
    #[serde(default)]
    pub intro_type: IntroType,
    pub intro_bars: Option<u32>,
    pub body_feel: Option<String>,
    pub peak_moment: Option<String>,
    #[serde(default)]
    pub ending_type: EndingType,
    pub outro_bars: Option<u32>,
    pub key: Option<String>,
    /// Bars per phrase, one of 2, 3 or 4
    pub phrase_length: Option<u32>,
}

/// One segment of the emotional arc
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArcSegment {
    pub label: String,
    /// Segment start, seconds into the ad
    pub start: f64,
    /// Segment end, seconds into the ad
    pub end: f64,
    /// Energy level 1..=10
    pub energy: u8,
    /// Text-to-music prompt fragment for this segment
    pub prompt: String,
}

/// Per-sentence mixing cue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentenceCue {
    /// Music volume multiplier under this sentence (1.0 = no change)
    #[serde(default = "default_multiplier")]
    pub music_volume: f64,
    /// Explicit musical function, when the generator committed to one
    pub function: Option<MusicalFunction>,
    /// Free-text cue used by the classification heuristics
    pub cue: Option<String>,
}

fn default_multiplier() -> f64 {
    1.0
}

impl Default for SentenceCue {
    fn default() -> Self {
        Self {
            music_volume: 1.0,
            function: None,
            cue: None,
        }
    }
}

/// Ad-level context from the generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdContext {
    pub duration_seconds: f64,
    pub ad_category: String,
}

/// Music direction from the generator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicSpec {
    pub target_bpm: f64,
    pub genre: String,
    pub mood: String,
    pub key: Option<String>,
    #[serde(default)]
    pub arc: Vec<ArcSegment>,
    #[serde(default = "default_true")]
    pub button_ending: bool,
    pub musical_structure: Option<MusicalStructure>,
    #[serde(default)]
    pub instrumentation: Vec<String>,
    pub composer_direction: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Voice fade settings for the final mix
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FadeSettings {
    pub fade_in: f64,
    pub fade_out: f64,
    #[serde(default)]
    pub curve: FadeCurve,
}

impl Default for FadeSettings {
    fn default() -> Self {
        Self {
            fade_in: 0.05,
            fade_out: 1.5,
            curve: FadeCurve::default(),
        }
    }
}

/// Mix levels from the generator
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeSettings {
    pub voice: f64,
    pub music: f64,
    /// Ducking depth: music gain under voice before cue multipliers
    pub ducking: f64,
}

impl Default for VolumeSettings {
    fn default() -> Self {
        Self {
            voice: 1.0,
            music: 0.3,
            ducking: 0.3,
        }
    }
}

/// The generator's complete plan for one advertisement
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdBlueprint {
    /// The voice-over text
    pub script: String,
    pub context: AdContext,
    pub music: MusicSpec,
    #[serde(default)]
    pub sentence_cues: Vec<SentenceCue>,
    #[serde(default)]
    pub fades: FadeSettings,
    #[serde(default)]
    pub volume: VolumeSettings,
    #[serde(default)]
    pub tone: Option<String>,
}

impl AdBlueprint {
    /// Boundary validation of numeric ranges the pipeline depends on.
    pub fn validate(&self) -> Result<()> {
        if self.script.trim().is_empty() {
            return Err(Error::Validation("blueprint script is empty".into()));
        }
        if !(self.context.duration_seconds >= 5.0) {
            return Err(Error::Validation(format!(
                "duration_seconds must be at least 5, got {}",
                self.context.duration_seconds
            )));
        }
        if !(40.0..=220.0).contains(&self.music.target_bpm) {
            return Err(Error::Validation(format!(
                "target_bpm out of range: {}",
                self.music.target_bpm
            )));
        }
        if let Some(structure) = &self.music.musical_structure {
            if let Some(len) = structure.phrase_length {
                if !matches!(len, 2 | 3 | 4) {
                    return Err(Error::Validation(format!(
                        "phrase_length must be 2, 3 or 4, got {}",
                        len
                    )));
                }
            }
        }
        for (i, cue) in self.sentence_cues.iter().enumerate() {
            if !cue.music_volume.is_finite() || cue.music_volume < 0.0 {
                return Err(Error::Validation(format!(
                    "sentence cue {} has invalid music_volume {}",
                    i, cue.music_volume
                )));
            }
        }
        if !(0.02..=0.15).contains(&self.fades.fade_in) {
            return Err(Error::Validation(format!(
                "fade_in must lie in [0.02, 0.15], got {}",
                self.fades.fade_in
            )));
        }
        if !(0.5..=3.0).contains(&self.fades.fade_out) {
            return Err(Error::Validation(format!(
                "fade_out must lie in [0.5, 3.0], got {}",
                self.fades.fade_out
            )));
        }
        Ok(())
    }
}

/// Timing metadata persisted after the voice stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtsRecord {
    pub sentence_timings: Vec<SentenceTiming>,
    pub word_timings: Vec<WordTiming>,
    pub actual_duration: f64,
    /// Stretch ratio applied by the TTS-time duration enforcer, if any
    pub scaled_ratio: Option<f64>,
}

/// A generated script plus its blueprint metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Script {
    pub id: Uuid,
    pub text: String,
    pub blueprint: AdBlueprint,
    pub last_tts: Option<TtsRecord>,
}

impl Script {
    pub fn new(blueprint: AdBlueprint) -> Self {
        Self {
            id: Uuid::new_v4(),
            text: blueprint.script.clone(),
            blueprint,
            last_tts: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_blueprint() -> AdBlueprint {
        AdBlueprint {
            script: "Try Solstice Coffee today.".to_string(),
            context: AdContext {
                duration_seconds: 30.0,
                ad_category: "beverage".to_string(),
            },
            music: MusicSpec {
                target_bpm: 100.0,
                genre: "modern corporate".to_string(),
                mood: "warm".to_string(),
                key: None,
                arc: vec![],
                button_ending: true,
                musical_structure: None,
                instrumentation: vec![],
                composer_direction: None,
            },
            sentence_cues: vec![],
            fades: FadeSettings::default(),
            volume: VolumeSettings::default(),
            tone: None,
        }
    }

    #[test]
    fn valid_blueprint_passes() {
        minimal_blueprint().validate().unwrap();
    }

    #[test]
    fn bpm_out_of_range_rejected() {
        let mut bp = minimal_blueprint();
        bp.music.target_bpm = 500.0;
        assert!(matches!(bp.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn bad_phrase_length_rejected() {
        let mut bp = minimal_blueprint();
        bp.music.musical_structure = Some(MusicalStructure {
            phrase_length: Some(7),
            ..Default::default()
        });
        assert!(matches!(bp.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn unknown_musical_function_rejected_at_parse() {
        let result: std::result::Result<MusicalFunction, _> =
            serde_json::from_str("\"crescendo\"");
        assert!(result.is_err());
        let ok: MusicalFunction = serde_json::from_str("\"hook\"").unwrap();
        assert_eq!(ok, MusicalFunction::Hook);
    }

    #[test]
    fn unknown_ending_type_rejected_at_parse() {
        let result: std::result::Result<EndingType, _> = serde_json::from_str("\"fade\"");
        assert!(result.is_err());
        let ok: EndingType = serde_json::from_str("\"stinger\"").unwrap();
        assert_eq!(ok, EndingType::Stinger);
    }

    #[test]
    fn fade_bounds_enforced() {
        let mut bp = minimal_blueprint();
        bp.fades.fade_in = 0.5;
        assert!(bp.validate().is_err());
        let mut bp = minimal_blueprint();
        bp.fades.fade_out = 0.1;
        assert!(bp.validate().is_err());
    }
}
