//! Provider capabilities
//!
//! The three external collaborators the pipeline consumes, each behind a
//! narrow trait: the LLM blueprint generator, the TTS provider, and the
//! text-to-music composer. Production adapters live in the sibling modules;
//! tests drive the orchestrator with in-memory doubles.

pub mod llm;
pub mod ttm;
pub mod tts;

pub use llm::HttpBlueprintGenerator;
pub use ttm::HttpMusicComposer;
pub use tts::HttpSpeechSynthesizer;

use futures::future::BoxFuture;
use spotforge_common::{Error, Result};

use crate::models::{AdBlueprint, CharTiming};

/// Request for the LLM blueprint generator
#[derive(Debug, Clone)]
pub struct ScriptRequest {
    pub prompt: String,
    pub duration_seconds: f64,
    pub tone: String,
}

/// LLM blueprint generator capability
pub trait BlueprintGenerator: Send + Sync {
    fn generate<'a>(&'a self, request: &'a ScriptRequest) -> BoxFuture<'a, Result<AdBlueprint>>;
}

/// Request for the TTS provider
#[derive(Debug, Clone)]
pub struct SpeechRequest {
    pub voice_id: String,
    pub text: String,
    /// Pipeline runs always ask for character timestamps
    pub with_timestamps: bool,
}

/// TTS provider output
#[derive(Debug, Clone)]
pub struct SpeechOutput {
    /// Encoded audio bytes (mp3)
    pub audio: Vec<u8>,
    /// Character-level alignment when requested and available
    pub alignment: Option<Vec<CharTiming>>,
}

/// TTS capability
pub trait SpeechSynthesizer: Send + Sync {
    fn synthesize<'a>(&'a self, request: &'a SpeechRequest) -> BoxFuture<'a, Result<SpeechOutput>>;
}

/// Request for the TTM provider
#[derive(Debug, Clone)]
pub struct ComposeRequest {
    pub prompt: String,
    pub duration_seconds: f64,
}

/// Text-to-music capability
pub trait MusicComposer: Send + Sync {
    fn compose<'a>(&'a self, request: &'a ComposeRequest) -> BoxFuture<'a, Result<Vec<u8>>>;
}

/// Map a provider HTTP status onto a pipeline error kind.
pub(crate) fn error_for_status(provider: &str, status: u16, body: &str) -> Error {
    let detail = format!("{} returned {}: {}", provider, status, truncate(body, 200));
    match status {
        400 | 422 => Error::Validation(detail),
        401 | 403 => Error::Auth(detail),
        429 => Error::Quota(detail),
        408 | 504 => Error::Timeout(detail),
        500..=599 => Error::TransientProvider(detail),
        _ => Error::TransientProvider(detail),
    }
}

/// Map a reqwest transport failure onto a pipeline error kind.
pub(crate) fn error_for_transport(provider: &str, error: reqwest::Error) -> Error {
    if error.is_timeout() {
        Error::Timeout(format!("{} call timed out", provider))
    } else {
        Error::TransientProvider(format!("{} transport error: {}", provider, error))
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_matches_error_kinds() {
        assert!(matches!(error_for_status("llm", 401, ""), Error::Auth(_)));
        assert!(matches!(error_for_status("llm", 403, ""), Error::Auth(_)));
        assert!(matches!(error_for_status("llm", 429, ""), Error::Quota(_)));
        assert!(matches!(
            error_for_status("tts", 503, ""),
            Error::TransientProvider(_)
        ));
        assert!(matches!(
            error_for_status("ttm", 504, ""),
            Error::Timeout(_)
        ));
        assert!(matches!(
            error_for_status("llm", 400, ""),
            Error::Validation(_)
        ));
    }
}
