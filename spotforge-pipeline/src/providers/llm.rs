//! LLM blueprint generator adapter
//!
//! Chat-completions style HTTP client that asks the model for the
//! ad-production blueprint as a single JSON document and validates it at
//! the boundary. Schema-invalid output is a `Validation` error (the
//! orchestrator then assembles the deterministic fallback); quota and auth
//! failures keep their own kinds.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use spotforge_common::{Error, Result};
use std::time::Duration;

use super::{error_for_status, error_for_transport, BlueprintGenerator, ScriptRequest};
use crate::models::AdBlueprint;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const CALL_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f64,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

pub struct HttpBlueprintGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpBlueprintGenerator {
    pub fn new(api_key: &str) -> Result<Self> {
        Self::with_base_url(api_key, DEFAULT_BASE_URL)
    }

    pub fn with_base_url(api_key: &str, base_url: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(CALL_TIMEOUT)
            .build()
            .map_err(|e| Error::Internal(format!("cannot build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            model: DEFAULT_MODEL.to_string(),
        })
    }

    fn system_prompt() -> &'static str {
        "You are an audio advertisement producer. Respond with a single JSON \
         object describing the ad: `script` (the voice-over text), `context` \
         {duration_seconds, ad_category}, `music` {target_bpm, genre, mood, \
         key, arc[], button_ending, musical_structure, instrumentation[], \
         composer_direction}, `sentence_cues[]` {music_volume, function, cue}, \
         `fades` {fade_in, fade_out, curve} and `volume` {voice, music, \
         ducking}. The script must read naturally at the requested duration. \
         Musical function must be one of hook, build, peak, resolve, \
         transition, pause."
    }

    fn user_prompt(request: &ScriptRequest) -> String {
        format!(
            "Produce an audio ad blueprint.\nBrief: {}\nTarget duration: {} seconds\nTone: {}",
            request.prompt, request.duration_seconds, request.tone
        )
    }
}

impl BlueprintGenerator for HttpBlueprintGenerator {
    fn generate<'a>(&'a self, request: &'a ScriptRequest) -> BoxFuture<'a, Result<AdBlueprint>> {
        async move {
            let body = ChatRequest {
                model: &self.model,
                messages: vec![
                    ChatMessage {
                        role: "system",
                        content: Self::system_prompt().to_string(),
                    },
                    ChatMessage {
                        role: "user",
                        content: Self::user_prompt(request),
                    },
                ],
                temperature: 0.7,
                response_format: ResponseFormat { kind: "json_object" },
            };

            let response = self
                .client
                .post(format!("{}/chat/completions", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| error_for_transport("llm", e))?;

            let status = response.status().as_u16();
            let text = response
                .text()
                .await
                .map_err(|e| error_for_transport("llm", e))?;
            if status >= 400 {
                return Err(error_for_status("llm", status, &text));
            }

            let parsed: ChatResponse = serde_json::from_str(&text)
                .map_err(|e| Error::Validation(format!("malformed completion envelope: {}", e)))?;
            let content = parsed
                .choices
                .first()
                .map(|c| c.message.content.as_str())
                .ok_or_else(|| Error::Validation("completion has no choices".into()))?;

            let blueprint: AdBlueprint = serde_json::from_str(content)
                .map_err(|e| Error::Validation(format!("blueprint JSON invalid: {}", e)))?;
            blueprint.validate()?;

            tracing::info!(
                bpm = blueprint.music.target_bpm,
                genre = %blueprint.music.genre,
                sentences = blueprint.sentence_cues.len(),
                "blueprint generated"
            );
            Ok(blueprint)
        }
        .boxed()
    }
}
