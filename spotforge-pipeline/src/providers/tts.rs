//! TTS provider adapter
//!
//! Calls the speech provider's with-timestamps endpoint and decodes the
//! base64 audio plus the character alignment arrays into `CharTiming`s.

use base64::Engine;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use spotforge_common::{Error, Result};
use std::time::Duration;

use super::{error_for_status, error_for_transport, SpeechOutput, SpeechRequest, SpeechSynthesizer};
use crate::models::CharTiming;

const DEFAULT_BASE_URL: &str = "https://api.elevenlabs.io/v1";
const CALL_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Serialize)]
struct SynthesisBody<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettingsBody,
}

#[derive(Serialize)]
struct VoiceSettingsBody {
    stability: f64,
    similarity_boost: f64,
}

#[derive(Deserialize)]
struct TimestampResponse {
    audio_base64: String,
    alignment: Option<AlignmentBody>,
}

#[derive(Deserialize)]
struct AlignmentBody {
    characters: Vec<String>,
    character_start_times_seconds: Vec<f64>,
    character_end_times_seconds: Vec<f64>,
}

pub struct HttpSpeechSynthesizer {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpSpeechSynthesizer {
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
        })
    }
}

impl SpeechSynthesizer for HttpSpeechSynthesizer {
    fn synthesize<'a>(&'a self, request: &'a SpeechRequest) -> BoxFuture<'a, Result<SpeechOutput>> {
        async move {
            let endpoint = if request.with_timestamps {
                format!(
                    "{}/text-to-speech/{}/with-timestamps",
                    self.base_url, request.voice_id
                )
            } else {
                format!("{}/text-to-speech/{}", self.base_url, request.voice_id)
            };

            let body = SynthesisBody {
                text: &request.text,
                model_id: "eleven_multilingual_v2",
                voice_settings: VoiceSettingsBody {
                    stability: 0.5,
                    similarity_boost: 0.75,
                },
            };

            let response = self
                .client
                .post(endpoint)
                .header("xi-api-key", &self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| error_for_transport("tts", e))?;

            let status = response.status().as_u16();
            if status >= 400 {
                let text = response.text().await.unwrap_or_default();
                return Err(error_for_status("tts", status, &text));
            }

            if request.with_timestamps {
                let parsed: TimestampResponse = response
                    .json()
                    .await
                    .map_err(|e| error_for_transport("tts", e))?;
                let audio = base64::engine::general_purpose::STANDARD
                    .decode(parsed.audio_base64.as_bytes())
                    .map_err(|e| {
                        Error::TransientProvider(format!("tts audio not base64: {}", e))
                    })?;
                let alignment = parsed.alignment.map(decode_alignment).transpose()?;
                Ok(SpeechOutput { audio, alignment })
            } else {
                let audio = response
                    .bytes()
                    .await
                    .map_err(|e| error_for_transport("tts", e))?
                    .to_vec();
                Ok(SpeechOutput {
                    audio,
                    alignment: None,
                })
            }
        }
        .boxed()
    }
}

/// Zip the provider's parallel arrays into per-character spans.
fn decode_alignment(body: AlignmentBody) -> Result<Vec<CharTiming>> {
    if body.characters.len() != body.character_start_times_seconds.len()
        || body.characters.len() != body.character_end_times_seconds.len()
    {
        return Err(Error::AlignmentMismatch(format!(
            "alignment arrays disagree: {} chars, {} starts, {} ends",
            body.characters.len(),
            body.character_start_times_seconds.len(),
            body.character_end_times_seconds.len()
        )));
    }
    let mut timings = Vec::with_capacity(body.characters.len());
    for ((ch, start), end) in body
        .characters
        .iter()
        .zip(&body.character_start_times_seconds)
        .zip(&body.character_end_times_seconds)
    {
        timings.push(CharTiming {
            ch: ch.chars().next().unwrap_or(' '),
            start: *start,
            end: *end,
        });
    }
    Ok(timings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_arrays_zip_into_char_timings() {
        let body = AlignmentBody {
            characters: vec!["H".into(), "i".into()],
            character_start_times_seconds: vec![0.0, 0.1],
            character_end_times_seconds: vec![0.1, 0.2],
        };
        let timings = decode_alignment(body).unwrap();
        assert_eq!(timings.len(), 2);
        assert_eq!(timings[0].ch, 'H');
        assert!((timings[1].end - 0.2).abs() < 1e-9);
    }

    #[test]
    fn mismatched_arrays_are_rejected() {
        let body = AlignmentBody {
            characters: vec!["H".into(), "i".into()],
            character_start_times_seconds: vec![0.0],
            character_end_times_seconds: vec![0.1, 0.2],
        };
        assert!(matches!(
            decode_alignment(body),
            Err(Error::AlignmentMismatch(_))
        ));
    }
}
