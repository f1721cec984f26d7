//! Text-to-music provider adapter

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use spotforge_common::{Error, Result};
use std::time::Duration;

use super::{error_for_status, error_for_transport, ComposeRequest, MusicComposer};

const DEFAULT_BASE_URL: &str = "https://api.musicgen.example/v1";
const CALL_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Serialize)]
struct ComposeBody<'a> {
    prompt: &'a str,
    duration_seconds: f64,
    format: &'static str,
}

pub struct HttpMusicComposer {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpMusicComposer {
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

impl MusicComposer for HttpMusicComposer {
    fn compose<'a>(&'a self, request: &'a ComposeRequest) -> BoxFuture<'a, Result<Vec<u8>>> {
        async move {
            let body = ComposeBody {
                prompt: &request.prompt,
                duration_seconds: request.duration_seconds,
                format: "mp3",
            };

            let response = self
                .client
                .post(format!("{}/compose", self.base_url))
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| error_for_transport("ttm", e))?;

            let status = response.status().as_u16();
            if status >= 400 {
                let text = response.text().await.unwrap_or_default();
                return Err(error_for_status("ttm", status, &text));
            }

            let audio = response
                .bytes()
                .await
                .map_err(|e| error_for_transport("ttm", e))?
                .to_vec();
            if audio.is_empty() {
                return Err(Error::TransientProvider("ttm returned empty audio".into()));
            }
            tracing::info!(bytes = audio.len(), "bed composed");
            Ok(audio)
        }
        .boxed()
    }
}
