//! Configuration loading
//!
//! Environment-first configuration with CLI overrides layered on top by the
//! binary. Secrets are optional at load time; each provider adapter demands
//! its key through the `require_*` accessors so that a missing secret
//! surfaces as CONFIG_MISSING exactly when the capability is first used.

use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Pipeline configuration resolved from the environment
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory for all persisted audio (default `./uploads`)
    pub upload_dir: PathBuf,
    /// SQLite URL for the durable store (default `<upload_dir>/spotforge.db`)
    pub queue_url: String,
    pub llm_api_key: Option<String>,
    pub tts_api_key: Option<String>,
    pub ttm_api_key: Option<String>,
    /// Log filter directive (default `info`)
    pub log_level: String,
}

impl Config {
    /// Resolve configuration from environment variables.
    pub fn from_env() -> Self {
        let upload_dir = PathBuf::from(
            std::env::var("UPLOAD_DIR").unwrap_or_else(|_| "./uploads".to_string()),
        );
        let queue_url = std::env::var("QUEUE_URL").unwrap_or_else(|_| {
            format!("sqlite://{}?mode=rwc", upload_dir.join("spotforge.db").display())
        });
        Self {
            upload_dir,
            queue_url,
            llm_api_key: non_empty(std::env::var("LLM_API_KEY").ok()),
            tts_api_key: non_empty(std::env::var("TTS_API_KEY").ok()),
            ttm_api_key: non_empty(std::env::var("TTM_API_KEY").ok()),
            log_level: std::env::var("LOG_LEVEL")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),
        }
    }

    pub fn require_llm_key(&self) -> Result<&str> {
        self.llm_api_key
            .as_deref()
            .ok_or_else(|| Error::ConfigMissing("LLM_API_KEY".to_string()))
    }

    pub fn require_tts_key(&self) -> Result<&str> {
        self.tts_api_key
            .as_deref()
            .ok_or_else(|| Error::ConfigMissing("TTS_API_KEY".to_string()))
    }

    pub fn require_ttm_key(&self) -> Result<&str> {
        self.ttm_api_key
            .as_deref()
            .ok_or_else(|| Error::ConfigMissing("TTM_API_KEY".to_string()))
    }

    /// Voice assets: `<upload_dir>/audio/`
    pub fn audio_dir(&self) -> PathBuf {
        self.upload_dir.join("audio")
    }

    /// Music bed variants: `<upload_dir>/music/`
    pub fn music_dir(&self) -> PathBuf {
        self.upload_dir.join("music")
    }

    /// Final mixes: `<upload_dir>/productions/`
    pub fn productions_dir(&self) -> PathBuf {
        self.upload_dir.join("productions")
    }

    /// Per-production scratch space, cleaned on terminal state
    pub fn work_dir(&self, production_id: uuid::Uuid) -> PathBuf {
        self.upload_dir.join("work").join(production_id.to_string())
    }

    /// Create the persistent directory tree under the upload root.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.upload_dir.clone(),
            self.audio_dir(),
            self.music_dir(),
            self.productions_dir(),
            self.upload_dir.join("work"),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Public URL for a stored file: the path with the upload root stripped.
    pub fn public_url(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.upload_dir).unwrap_or(path);
        format!("/{}", rel.display())
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_url_strips_upload_root() {
        let config = Config {
            upload_dir: PathBuf::from("/srv/uploads"),
            queue_url: "sqlite::memory:".into(),
            llm_api_key: None,
            tts_api_key: None,
            ttm_api_key: None,
            log_level: "info".into(),
        };
        let url = config.public_url(Path::new("/srv/uploads/audio/voice_1.mp3"));
        assert_eq!(url, "/audio/voice_1.mp3");
    }

    #[test]
    fn missing_secret_is_config_missing() {
        let config = Config {
            upload_dir: PathBuf::from("./uploads"),
            queue_url: "sqlite::memory:".into(),
            llm_api_key: None,
            tts_api_key: Some("k".into()),
            ttm_api_key: None,
            log_level: "info".into(),
        };
        assert!(matches!(
            config.require_llm_key(),
            Err(Error::ConfigMissing(_))
        ));
        assert!(config.require_tts_key().is_ok());
    }
}
