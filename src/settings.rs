use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::streaming::protocol::{TranscriptionConfig, TurnDetection, REALTIME_API_URL};
use crate::streaming::transport::REALTIME_BETA_HEADER;
use crate::streaming::{ConnectRequest, SessionConfig, StageTimeouts};

const SETTINGS_DIR_NAME: &str = "checkin-voice";
const SETTINGS_FILE_NAME: &str = "settings.json";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Could not determine config directory")]
    NoConfigDir,
    #[error("Failed to read {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Serialize settings: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Realtime endpoint, including the `?model=` query.
    pub endpoint_url: String,

    /// Value of the `OpenAI-Beta` header.
    pub beta_header: String,

    pub voice: String,
    pub temperature: f32,
    pub max_response_output_tokens: u32,

    /// Server VAD activation threshold (0.0 - 1.0).
    pub vad_threshold: f32,
    pub vad_prefix_padding_ms: u32,
    pub vad_silence_duration_ms: u32,

    pub transcription_model: String,

    /// Assistant instructions. Ignored when `instructions_file` is set.
    pub instructions: String,

    /// Read instructions from this file instead (e.g. a profile export).
    pub instructions_file: Option<PathBuf>,

    pub connecting_timeout_ms: u64,
    pub session_created_timeout_ms: u64,
    pub session_updated_timeout_ms: u64,
    pub closing_timeout_ms: u64,

    /// Microphone capture and metering period.
    pub capture_interval_ms: u64,
}

impl Default for AppSettings {
    fn default() -> Self {
        let session = SessionConfig::default();
        let vad = TurnDetection::default();
        let timeouts = StageTimeouts::default();
        Self {
            endpoint_url: REALTIME_API_URL.to_string(),
            beta_header: REALTIME_BETA_HEADER.to_string(),
            voice: session.voice,
            temperature: session.temperature,
            max_response_output_tokens: session.max_response_output_tokens,
            vad_threshold: vad.threshold,
            vad_prefix_padding_ms: vad.prefix_padding_ms,
            vad_silence_duration_ms: vad.silence_duration_ms,
            transcription_model: "whisper-1".to_string(),
            instructions: String::new(),
            instructions_file: None,
            connecting_timeout_ms: timeouts.connecting.as_millis() as u64,
            session_created_timeout_ms: timeouts.awaiting_session_created.as_millis() as u64,
            session_updated_timeout_ms: timeouts.configuring_session.as_millis() as u64,
            closing_timeout_ms: timeouts.closing.as_millis() as u64,
            capture_interval_ms: 100,
        }
    }
}

impl AppSettings {
    /// Instructions text, reading `instructions_file` when configured
    pub fn resolve_instructions(&self) -> Result<String, SettingsError> {
        match &self.instructions_file {
            Some(path) => std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
                path: path.clone(),
                source,
            }),
            None => Ok(self.instructions.clone()),
        }
    }

    /// The `session.update` payload for these settings
    pub fn session_config(&self, instructions: String) -> SessionConfig {
        SessionConfig {
            instructions,
            turn_detection: Some(TurnDetection {
                threshold: self.vad_threshold,
                prefix_padding_ms: self.vad_prefix_padding_ms,
                silence_duration_ms: self.vad_silence_duration_ms,
                ..TurnDetection::default()
            }),
            voice: self.voice.clone(),
            temperature: self.temperature,
            max_response_output_tokens: self.max_response_output_tokens,
            input_audio_transcription: Some(TranscriptionConfig {
                model: self.transcription_model.clone(),
            }),
            ..SessionConfig::default()
        }
    }

    pub fn connect_request(&self, api_key: &str) -> ConnectRequest {
        ConnectRequest {
            url: self.endpoint_url.clone(),
            api_key: api_key.to_string(),
            beta_header: self.beta_header.clone(),
        }
    }

    pub fn stage_timeouts(&self) -> StageTimeouts {
        StageTimeouts {
            connecting: Duration::from_millis(self.connecting_timeout_ms),
            awaiting_session_created: Duration::from_millis(self.session_created_timeout_ms),
            configuring_session: Duration::from_millis(self.session_updated_timeout_ms),
            closing: Duration::from_millis(self.closing_timeout_ms),
        }
    }

    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(self.capture_interval_ms.max(10))
    }
}

/// `<config_dir>/checkin-voice/settings.json`
pub fn default_settings_path() -> Result<PathBuf, SettingsError> {
    let dir = dirs::config_dir().ok_or(SettingsError::NoConfigDir)?;
    Ok(dir.join(SETTINGS_DIR_NAME).join(SETTINGS_FILE_NAME))
}

/// Load settings, falling back to defaults when the file is missing or invalid.
pub fn load_settings(path: &Path) -> AppSettings {
    match std::fs::read_to_string(path) {
        Ok(contents) => match serde_json::from_str::<AppSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                log::warn!("Settings: failed to parse {:?}: {}", path, e);
                AppSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => AppSettings::default(),
        Err(e) => {
            log::warn!("Settings: failed to read {:?}: {}", path, e);
            AppSettings::default()
        }
    }
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| SettingsError::Write {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let contents = serde_json::to_string_pretty(settings)?;

    // Write atomically: temp file in the same directory, then rename over the target.
    let tmp_path = path.with_extension("json.tmp");
    std::fs::write(&tmp_path, &contents).map_err(|source| SettingsError::Write {
        path: tmp_path.clone(),
        source,
    })?;

    // rename replaces atomically on Unix; Windows refuses to overwrite
    if cfg!(windows) && path.exists() {
        if let Err(source) = std::fs::remove_file(path) {
            if source.kind() != std::io::ErrorKind::NotFound {
                return Err(SettingsError::Write {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }
    }

    std::fs::rename(&tmp_path, path).map_err(|source| SettingsError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Get the OpenAI API key from environment
pub fn get_api_key() -> Option<String> {
    std::env::var("OPENAI_API_KEY")
        .ok()
        .filter(|k| !k.is_empty())
}
