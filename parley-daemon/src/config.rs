//! Configuration management

use anyhow::{Context, Result};
use parley_audio::{AudioConfig, OutputConfig, DEFAULT_BLOCKSIZE, TARGET_SAMPLE_RATE};
use parley_session::config::{DEFAULT_ENDPOINT, DEFAULT_MODEL, DEFAULT_SYSTEM_INSTRUCTION};
use parley_session::SessionConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::conversation::ConversationSettings;

/// Environment variables consulted for the API key, in order
pub const API_KEY_VARS: [&str; 2] = ["PARLEY_API_KEY", "GEMINI_API_KEY"];

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Path the configuration was loaded from
    #[serde(skip)]
    pub config_path: PathBuf,

    /// WebSocket endpoint of the live model
    pub endpoint: String,

    pub model: String,

    /// Prefer the environment for this; a key stored here is written in plain text
    pub api_key: Option<String>,

    pub system_instruction: Option<String>,

    /// Ask the endpoint to transcribe the user
    pub input_transcription: bool,

    /// Ask the endpoint to transcribe its replies
    pub output_transcription: bool,

    /// Microphone index (None = default device)
    pub input_device_index: Option<usize>,

    /// Speaker index (None = default device)
    pub output_device_index: Option<usize>,

    /// Samples per capture block at 16 kHz
    pub blocksize: usize,

    pub outbound_queue: usize,

    pub preopen_buffer: usize,

    /// Handshake limit in seconds (None = no limit; `stop` cancels)
    pub connect_timeout_secs: Option<u64>,

    /// Control socket (None = platform default)
    pub ipc_socket_path: Option<PathBuf>,

    /// UI event socket (None = platform default)
    pub broadcast_socket_path: Option<PathBuf>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::new(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            system_instruction: Some(DEFAULT_SYSTEM_INSTRUCTION.to_string()),
            input_transcription: true,
            output_transcription: true,
            input_device_index: None,
            output_device_index: None,
            blocksize: DEFAULT_BLOCKSIZE,
            outbound_queue: 64,
            preopen_buffer: 16,
            connect_timeout_secs: None,
            ipc_socket_path: None,
            broadcast_socket_path: None,
        }
    }
}

impl DaemonConfig {
    /// Load configuration from the default location, creating it on first run
    pub fn load() -> Result<Self> {
        let path = parley_paths::get_config_file_path()?;
        Self::load_from(&path)
    }

    /// Load configuration from `path`, writing defaults if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;

            toml::from_str::<DaemonConfig>(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))?
        } else {
            let mut config = Self::default();
            config.config_path = path.to_path_buf();
            config.save().context("Failed to save default config")?;
            info!("Wrote default configuration to {}", path.display());
            config
        };

        config.config_path = path.to_path_buf();
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&self.config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Environment overrides. `lookup` is `std::env::var` outside of tests.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let from_env = API_KEY_VARS
            .iter()
            .filter_map(|name| lookup(name))
            .find(|value| !value.trim().is_empty());

        if let Some(key) = from_env {
            self.api_key = Some(key.trim().to_string());
        }
    }

    pub fn ipc_socket_path(&self) -> Result<PathBuf> {
        match &self.ipc_socket_path {
            Some(path) => Ok(path.clone()),
            None => parley_paths::get_ipc_socket_path(),
        }
    }

    pub fn broadcast_socket_path(&self) -> Result<PathBuf> {
        match &self.broadcast_socket_path {
            Some(path) => Ok(path.clone()),
            None => parley_paths::get_broadcast_socket_path(),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.endpoint.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            system_instruction: self.system_instruction.clone(),
            input_transcription: self.input_transcription,
            output_transcription: self.output_transcription,
            outbound_queue: self.outbound_queue,
            preopen_buffer: self.preopen_buffer,
            connect_timeout: self.connect_timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn conversation_settings(&self) -> ConversationSettings {
        ConversationSettings {
            session: self.session_config(),
            capture: AudioConfig {
                sample_rate: TARGET_SAMPLE_RATE,
                blocksize: self.blocksize,
                device_index: self.input_device_index,
                ..AudioConfig::default()
            },
            output: OutputConfig {
                device_index: self.output_device_index,
                ..OutputConfig::default()
            },
        }
    }
}
