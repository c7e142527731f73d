//! Configuration loading and validation.
//!
//! A [`SessionConfig`] is resolved once and is immutable for the lifetime of
//! a session; changing it means tearing the session down and starting a new
//! one. Unrecognized options are rejected at load time, not silently
//! ignored.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AriaError, Result};

/// Top-level Aria configuration (`~/.aria/config.json`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
}

/// Immutable per-session configuration snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfig {
    /// Remote model identifier.
    #[serde(default = "default_model")]
    pub model: String,

    /// Synthesis voice id.
    #[serde(default = "default_voice")]
    pub voice: String,

    /// Drive turn-taking from audio energy. When false, an explicit
    /// end-turn signal is required instead.
    #[serde(default = "default_true")]
    pub vad_enabled: bool,

    /// Advertise tool schemas to the model and surface its function calls.
    #[serde(default)]
    pub function_calling_enabled: bool,

    /// System prompt sent as session instructions.
    #[serde(default)]
    pub system_prompt: String,

    #[serde(default)]
    pub locale: LocaleFlags,

    #[serde(default)]
    pub vad: VadSettings,

    /// Tool schemas advertised when `function_calling_enabled` is set.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<serde_json::Value>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            voice: default_voice(),
            vad_enabled: true,
            function_calling_enabled: false,
            system_prompt: String::new(),
            locale: LocaleFlags::default(),
            vad: VadSettings::default(),
            tools: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// Check the snapshot before a session is started.
    pub fn validate(&self) -> Result<()> {
        if self.model.is_empty() {
            return Err(AriaError::Configuration("model must not be empty".into()));
        }
        if self.voice.is_empty() {
            return Err(AriaError::Configuration("voice must not be empty".into()));
        }
        self.vad.validate()?;
        if self.function_calling_enabled && self.tools.is_empty() {
            tracing::warn!("function calling enabled but no tool schemas configured");
        }
        Ok(())
    }
}

fn default_model() -> String {
    "gpt-4o-mini-realtime-preview-2024-12-17".into()
}

fn default_voice() -> String {
    "echo".into()
}

fn default_true() -> bool {
    true
}

/// Whether text turns get the current date/time appended.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocaleFlags {
    #[serde(default = "default_true")]
    pub include_date: bool,
    #[serde(default = "default_true")]
    pub include_time: bool,
}

impl Default for LocaleFlags {
    fn default() -> Self {
        Self {
            include_date: true,
            include_time: true,
        }
    }
}

/// Energy-VAD sensitivity. Enter/exit thresholds are distinct on purpose:
/// the gap is the hysteresis band that stops chatter at the boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VadSettings {
    /// RMS above which a silent stream counts as speech.
    #[serde(default = "default_enter_rms")]
    pub enter_rms: f64,

    /// RMS below which an active stream counts as silence.
    #[serde(default = "default_exit_rms")]
    pub exit_rms: f64,

    /// Consecutive loud frames before speech-start fires.
    #[serde(default = "default_min_speech_frames")]
    pub min_speech_frames: u32,

    /// Consecutive quiet frames before speech-stop fires.
    #[serde(default = "default_min_silence_frames")]
    pub min_silence_frames: u32,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            enter_rms: default_enter_rms(),
            exit_rms: default_exit_rms(),
            min_speech_frames: default_min_speech_frames(),
            min_silence_frames: default_min_silence_frames(),
        }
    }
}

impl VadSettings {
    pub fn validate(&self) -> Result<()> {
        if self.enter_rms <= 0.0 || self.exit_rms <= 0.0 {
            return Err(AriaError::Configuration(
                "vad thresholds must be positive".into(),
            ));
        }
        if self.enter_rms < self.exit_rms {
            return Err(AriaError::Configuration(format!(
                "vad enter_rms ({}) must be >= exit_rms ({})",
                self.enter_rms, self.exit_rms
            )));
        }
        if self.min_speech_frames == 0 || self.min_silence_frames == 0 {
            return Err(AriaError::Configuration(
                "vad frame counts must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn default_enter_rms() -> f64 {
    500.0
}

fn default_exit_rms() -> f64 {
    300.0
}

fn default_min_speech_frames() -> u32 {
    3 // 60 ms of 20 ms frames
}

fn default_min_silence_frames() -> u32 {
    25 // ~500 ms of 20 ms frames
}

/// Remote endpoint and credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            api_key_env: None,
        }
    }
}

fn default_base_url() -> String {
    "wss://api.openai.com/v1/realtime".into()
}

impl RemoteConfig {
    /// Resolve the API key: direct value, then the configured env var, then
    /// `OPENAI_API_KEY`.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(key) =
            resolve_secret_field(&self.api_key, &self.api_key_env)
        {
            return Some(key);
        }
        std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
    }

    /// Like [`resolve_api_key`](Self::resolve_api_key) but a hard
    /// `ConfigurationError` when absent.
    pub fn require_api_key(&self) -> Result<String> {
        self.resolve_api_key().ok_or_else(|| {
            AriaError::Configuration(
                "no API key configured (set remote.api_key or OPENAI_API_KEY)".into(),
            )
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "aria_realtime=debug").
    #[serde(default)]
    pub filters: Vec<String>,
}

fn default_log_format() -> String {
    "plain".into()
}

/// Resolve a secret: check the direct value first, then the env-var
/// reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment
/// variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    ///
    /// Unknown keys fail with `ConfigurationError` so a typo'd option never
    /// silently disappears.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(AriaError::Io)?;
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| AriaError::Configuration(e.to_string()))?;

        Ok(config)
    }

    /// Default config file path: `~/.aria/config.json`.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    /// Get a config value by dotted path (e.g. "session.voice").
    pub fn get_path(&self, path: &str) -> Option<serde_json::Value> {
        let json = serde_json::to_value(self).ok()?;
        let mut current = &json;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current.clone())
    }
}

/// Base directory for Aria data: `~/.aria/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".aria")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(config.session.vad_enabled);
        assert!(!config.session.function_calling_enabled);
        assert_eq!(config.session.voice, "echo");
        assert!(config.session.locale.include_date);
        assert!(config.session.validate().is_ok());
    }

    #[test]
    fn test_unknown_option_rejected() {
        let raw = r#"{ "session": { "voise": "echo" } }"#;
        let parsed: std::result::Result<Config, _> = json5::from_str(raw);
        assert!(parsed.is_err(), "typo'd key must not be silently ignored");
    }

    #[test]
    fn test_env_var_substitution() {
        // SAFETY: test-only, single-threaded test runner
        unsafe { std::env::set_var("TEST_ARIA_VOICE", "verse") };
        let input = r#"{"voice": "${TEST_ARIA_VOICE}"}"#;
        let result = substitute_env_vars(input);
        assert!(result.contains("verse"));
        unsafe { std::env::remove_var("TEST_ARIA_VOICE") };
    }

    #[test]
    fn test_vad_settings_validation() {
        let mut vad = VadSettings::default();
        assert!(vad.validate().is_ok());

        vad.enter_rms = 100.0;
        vad.exit_rms = 200.0;
        assert!(vad.validate().is_err(), "inverted hysteresis must fail");

        let mut vad = VadSettings::default();
        vad.min_silence_frames = 0;
        assert!(vad.validate().is_err());
    }

    #[test]
    fn test_resolve_api_key_priority() {
        // SAFETY: test-only, single-threaded test runner
        unsafe { std::env::set_var("TEST_ARIA_KEY", "from-env") };
        let remote = RemoteConfig {
            base_url: default_base_url(),
            api_key: None,
            api_key_env: Some("TEST_ARIA_KEY".into()),
        };
        assert_eq!(remote.resolve_api_key(), Some("from-env".into()));

        let remote = RemoteConfig {
            base_url: default_base_url(),
            api_key: Some("direct".into()),
            api_key_env: Some("TEST_ARIA_KEY".into()),
        };
        assert_eq!(remote.resolve_api_key(), Some("direct".into()));
        unsafe { std::env::remove_var("TEST_ARIA_KEY") };
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let config = Config::load(Path::new("/nonexistent/aria.json")).unwrap();
        assert_eq!(config.session.model, default_model());
    }

    #[test]
    fn test_get_path() {
        let config = Config::default();
        assert_eq!(
            config.get_path("session.voice"),
            Some(serde_json::json!("echo"))
        );
        assert!(config.get_path("session.nope").is_none());
    }
}
