//! Application configuration
//!
//! Defaults are embedded from config.toml at build time; secrets and
//! per-machine settings come from the environment (or a .env file) at
//! startup.

use crate::interview::actions::{self, ActionButton};
use crate::realtime::{RealtimeOptions, RetryTrigger};
use serde::Deserialize;

const CONFIG_TOML: &str = include_str!("../config.toml");

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub backend: BackendSettings,
    #[serde(default)]
    pub realtime: RealtimeSettings,
    #[serde(default)]
    pub actions: ActionSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendSettings {
    pub base_url: String,
    /// Bearer token for the backend, normally set via INTERVOX_BACKEND_TOKEN
    #[serde(default)]
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RealtimeSettings {
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub retry_trigger: RetryTrigger,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionSettings {
    #[serde(default)]
    pub buttons: Vec<ActionButton>,
}

impl Settings {
    /// Parse the embedded defaults, then apply environment overrides
    pub fn load() -> Result<Self, toml::de::Error> {
        let mut settings: Settings = toml::from_str(CONFIG_TOML)?;
        settings.apply_env();
        Ok(settings)
    }

    fn apply_env(&mut self) {
        if let Ok(value) = std::env::var("INTERVOX_BACKEND_URL") {
            if !value.is_empty() {
                self.backend.base_url = value;
            }
        }
        if let Ok(value) = std::env::var("INTERVOX_BACKEND_TOKEN") {
            if !value.is_empty() {
                self.backend.auth_token = Some(value);
            }
        }
        if let Ok(value) = std::env::var("INTERVOX_LANGUAGE") {
            if !value.is_empty() {
                self.realtime.language = Some(value);
            }
        }
        if let Ok(value) = std::env::var("INTERVOX_MODEL") {
            if !value.is_empty() {
                self.realtime.model = Some(value);
            }
        }
    }

    /// Connection settings for one realtime session attempt
    pub fn realtime_options(&self) -> RealtimeOptions {
        RealtimeOptions {
            backend_base_url: self.backend.base_url.clone(),
            auth_token: self.backend.auth_token.clone(),
            language: self.realtime.language.clone(),
            model: self.realtime.model.clone(),
            retry_trigger: self.realtime.retry_trigger,
        }
    }

    /// Configured action buttons, or the built-in set when none are
    /// configured
    pub fn action_buttons(&self) -> Vec<ActionButton> {
        if self.actions.buttons.is_empty() {
            actions::default_buttons()
        } else {
            self.actions.buttons.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_defaults_parse() {
        let settings: Settings = toml::from_str(CONFIG_TOML).unwrap();
        assert_eq!(settings.backend.base_url, "http://localhost:8000");
        assert_eq!(settings.realtime.model.as_deref(), Some("gpt-4o-transcribe"));
        assert_eq!(settings.realtime.retry_trigger, RetryTrigger::Either);
        assert_eq!(settings.actions.buttons.len(), 2);
    }

    #[test]
    fn test_minimal_config_parses() {
        let settings: Settings = toml::from_str("[backend]\nbase_url = \"http://x\"").unwrap();
        assert!(settings.realtime.language.is_none());
        assert_eq!(settings.realtime.retry_trigger, RetryTrigger::default());
        // No configured buttons falls back to the built-in set
        assert!(!settings.action_buttons().is_empty());
    }

    #[test]
    fn test_realtime_options_carry_backend_settings() {
        let settings: Settings = toml::from_str(CONFIG_TOML).unwrap();
        let options = settings.realtime_options();
        assert_eq!(options.backend_base_url, settings.backend.base_url);
        assert_eq!(options.language.as_deref(), Some("en"));
    }
}
