//! Configuration system (layered: defaults < config file < environment).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::VoxError;

const CONFIG_FILE: &str = "config.toml";
const SETTINGS_FILE: &str = "settings.toml";
const LIBRARY_FILE: &str = "library.toml";

/// Credentials picked up from the environment.
///
/// Only consulted when the stored speech settings leave a field blank.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialDefaults {
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub azure_api_key: Option<String>,
    pub azure_region: Option<String>,
}

/// Process-wide configuration for voxbook.
///
/// Resolution order (later wins):
/// 1. Built-in defaults
/// 2. `<data_dir>/config.toml`
/// 3. Environment variables (`VOXBOOK_*`, plus provider credentials)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoxConfig {
    pub data_dir: PathBuf,
    /// Locale the on-device engine falls back to when the chosen voice is missing.
    pub target_locale: String,
    pub engine_program: String,
    pub player_program: String,
    pub player_args: Vec<String>,
    pub request_timeout_secs: u64,
    pub retry_attempts: u32,
    /// Activate the on-device backend when a cloud backend cannot start.
    pub fallback_to_local: bool,
    /// Single-byte encoding tried for text files that are not valid UTF-8.
    pub legacy_encoding: String,
    #[serde(skip)]
    pub credentials: CredentialDefaults,
}

impl Default for VoxConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            target_locale: "tr-TR".to_string(),
            engine_program: "espeak-ng".to_string(),
            player_program: "ffplay".to_string(),
            player_args: vec![
                "-nodisp".to_string(),
                "-autoexit".to_string(),
                "-loglevel".to_string(),
                "quiet".to_string(),
            ],
            request_timeout_secs: 30,
            retry_attempts: 2,
            fallback_to_local: true,
            legacy_encoding: "windows-1254".to_string(),
            credentials: CredentialDefaults::default(),
        }
    }
}

impl VoxConfig {
    /// Load the full layered configuration from the process environment.
    pub fn load() -> Result<Self, VoxError> {
        let _ = dotenvy::dotenv(); // .env is optional
        let lookup = |key: &str| std::env::var(key).ok();

        let data_dir = lookup("VOXBOOK_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);
        let mut config = Self::from_dir(&data_dir)?;
        config.apply_overrides(lookup);
        Ok(config)
    }

    /// Defaults plus `<dir>/config.toml` when present; `data_dir` is always `dir`.
    pub fn from_dir(dir: &Path) -> Result<Self, VoxError> {
        let path = dir.join(CONFIG_FILE);
        let mut config = match std::fs::read_to_string(&path) {
            Ok(raw) => toml::from_str::<VoxConfig>(&raw)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => return Err(err.into()),
        };
        config.data_dir = dir.to_path_buf();
        Ok(config)
    }

    /// Apply environment-style overrides from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(locale) = lookup("VOXBOOK_LOCALE") {
            self.target_locale = locale;
        }
        if let Some(engine) = lookup("VOXBOOK_ENGINE") {
            self.engine_program = engine;
        }
        if let Some(player) = lookup("VOXBOOK_PLAYER") {
            let mut parts = player.split_whitespace().map(str::to_string);
            if let Some(program) = parts.next() {
                self.player_program = program;
                self.player_args = parts.collect();
            }
        }
        if let Some(secs) = lookup("VOXBOOK_TIMEOUT_SECS") {
            match secs.trim().parse::<u64>() {
                Ok(value) if value > 0 => self.request_timeout_secs = value,
                _ => tracing::warn!(value = %secs, "Ignoring invalid VOXBOOK_TIMEOUT_SECS"),
            }
        }

        let non_blank = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        self.credentials = CredentialDefaults {
            openai_api_key: non_blank("OPENAI_API_KEY"),
            openai_base_url: non_blank("OPENAI_BASE_URL"),
            azure_api_key: non_blank("AZURE_SPEECH_KEY"),
            azure_region: non_blank("AZURE_SPEECH_REGION"),
        };
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn settings_path(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_FILE)
    }

    pub fn library_path(&self) -> PathBuf {
        self.data_dir.join(LIBRARY_FILE)
    }
}

fn default_data_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".voxbook"))
        .unwrap_or_else(|| PathBuf::from(".voxbook"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_config_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let config = VoxConfig::from_dir(dir.path()).unwrap();

        assert_eq!(config.data_dir, dir.path());
        assert_eq!(config.engine_program, "espeak-ng");
        assert_eq!(config.target_locale, "tr-TR");
        assert!(config.fallback_to_local);
    }

    #[test]
    fn config_file_overrides_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "target_locale = \"en-GB\"\nretry_attempts = 4\nplayer_program = \"mpv\"\nplayer_args = [\"--no-video\"]\n",
        )
        .unwrap();

        let config = VoxConfig::from_dir(dir.path()).unwrap();

        assert_eq!(config.target_locale, "en-GB");
        assert_eq!(config.retry_attempts, 4);
        assert_eq!(config.player_program, "mpv");
        assert_eq!(config.player_args, vec!["--no-video".to_string()]);
        assert_eq!(config.engine_program, "espeak-ng");
    }

    #[test]
    fn malformed_config_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "retry_attempts = \"many\"").unwrap();

        assert!(matches!(
            VoxConfig::from_dir(dir.path()),
            Err(VoxError::TomlDecode(_))
        ));
    }

    #[test]
    fn environment_overrides_win() {
        let mut config = VoxConfig::default();
        config.apply_overrides(lookup_from(&[
            ("VOXBOOK_LOCALE", "de-DE"),
            ("VOXBOOK_PLAYER", "mpv --really-quiet"),
            ("VOXBOOK_TIMEOUT_SECS", "12"),
            ("OPENAI_API_KEY", "sk-env"),
            ("AZURE_SPEECH_REGION", "  "),
        ]));

        assert_eq!(config.target_locale, "de-DE");
        assert_eq!(config.player_program, "mpv");
        assert_eq!(config.player_args, vec!["--really-quiet".to_string()]);
        assert_eq!(config.request_timeout(), Duration::from_secs(12));
        assert_eq!(config.credentials.openai_api_key.as_deref(), Some("sk-env"));
        assert_eq!(config.credentials.azure_region, None);
    }

    #[test]
    fn invalid_timeout_override_is_ignored() {
        let mut config = VoxConfig::default();
        config.apply_overrides(lookup_from(&[("VOXBOOK_TIMEOUT_SECS", "soon")]));
        assert_eq!(config.request_timeout_secs, 30);
    }
}
