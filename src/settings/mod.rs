//! Speech settings and their flat key/value persistence.

pub mod store;

pub use store::{FileSettingsStore, MemorySettingsStore, SettingValue, SettingsStore};

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::config::CredentialDefaults;
use crate::error::VoxError;

pub const KEY_PROVIDER: &str = "tts_provider";
pub const KEY_VOICE: &str = "tts_voice";
pub const KEY_RATE: &str = "tts_rate";
pub const KEY_PITCH: &str = "tts_pitch";
pub const KEY_OPENAI_API_KEY: &str = "openai_api_key";
pub const KEY_OPENAI_BASE_URL: &str = "openai_base_url";
pub const KEY_OPENAI_MODEL: &str = "openai_model";
pub const KEY_AZURE_API_KEY: &str = "azure_api_key";
pub const KEY_AZURE_REGION: &str = "azure_region";

/// Every key [`SpeechSettings`] reads or writes.
pub const ALL_KEYS: [&str; 9] = [
    KEY_PROVIDER,
    KEY_VOICE,
    KEY_RATE,
    KEY_PITCH,
    KEY_OPENAI_API_KEY,
    KEY_OPENAI_BASE_URL,
    KEY_OPENAI_MODEL,
    KEY_AZURE_API_KEY,
    KEY_AZURE_REGION,
];

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini-tts";

/// Which speech backend produces audio.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(ascii_case_insensitive)]
pub enum ProviderKind {
    /// On-device command-line engine.
    #[default]
    #[strum(to_string = "system", serialize = "local")]
    #[serde(rename = "system", alias = "local")]
    Local,
    /// JSON request/response cloud API.
    #[strum(to_string = "openai")]
    OpenAi,
    /// SSML request/response cloud API.
    #[strum(to_string = "azure")]
    Azure,
}

impl ProviderKind {
    /// Decode a stored value; anything unknown means the on-device engine.
    pub fn from_stored(value: &str) -> Self {
        value.trim().parse().unwrap_or_default()
    }

    pub fn is_cloud(self) -> bool {
        !matches!(self, Self::Local)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAiSettings {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl Default for OpenAiSettings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_OPENAI_BASE_URL.to_string(),
            model: DEFAULT_OPENAI_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AzureSettings {
    pub api_key: String,
    /// Region name (`westeurope`) or a full endpoint URL.
    pub region: String,
}

/// User-facing speech settings.
///
/// Provider-specific sections are only meaningful while `provider` selects
/// that backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechSettings {
    pub provider: ProviderKind,
    pub rate: f32,
    pub pitch: f32,
    pub voice_id: String,
    pub openai: OpenAiSettings,
    pub azure: AzureSettings,
}

impl Default for SpeechSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Local,
            rate: 1.0,
            pitch: 1.0,
            voice_id: String::new(),
            openai: OpenAiSettings::default(),
            azure: AzureSettings::default(),
        }
    }
}

impl SpeechSettings {
    /// Read every field from `store` in one pass; missing keys keep defaults.
    pub fn load(store: &dyn SettingsStore) -> Result<Self, VoxError> {
        let values = store.snapshot()?;
        let defaults = Self::default();

        let text = |key: &str, fallback: &str| -> String {
            values
                .get(key)
                .map(SettingValue::as_text)
                .unwrap_or_else(|| fallback.to_string())
        };
        let float = |key: &str, fallback: f32| -> f32 {
            values
                .get(key)
                .and_then(SettingValue::as_float)
                .filter(|v| v.is_finite() && *v > 0.0)
                .unwrap_or(fallback)
        };

        Ok(Self {
            provider: values
                .get(KEY_PROVIDER)
                .map(|v| ProviderKind::from_stored(&v.as_text()))
                .unwrap_or_default(),
            rate: float(KEY_RATE, defaults.rate),
            pitch: float(KEY_PITCH, defaults.pitch),
            voice_id: text(KEY_VOICE, &defaults.voice_id),
            openai: OpenAiSettings {
                api_key: text(KEY_OPENAI_API_KEY, &defaults.openai.api_key),
                base_url: text(KEY_OPENAI_BASE_URL, &defaults.openai.base_url),
                model: text(KEY_OPENAI_MODEL, &defaults.openai.model),
            },
            azure: AzureSettings {
                api_key: text(KEY_AZURE_API_KEY, &defaults.azure.api_key),
                region: text(KEY_AZURE_REGION, &defaults.azure.region),
            },
        })
    }

    /// Write every field to `store`, one key at a time.
    pub fn save(&self, store: &dyn SettingsStore) -> Result<(), VoxError> {
        self.validate()?;
        store.set_string(KEY_PROVIDER, &self.provider.to_string())?;
        store.set_float(KEY_RATE, self.rate)?;
        store.set_float(KEY_PITCH, self.pitch)?;
        store.set_string(KEY_VOICE, &self.voice_id)?;
        store.set_string(KEY_OPENAI_API_KEY, &self.openai.api_key)?;
        store.set_string(KEY_OPENAI_BASE_URL, &self.openai.base_url)?;
        store.set_string(KEY_OPENAI_MODEL, &self.openai.model)?;
        store.set_string(KEY_AZURE_API_KEY, &self.azure.api_key)?;
        store.set_string(KEY_AZURE_REGION, &self.azure.region)?;
        Ok(())
    }

    /// Reject rates and pitches that no backend can honour.
    pub fn validate(&self) -> Result<(), VoxError> {
        if !self.rate.is_finite() || self.rate <= 0.0 {
            return Err(VoxError::InvalidArgument(format!(
                "Speech rate must be a positive number, got {}",
                self.rate
            )));
        }
        if !self.pitch.is_finite() || self.pitch <= 0.0 {
            return Err(VoxError::InvalidArgument(format!(
                "Speech pitch must be a positive number, got {}",
                self.pitch
            )));
        }
        Ok(())
    }

    /// Fill blank credential fields from environment defaults.
    pub fn with_fallback_credentials(mut self, defaults: &CredentialDefaults) -> Self {
        fn fill(slot: &mut String, fallback: &Option<String>) {
            if slot.trim().is_empty() {
                if let Some(value) = fallback {
                    *slot = value.clone();
                }
            }
        }
        fill(&mut self.openai.api_key, &defaults.openai_api_key);
        fill(&mut self.openai.base_url, &defaults.openai_base_url);
        fill(&mut self.azure.api_key, &defaults.azure_api_key);
        fill(&mut self.azure.region, &defaults.azure_region);
        self
    }

    /// Apply one `key = value` assignment as typed by a user.
    pub fn set_field(&mut self, key: &str, value: &str) -> Result<(), VoxError> {
        let mut next = self.clone();
        let parse_float = |value: &str| {
            value.trim().parse::<f32>().map_err(|_| {
                VoxError::InvalidArgument(format!("'{key}' expects a number, got '{value}'"))
            })
        };
        match key {
            KEY_PROVIDER => {
                next.provider = value.trim().parse().map_err(|_| {
                    VoxError::InvalidArgument(format!(
                        "Unknown provider '{value}' (expected system, openai or azure)"
                    ))
                })?
            }
            KEY_RATE => next.rate = parse_float(value)?,
            KEY_PITCH => next.pitch = parse_float(value)?,
            KEY_VOICE => next.voice_id = value.to_string(),
            KEY_OPENAI_API_KEY => next.openai.api_key = value.to_string(),
            KEY_OPENAI_BASE_URL => next.openai.base_url = value.to_string(),
            KEY_OPENAI_MODEL => next.openai.model = value.to_string(),
            KEY_AZURE_API_KEY => next.azure.api_key = value.to_string(),
            KEY_AZURE_REGION => next.azure.region = value.to_string(),
            other => {
                return Err(VoxError::InvalidArgument(format!(
                    "Unknown setting '{other}'"
                )))
            }
        }
        next.validate()?;
        *self = next;
        Ok(())
    }

    /// Flat view used by `settings show`; credentials are masked.
    pub fn describe(&self) -> BTreeMap<&'static str, String> {
        let mask = |secret: &str| {
            if secret.is_empty() {
                String::new()
            } else {
                "********".to_string()
            }
        };
        BTreeMap::from([
            (KEY_PROVIDER, self.provider.to_string()),
            (KEY_RATE, self.rate.to_string()),
            (KEY_PITCH, self.pitch.to_string()),
            (KEY_VOICE, self.voice_id.clone()),
            (KEY_OPENAI_API_KEY, mask(&self.openai.api_key)),
            (KEY_OPENAI_BASE_URL, self.openai.base_url.clone()),
            (KEY_OPENAI_MODEL, self.openai.model.clone()),
            (KEY_AZURE_API_KEY, mask(&self.azure.api_key)),
            (KEY_AZURE_REGION, self.azure.region.clone()),
        ])
    }
}
