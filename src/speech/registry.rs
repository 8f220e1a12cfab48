//! Backend selection and lifetime.

use std::collections::HashMap;
use std::sync::Arc;

use super::{EngineOption, LocalSpeechProvider, SpeechProvider};
use crate::config::VoxConfig;
use crate::error::VoxError;
use crate::settings::{ProviderKind, SpeechSettings};

/// Builds a backend from settings without side effects.
pub trait ProviderFactory: Send + Sync {
    fn create(&self, settings: &SpeechSettings) -> Result<Arc<dyn SpeechProvider>, VoxError>;
}

impl<F> ProviderFactory for F
where
    F: Fn(&SpeechSettings) -> Result<Arc<dyn SpeechProvider>, VoxError> + Send + Sync,
{
    fn create(&self, settings: &SpeechSettings) -> Result<Arc<dyn SpeechProvider>, VoxError> {
        self(settings)
    }
}

/// The parts of the settings that decide which backend instance is live.
///
/// Voice, rate and pitch travel with each request and never force a new
/// backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BackendKey {
    Local,
    OpenAi {
        api_key: String,
        base_url: String,
        model: String,
    },
    Azure {
        api_key: String,
        region: String,
    },
}

impl BackendKey {
    pub fn from_settings(settings: &SpeechSettings) -> Self {
        match settings.provider {
            ProviderKind::Local => Self::Local,
            ProviderKind::OpenAi => Self::OpenAi {
                api_key: settings.openai.api_key.clone(),
                base_url: settings.openai.base_url.clone(),
                model: settings.openai.model.clone(),
            },
            ProviderKind::Azure => Self::Azure {
                api_key: settings.azure.api_key.clone(),
                region: settings.azure.region.clone(),
            },
        }
    }
}

struct ActiveBackend {
    key: BackendKey,
    provider: Arc<dyn SpeechProvider>,
}

/// Owns at most one live backend.
pub struct ProviderRegistry {
    factories: HashMap<ProviderKind, Arc<dyn ProviderFactory>>,
    active: Option<ActiveBackend>,
    fallback_to_local: bool,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProviderRegistry {
    /// An empty registry; register factories before use.
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            active: None,
            fallback_to_local: false,
        }
    }

    /// Registry with every compiled-in backend, configured from `config`.
    pub fn from_config(config: &VoxConfig) -> Self {
        let mut registry = Self::new().with_fallback_to_local(config.fallback_to_local);

        let program = config.engine_program.clone();
        let locale = config.target_locale.clone();
        registry.register(ProviderKind::Local, move |_: &SpeechSettings| {
            Ok(Arc::new(LocalSpeechProvider::new(program.clone(), locale.clone()))
                as Arc<dyn SpeechProvider>)
        });

        #[cfg(any(feature = "openai", feature = "azure"))]
        let sink: Arc<dyn super::AudioSink> = Arc::new(super::CommandSink::new(
            config.player_program.clone(),
            config.player_args.clone(),
        ));
        #[cfg(any(feature = "openai", feature = "azure"))]
        let (timeout, retry) = (
            config.request_timeout(),
            crate::util::retry::RetryPolicy::with_attempts(config.retry_attempts),
        );

        #[cfg(feature = "openai")]
        {
            let (sink, retry) = (Arc::clone(&sink), retry.clone());
            registry.register(ProviderKind::OpenAi, move |settings: &SpeechSettings| {
                Ok(Arc::new(
                    super::openai::OpenAiSpeechProvider::new(&settings.openai, Arc::clone(&sink))
                        .with_timeout(timeout)
                        .with_retry_policy(retry.clone()),
                ) as Arc<dyn SpeechProvider>)
            });
        }

        #[cfg(feature = "azure")]
        {
            let (sink, retry) = (Arc::clone(&sink), retry.clone());
            registry.register(ProviderKind::Azure, move |settings: &SpeechSettings| {
                Ok(Arc::new(
                    super::azure::AzureSpeechProvider::new(&settings.azure, Arc::clone(&sink))
                        .with_timeout(timeout)
                        .with_retry_policy(retry.clone()),
                ) as Arc<dyn SpeechProvider>)
            });
        }

        registry
    }

    pub fn with_fallback_to_local(mut self, enabled: bool) -> Self {
        self.fallback_to_local = enabled;
        self
    }

    pub fn register<F>(&mut self, kind: ProviderKind, factory: F)
    where
        F: Fn(&SpeechSettings) -> Result<Arc<dyn SpeechProvider>, VoxError> + Send + Sync + 'static,
    {
        self.register_factory(kind, Arc::new(factory));
    }

    pub fn register_factory(&mut self, kind: ProviderKind, factory: Arc<dyn ProviderFactory>) {
        self.factories.insert(kind, factory);
    }

    /// Backends the user can choose from.
    pub fn engines(&self) -> Vec<EngineOption> {
        [ProviderKind::Local, ProviderKind::OpenAi, ProviderKind::Azure]
            .into_iter()
            .map(|kind| EngineOption {
                kind,
                label: match kind {
                    ProviderKind::Local => "On-device engine",
                    ProviderKind::OpenAi => "OpenAI speech",
                    ProviderKind::Azure => "Azure speech",
                }
                .to_string(),
                available: self.factories.contains_key(&kind),
            })
            .collect()
    }

    /// Build the backend `settings` ask for. Nothing is started or stopped.
    pub fn select(&self, settings: &SpeechSettings) -> Result<Arc<dyn SpeechProvider>, VoxError> {
        let factory = self.factories.get(&settings.provider).ok_or_else(|| {
            VoxError::Configuration(format!(
                "No speech backend registered for '{}'",
                settings.provider
            ))
        })?;
        factory.create(settings)
    }

    /// The live backend, if any.
    pub fn active(&self) -> Option<Arc<dyn SpeechProvider>> {
        self.active.as_ref().map(|a| Arc::clone(&a.provider))
    }

    /// Make the backend for `settings` live.
    ///
    /// Unchanged backend identity reuses the live instance. Otherwise the old
    /// backend is stopped and shut down before the new one is initialised.
    pub async fn activate(
        &mut self,
        settings: &SpeechSettings,
    ) -> Result<Arc<dyn SpeechProvider>, VoxError> {
        let key = BackendKey::from_settings(settings);
        if let Some(active) = &self.active {
            if active.key == key {
                return Ok(Arc::clone(&active.provider));
            }
        }

        self.deactivate().await;

        let provider = match self.start(settings).await {
            Ok(provider) => provider,
            Err(e) if self.fallback_to_local && settings.provider.is_cloud() => {
                tracing::warn!(
                    provider = %settings.provider,
                    error = %e,
                    "Speech backend unavailable, falling back to the on-device engine"
                );
                let local = SpeechSettings {
                    provider: ProviderKind::Local,
                    ..settings.clone()
                };
                self.start(&local).await?
            }
            Err(e) => return Err(e),
        };

        tracing::info!(provider = %provider.kind(), "Speech backend active");
        self.active = Some(ActiveBackend {
            key,
            provider: Arc::clone(&provider),
        });
        Ok(provider)
    }

    async fn start(&self, settings: &SpeechSettings) -> Result<Arc<dyn SpeechProvider>, VoxError> {
        let provider = self.select(settings)?;
        provider.initialize().await?;
        Ok(provider)
    }

    async fn deactivate(&mut self) {
        if let Some(old) = self.active.take() {
            tracing::debug!(provider = %old.provider.kind(), "Shutting down speech backend");
            old.provider.stop().await;
            old.provider.shutdown().await;
        }
    }

    /// Stop and release the live backend.
    pub async fn shutdown(&mut self) {
        self.deactivate().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::{SpeechOutcome, SpeechRequest, UtteranceContext, VoiceOption};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Journal(Mutex<Vec<String>>);

    impl Journal {
        fn push(&self, entry: String) {
            self.0.lock().unwrap().push(entry);
        }
        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    struct Recording {
        name: String,
        kind: ProviderKind,
        fail_init: bool,
        journal: Arc<Journal>,
    }

    #[async_trait]
    impl SpeechProvider for Recording {
        fn kind(&self) -> ProviderKind {
            self.kind
        }
        async fn initialize(&self) -> Result<(), VoxError> {
            self.journal.push(format!("{}:init", self.name));
            if self.fail_init {
                return Err(VoxError::provider_init(self.name.clone(), "unavailable"));
            }
            Ok(())
        }
        async fn synthesize_and_play(
            &self,
            _request: &SpeechRequest,
            _ctx: &mut UtteranceContext,
        ) -> SpeechOutcome {
            SpeechOutcome::Completed
        }
        async fn stop(&self) {
            self.journal.push(format!("{}:stop", self.name));
        }
        async fn list_voices(&self) -> Vec<VoiceOption> {
            Vec::new()
        }
        async fn shutdown(&self) {
            self.journal.push(format!("{}:shutdown", self.name));
        }
    }

    fn registry(journal: &Arc<Journal>, cloud_fails: bool) -> ProviderRegistry {
        let mut registry = ProviderRegistry::new();
        for (kind, fail_init) in [
            (ProviderKind::Local, false),
            (ProviderKind::OpenAi, cloud_fails),
        ] {
            let journal = Arc::clone(journal);
            registry.register(kind, move |settings: &SpeechSettings| {
                journal.push(format!("{}:create", settings.provider));
                Ok(Arc::new(Recording {
                    name: kind.to_string(),
                    kind,
                    fail_init,
                    journal: Arc::clone(&journal),
                }) as Arc<dyn SpeechProvider>)
            });
        }
        registry
    }

    fn openai(key: &str) -> SpeechSettings {
        let mut settings = SpeechSettings {
            provider: ProviderKind::OpenAi,
            ..SpeechSettings::default()
        };
        settings.openai.api_key = key.to_string();
        settings
    }

    #[tokio::test]
    async fn same_identity_reuses_backend() {
        let journal = Arc::new(Journal::default());
        let mut registry = registry(&journal, false);

        let first = registry.activate(&SpeechSettings::default()).await.unwrap();
        let tweaked = SpeechSettings {
            rate: 1.8,
            voice_id: "tr".to_string(),
            ..SpeechSettings::default()
        };
        let second = registry.activate(&tweaked).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(journal.entries(), vec!["system:create", "system:init"]);
    }

    #[tokio::test]
    async fn switching_tears_down_before_initialising() {
        let journal = Arc::new(Journal::default());
        let mut registry = registry(&journal, false);

        registry.activate(&SpeechSettings::default()).await.unwrap();
        let active = registry.activate(&openai("sk")).await.unwrap();

        assert_eq!(active.kind(), ProviderKind::OpenAi);
        assert_eq!(
            journal.entries(),
            vec![
                "system:create",
                "system:init",
                "system:stop",
                "system:shutdown",
                "openai:create",
                "openai:init",
            ]
        );
    }

    #[tokio::test]
    async fn changed_credentials_rebuild_backend() {
        let journal = Arc::new(Journal::default());
        let mut registry = registry(&journal, false);

        let first = registry.activate(&openai("sk-1")).await.unwrap();
        let second = registry.activate(&openai("sk-2")).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(journal.entries().contains(&"openai:shutdown".to_string()));
    }

    #[tokio::test]
    async fn failed_cloud_init_falls_back_to_local() {
        let journal = Arc::new(Journal::default());
        let mut registry = registry(&journal, true).with_fallback_to_local(true);

        let active = registry.activate(&openai("sk")).await.unwrap();
        assert_eq!(active.kind(), ProviderKind::Local);

        // Same settings again keep the fallback instead of retrying the cloud.
        let again = registry.activate(&openai("sk")).await.unwrap();
        assert!(Arc::ptr_eq(&active, &again));
    }

    #[tokio::test]
    async fn failed_init_without_fallback_is_reported() {
        let journal = Arc::new(Journal::default());
        let mut registry = registry(&journal, true);

        let err = registry.activate(&openai("sk")).await.err().unwrap();
        assert!(matches!(err, VoxError::ProviderInit { .. }));
        assert!(registry.active().is_none());
    }

    #[test]
    fn select_is_pure_and_reports_unknown_kinds() {
        let journal = Arc::new(Journal::default());
        let registry = registry(&journal, false);

        let azure = SpeechSettings {
            provider: ProviderKind::Azure,
            ..SpeechSettings::default()
        };
        assert!(matches!(
            registry.select(&azure).err().unwrap(),
            VoxError::Configuration(_)
        ));
        registry.select(&SpeechSettings::default()).unwrap();
        assert_eq!(journal.entries(), vec!["system:create"]);
        assert!(registry.active().is_none());
    }

    #[test]
    fn engines_report_availability() {
        let journal = Arc::new(Journal::default());
        let engines = registry(&journal, false).engines();
        assert!(engines[0].available);
        assert!(engines[1].available);
        assert!(!engines[2].available);
    }
}
