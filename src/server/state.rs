//! Shared application state for the HTTP server.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::Result;
use crate::llm::{LlmClient, LlmError, OpenRouterClient, OpenRouterConfig};
use crate::storage::DocumentStore;

/// Builds the model client for a run from the current token.
pub trait ClientFactory: Send + Sync {
    fn create(&self, api_key: Option<String>) -> std::result::Result<Arc<dyn LlmClient>, LlmError>;
}

/// OpenRouter clients, one per run
#[derive(Debug, Clone)]
pub struct OpenRouterFactory {
    config: OpenRouterConfig,
    api_key_env: String,
}

impl OpenRouterFactory {
    pub fn new(config: OpenRouterConfig, api_key_env: impl Into<String>) -> Self {
        Self {
            config,
            api_key_env: api_key_env.into(),
        }
    }
}

impl ClientFactory for OpenRouterFactory {
    fn create(&self, api_key: Option<String>) -> std::result::Result<Arc<dyn LlmClient>, LlmError> {
        let api_key = api_key.ok_or_else(|| LlmError::MissingApiKey {
            env_var: self.api_key_env.clone(),
        })?;
        Ok(Arc::new(OpenRouterClient::with_api_key(api_key, self.config.clone())?))
    }
}

/// The same client for every run, token ignored
pub struct FixedClient(pub Arc<dyn LlmClient>);

impl ClientFactory for FixedClient {
    fn create(&self, _api_key: Option<String>) -> std::result::Result<Arc<dyn LlmClient>, LlmError> {
        Ok(Arc::clone(&self.0))
    }
}

struct ActiveRun {
    id: u64,
    cancel: CancellationToken,
}

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub clients: Arc<dyn ClientFactory>,
    config: Arc<RwLock<Config>>,
    api_key: Arc<RwLock<Option<String>>>,
    active: Arc<Mutex<Option<ActiveRun>>>,
    next_run: Arc<AtomicU64>,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn DocumentStore>, clients: Arc<dyn ClientFactory>) -> Self {
        let api_key = config.provider.resolve_api_key();
        Self {
            store,
            clients,
            config: Arc::new(RwLock::new(config)),
            api_key: Arc::new(RwLock::new(api_key)),
            active: Arc::new(Mutex::new(None)),
            next_run: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Copy of the current configuration
    pub fn config(&self) -> Config {
        self.config.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.read().unwrap_or_else(|p| p.into_inner()).is_some()
    }

    /// Replace the token, persisting it when the config came from a file
    pub fn set_api_key(&self, token: impl Into<String>) -> Result<()> {
        let token = token.into();
        *self.api_key.write().unwrap_or_else(|p| p.into_inner()) = Some(token.clone());

        self.update_config(|config| config.provider.api_key = Some(token))
    }

    /// Replace the generation and grading models. Blank or absent values keep
    /// the current model. Returns whether anything changed.
    pub fn save_models(&self, generation: Option<&str>, grading: Option<&str>) -> Result<bool> {
        let generation = generation.map(str::trim).filter(|m| !m.is_empty());
        let grading = grading.map(str::trim).filter(|m| !m.is_empty());

        let current = self.config().generation;
        let changed = generation.is_some_and(|m| m != current.generation_model)
            || grading.is_some_and(|m| m != current.grading_model);
        if !changed {
            return Ok(false);
        }

        self.update_config(|config| {
            if let Some(model) = generation {
                config.generation.generation_model = model.to_string();
            }
            if let Some(model) = grading {
                config.generation.grading_model = model.to_string();
            }
        })?;
        log::info!(
            "Models set: generation={} grading={}",
            generation.unwrap_or(current.generation_model.as_str()),
            grading.unwrap_or(current.grading_model.as_str())
        );
        Ok(true)
    }

    /// Apply `change`, persisting when the config came from a file
    fn update_config(&self, change: impl FnOnce(&mut Config)) -> Result<()> {
        let mut config = self.config.write().unwrap_or_else(|p| p.into_inner());
        change(&mut config);
        if let Some(path) = config.source.clone() {
            config.save(&path)?;
        }
        Ok(())
    }

    /// Client for a new run
    pub fn client(&self) -> std::result::Result<Arc<dyn LlmClient>, LlmError> {
        let api_key = self.api_key.read().unwrap_or_else(|p| p.into_inner()).clone();
        self.clients.create(api_key)
    }

    /// Register a new run, cancelling any previous one
    pub fn begin_run(&self) -> (u64, CancellationToken) {
        let id = self.next_run.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        let mut active = self.lock_active();
        if let Some(previous) = active.replace(ActiveRun {
            id,
            cancel: cancel.clone(),
        }) {
            log::info!("Run {} superseded by run {}", previous.id, id);
            previous.cancel.cancel();
        }
        (id, cancel)
    }

    /// Cancel the active run. Returns false if none was active.
    pub fn stop_run(&self) -> bool {
        match self.lock_active().take() {
            Some(run) => {
                log::info!("Stopping run {}", run.id);
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Forget run `id` if it is still the active one
    pub fn finish_run(&self, id: u64) {
        let mut active = self.lock_active();
        if active.as_ref().is_some_and(|run| run.id == id) {
            *active = None;
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_active().is_some()
    }

    fn lock_active(&self) -> MutexGuard<'_, Option<ActiveRun>> {
        self.active.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::storage::FsDocumentStore;
    use tempfile::TempDir;

    fn create_state(config: Config) -> (AppState, TempDir) {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(FsDocumentStore::new(temp.path().join("docs")).unwrap());
        let factory = OpenRouterFactory::new(OpenRouterConfig::default(), "SELFLOOM_TEST_UNSET_KEY");
        (AppState::new(config, store, Arc::new(factory)), temp)
    }

    fn keyless_config() -> Config {
        let mut config = Config::default();
        config.provider.api_key_env = "SELFLOOM_TEST_UNSET_KEY".to_string();
        config
    }

    #[test]
    fn test_missing_key_is_fatal() {
        let (state, _temp) = create_state(keyless_config());
        assert!(!state.has_api_key());
        let err = state.client().err().unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_set_api_key() {
        let (state, _temp) = create_state(keyless_config());
        state.set_api_key("sk-runtime").unwrap();

        assert!(state.has_api_key());
        assert!(state.client().is_ok());
        assert_eq!(state.config().provider.api_key.as_deref(), Some("sk-runtime"));
    }

    #[test]
    fn test_set_api_key_persists_to_source() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("selfloom.yml");
        let mut config = keyless_config();
        config.source = Some(path.clone());
        let (state, _store_dir) = create_state(config);

        state.set_api_key("sk-persisted").unwrap();

        let reloaded = Config::load(Some(&path)).unwrap();
        assert_eq!(reloaded.provider.api_key.as_deref(), Some("sk-persisted"));
    }

    #[test]
    fn test_save_models_persists_to_source() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("selfloom.yml");
        let mut config = keyless_config();
        config.source = Some(path.clone());
        let (state, _store_dir) = create_state(config);

        assert!(state.save_models(Some("base/x"), None).unwrap());
        assert!(state.save_models(None, Some(" judge/y ")).unwrap());
        assert!(!state.save_models(Some("base/x"), Some("")).unwrap());

        let reloaded = Config::load(Some(&path)).unwrap();
        assert_eq!(reloaded.generation.generation_model, "base/x");
        assert_eq!(reloaded.generation.grading_model, "judge/y");
        assert_eq!(state.config().generation.grading_model, "judge/y");
    }

    #[test]
    fn test_save_models_without_source_stays_in_memory() {
        let (state, _temp) = create_state(keyless_config());

        assert!(state.save_models(Some("base/x"), Some("judge/y")).unwrap());

        let config = state.config();
        assert_eq!(config.generation.generation_model, "base/x");
        assert_eq!(config.generation.grading_model, "judge/y");
        assert!(config.source.is_none());
    }

    #[test]
    fn test_new_run_supersedes_previous() {
        let (state, _temp) = create_state(keyless_config());

        let (first_id, first) = state.begin_run();
        let (second_id, second) = state.begin_run();

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());

        state.finish_run(first_id);
        assert!(state.is_running());
        state.finish_run(second_id);
        assert!(!state.is_running());
    }

    #[test]
    fn test_stop_run() {
        let (state, _temp) = create_state(keyless_config());
        assert!(!state.stop_run());

        let (_, cancel) = state.begin_run();
        assert!(state.stop_run());
        assert!(cancel.is_cancelled());
        assert!(!state.is_running());
    }

    #[test]
    fn test_fixed_client_ignores_token() {
        let fixed = FixedClient(Arc::new(MockLlmClient::new()));
        assert!(fixed.create(None).is_ok());
    }
}
