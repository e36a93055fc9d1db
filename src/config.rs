use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{LoomError, Result};
use crate::llm::{API_KEY_ENV, DEFAULT_BASE_URL, OpenRouterConfig};
use crate::loom::{BackoffPolicy, DEFAULT_EVENT_BUFFER, GenerationParams};

const PROJECT_NAME: &str = env!("CARGO_PKG_NAME");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub provider: ProviderConfig,
    pub generation: GenerationParams,
    pub retry: RetryConfig,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    /// File this config was read from
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    /// Takes precedence over `api_key_env`
    pub api_key: Option<String>,
    pub api_key_env: String,
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: Option<u64>,
    pub referer: Option<String>,
    pub app_title: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            api_key_env: API_KEY_ENV.to_string(),
            connect_timeout_ms: 30000,
            request_timeout_ms: None,
            referer: None,
            app_title: Some(PROJECT_NAME.to_string()),
        }
    }
}

impl ProviderConfig {
    /// Configured key, else the environment variable
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(&self.api_key_env).ok().filter(|k| !k.trim().is_empty()))
    }

    pub fn openrouter_config(&self) -> OpenRouterConfig {
        OpenRouterConfig {
            base_url: self.base_url.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            request_timeout: self.request_timeout_ms.map(Duration::from_millis),
            referer: self.referer.clone(),
            app_title: self.app_title.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    pub max_jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 60000,
            max_jitter_ms: 200,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            multiplier: self.multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
            max_jitter: Duration::from_millis(self.max_jitter_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub iteration_pause_ms: u64,
    pub event_buffer: usize,
    /// Used when `/generate` is called without a seed
    pub default_seed: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 5000,
            iteration_pause_ms: 1000,
            event_buffer: DEFAULT_EVENT_BUFFER,
            default_seed: "Once upon a time".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn iteration_pause(&self) -> Duration {
        Duration::from_millis(self.iteration_pause_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub documents_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            documents_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(PROJECT_NAME)
                .join("documents"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            provider: ProviderConfig::default(),
            generation: GenerationParams::default(),
            retry: RetryConfig::default(),
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            source: None,
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        // Try primary location: ~/.config/<project>/<project>.yml
        if let Some(primary_config) = Self::default_path() {
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Try fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", PROJECT_NAME));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        // No config file found, use defaults
        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// `~/.config/<project>/<project>.yml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(PROJECT_NAME).join(format!("{}.yml", PROJECT_NAME)))
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| LoomError::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        let mut config: Self = serde_yaml::from_str(&content)
            .map_err(|e| LoomError::Config(format!("Failed to parse {}: {}", path.display(), e)))?;
        config.source = Some(path.to_path_buf());

        log::info!("Loaded config from: {}", path.display());
        Ok(config)
    }

    /// Write to `path`, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)
            .map_err(|e| LoomError::Config(format!("Failed to serialize config: {}", e)))?;
        fs::write(path, content)?;
        log::info!("Saved config to: {}", path.display());
        Ok(())
    }

    /// Where runtime changes are persisted: the loaded file, else the default path
    pub fn save_path(&self) -> Option<PathBuf> {
        self.source.clone().or_else(Self::default_path)
    }

    pub fn generation_params(&self) -> GenerationParams {
        self.generation.clone()
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        self.retry.policy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 5000);
        assert_eq!(config.server.event_buffer, 256);
        assert_eq!(config.provider.api_key_env, "OPENROUTER_API_KEY");
        assert_eq!(config.backoff_policy(), BackoffPolicy::default());
        assert_eq!(config.generation_params(), GenerationParams::default());
        assert!(config.storage.documents_dir.ends_with("selfloom/documents"));
    }

    #[test]
    fn test_partial_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("selfloom.yml");
        fs::write(
            &path,
            "generation:\n  candidate_count: 3\n  grading_model: judge\nserver:\n  port: 8080\nretry:\n  max_delay_ms: 5000\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();

        assert_eq!(config.generation.candidate_count, 3);
        assert_eq!(config.generation.grading_model, "judge");
        assert_eq!(config.generation.max_tokens, 128);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.backoff_policy().max_delay, Duration::from_secs(5));
        assert_eq!(config.source.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn test_explicit_path_errors() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("missing.yml");
        assert!(matches!(Config::load(Some(&missing)), Err(LoomError::Config(_))));

        let bad = temp.path().join("bad.yml");
        fs::write(&bad, "server: [not, a, map]").unwrap();
        assert!(matches!(Config::load(Some(&bad)), Err(LoomError::Config(_))));
    }

    #[test]
    fn test_save_and_reload() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("selfloom.yml");
        let mut config = Config::default();
        config.provider.api_key = Some("sk-saved".to_string());
        config.generation.max_iterations = Some(7);

        config.save(&path).unwrap();
        let reloaded = Config::load(Some(&path)).unwrap();

        assert_eq!(reloaded.provider.api_key.as_deref(), Some("sk-saved"));
        assert_eq!(reloaded.generation.max_iterations, Some(7));
        assert_eq!(reloaded.save_path(), Some(path));
    }

    #[test]
    fn test_configured_key_wins() {
        let provider = ProviderConfig {
            api_key: Some("sk-config".to_string()),
            api_key_env: "SELFLOOM_TEST_UNSET_KEY".to_string(),
            ..Default::default()
        };
        assert_eq!(provider.resolve_api_key().as_deref(), Some("sk-config"));

        let blank = ProviderConfig {
            api_key: Some("  ".to_string()),
            api_key_env: "SELFLOOM_TEST_UNSET_KEY".to_string(),
            ..Default::default()
        };
        assert_eq!(blank.resolve_api_key(), None);
    }

    #[test]
    fn test_openrouter_config() {
        let provider = ProviderConfig {
            base_url: "http://localhost:9999/api/v1".to_string(),
            request_timeout_ms: Some(1500),
            referer: Some("http://localhost".to_string()),
            ..Default::default()
        };
        let config = provider.openrouter_config();

        assert_eq!(config.base_url, "http://localhost:9999/api/v1");
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.request_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.referer.as_deref(), Some("http://localhost"));
    }
}
