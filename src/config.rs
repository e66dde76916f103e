use serde::{Deserialize, Serialize};

/// Embedding provider tag, per spec's `embedder.provider` config field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EmbedderProvider {
    LocalHttp,
    CloudApi,
    LmStudioLike,
}

impl EmbedderProvider {
    /// Matches the `#[serde(rename_all = "kebab-case")]` wire form, for display and for
    /// stamping into the store's `IndexStats.embedder_provider`.
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbedderProvider::LocalHttp => "local-http",
            EmbedderProvider::CloudApi => "cloud-api",
            EmbedderProvider::LmStudioLike => "lm-studio-like",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedderConfig {
    pub provider: EmbedderProvider,
    pub model: String,
    pub endpoint: String,
    pub dimensions: usize,
    pub api_key: Option<String>,
    pub parallelism: Option<usize>,
    pub tokens_per_minute: Option<u64>,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            provider: EmbedderProvider::LocalHttp,
            model: "nomic-embed-text".to_string(),
            endpoint: "http://localhost:11434".to_string(),
            dimensions: 768,
            api_key: None,
            parallelism: None,
            tokens_per_minute: None,
        }
    }
}

/// Vector store backend tag. Only `LocalFile` is implemented by this core; the others
/// are named external interfaces (see SPEC_FULL.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreBackend {
    LocalFile,
    SqlVector,
    RemoteVector,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::LocalFile,
            path: ".coderadar/index.bin".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Target chunk size, in ~token-units (converted to chars at 4 chars/token).
    pub size: usize,
    /// Overlap between consecutive windows, in the same units.
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            size: 512,
            overlap: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IgnoreConfig {
    /// Extra directory basenames pruned unconditionally, beyond .gitignore rules.
    pub extra_dirs: Vec<String>,
    pub external_gitignore: Option<String>,
}

impl Default for IgnoreConfig {
    fn default() -> Self {
        Self {
            extra_dirs: vec![".git".to_string(), ".coderadar".to_string()],
            external_gitignore: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WatchConfig {
    pub debounce_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self { debounce_ms: 750 }
    }
}

/// One `(path substring, multiplier)` boost rule; the first matching rule wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostRule {
    pub path_contains: String,
    pub multiplier: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridConfig {
    pub enabled: bool,
    pub k: f32,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            k: 60.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub boost: Vec<BoostRule>,
    pub hybrid: HybridConfig,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            boost: vec![
                BoostRule {
                    path_contains: "test".to_string(),
                    multiplier: 0.7,
                },
                BoostRule {
                    path_contains: "mock".to_string(),
                    multiplier: 0.7,
                },
                BoostRule {
                    path_contains: "generated".to_string(),
                    multiplier: 0.6,
                },
                BoostRule {
                    path_contains: "docs/".to_string(),
                    multiplier: 0.8,
                },
                BoostRule {
                    path_contains: "src/".to_string(),
                    multiplier: 1.2,
                },
            ],
            hybrid: HybridConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Top-level configuration accepted by the core. Loading this from a TOML file on
/// disk is a thin CLI-layer concern (out of core scope); the struct and its defaults
/// live here so the core can be exercised without touching disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub embedder: EmbedderConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub ignore: IgnoreConfig,
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = Config::default();
        let raw = toml::to_string(&config).unwrap();
        let parsed = Config::from_toml_str(&raw).unwrap();
        assert_eq!(parsed.chunking.size, config.chunking.size);
        assert_eq!(parsed.search.boost.len(), config.search.boost.len());
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let path = std::path::Path::new("/nonexistent/coderadar.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.embedder.provider, EmbedderProvider::LocalHttp);
    }
}
