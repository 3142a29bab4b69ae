//! Configuration file handling.
//!
//! This module handles loading `.concierge.toml`, applying environment
//! overrides for LLM deployments, and merging CLI arguments on top.
//! API keys are only ever read from the environment.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = ".concierge.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// LLM deployment settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Agent behaviour.
    #[serde(default)]
    pub agent: AgentSettings,

    /// Semantic search settings.
    #[serde(default)]
    pub rag: RagConfig,

    /// Text-to-SQL settings.
    #[serde(default)]
    pub sql: SqlConfig,
}

/// General application settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

/// Database settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("concierge.sqlite3")
}

/// LLM deployment settings (no secrets).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Azure OpenAI resource endpoint, e.g. `https://my-res.openai.azure.com`.
    #[serde(default)]
    pub azure_endpoint: Option<String>,

    /// Azure chat deployment name.
    #[serde(default = "default_chat_model")]
    pub azure_chat_deployment: String,

    /// Azure embedding deployment name.
    #[serde(default = "default_embedding_model")]
    pub azure_embedding_deployment: String,

    /// Azure REST API version.
    #[serde(default = "default_api_version")]
    pub azure_api_version: String,

    /// OpenAI-compatible base URL.
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,

    /// OpenAI chat model.
    #[serde(default = "default_chat_model")]
    pub openai_model: String,

    /// OpenAI embedding model.
    #[serde(default = "default_embedding_model")]
    pub openai_embedding_model: String,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            azure_endpoint: None,
            azure_chat_deployment: default_chat_model(),
            azure_embedding_deployment: default_embedding_model(),
            azure_api_version: default_api_version(),
            openai_base_url: default_openai_base_url(),
            openai_model: default_chat_model(),
            openai_embedding_model: default_embedding_model(),
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_api_version() -> String {
    "2024-05-01-preview".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_timeout() -> u64 {
    60
}

/// Resolved LLM backend, including credentials.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmProvider {
    Azure {
        endpoint: String,
        api_key: String,
        api_version: String,
        chat_deployment: String,
        embedding_deployment: String,
    },
    OpenAi {
        base_url: String,
        api_key: String,
        model: String,
        embedding_model: String,
    },
}

impl LlmProvider {
    /// Model or deployment name used for chat.
    pub fn chat_model(&self) -> &str {
        match self {
            LlmProvider::Azure {
                chat_deployment, ..
            } => chat_deployment,
            LlmProvider::OpenAi { model, .. } => model,
        }
    }

    /// Some "nano" deployments only accept the default temperature.
    pub fn temperature(&self) -> f32 {
        if self.chat_model().to_lowercase().contains("nano") {
            1.0
        } else {
            0.0
        }
    }
}

impl LlmConfig {
    /// Apply `AZURE_OPENAI_*` / `OPENAI_*` deployment overrides.
    pub fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("AZURE_OPENAI_ENDPOINT") {
            self.azure_endpoint = Some(v);
        }
        if let Some(v) = env("AZURE_OPENAI_CHAT_DEPLOYMENT") {
            self.azure_chat_deployment = v;
        }
        if let Some(v) = env("AZURE_OPENAI_EMBEDDING_DEPLOYMENT") {
            self.azure_embedding_deployment = v;
        }
        if let Some(v) = env("AZURE_OPENAI_API_VERSION") {
            self.azure_api_version = v;
        }
        if let Some(v) = env("OPENAI_BASE_URL") {
            self.openai_base_url = v;
        }
        if let Some(v) = env("OPENAI_LLM_MODEL") {
            self.openai_model = v;
        }
        if let Some(v) = env("OPENAI_EMBEDDING_MODEL") {
            self.openai_embedding_model = v;
        }
    }

    /// Resolve the backend: Azure when key and endpoint are present,
    /// otherwise OpenAI when a key is present, otherwise none.
    pub fn provider(&self, env: impl Fn(&str) -> Option<String>) -> Option<LlmProvider> {
        let azure_key = env("AZURE_OPENAI_API_KEY").filter(|k| !k.is_empty());
        if let (Some(api_key), Some(endpoint)) = (azure_key, self.azure_endpoint.clone()) {
            return Some(LlmProvider::Azure {
                endpoint: endpoint.trim_end_matches('/').to_string(),
                api_key,
                api_version: self.azure_api_version.clone(),
                chat_deployment: self.azure_chat_deployment.clone(),
                embedding_deployment: self.azure_embedding_deployment.clone(),
            });
        }

        let api_key = env("OPENAI_API_KEY").filter(|k| !k.is_empty())?;
        Some(LlmProvider::OpenAi {
            base_url: self.openai_base_url.trim_end_matches('/').to_string(),
            api_key,
            model: self.openai_model.clone(),
            embedding_model: self.openai_embedding_model.clone(),
        })
    }
}

/// Which agent answers `/api/agents/chat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AgentMode {
    /// Deterministic routing graph (works without an LLM).
    #[default]
    Graph,
    /// LLM chooses tools in a loop.
    Tools,
}

/// Agent behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default)]
    pub mode: AgentMode,

    /// Maximum LLM round-trips per turn in tool mode.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Tool results kept in the prompt (sliding window).
    #[serde(default = "default_max_context_messages")]
    pub max_context_messages: usize,

    /// Messages kept per conversation.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Conversations kept in memory; the least recently used is dropped.
    #[serde(default = "default_max_conversations")]
    pub max_conversations: usize,

    /// Ask the LLM to fill intent fields the heuristics missed.
    #[serde(default = "default_true")]
    pub llm_intent: bool,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            mode: AgentMode::Graph,
            max_iterations: default_max_iterations(),
            max_context_messages: default_max_context_messages(),
            history_limit: default_history_limit(),
            max_conversations: default_max_conversations(),
            llm_intent: true,
        }
    }
}

fn default_max_iterations() -> usize {
    8
}

fn default_max_context_messages() -> usize {
    10
}

fn default_history_limit() -> usize {
    40
}

fn default_max_conversations() -> usize {
    1000
}

fn default_true() -> bool {
    true
}

/// Semantic search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Documents embedded per request during ingestion.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Inject matching descriptions before the tool agent runs.
    #[serde(default = "default_true")]
    pub enrich_context: bool,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            batch_size: default_batch_size(),
            enrich_context: true,
        }
    }
}

fn default_top_k() -> usize {
    5
}

fn default_batch_size() -> usize {
    10
}

/// Text-to-SQL settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqlConfig {
    /// Maximum rows returned by any generated query.
    #[serde(default = "default_row_limit")]
    pub row_limit: usize,

    /// Remembered question/SQL pairs included in the prompt.
    #[serde(default = "default_memory_examples")]
    pub memory_examples: usize,
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            row_limit: default_row_limit(),
            memory_examples: default_memory_examples(),
        }
    }
}

fn default_row_limit() -> usize {
    20
}

fn default_memory_examples() -> usize {
    3
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref db) = args.database {
            self.database.path = db.clone();
        }

        if args.verbose {
            self.general.verbose = true;
        }

        match &args.command {
            crate::cli::Command::Serve(serve) => {
                if let Some(ref host) = serve.host {
                    self.server.host = host.clone();
                }
                if let Some(port) = serve.port {
                    self.server.port = port;
                }
                if let Some(mode) = serve.mode {
                    self.agent.mode = mode;
                }
            }
            crate::cli::Command::Ask(ask) => {
                if let Some(mode) = ask.mode {
                    self.agent.mode = mode;
                }
            }
            crate::cli::Command::Ingest(ingest) => {
                if let Some(batch) = ingest.batch_size {
                    self.rag.batch_size = batch;
                }
            }
            crate::cli::Command::Seed(_) | crate::cli::Command::InitConfig => {}
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.agent.mode, AgentMode::Graph);
        assert_eq!(config.llm.openai_model, "gpt-4o-mini");
        assert_eq!(config.rag.batch_size, 10);
        assert_eq!(config.agent.max_conversations, 1000);
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[server]
port = 9090

[agent]
mode = "tools"
max_iterations = 4
max_conversations = 50

[llm]
azure_endpoint = "https://example.openai.azure.com/"
azure_chat_deployment = "gpt-4.1-nano"
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.agent.mode, AgentMode::Tools);
        assert_eq!(config.agent.max_iterations, 4);
        assert_eq!(config.agent.history_limit, 40);
        assert_eq!(config.agent.max_conversations, 50);
        assert_eq!(config.llm.azure_chat_deployment, "gpt-4.1-nano");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[database]\npath = \"data/props.db\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.database.path, PathBuf::from("data/props.db"));

        std::fs::write(&path, "[database\n").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_provider_prefers_azure() {
        let mut llm = LlmConfig::default();
        let env = env_from(&[
            ("AZURE_OPENAI_API_KEY", "azure-key"),
            ("AZURE_OPENAI_ENDPOINT", "https://res.openai.azure.com/"),
            ("AZURE_OPENAI_CHAT_DEPLOYMENT", "gpt-4o-mini-prod"),
            ("OPENAI_API_KEY", "openai-key"),
        ]);
        llm.apply_env(&env);

        match llm.provider(&env) {
            Some(LlmProvider::Azure {
                endpoint,
                chat_deployment,
                ..
            }) => {
                assert_eq!(endpoint, "https://res.openai.azure.com");
                assert_eq!(chat_deployment, "gpt-4o-mini-prod");
            }
            other => panic!("expected azure provider, got {:?}", other),
        }
    }

    #[test]
    fn test_provider_falls_back_to_openai_then_none() {
        let llm = LlmConfig::default();
        let openai = llm.provider(env_from(&[("OPENAI_API_KEY", "sk-test")]));
        assert!(matches!(openai, Some(LlmProvider::OpenAi { .. })));

        // Azure key without an endpoint is not enough.
        let none = llm.provider(env_from(&[("AZURE_OPENAI_API_KEY", "k")]));
        assert!(none.is_none());
    }

    #[test]
    fn test_nano_temperature() {
        let provider = LlmProvider::OpenAi {
            base_url: "http://localhost".into(),
            api_key: "k".into(),
            model: "gpt-4.1-nano".into(),
            embedding_model: "e".into(),
        };
        assert_eq!(provider.temperature(), 1.0);
    }

    #[test]
    fn test_merge_with_args() {
        use clap::Parser;

        let args = crate::cli::Args::try_parse_from([
            "concierge",
            "--database",
            "other.sqlite3",
            "serve",
            "--port",
            "9001",
            "--mode",
            "tools",
        ])
        .unwrap();

        let mut config = Config::default();
        config.merge_with_args(&args);
        assert_eq!(config.database.path, PathBuf::from("other.sqlite3"));
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.agent.mode, AgentMode::Tools);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[server]"));
        assert!(toml_str.contains("[agent]"));
        assert!(toml_str.contains("[llm]"));
    }
}
