use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatbotConfig {
    pub astra: AstraConfig,
    pub secrets: Secrets,
    pub models: ModelConfig,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub history: HistoryConfig,
    pub agent: AgentConfig,
    pub conversational: ConversationalConfig,
    pub scrape: ScrapeConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AstraConfig {
    pub application_token: Option<String>,
    pub database_id: Option<String>,
    pub region: String,
    /// Full Data API endpoint; takes precedence over `database_id` + `region`.
    pub api_endpoint: Option<String>,
    pub keyspace: String,
    pub collection: String,
}

impl AstraConfig {
    pub fn endpoint(&self) -> Option<String> {
        if let Some(endpoint) = &self.api_endpoint {
            return Some(endpoint.trim_end_matches('/').to_string());
        }
        self.database_id
            .as_ref()
            .map(|id| format!("https://{}-{}.apps.astra.datastax.com", id, self.region))
    }

    pub fn is_configured(&self) -> bool {
        self.application_token.is_some() && self.endpoint().is_some()
    }
}

impl Default for AstraConfig {
    fn default() -> Self {
        Self {
            application_token: None,
            database_id: None,
            region: "us-east1".to_string(),
            api_endpoint: None,
            keyspace: "default_keyspace".to_string(),
            collection: "general".to_string(),
        }
    }
}

/// API keys. Never serialized back out.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Secrets {
    #[serde(skip_serializing)]
    pub openai_api_key: Option<String>,
    #[serde(skip_serializing)]
    pub google_api_key: Option<String>,
    #[serde(skip_serializing)]
    pub anthropic_api_key: Option<String>,
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Secrets")
            .field("openai_api_key", &self.openai_api_key.as_ref().map(|_| "***"))
            .field("google_api_key", &self.google_api_key.as_ref().map(|_| "***"))
            .field("anthropic_api_key", &self.anthropic_api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub openai: String,
    pub google: String,
    pub anthropic: String,
    /// Model used to score feedback functions.
    pub evaluator: String,
    pub embedding: String,
    pub embedding_dimension: usize,
    pub temperature: f32,
    pub max_tokens: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            openai: "gpt-4-turbo-preview".to_string(),
            google: "gemini-pro".to_string(),
            anthropic: "claude-3-opus-20240229".to_string(),
            evaluator: "gpt-4-turbo-preview".to_string(),
            embedding: "text-embedding-ada-002".to_string(),
            embedding_dimension: 1536,
            temperature: 0.5,
            max_tokens: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 800,
            chunk_overlap: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_k: usize,
    pub agent_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: 4,
            agent_k: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub max_messages: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { max_messages: 25 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub max_iterations: usize,
    pub tool_timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            tool_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversationalConfig {
    /// Upper bound on the estimated tokens of stuffed source documents.
    pub max_tokens_limit: usize,
}

impl Default for ConversationalConfig {
    fn default() -> Self {
        Self {
            max_tokens_limit: 150,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapeConfig {
    pub user_agent: String,
    pub timeout_secs: u64,
    pub politeness_delay_ms: u64,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/89.0.4389.82 Safari/537.36"
                .to_string(),
            timeout_secs: 10,
            politeness_delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Sessions untouched for this long are dropped.
    pub session_idle_secs: u64,
    /// Oldest sessions are dropped to stay under this count.
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8501,
            session_idle_secs: 24 * 60 * 60,
            max_sessions: 10_000,
        }
    }
}

impl ChatbotConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunking.chunk_size == 0 {
            return Err("chunking.chunk_size must be > 0".into());
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err("chunking.chunk_overlap must be < chunk_size".into());
        }
        if self.history.max_messages == 0 {
            return Err("history.max_messages must be > 0".into());
        }
        if self.agent.max_iterations == 0 {
            return Err("agent.max_iterations must be > 0".into());
        }
        if self.retrieval.default_k == 0 || self.retrieval.agent_k == 0 {
            return Err("retrieval k values must be > 0".into());
        }
        if self.server.session_idle_secs == 0 || self.server.max_sessions == 0 {
            return Err("server.session_idle_secs and server.max_sessions must be > 0".into());
        }
        if !(0.0..=2.0).contains(&self.models.temperature) {
            return Err("models.temperature must be in [0.0, 2.0]".into());
        }
        Ok(())
    }

    /// Load config from a JSON file, falling back to defaults for missing fields.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid with the process environment.
    pub fn from_env() -> Result<Self, String> {
        let mut config = Self::default();
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Overlay secrets and overrides using `lookup` as the variable source.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("ASTRA_DB_APPLICATION_TOKEN") {
            self.astra.application_token = Some(v);
        }
        if let Some(v) = get("ASTRA_DB_ID") {
            self.astra.database_id = Some(v);
        }
        if let Some(v) = get("ASTRA_DB_REGION") {
            self.astra.region = v;
        }
        if let Some(v) = get("ASTRA_DB_API_ENDPOINT") {
            self.astra.api_endpoint = Some(v);
        }
        if let Some(v) = get("ASTRA_DB_KEYSPACE") {
            self.astra.keyspace = v;
        }
        if let Some(v) = get("OPENAI_API_KEY") {
            self.secrets.openai_api_key = Some(v);
        }
        if let Some(v) = get("GOOGLE_API_KEY") {
            self.secrets.google_api_key = Some(v);
        }
        if let Some(v) = get("ANTHROPIC_API_KEY") {
            self.secrets.anthropic_api_key = Some(v);
        }
        if let Some(v) = get("CAREBOT_HOST") {
            self.server.host = v;
        }
        if let Some(port) = get("CAREBOT_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = ChatbotConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunking.chunk_size, 800);
        assert_eq!(config.chunking.chunk_overlap, 200);
        assert_eq!(config.history.max_messages, 25);
        assert_eq!(config.agent.max_iterations, 3);
        assert_eq!(config.astra.collection, "general");
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let mut config = ChatbotConfig::default();
        config.chunking.chunk_overlap = 800;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_session_limits_must_be_positive() {
        let mut config = ChatbotConfig::default();
        config.server.session_idle_secs = 0;
        assert!(config.validate().is_err());

        let mut config = ChatbotConfig::default();
        config.server.max_sessions = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overlay() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("ASTRA_DB_APPLICATION_TOKEN", "AstraCS:abc"),
            ("ASTRA_DB_ID", "1234"),
            ("OPENAI_API_KEY", "sk-test"),
            ("CAREBOT_PORT", "9000"),
            ("GOOGLE_API_KEY", "  "),
        ]);
        let mut config = ChatbotConfig::default();
        config.apply_env_from(|key| vars.get(key).map(|v| v.to_string()));

        assert!(config.astra.is_configured());
        assert_eq!(
            config.astra.endpoint().as_deref(),
            Some("https://1234-us-east1.apps.astra.datastax.com")
        );
        assert_eq!(config.secrets.openai_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.secrets.google_api_key, None);
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_explicit_endpoint_wins() {
        let mut astra = AstraConfig::default();
        astra.database_id = Some("ignored".into());
        astra.api_endpoint = Some("https://db.example.com/".into());
        assert_eq!(astra.endpoint().as_deref(), Some("https://db.example.com"));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("carebot.json");
        std::fs::write(&path, r#"{"history": {"max_messages": 10}}"#).unwrap();

        let config = ChatbotConfig::from_file(&path).unwrap();
        assert_eq!(config.history.max_messages, 10);
        assert_eq!(config.models.openai, "gpt-4-turbo-preview");
    }

    #[test]
    fn test_secrets_are_not_serialized() {
        let mut config = ChatbotConfig::default();
        config.secrets.openai_api_key = Some("sk-secret".into());
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("sk-secret"));
        assert!(!format!("{:?}", config).contains("sk-secret"));
    }
}
