use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub path: String,
}

fn default_database_path() -> String {
    "datachat.db".to_string()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    /// Base URL of the OpenAI-compatible local model server.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Sampling temperature. Omitted from requests when not set.
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://localhost:1234".to_string()
}

fn default_model() -> String {
    "local-model".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            temperature: None,
            max_tokens: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefaults {
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,
    #[serde(default = "default_llm_max_retries")]
    pub llm_max_retries: u32,
    #[serde(default = "default_llm_retry_delay_ms")]
    pub llm_retry_delay_ms: u64,
}

fn default_max_tool_iterations() -> u32 {
    10
}

fn default_llm_max_retries() -> u32 {
    2
}

fn default_llm_retry_delay_ms() -> u64 {
    2000
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_max_tool_iterations(),
            llm_max_retries: default_llm_max_retries(),
            llm_retry_delay_ms: default_llm_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agents: AgentDefaults,
}

impl Config {
    /// Load configuration: explicit path, or the default location if it
    /// exists, or built-in defaults. Environment variables override the
    /// file in all cases.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default = Self::default_path();
                if default.exists() {
                    Self::from_file(&default)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env();
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&raw)?;
        Ok(config)
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".datachat")
            .join("config.yaml")
    }

    /// Environment overrides, matching the variable names users already set
    /// for this system: DATABASE_URL, LOCAL_LLM_URL, LLM_MODEL.
    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("DATABASE_URL") {
            if !v.is_empty() {
                self.database.path = v;
            }
        }
        if let Ok(v) = std::env::var("LOCAL_LLM_URL") {
            if !v.is_empty() {
                self.llm.base_url = v;
            }
        }
        if let Ok(v) = std::env::var("LLM_MODEL") {
            if !v.is_empty() {
                self.llm.model = v;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.database.path.is_empty() {
            return Err(Error::Config(
                "database.path is required (or set DATABASE_URL)".to_string(),
            ));
        }
        if self.llm.base_url.is_empty() {
            return Err(Error::Config(
                "llm.baseUrl is required (or set LOCAL_LLM_URL)".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.llm.base_url, "http://localhost:1234");
        assert_eq!(config.llm.model, "local-model");
        assert!(config.llm.temperature.is_none());
        assert_eq!(config.agents.max_tool_iterations, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r#"
llm:
  baseUrl: "http://127.0.0.1:8080"
  temperature: 0.2
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.llm.base_url, "http://127.0.0.1:8080");
        assert_eq!(config.llm.temperature, Some(0.2));
        // Unspecified sections fall back to defaults
        assert_eq!(config.database.path, "datachat.db");
        assert_eq!(config.agents.llm_max_retries, 2);
    }

    #[test]
    fn test_validate_rejects_empty_database() {
        let mut config = Config::default();
        config.database.path = String::new();
        assert!(config.validate().is_err());
    }
}
