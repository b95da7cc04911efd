//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Configuration for canvass
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Primary generation model
    pub model: String,
    /// Fallback generation model (Google)
    pub fallback_model: String,
    /// Model used for subject research (needs web grounding)
    pub research_model: String,
    /// Model used to repair malformed structured output
    pub repair_model: String,
    /// OpenAI-compatible base URL override (for gateways)
    pub openai_base_url: Option<String>,
    /// Google base URL override
    pub google_base_url: Option<String>,
    /// Prompt template overrides file
    pub prompts_file: Option<String>,
    /// API keys (alternative to environment variables)
    #[serde(default)]
    pub api_keys: ApiKeys,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            fallback_model: "gemini-2.0-flash".to_string(),
            research_model: "gemini-2.0-flash".to_string(),
            repair_model: "gpt-4o-mini".to_string(),
            openai_base_url: None,
            google_base_url: None,
            prompts_file: None,
            api_keys: ApiKeys::default(),
        }
    }
}

/// API key configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub openai: Option<String>,
    pub google: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("canvass")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        // Check for CANVASS_CONFIG_PATH env var first
        if let Ok(path) = std::env::var("CANVASS_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }
        Config::default().save()?;
        Ok(path)
    }

    /// Get API key for a provider, checking config then env
    pub fn get_api_key(&self, provider: &str) -> Option<String> {
        let from_config = match provider {
            "openai" => self.api_keys.openai.clone(),
            "google" => self.api_keys.google.clone(),
            _ => None,
        };

        if from_config.is_some() {
            return from_config;
        }

        let env_var = match provider {
            "openai" => "OPENAI_API_KEY",
            "google" => "GOOGLE_API_KEY",
            _ => return None,
        };

        std::env::var(env_var).ok()
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# canvass configuration file
# Place at ~/.config/canvass/config.toml (Linux/Mac) or %APPDATA%\canvass\config.toml (Windows)

# Primary generation model (OpenAI)
model = "gpt-4o"

# Fallback generation model (Google)
fallback_model = "gemini-2.0-flash"

# Model used for subject research; needs web grounding (Google)
research_model = "gemini-2.0-flash"

# Model used to repair malformed structured output
repair_model = "gpt-4o-mini"

# Base URL overrides (optional, e.g. for OpenAI-compatible gateways)
# openai_base_url = "https://gateway.internal/v1"
# google_base_url = "https://generativelanguage.googleapis.com"

# Prompt template overrides, layered over the built-in defaults (optional)
# prompts_file = "~/.config/canvass/prompts.toml"

# API keys (optional - can also use environment variables)
# It's recommended to use environment variables instead for security
[api_keys]
# openai = "sk-..."
# google = "..."
"#
}
