use config::{Config, Environment, File};
use serde::Deserialize;

use crate::error::SherdError;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SherdConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
    /// Frontend directory served at `/` when set
    pub static_dir: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_upload_bytes: 10 * 1024 * 1024,
            static_dir: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    pub upload_dir: String,
    pub database_url: String,
    pub max_connections: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: "uploads".to_string(),
            database_url: "sqlite://data.db".to_string(),
            max_connections: 5,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct InferenceConfig {
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    /// Read on every request, never at startup.
    pub api_key_env: String,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.groq.cloud/v1/infer".to_string(),
            model: "llama-3.2-90b-vision-preview".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
        }
    }
}

impl SherdConfig {
    /// Load from an optional TOML file, then `SHERD__*` env vars, then `PORT`.
    pub fn load(path: &str) -> Result<Self, SherdError> {
        let mut builder = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("SHERD").prefix_separator("__").separator("__"));

        if let Ok(port) = std::env::var("PORT") {
            builder = builder.set_override("http.port", port)?;
        }

        Ok(builder.build()?.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let config = SherdConfig::load("does-not-exist.toml").expect("defaults should load");
        assert_eq!(config.storage.upload_dir, "uploads");
        assert_eq!(config.inference.api_key_env, "GROQ_API_KEY");
        assert!(config.http.static_dir.is_none());
    }

    #[test]
    fn test_http_defaults() {
        let http = HttpConfig::default();
        assert_eq!(http.port, 3000);
        assert_eq!(http.max_upload_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn test_partial_sections_fill_defaults() {
        let parsed: SherdConfig = Config::builder()
            .add_source(config::File::from_str(
                "[storage]\nupload_dir = \"/var/lib/sherd/uploads\"\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(parsed.storage.upload_dir, "/var/lib/sherd/uploads");
        assert_eq!(parsed.storage.database_url, "sqlite://data.db");
        assert_eq!(parsed.http.port, 3000);
    }
}
