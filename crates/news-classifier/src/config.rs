// news-classifier/crates/news-classifier/src/config.rs

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::path::Path;
use tracing::{info, warn};

use crate::device::DeviceSpec;
use crate::error::ClassifierError;

/// One entry of the model catalog. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub name: String,
    pub path: String,
    pub max_length: usize,
    #[serde(default)]
    pub device: DeviceSpec,
}

impl ModelSpec {
    pub fn new(name: impl Into<String>, path: impl Into<String>, max_length: usize) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            max_length,
            device: DeviceSpec::Auto,
        }
    }

    pub fn with_device(mut self, device: DeviceSpec) -> Self {
        self.device = device;
        self
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if self.name.trim().is_empty() {
            return Err(ClassifierError::config("model name must not be empty"));
        }
        if self.path.trim().is_empty() {
            return Err(ClassifierError::config(format!("model '{}' has an empty path", self.name)));
        }
        if self.max_length == 0 {
            return Err(ClassifierError::config(format!(
                "model '{}' must have a positive max_length",
                self.name
            )));
        }
        Ok(())
    }
}

/// The `models.yaml` document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelCatalog {
    pub models: Vec<ModelSpec>,
}

impl ModelCatalog {
    /// Read a catalog from YAML (`.yaml`/`.yml`) or JSON, chosen by extension
    pub fn from_path<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClassifierError::config(format!("cannot read model catalog {}: {}", path.display(), e))
        })?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    pub fn from_yaml_str(content: &str) -> crate::error::Result<Self> {
        let catalog: Self = serde_yaml::from_str(content)
            .map_err(|e| ClassifierError::config(format!("invalid model catalog: {}", e)))?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn from_json_str(content: &str) -> crate::error::Result<Self> {
        let catalog: Self = serde_json::from_str(content)
            .map_err(|e| ClassifierError::config(format!("invalid model catalog: {}", e)))?;
        catalog.validate()?;
        Ok(catalog)
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        self.models.iter().try_for_each(ModelSpec::validate)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsOrigins {
    Any,
    List(Vec<String>),
}

impl CorsOrigins {
    pub fn parse(raw: &str) -> Self {
        if raw.trim() == "*" {
            return CorsOrigins::Any;
        }
        let origins: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .map(str::to_string)
            .collect();
        if origins.is_empty() {
            CorsOrigins::Any
        } else {
            CorsOrigins::List(origins)
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub model_config: String,
    pub api_host: String,
    pub api_port: u16,
    pub cors_origins: CorsOrigins,
    pub static_dir: String,
    pub max_batch_size: usize,
    pub default_model: String,
    pub inference_threads: usize,
    pub request_timeout_seconds: u64,
    pub strict_model_names: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_config: "./config/models.yaml".to_string(),
            api_host: "0.0.0.0".to_string(),
            api_port: 8000,
            cors_origins: CorsOrigins::Any,
            static_dir: "./static".to_string(),
            max_batch_size: 100,
            default_model: "bert512".to_string(),
            inference_threads: Self::auto_detect_threads(),
            request_timeout_seconds: 60,
            strict_model_names: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        #[cfg(feature = "dotenvy")]
        {
            if let Err(e) = dotenvy::dotenv() {
                warn!("Failed to load .env file: {}. Using system environment variables.", e);
            } else {
                info!("Loaded environment variables from .env file");
            }
        }

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup. `from_env` passes
    /// the process environment; tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        // Auto‑detect inference concurrency if set to "auto"
        let inference_threads = match get("INFERENCE_THREADS", "auto").as_str() {
            "auto" => Self::auto_detect_threads(),
            raw => raw
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .with_context(|| format!("INFERENCE_THREADS must be 'auto' or a positive integer, got '{}'", raw))?,
        };

        let max_batch_size: usize = get("MAX_BATCH_SIZE", "100")
            .parse()
            .context("MAX_BATCH_SIZE must be a positive integer")?;
        if max_batch_size == 0 {
            return Err(anyhow::anyhow!("MAX_BATCH_SIZE must be a positive integer"));
        }

        let strict_model_names = matches!(
            get("STRICT_MODEL_NAMES", "false").to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        );

        Ok(Self {
            model_config: get("MODEL_CONFIG", "./config/models.yaml"),
            api_host: get("API_HOST", "0.0.0.0"),
            api_port: get("PORT", "8000").parse().context("PORT must be a valid port number")?,
            cors_origins: CorsOrigins::parse(&get("CORS_ORIGINS", "*")),
            static_dir: get("STATIC_DIR", "./static"),
            max_batch_size,
            default_model: get("DEFAULT_MODEL", "bert512"),
            inference_threads,
            request_timeout_seconds: get("REQUEST_TIMEOUT_SECONDS", "60")
                .parse()
                .context("REQUEST_TIMEOUT_SECONDS must be an integer")?,
            strict_model_names,
        })
    }

    fn auto_detect_threads() -> usize {
        let num_cpus = num_cpus::get();

        match num_cpus {
            0..=2 => 1,
            3..=4 => (num_cpus * 2) / 3,
            5..=8 => (num_cpus * 3) / 5,
            9..=16 => num_cpus / 2,
            17..=32 => (num_cpus * 2) / 5,
            _ => 16,
        }
    }

    /// Read and validate the model catalog named by `model_config`
    pub fn load_catalog(&self) -> crate::error::Result<ModelCatalog> {
        ModelCatalog::from_path(&self.model_config)
    }

    pub fn print_config(&self) {
        info!("Current Configuration:");
        info!("- Model Catalog: {}", self.model_config);
        info!("- API: {}:{}", self.api_host, self.api_port);
        info!("- CORS Origins: {:?}", self.cors_origins);
        info!("- Static Dir: {}", self.static_dir);
        info!("- Default Model: {}", self.default_model);
        info!("- Max Batch Size: {}", self.max_batch_size);
        info!("- Inference Threads: {}", self.inference_threads);
        info!("- Request Timeout: {}s", self.request_timeout_seconds);
        info!("- Strict Model Names: {}", self.strict_model_names);
    }

    pub fn api_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.api_host, self.api_port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.api_host, self.api_port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Device;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    // ===== Environment Tests =====

    #[test]
    fn test_defaults_without_environment() {
        let config = config_from(&[]).unwrap();

        assert_eq!(config.model_config, "./config/models.yaml");
        assert_eq!(config.api_port, 8000);
        assert_eq!(config.cors_origins, CorsOrigins::Any);
        assert_eq!(config.max_batch_size, 100);
        assert_eq!(config.default_model, "bert512");
        assert!(config.inference_threads > 0);
        assert!(!config.strict_model_names);
    }

    #[test]
    fn test_environment_overrides() {
        let config = config_from(&[
            ("MODEL_CONFIG", "/etc/models.json"),
            ("PORT", "9100"),
            ("CORS_ORIGINS", "http://a.example, http://b.example"),
            ("MAX_BATCH_SIZE", "16"),
            ("INFERENCE_THREADS", "3"),
            ("STRICT_MODEL_NAMES", "true"),
        ])
        .unwrap();

        assert_eq!(config.model_config, "/etc/models.json");
        assert_eq!(config.api_port, 9100);
        assert_eq!(
            config.cors_origins,
            CorsOrigins::List(vec!["http://a.example".into(), "http://b.example".into()])
        );
        assert_eq!(config.max_batch_size, 16);
        assert_eq!(config.inference_threads, 3);
        assert!(config.strict_model_names);
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        assert!(config_from(&[("PORT", "eighty")]).is_err());
        assert!(config_from(&[("MAX_BATCH_SIZE", "0")]).is_err());
        assert!(config_from(&[("INFERENCE_THREADS", "0")]).is_err());
    }

    #[test]
    fn test_api_addr_parsing() {
        let mut config = config_from(&[]).unwrap();
        config.api_host = "127.0.0.1".to_string();
        let addr = config.api_addr().unwrap();
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_eq!(addr.port(), 8000);
    }

    #[test]
    fn test_auto_detect_threads_returns_positive() {
        assert!(Config::auto_detect_threads() > 0);
    }

    // ===== Catalog Tests =====

    #[test]
    fn test_yaml_catalog_defaults_device_to_auto() {
        let catalog = ModelCatalog::from_yaml_str(
            "models:\n  - name: bert512\n    path: ./models/bert512\n    max_length: 256\n  - name: bert128\n    path: ./models/bert128\n    max_length: 128\n    device: cuda:1\n",
        )
        .unwrap();

        assert_eq!(catalog.models.len(), 2);
        assert_eq!(catalog.models[0].device, DeviceSpec::Auto);
        assert_eq!(catalog.models[1].device, DeviceSpec::Explicit(Device::Cuda(1)));
    }

    #[test]
    fn test_catalog_rejects_malformed_entries() {
        let missing_path = "models:\n  - name: bert512\n    max_length: 256\n";
        assert!(matches!(
            ModelCatalog::from_yaml_str(missing_path),
            Err(ClassifierError::Config(_))
        ));

        let zero_length = "models:\n  - name: bert512\n    path: p\n    max_length: 0\n";
        assert!(matches!(
            ModelCatalog::from_yaml_str(zero_length),
            Err(ClassifierError::Config(_))
        ));

        let bad_device = r#"{"models": [{"name": "m", "path": "p", "max_length": 8, "device": "quantum"}]}"#;
        assert!(matches!(
            ModelCatalog::from_json_str(bad_device),
            Err(ClassifierError::Config(_))
        ));
    }

    #[test]
    fn test_catalog_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.json");
        std::fs::write(
            &path,
            r#"{"models": [{"name": "bert512", "path": "./m", "max_length": 256, "device": "cpu"}]}"#,
        )
        .unwrap();

        let catalog = ModelCatalog::from_path(&path).unwrap();
        assert_eq!(catalog.models[0].device, DeviceSpec::Explicit(Device::Cpu));
    }

    #[test]
    fn test_missing_catalog_file_is_config_error() {
        let err = ModelCatalog::from_path("/nonexistent/models.yaml").unwrap_err();
        assert!(matches!(err, ClassifierError::Config(_)));
    }
}
