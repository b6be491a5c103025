use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DOTENV_FILE: &str = ".env";
pub const MAX_UPLOAD_BYTES_LIMIT: usize = 512 * 1024 * 1024;
pub const MAX_CONCURRENT_EXTRACTIONS_LIMIT: usize = 1024;
pub const DEFAULT_INSTRUCTION: &str =
    "You are an expert in understanding invoices. Analyze the provided invoice and answer the question.";

/// Settings as written in the optional YAML file. Every key may be omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub api_base: Option<String>,
    pub instruction: Option<String>,
    pub request_timeout_secs: Option<u64>,
    pub max_upload_bytes: Option<usize>,
    pub max_concurrent_extractions: Option<usize>,
    pub temperature: Option<f64>,
}

/// Resolved process configuration. Built once at startup and shared read-only.
#[derive(Clone)]
pub struct Config {
    pub api_key: String,
    pub model: String,
    pub api_base: String,
    pub instruction: String,
    pub request_timeout: Duration,
    pub max_upload_bytes: usize,
    pub max_concurrent_extractions: usize,
    pub temperature: Option<f64>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("api_base", &self.api_base)
            .field("instruction", &self.instruction)
            .field("request_timeout", &self.request_timeout)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("max_concurrent_extractions", &self.max_concurrent_extractions)
            .field("temperature", &self.temperature)
            .finish()
    }
}

impl FileConfig {
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }
}

impl Config {
    /// Loads the optional config file, then applies `.env` and the process
    /// environment on top. Real environment variables win over `.env`.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => FileConfig::from_file(p)?,
            None => FileConfig::default(),
        };
        let dotenv = dotenv_vars(Path::new(DOTENV_FILE))?;
        Self::resolve(file, layered(|key| std::env::var(key).ok(), &dotenv))
    }

    /// Environment wins over the file; a blank variable counts as unset.
    pub fn resolve<F>(file: FileConfig, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |key: &str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let api_key = lookup("GOOGLE_API_KEY")
            .or(file.api_key.filter(|k| !k.trim().is_empty()))
            .ok_or(ConfigError::MissingApiKey)?;
        let model = lookup("GEMINI_MODEL")
            .or(file.model)
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let api_base = lookup("GEMINI_API_BASE")
            .or(file.api_base)
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string());

        let request_timeout_secs = file.request_timeout_secs.unwrap_or(60);
        if request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "request_timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        let max_concurrent_extractions = file.max_concurrent_extractions.unwrap_or(1);
        if !(1..=MAX_CONCURRENT_EXTRACTIONS_LIMIT).contains(&max_concurrent_extractions) {
            return Err(ConfigError::Invalid {
                field: "max_concurrent_extractions",
                reason: format!("must be between 1 and {}", MAX_CONCURRENT_EXTRACTIONS_LIMIT),
            });
        }
        let max_upload_bytes = file.max_upload_bytes.unwrap_or(10 * 1024 * 1024);
        if !(1..=MAX_UPLOAD_BYTES_LIMIT).contains(&max_upload_bytes) {
            return Err(ConfigError::Invalid {
                field: "max_upload_bytes",
                reason: format!("must be between 1 and {}", MAX_UPLOAD_BYTES_LIMIT),
            });
        }
        if model.trim().is_empty() || model.contains('/') {
            return Err(ConfigError::Invalid {
                field: "model",
                reason: format!("'{}' is not a model name", model),
            });
        }

        Ok(Config {
            api_key,
            model,
            api_base,
            instruction: file.instruction.unwrap_or_else(|| DEFAULT_INSTRUCTION.to_string()),
            request_timeout: Duration::from_secs(request_timeout_secs),
            max_upload_bytes,
            max_concurrent_extractions,
            temperature: file.temperature,
        })
    }
}

/// Variables from a `.env` file; a missing file yields none. The process
/// environment is left untouched.
fn dotenv_vars(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    match dotenvy::from_path_iter(path) {
        Ok(iter) => iter.collect::<Result<_, _>>().map_err(|source| ConfigError::DotEnv { source }),
        Err(e) if e.not_found() => Ok(HashMap::new()),
        Err(source) => Err(ConfigError::DotEnv { source }),
    }
}

fn layered<'a, F>(primary: F, fallback: &'a HashMap<String, String>) -> impl Fn(&str) -> Option<String> + 'a
where
    F: Fn(&str) -> Option<String> + 'a,
{
    move |key: &str| primary(key).or_else(|| fallback.get(key).cloned())
}
