use crate::error::{ConfigError, Result as AppResult};
use config::{Config, Environment, File};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    #[serde(default, deserialize_with = "deserialize_string_or_list")]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct QuizConfig {
    pub questions_per_page: usize,
    pub total_pages: usize,
    pub total_time_seconds: u64,
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            questions_per_page: 10,
            total_pages: 2,
            total_time_seconds: 300,
        }
    }
}

impl QuizConfig {
    pub fn sample_size(&self) -> usize {
        self.questions_per_page * self.total_pages
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.questions_per_page == 0 {
            return Err(ConfigError::InvalidValue(
                "quiz.questions_per_page must be at least 1".to_string(),
            ));
        }
        if self.total_pages == 0 {
            return Err(ConfigError::InvalidValue(
                "quiz.total_pages must be at least 1".to_string(),
            ));
        }
        if self.total_time_seconds == 0 {
            return Err(ConfigError::InvalidValue(
                "quiz.total_time_seconds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ContentSourceType {
    File,
    Http,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentConfig {
    pub source_type: ContentSourceType,
    pub file_path: Option<String>,
    pub http_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
    /// JSON-lines file mirroring the submission log. In-memory only when unset.
    pub submission_log_path: Option<PathBuf>,
    /// Directory for the local fallback cache. In-memory only when unset.
    pub local_cache_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct AppSettings {
    pub server: ServerConfig,
    pub quiz: QuizConfig,
    pub content: ContentConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// user id -> username, seeds the identity directory.
    #[serde(default)]
    pub users: HashMap<String, String>,
}

pub fn load_settings() -> AppResult<AppSettings> {
    let defaults = QuizConfig::default();

    let builder = Config::builder()
        .set_default("server.port", 3000)?
        .set_default("quiz.questions_per_page", defaults.questions_per_page as u64)?
        .set_default("quiz.total_pages", defaults.total_pages as u64)?
        .set_default("quiz.total_time_seconds", defaults.total_time_seconds)?
        .set_default("content.source_type", "file")?
        .set_default("content.file_path", "questions.json")?
        .add_source(File::with_name("config").required(false))
        .add_source(
            Environment::with_prefix("QUIZBOARD")
                .separator("__")
                .try_parsing(true),
        );

    let settings = builder
        .build()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    let app_settings: AppSettings = settings
        .try_deserialize()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    app_settings.quiz.validate()?;

    if app_settings.content.source_type == ContentSourceType::Http
        && app_settings.content.http_url.is_none()
    {
        return Err(ConfigError::Missing("content.http_url".to_string()).into());
    }

    Ok(app_settings)
}

fn deserialize_string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    use serde_json::Value;

    let value = Value::deserialize(deserializer)?;

    match value {
        Value::String(s) => Ok(s
            .split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect()),
        Value::Array(arr) => arr
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.trim().to_string()),
                _ => Err(D::Error::custom("Array must contain only strings")),
            })
            .collect(),
        Value::Null => Ok(Vec::new()),
        _ => Err(D::Error::custom("Expected string or array of strings")),
    }
}
