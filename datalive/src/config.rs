//! Service settings
//!
//! Loaded once at startup from `.env` and the process environment, then
//! handed to the composition root in `main`.

use anyhow::{bail, Context, Result};
use datalive_kg::{CacheConfig, GraphConnectionConfig};
use std::path::PathBuf;
use std::str::FromStr;

use crate::cli::Model;

/// Where cache keys are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheBackend {
    /// `<data_dir>/cache.db`, shared by the server and every CLI run
    #[default]
    Sqlite,
    /// Process-local; lost on exit
    Memory,
}

impl FromStr for CacheBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(CacheBackend::Sqlite),
            "memory" => Ok(CacheBackend::Memory),
            other => Err(format!("unknown cache store '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    /// LanceDB lives under `<data_dir>/vectors`, the SQLite cache in `<data_dir>/cache.db`
    pub data_dir: PathBuf,

    pub graph: GraphConnectionConfig,

    /// Completion command, invoked as `<program> --print --model <model> <prompt>`
    pub llm_program: PathBuf,
    pub llm_model: Model,

    pub cache: CacheConfig,
    pub cache_backend: CacheBackend,
    pub enable_caching: bool,
    /// Fuzzy cache hits at or below this confidence are recomputed
    pub cache_confidence_threshold: f64,

    pub max_query_length: usize,
    pub default_rag_limit: usize,
    pub vector_threshold: f32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            jwt_secret: "default_secret_change_in_production".to_string(),
            data_dir: PathBuf::from("./data"),
            graph: GraphConnectionConfig::default(),
            llm_program: PathBuf::from("claude"),
            llm_model: Model::default(),
            cache: CacheConfig::default(),
            cache_backend: CacheBackend::default(),
            enable_caching: true,
            cache_confidence_threshold: 0.9,
            max_query_length: 10_000,
            default_rag_limit: 10,
            vector_threshold: 0.7,
        }
    }
}

fn env_parse<T>(name: &str, fallback: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{}: {}", name, e)),
        Err(_) => Ok(fallback),
    }
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let defaults = Self::default();

        let settings = Self {
            host: std::env::var("API_HOST").unwrap_or(defaults.host),
            port: env_parse("API_PORT", defaults.port)?,
            jwt_secret: std::env::var("JWT_SECRET").unwrap_or(defaults.jwt_secret),
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            graph: GraphConnectionConfig::from_env(),
            llm_program: std::env::var("LLM_PROGRAM")
                .map(PathBuf::from)
                .unwrap_or(defaults.llm_program),
            llm_model: env_parse("LLM_MODEL", defaults.llm_model)?,
            cache: CacheConfig::from_env().context("Invalid cache configuration")?,
            cache_backend: env_parse("CACHE_STORE", defaults.cache_backend)?,
            enable_caching: env_parse("ENABLE_CACHING", defaults.enable_caching)?,
            cache_confidence_threshold: env_parse(
                "CACHE_HIGH_CONFIDENCE_THRESHOLD",
                defaults.cache_confidence_threshold,
            )?,
            max_query_length: env_parse("MAX_QUERY_LENGTH", defaults.max_query_length)?,
            default_rag_limit: env_parse("DEFAULT_RAG_LIMIT", defaults.default_rag_limit)?,
            vector_threshold: env_parse("VECTOR_SEARCH_THRESHOLD", defaults.vector_threshold)?,
        };

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.cache_confidence_threshold) {
            bail!(
                "CACHE_HIGH_CONFIDENCE_THRESHOLD must be within [0, 1], got {}",
                self.cache_confidence_threshold
            );
        }
        if !(0.0..=1.0).contains(&self.vector_threshold) {
            bail!(
                "VECTOR_SEARCH_THRESHOLD must be within [0, 1], got {}",
                self.vector_threshold
            );
        }
        if self.max_query_length == 0 {
            bail!("MAX_QUERY_LENGTH must be greater than 0");
        }
        if self.default_rag_limit == 0 {
            bail!("DEFAULT_RAG_LIMIT must be greater than 0");
        }
        self.cache.validate().map_err(anyhow::Error::msg)?;
        Ok(())
    }

    pub fn vector_dir(&self) -> PathBuf {
        self.data_dir.join("vectors")
    }

    pub fn cache_db_path(&self) -> PathBuf {
        self.data_dir.join("cache.db")
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.bind_addr(), "127.0.0.1:8080");
        assert_eq!(settings.vector_dir(), PathBuf::from("./data/vectors"));
        assert_eq!(settings.cache_db_path(), PathBuf::from("./data/cache.db"));
        assert_eq!(settings.cache_backend, CacheBackend::Sqlite);
    }

    #[test]
    fn test_cache_backend_parsing() {
        assert_eq!("SQLite".parse::<CacheBackend>().unwrap(), CacheBackend::Sqlite);
        assert_eq!("memory".parse::<CacheBackend>().unwrap(), CacheBackend::Memory);
        assert!("redis".parse::<CacheBackend>().is_err());
    }

    #[test]
    fn test_threshold_out_of_range_is_rejected() {
        let settings = Settings {
            cache_confidence_threshold: 1.5,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_env_parse_reports_variable_name() {
        std::env::set_var("DATALIVE_TEST_PORT", "not-a-port");
        let err = env_parse::<u16>("DATALIVE_TEST_PORT", 8080).unwrap_err();
        assert!(err.to_string().contains("DATALIVE_TEST_PORT"));

        assert_eq!(env_parse::<u16>("DATALIVE_TEST_UNSET", 8080).unwrap(), 8080);
    }
}
