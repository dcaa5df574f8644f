use anyhow::Result;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub comparison: ComparisonConfig,
    pub forecast: ForecastConfig,
    pub db: DbConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            request_timeout_secs: 120,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub root: PathBuf,
    pub max_cache_age_days: i64,
    pub max_cache_size_mb: f64,
    /// gzip level, 0-9
    pub compression_level: u32,
    /// How long a cached prediction is served.
    pub prediction_ttl_hours: i64,
    /// Predictions older than this are removed by cleanup.
    pub prediction_retention_hours: i64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("model_cache"),
            max_cache_age_days: 30,
            max_cache_size_mb: 500.0,
            compression_level: 6,
            prediction_ttl_hours: 24,
            prediction_retention_hours: 48,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonConfig {
    pub results_dir: PathBuf,
    pub staleness_days: i64,
    pub cv_folds: usize,
    pub weights: ScoreWeights,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("model_comparisons"),
            staleness_days: 30,
            cv_folds: 5,
            weights: ScoreWeights::default(),
        }
    }
}

/// Weights of the composite ranking score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub r2: f64,
    pub mape: f64,
    pub interpretability: f64,
    pub robustness: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            r2: 0.4,
            mape: 0.3,
            interpretability: 0.2,
            robustness: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastConfig {
    pub max_days_ahead: u32,
    pub synthetic_history_days: u32,
    pub storage_timeout_secs: u64,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            max_days_ahead: 365,
            synthetic_history_days: 90,
            storage_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DbConfig {
    pub url: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Figment::new().merge(Toml::file("config/default.toml")))
    }

    fn load_from(base: Figment) -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(base)
            .merge(Env::prefixed("MAF__").split("__"));
        Ok(figment.extract()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.cache.max_cache_age_days, 30);
        assert_eq!(cfg.cache.max_cache_size_mb, 500.0);
        assert_eq!(cfg.comparison.cv_folds, 5);
        assert_eq!(cfg.comparison.weights, ScoreWeights::default());
        assert_eq!(cfg.forecast.max_days_ahead, 365);
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let toml = r#"
            [cache]
            max_cache_age_days = 7

            [comparison.weights]
            r2 = 0.5
        "#;
        let cfg = Config::load_from(Figment::new().merge(Toml::string(toml))).unwrap();
        assert_eq!(cfg.cache.max_cache_age_days, 7);
        assert_eq!(cfg.cache.max_cache_size_mb, 500.0);
        assert_eq!(cfg.comparison.weights.r2, 0.5);
        assert_eq!(cfg.comparison.weights.mape, 0.3);
    }

    #[test]
    fn test_socket_addr() {
        let server = ServerConfig::default();
        assert_eq!(server.socket_addr().unwrap().port(), 8000);
    }
}
