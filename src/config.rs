use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Tunables for a single generation run.
///
/// Defaults match the production deployment; callers override per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Dialogue turns per persona during knowledge curation.
    pub max_conv_turn: usize,
    /// LM-generated personas (the fixed fact writer is added on top).
    pub max_perspective: usize,
    /// Search queries expanded from one question.
    pub max_search_queries_per_turn: usize,
    /// Passages returned per retriever query.
    pub search_top_k: usize,
    /// Passages selected per section during article drafting.
    pub retrieve_top_k: usize,
    /// Concurrent tasks in the persona and section worker pools.
    pub max_thread_num: usize,
    /// Adjacent chunks fetched on each side of a table chunk.
    pub window_size: i32,
    /// Candidate over-fetch multiplier before reranking trims back to k.
    pub window_expand_factor: usize,
    /// Internal score below which web results are admitted by the hybrid retriever.
    pub internal_min_score: f32,
    /// Internal passages scoring below this floor are discarded outright.
    pub min_relevance_score: f32,
    /// Score multiplier for passages matching a target company alias.
    pub boost_multiplier: f32,
    /// Score multiplier for non-matching text passages on analytical queries.
    pub penalty_multiplier: f32,
    /// Drop non-matching table passages on analytical queries.
    pub drop_unmatched_tables: bool,
    /// Minimum share of text (non-table) chunks in the final top-k.
    pub min_text_ratio: f32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_conv_turn: 3,
            max_perspective: 3,
            max_search_queries_per_turn: 3,
            search_top_k: 3,
            retrieve_top_k: 3,
            max_thread_num: 10,
            window_size: 1,
            window_expand_factor: 3,
            internal_min_score: 0.6,
            min_relevance_score: 0.3,
            boost_multiplier: 1.3,
            penalty_multiplier: 0.5,
            drop_unmatched_tables: true,
            min_text_ratio: 0.4,
        }
    }
}

impl PipelineConfig {
    /// Validate ranges that would otherwise fail deep inside a run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_thread_num == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_thread_num".into(),
                value: "0".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.internal_min_score) {
            return Err(ConfigError::InvalidValue {
                key: "internal_min_score".into(),
                value: self.internal_min_score.to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.min_text_ratio) {
            return Err(ConfigError::InvalidValue {
                key: "min_text_ratio".into(),
                value: self.min_text_ratio.to_string(),
            });
        }
        Ok(())
    }
}

/// Database connection settings, loaded from `PG_*` environment variables.
///
/// Missing credentials fail fast before any pipeline work starts.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl StoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        fn required(key: &str) -> Result<String, ConfigError> {
            std::env::var(key).map_err(|_| ConfigError::MissingEnv(key.to_string()))
        }

        let port_raw = std::env::var("PG_PORT").unwrap_or_else(|_| "5432".to_string());
        let port = port_raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: "PG_PORT".into(),
            value: port_raw,
        })?;

        Ok(Self {
            host: required("PG_HOST")?,
            port,
            user: required("PG_USER")?,
            password: required("PG_PASSWORD")?,
            database: required("PG_DATABASE")?,
        })
    }

    pub fn connection_string(&self) -> String {
        format!(
            "host={} port={} user={} password={} dbname={}",
            self.host, self.port, self.user, self.password, self.database
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_deployment() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.max_conv_turn, 3);
        assert_eq!(cfg.max_perspective, 3);
        assert_eq!(cfg.max_search_queries_per_turn, 3);
        assert_eq!(cfg.search_top_k, 3);
        assert_eq!(cfg.max_thread_num, 10);
        assert_eq!(cfg.window_size, 1);
        assert!((cfg.internal_min_score - 0.6).abs() < f32::EPSILON);
        assert!((cfg.boost_multiplier - 1.3).abs() < f32::EPSILON);
        assert!((cfg.penalty_multiplier - 0.5).abs() < f32::EPSILON);
        assert!(cfg.drop_unmatched_tables);
    }

    #[test]
    fn zero_workers_rejected() {
        let cfg = PipelineConfig {
            max_thread_num: 0,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn out_of_range_threshold_rejected() {
        let cfg = PipelineConfig {
            internal_min_score: 1.5,
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = PipelineConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: PipelineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_conv_turn, cfg.max_conv_turn);
        assert_eq!(back.max_thread_num, cfg.max_thread_num);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let back: PipelineConfig = serde_json::from_str(r#"{"max_conv_turn": 5}"#).unwrap();
        assert_eq!(back.max_conv_turn, 5);
        assert_eq!(back.max_perspective, 3);
    }
}
