//! TOML configuration for the feature store.
//!
//! Only `feature_store.reject_throttle` is required; everything else has a
//! default. Calibration writes the threshold back with
//! [`Config::persist_reject_throttle`], which leaves the rest of the file
//! untouched.

use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use toml_edit::{DocumentMut, Item, Value};

use crate::error::{Error, Result};

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Top-level configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub feature_store: FeatureStoreConfig,
}

/// The `[feature_store]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureStoreConfig {
    /// Minimum reject score a query needs to be answered.
    pub reject_throttle: f32,
    /// Embedding model ID or local path.
    #[serde(default)]
    pub embedding_model: Option<String>,
    /// Reranker model ID or local path.
    #[serde(default)]
    pub reranker_model: Option<String>,
    /// Candidates fetched from the response index.
    #[serde(default = "default_response_top_k")]
    pub response_top_k: usize,
    /// Minimum inner-product score of a response candidate.
    #[serde(default = "default_response_score_threshold")]
    pub response_score_threshold: f32,
    /// Passages kept after reranking.
    #[serde(default = "default_rerank_top_n")]
    pub rerank_top_n: usize,
    /// Passages scoring below this after reranking are dropped.
    #[serde(default)]
    pub rerank_cutoff: Option<f32>,
    #[serde(default = "default_capability_timeout_secs")]
    pub capability_timeout_secs: u64,
    /// Chunks embedded per model call during index builds.
    #[serde(default = "default_embed_batch_size")]
    pub embed_batch_size: usize,
    /// Keep models resident between calls instead of unloading them.
    #[serde(default = "default_keep_model_loaded")]
    pub keep_model_loaded: bool,
    /// Glob patterns of repository paths never copied into the corpus.
    #[serde(default)]
    pub exclude: Vec<String>,
}

fn default_response_top_k() -> usize {
    30
}

fn default_response_score_threshold() -> f32 {
    0.2
}

fn default_rerank_top_n() -> usize {
    7
}

fn default_capability_timeout_secs() -> u64 {
    120
}

fn default_embed_batch_size() -> usize {
    32
}

fn default_keep_model_loaded() -> bool {
    true
}

impl FeatureStoreConfig {
    /// Defaults for every tunable, with the given threshold.
    pub fn with_throttle(reject_throttle: f32) -> Self {
        Self {
            reject_throttle,
            embedding_model: None,
            reranker_model: None,
            response_top_k: default_response_top_k(),
            response_score_threshold: default_response_score_threshold(),
            rerank_top_n: default_rerank_top_n(),
            rerank_cutoff: None,
            capability_timeout_secs: default_capability_timeout_secs(),
            embed_batch_size: default_embed_batch_size(),
            keep_model_loaded: default_keep_model_loaded(),
            exclude: Vec::new(),
        }
    }

    pub fn capability_timeout(&self) -> Duration {
        Duration::from_secs(self.capability_timeout_secs)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        let config = Self::from_toml(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn validate(&self) -> Result<()> {
        let fs = &self.feature_store;
        if !fs.reject_throttle.is_finite() {
            return Err(Error::Config(
                "feature_store.reject_throttle must be a finite number".into(),
            ));
        }
        if fs.response_top_k == 0 {
            return Err(Error::Config(
                "feature_store.response_top_k must be at least 1".into(),
            ));
        }
        if fs.rerank_top_n == 0 {
            return Err(Error::Config(
                "feature_store.rerank_top_n must be at least 1".into(),
            ));
        }
        if fs.embed_batch_size == 0 {
            return Err(Error::Config(
                "feature_store.embed_batch_size must be at least 1".into(),
            ));
        }
        if fs.capability_timeout_secs == 0 {
            return Err(Error::Config(
                "feature_store.capability_timeout_secs must be at least 1"
                    .into(),
            ));
        }
        Ok(())
    }

    /// Overwrite `feature_store.reject_throttle` in the file at `path`.
    ///
    /// The document is edited in place: comments, key order and the
    /// formatting of every other entry are preserved, as is any comment
    /// trailing the old value.
    pub fn persist_reject_throttle(path: &Path, value: f32) -> Result<()> {
        let contents = std::fs::read_to_string(path)?;
        let mut doc: DocumentMut = contents.parse()?;

        let section = doc
            .entry("feature_store")
            .or_insert(toml_edit::table())
            .as_table_like_mut()
            .ok_or_else(|| {
                Error::Config(format!(
                    "{}: feature_store is not a table",
                    path.display()
                ))
            })?;

        // shortest decimal form, so the file reads back as the same f32
        let shortest: f64 = value.to_string().parse().map_err(|e| {
            Error::Config(format!("reject_throttle {value}: {e}"))
        })?;
        let mut throttle = Value::from(shortest);
        match section.get_mut("reject_throttle") {
            Some(Item::Value(old)) => {
                *throttle.decor_mut() = old.decor().clone();
                *old = throttle;
            }
            _ => {
                section.insert("reject_throttle", Item::Value(throttle));
            }
        }

        std::fs::write(path, doc.to_string())?;
        tracing::info!(
            path = %path.display(),
            reject_throttle = value,
            "persisted reject throttle"
        );
        Ok(())
    }
}
