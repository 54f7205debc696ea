use std::sync::{Mutex, MutexGuard};

use candle_core::{D, Device, Tensor};
use pylate_rs::ColBERT;

use crate::{
    embedding::Embedder,
    error::{Error, Result},
    reranker::{Reranker, map_candle_err, maxsim},
};

pub const DEFAULT_MODEL_ID: &str = "lightonai/GTE-ModernColBERT-v1";
pub const MODEL_ENV_VAR: &str = "DOCGATE_MODEL";

/// Pick the model ID from, in order of priority:
/// 1. An explicit ID (from --model or the config file)
/// 2. The `DOCGATE_MODEL` environment variable
/// 3. The default model (`lightonai/GTE-ModernColBERT-v1`)
pub fn resolve_model_id(explicit: Option<&str>) -> String {
    if let Some(id) = explicit {
        return id.to_string();
    }
    std::env::var(MODEL_ENV_VAR)
        .unwrap_or_else(|_| DEFAULT_MODEL_ID.to_string())
}

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

fn model_err(e: impl std::fmt::Display) -> Error {
    Error::capability("model", e)
}

/// A ColBERT model serving as both embedder and reranker.
///
/// The model is loaded on first use. With `keep_loaded = false` it is
/// dropped again on every [`release`](Embedder::release), trading reload
/// time for memory between operations.
pub struct ModelManager {
    model: Mutex<Option<ColBERT>>,
    model_id: String,
    keep_loaded: bool,
}

impl ModelManager {
    pub fn new(model_id: String, keep_loaded: bool) -> Self {
        Self {
            model: Mutex::new(None),
            model_id,
            keep_loaded,
        }
    }

    /// Returns the model ID that will be (or has been) loaded.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Returns `true` if the model is currently in memory.
    pub fn is_loaded(&self) -> bool {
        self.lock().map(|m| m.is_some()).unwrap_or(false)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<ColBERT>>> {
        self.model
            .lock()
            .map_err(|_| model_err("model lock poisoned by an earlier panic"))
    }

    /// Run `f` against the loaded model, downloading it from HuggingFace Hub
    /// first if needed.
    fn with_model<T>(
        &self,
        f: impl FnOnce(&mut ColBERT) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.lock()?;
        if guard.is_none() {
            tracing::info!(model = %self.model_id, "loading model");
            let device = default_device();
            let colbert = TryInto::<ColBERT>::try_into(
                ColBERT::from(&self.model_id).with_device(device),
            )
            .map_err(model_err)?;
            *guard = Some(colbert);
        }
        match guard.as_mut() {
            Some(model) => f(model),
            None => Err(model_err("model failed to load")),
        }
    }

    /// Token-level query embeddings, shape `[Q, D]`.
    fn encode_query(&self, query: &str) -> Result<Tensor> {
        self.with_model(|model| {
            let embeddings =
                model.encode(&[query.to_string()], true).map_err(model_err)?;
            embeddings.squeeze(0).map_err(map_candle_err)
        })
    }

    /// Token-level document embeddings, shape `[B, T, D]`.
    fn encode_documents(&self, texts: &[String]) -> Result<Tensor> {
        self.with_model(|model| model.encode(texts, false).map_err(model_err))
    }
}

/// Mean-pool `[B, T, D]` token embeddings into L2-normalized `[B, D]` rows.
fn pool(tokens: &Tensor) -> Result<Vec<Vec<f32>>> {
    let pooled = tokens.mean(1).map_err(map_candle_err)?;
    let norms = pooled
        .sqr()
        .and_then(|t| t.sum_keepdim(D::Minus1))
        .and_then(|t| t.sqrt())
        .and_then(|t| t.clamp(1e-12f32, f32::MAX))
        .map_err(map_candle_err)?;
    pooled
        .broadcast_div(&norms)
        .and_then(|t| t.to_vec2::<f32>())
        .map_err(map_candle_err)
}

impl Embedder for ModelManager {
    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = self.encode_query(text)?;
        let tokens = tokens.unsqueeze(0).map_err(map_candle_err)?;
        pool(&tokens)?
            .into_iter()
            .next()
            .ok_or_else(|| model_err("empty query embedding"))
    }

    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        pool(&self.encode_documents(texts)?)
    }

    fn release(&self) {
        if self.keep_loaded {
            return;
        }
        if let Ok(mut guard) = self.model.lock()
            && guard.take().is_some()
        {
            tracing::debug!(model = %self.model_id, "unloaded model");
        }
    }
}

impl Reranker for ModelManager {
    fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }
        let query_tokens = self.encode_query(query)?;
        let doc_tokens = self.encode_documents(passages)?;
        (0..passages.len())
            .map(|i| {
                let doc = doc_tokens.get(i).map_err(map_candle_err)?;
                maxsim(&query_tokens, &doc)
            })
            .collect()
    }

    fn release(&self) {
        Embedder::release(self);
    }
}
