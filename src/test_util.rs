//! Deterministic capability stand-ins for unit tests.

use std::{
    collections::HashSet,
    hash::{DefaultHasher, Hash, Hasher},
    sync::atomic::{AtomicUsize, Ordering},
};

use crate::{
    embedding::Embedder,
    error::{Error, Result},
    reranker::Reranker,
};

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Bag-of-words embedder: each token is hashed into a bucket, and the
/// bucket counts are L2-normalized. Text with no tokens embeds to zero.
pub struct HashEmbedder {
    dimension: usize,
    pub releases: AtomicUsize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            releases: AtomicUsize::new(0),
        }
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0f32; self.dimension];
        for token in tokens(text) {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            vector[(hasher.finish() % self.dimension as u64) as usize] += 1.0;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

impl Embedder for HashEmbedder {
    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed(text))
    }

    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Embedder whose every call fails.
pub struct FailingEmbedder;

impl Embedder for FailingEmbedder {
    fn embed_query(&self, _text: &str) -> Result<Vec<f32>> {
        Err(Error::capability("embedder", "model unavailable"))
    }

    fn embed_documents(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::capability("embedder", "model unavailable"))
    }
}

/// Scores a passage by the fraction of query tokens it contains.
pub struct OverlapReranker;

impl Reranker for OverlapReranker {
    fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>> {
        let query: HashSet<String> = tokens(query).collect();
        if query.is_empty() {
            return Ok(vec![0.0; passages.len()]);
        }
        Ok(passages
            .iter()
            .map(|passage| {
                let passage: HashSet<String> = tokens(passage).collect();
                query.intersection(&passage).count() as f32 / query.len() as f32
            })
            .collect())
    }
}
