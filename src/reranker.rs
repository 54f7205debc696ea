use std::sync::Arc;

use candle_core::Tensor;

use crate::{
    error::{Error, Result},
    timeout::CallTimeout,
};

/// Scores (query, passage) pairs for relevance. Higher is more relevant.
pub trait Reranker: Send + Sync {
    /// One score per passage, in input order.
    fn score(&self, query: &str, passages: &[String]) -> Result<Vec<f32>>;

    /// Release scratch memory held for the last call.
    fn release(&self) {}
}

/// A passage position paired with its rerank score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankedPassage {
    pub index: usize,
    pub score: f32,
}

/// Rerank `passages` against `query`.
///
/// Passages scoring below `cutoff` are dropped, the rest are sorted by score
/// descending and truncated to `top_n`. Ties keep input order. An empty
/// passage list never reaches the reranker.
pub fn rerank(
    reranker: &Arc<dyn Reranker>,
    timeout: &CallTimeout,
    query: &str,
    passages: &[String],
    top_n: usize,
    cutoff: Option<f32>,
) -> Result<Vec<RerankedPassage>> {
    if passages.is_empty() {
        return Ok(Vec::new());
    }

    let worker = Arc::clone(reranker);
    let owned_query = query.to_string();
    let owned_passages = passages.to_vec();
    let scores = timeout.run("reranker", move || {
        worker.score(&owned_query, &owned_passages)
    })?;

    if scores.len() != passages.len() {
        return Err(Error::capability(
            "reranker",
            format!(
                "returned {} scores for {} passages",
                scores.len(),
                passages.len()
            ),
        ));
    }

    let mut ranked: Vec<RerankedPassage> = scores
        .into_iter()
        .enumerate()
        .filter(|(_, score)| cutoff.is_none_or(|c| *score >= c))
        .map(|(index, score)| RerankedPassage { index, score })
        .collect();

    // Stable sort, so equal scores keep retrieval order.
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked.truncate(top_n);

    Ok(ranked)
}

/// Compute the MaxSim score between a query embedding and a document embedding.
///
/// query_embedding: [Q, D] where Q = query tokens, D = embedding dimension
/// doc_embedding: [T, D] where T = document tokens, D = embedding dimension
///
/// MaxSim: for each query token, the best dot product with any document
/// token, summed over query tokens.
pub(crate) fn maxsim(
    query_embedding: &Tensor,
    doc_embedding: &Tensor,
) -> Result<f32> {
    let sim_matrix = query_embedding
        .matmul(&doc_embedding.t().map_err(map_candle_err)?)
        .map_err(map_candle_err)?;

    let row_maxes = sim_matrix.max(1).map_err(map_candle_err)?;

    row_maxes
        .sum_all()
        .map_err(map_candle_err)?
        .to_scalar::<f32>()
        .map_err(map_candle_err)
}

pub(crate) fn map_candle_err(e: candle_core::Error) -> Error {
    Error::capability("tensor", e)
}
