//! Query-time retrieval over a loaded [`DualStore`].
//!
//! Pipeline stages:
//! 1. Embed the query once
//! 2. Reject path: nearest neighbour in the reject index, compared with the
//!    reject throttle
//! 3. Response path: inner-product search in the response index, score floor,
//!    then rerank and truncate
//!
//! Every public operation releases capability scratch state on exit.

use std::sync::Arc;

use crate::{
    chunking::Chunk,
    config::FeatureStoreConfig,
    embedding::{self, Embedder},
    error::Result,
    reranker::{self, Reranker},
    store::DualStore,
    timeout::CallTimeout,
};

/// A query embedded once and shared by both paths.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryEmbedding(Vec<f32>);

impl QueryEmbedding {
    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

/// Accept/reject verdict for one query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RejectDecision {
    pub reject: bool,
    /// Relevance of the nearest reject-index chunk, `None` when the reject
    /// index is empty.
    pub score: Option<f32>,
}

/// A retrieved passage with its rerank score and first-stage score.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedChunk<'a> {
    pub chunk: &'a Chunk,
    pub score: f32,
    pub retrieval_score: f32,
}

/// Reject decision plus, for accepted queries, the retrieved passages.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation<'a> {
    pub decision: RejectDecision,
    pub passages: Vec<RankedChunk<'a>>,
}

/// Calls `release()` on both capabilities when dropped.
struct ReleaseGuard<'a> {
    embedder: &'a dyn Embedder,
    reranker: &'a dyn Reranker,
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        self.embedder.release();
        self.reranker.release();
    }
}

/// Borrowed view over a loaded store and the capabilities it needs.
///
/// The pipeline never mutates the store, so any number of pipelines may
/// run concurrently over one store.
pub struct RetrievalPipeline<'a> {
    store: &'a DualStore,
    embedder: &'a Arc<dyn Embedder>,
    reranker: &'a Arc<dyn Reranker>,
    settings: &'a FeatureStoreConfig,
    timeout: &'a CallTimeout,
}

impl<'a> RetrievalPipeline<'a> {
    pub fn new(
        store: &'a DualStore,
        embedder: &'a Arc<dyn Embedder>,
        reranker: &'a Arc<dyn Reranker>,
        settings: &'a FeatureStoreConfig,
        timeout: &'a CallTimeout,
    ) -> Self {
        Self {
            store,
            embedder,
            reranker,
            settings,
            timeout,
        }
    }

    fn guard(&self) -> ReleaseGuard<'_> {
        ReleaseGuard {
            embedder: self.embedder.as_ref(),
            reranker: self.reranker.as_ref(),
        }
    }

    pub fn embed(&self, query: &str) -> Result<QueryEmbedding> {
        let _release = self.guard();
        self.embed_unguarded(query)
    }

    fn embed_unguarded(&self, query: &str) -> Result<QueryEmbedding> {
        embedding::embed_query(self.embedder, self.timeout, query)
            .map(QueryEmbedding)
    }

    fn nearest_reject_score(
        &self,
        embedding: &QueryEmbedding,
    ) -> Result<Option<f32>> {
        let hits = self.store.reject().search(embedding.as_slice(), 1)?;
        Ok(hits.first().map(|hit| hit.score))
    }

    /// Reject score of `query`: relevance of its nearest reject-index chunk,
    /// 0 when the reject index is empty. Calibration and
    /// [`is_reject`](Self::is_reject) both use this score.
    pub fn reject_score(&self, query: &str) -> Result<f32> {
        let _release = self.guard();
        let embedding = self.embed_unguarded(query)?;
        Ok(self.nearest_reject_score(&embedding)?.unwrap_or(0.0))
    }

    /// Decide whether the corpus can answer `query`.
    ///
    /// A query is accepted when its reject score is at least the configured
    /// throttle.
    pub fn is_reject(&self, query: &str) -> Result<RejectDecision> {
        let _release = self.guard();
        let embedding = self.embed_unguarded(query)?;
        self.decide(&embedding)
    }

    /// [`is_reject`](Self::is_reject) for an already embedded query.
    pub fn is_reject_embedded(
        &self,
        embedding: &QueryEmbedding,
    ) -> Result<RejectDecision> {
        let _release = self.guard();
        self.decide(embedding)
    }

    fn decide(&self, embedding: &QueryEmbedding) -> Result<RejectDecision> {
        let score = self.nearest_reject_score(embedding)?;
        let reject = match score {
            Some(score) => score < self.settings.reject_throttle,
            None => true,
        };
        tracing::debug!(
            ?score,
            reject,
            throttle = self.settings.reject_throttle,
            "reject decision"
        );
        Ok(RejectDecision { reject, score })
    }

    /// Retrieve and rerank passages for `query`, best first.
    ///
    /// An empty result means nothing in the corpus cleared the score floor.
    pub fn query(&self, query: &str) -> Result<Vec<RankedChunk<'a>>> {
        let _release = self.guard();
        let embedding = self.embed_unguarded(query)?;
        self.retrieve(query, &embedding)
    }

    /// [`query`](Self::query) for an already embedded query.
    pub fn query_embedded(
        &self,
        query: &str,
        embedding: &QueryEmbedding,
    ) -> Result<Vec<RankedChunk<'a>>> {
        let _release = self.guard();
        self.retrieve(query, embedding)
    }

    fn retrieve(
        &self,
        query: &str,
        embedding: &QueryEmbedding,
    ) -> Result<Vec<RankedChunk<'a>>> {
        let index = self.store.response();
        let hits: Vec<_> = index
            .search(embedding.as_slice(), self.settings.response_top_k)?
            .into_iter()
            .filter(|hit| hit.score >= self.settings.response_score_threshold)
            .collect();
        tracing::debug!(candidates = hits.len(), "response search");

        let candidates: Vec<(&'a Chunk, f32)> = hits
            .iter()
            .filter_map(|hit| {
                index.chunk(hit.position).map(|chunk| (chunk, hit.score))
            })
            .collect();
        let passages: Vec<String> =
            candidates.iter().map(|(chunk, _)| chunk.content.clone()).collect();

        let ranked = reranker::rerank(
            self.reranker,
            self.timeout,
            query,
            &passages,
            self.settings.rerank_top_n,
            self.settings.rerank_cutoff,
        )?;

        Ok(ranked
            .into_iter()
            .map(|r| {
                let (chunk, retrieval_score) = candidates[r.index];
                RankedChunk {
                    chunk,
                    score: r.score,
                    retrieval_score,
                }
            })
            .collect())
    }

    /// Embed once, decide, and retrieve only for accepted queries.
    pub fn evaluate(&self, query: &str) -> Result<Evaluation<'a>> {
        let _release = self.guard();
        let embedding = self.embed_unguarded(query)?;
        let decision = self.decide(&embedding)?;
        let passages = if decision.reject {
            Vec::new()
        } else {
            self.retrieve(query, &embedding)?
        };
        Ok(Evaluation { decision, passages })
    }
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, sync::atomic::Ordering, time::Duration};

    use super::*;
    use crate::{
        chunking::{ChunkPolicy, Document},
        error::Error,
        extractor::FileType,
        test_util::{FailingEmbedder, HashEmbedder, OverlapReranker},
        vector_index::VectorIndex,
    };

    struct Fixture {
        store: DualStore,
        embedder: Arc<dyn Embedder>,
        hash: Arc<HashEmbedder>,
        reranker: Arc<dyn Reranker>,
        settings: FeatureStoreConfig,
        timeout: CallTimeout,
    }

    impl Fixture {
        fn new(throttle: f32) -> Self {
            let hash = Arc::new(HashEmbedder::new(128));
            let embedder: Arc<dyn Embedder> = hash.clone();
            let timeout = CallTimeout::new(Duration::from_secs(10)).unwrap();
            let documents = vec![
                Document::new(
                    "# Installation\nInstall mmpose with pip install mmpose after installing mmcv.\n\n## Verify\nRun the demo script to verify the mmpose installation."
                        .to_string(),
                    PathBuf::from("/corpus/installation.md"),
                    FileType::Markdown,
                ),
                Document::new(
                    "# Training\nTrain a top down heatmap model with the train script and a config."
                        .to_string(),
                    PathBuf::from("/corpus/train.md"),
                    FileType::Markdown,
                ),
            ];
            let store =
                DualStore::build(&documents, &embedder, &timeout, 8).unwrap();
            Self {
                store,
                embedder,
                hash,
                reranker: Arc::new(OverlapReranker),
                settings: FeatureStoreConfig::with_throttle(throttle),
                timeout,
            }
        }

        fn pipeline(&self) -> RetrievalPipeline<'_> {
            RetrievalPipeline::new(
                &self.store,
                &self.embedder,
                &self.reranker,
                &self.settings,
                &self.timeout,
            )
        }
    }

    #[test]
    fn related_queries_score_higher_than_unrelated() {
        let fx = Fixture::new(0.0);
        let pipeline = fx.pipeline();
        let related = pipeline.reject_score("mmpose installation").unwrap();
        let unrelated =
            pipeline.reject_score("what is for lunch today").unwrap();
        assert!(related > unrelated);
        assert!((0.0..=1.0).contains(&related));
    }

    #[test]
    fn throttle_separates_accept_and_reject() {
        let fx = Fixture::new(0.0);
        let related =
            fx.pipeline().reject_score("mmpose installation").unwrap();

        let mut fx = fx;
        fx.settings.reject_throttle = related;
        let pipeline = fx.pipeline();
        let accepted = pipeline.is_reject("mmpose installation").unwrap();
        assert!(!accepted.reject);
        assert_eq!(accepted.score, Some(related));
        assert!(pipeline.is_reject("what is for lunch today").unwrap().reject);
    }

    #[test]
    fn empty_reject_index_rejects_everything() {
        let mut fx = Fixture::new(-1.0);
        let empty = |policy: ChunkPolicy| {
            VectorIndex::from_parts(policy.distance(), Vec::new(), Vec::new())
                .unwrap()
        };
        fx.store = DualStore::new(
            empty(ChunkPolicy::Response),
            empty(ChunkPolicy::Reject),
        );
        let pipeline = fx.pipeline();
        let decision = pipeline.is_reject("mmpose installation").unwrap();
        assert!(decision.reject);
        assert_eq!(decision.score, None);
        assert_eq!(pipeline.reject_score("mmpose installation").unwrap(), 0.0);
        assert!(pipeline.query("mmpose installation").unwrap().is_empty());
    }

    #[test]
    fn query_returns_reranked_passages() {
        let fx = Fixture::new(0.0);
        let results = fx.pipeline().query("mmpose installation").unwrap();

        assert!(!results.is_empty());
        assert!(results.len() <= fx.settings.rerank_top_n);
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(results.iter().all(|r| r.retrieval_score >= 0.2));
        assert!(results[0].chunk.content.contains("mmpose"));
    }

    #[test]
    fn score_floor_can_exclude_everything() {
        let mut fx = Fixture::new(0.0);
        fx.settings.response_score_threshold = 2.0;
        assert!(fx.pipeline().query("mmpose installation").unwrap().is_empty());
    }

    #[test]
    fn evaluate_skips_retrieval_for_rejected_queries() {
        let fx = Fixture::new(1.1);
        let evaluation = fx.pipeline().evaluate("mmpose installation").unwrap();
        assert!(evaluation.decision.reject);
        assert!(evaluation.passages.is_empty());

        let fx = Fixture::new(0.0);
        let evaluation = fx.pipeline().evaluate("mmpose installation").unwrap();
        assert!(!evaluation.decision.reject);
        assert!(!evaluation.passages.is_empty());
    }

    #[test]
    fn shared_embedding_matches_direct_calls() {
        let fx = Fixture::new(0.1);
        let pipeline = fx.pipeline();
        let embedding = pipeline.embed("verify the installation").unwrap();
        assert_eq!(
            pipeline.is_reject_embedded(&embedding).unwrap(),
            pipeline.is_reject("verify the installation").unwrap()
        );
        assert_eq!(
            pipeline
                .query_embedded("verify the installation", &embedding)
                .unwrap(),
            pipeline.query("verify the installation").unwrap()
        );
    }

    #[test]
    fn every_public_operation_releases_capabilities() {
        let fx = Fixture::new(0.0);
        let pipeline = fx.pipeline();
        let before = fx.hash.releases.load(Ordering::SeqCst);
        pipeline.is_reject("mmpose").unwrap();
        pipeline.query("mmpose").unwrap();
        assert_eq!(fx.hash.releases.load(Ordering::SeqCst), before + 2);
    }

    #[test]
    fn embedder_failure_propagates() {
        let mut fx = Fixture::new(0.0);
        fx.embedder = Arc::new(FailingEmbedder);
        let err = fx.pipeline().query("mmpose").unwrap_err();
        assert!(matches!(
            err,
            Error::Capability {
                capability: "embedder",
                ..
            }
        ));
    }
}
