use std::sync::Arc;

use crate::{
    chunking::{ChunkPolicy, Document},
    embedding::Embedder,
    error::Result,
    ingestion::chunk_corpus,
    timeout::CallTimeout,
    vector_index::{DistanceStrategy, VectorIndex},
    work_dir::WorkDir,
};

impl ChunkPolicy {
    /// Scoring convention of the index built with this policy.
    pub fn distance(self) -> DistanceStrategy {
        match self {
            Self::Response => DistanceStrategy::MaxInnerProduct,
            Self::Reject => DistanceStrategy::Euclidean,
        }
    }
}

/// The response and reject indexes of one corpus snapshot.
#[derive(Debug)]
pub struct DualStore {
    response: VectorIndex,
    reject: VectorIndex,
}

impl DualStore {
    pub fn new(response: VectorIndex, reject: VectorIndex) -> Self {
        Self { response, reject }
    }

    /// Chunk and embed `documents` once per policy.
    pub fn build(
        documents: &[Document],
        embedder: &Arc<dyn Embedder>,
        timeout: &CallTimeout,
        batch_size: usize,
    ) -> Result<Self> {
        let build = |policy| {
            build_index(policy, documents, embedder, timeout, batch_size)
        };
        let response = build(ChunkPolicy::Response)?;
        let reject = build(ChunkPolicy::Reject)?;
        Ok(Self { response, reject })
    }

    pub fn persist(&self, work_dir: &WorkDir) -> Result<()> {
        self.response.persist(&work_dir.index_dir(ChunkPolicy::Response))?;
        self.reject.persist(&work_dir.index_dir(ChunkPolicy::Reject))?;
        Ok(())
    }

    /// Load both indexes. Either one missing is
    /// [`StoreNotInitialized`](crate::Error::StoreNotInitialized).
    pub fn load(work_dir: &WorkDir) -> Result<Self> {
        let load = |policy| VectorIndex::load(&work_dir.index_dir(policy));
        let response = load(ChunkPolicy::Response)?;
        let reject = load(ChunkPolicy::Reject)?;
        tracing::info!(
            response_chunks = response.len(),
            reject_chunks = reject.len(),
            "loaded feature store"
        );
        Ok(Self { response, reject })
    }

    pub fn response(&self) -> &VectorIndex {
        &self.response
    }

    pub fn reject(&self) -> &VectorIndex {
        &self.reject
    }
}

fn build_index(
    policy: ChunkPolicy,
    documents: &[Document],
    embedder: &Arc<dyn Embedder>,
    timeout: &CallTimeout,
    batch_size: usize,
) -> Result<VectorIndex> {
    let chunks = chunk_corpus(policy, documents);
    tracing::info!(index = %policy, chunks = chunks.len(), "building index");
    VectorIndex::build(chunks, policy.distance(), embedder, timeout, batch_size)
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, time::Duration};

    use super::*;
    use crate::{error::Error, extractor::FileType, test_util::HashEmbedder};

    fn documents() -> Vec<Document> {
        vec![
            Document::new(
                "# Installation\nInstall [mmcv](https://x.io) with `pip install mmcv`.\n\n```bash\npip install -U openmim\n```"
                    .to_string(),
                PathBuf::from("/corpus/install.md"),
                FileType::Markdown,
            ),
            Document::new(
                "Pose estimation toolkit based on PyTorch.".to_string(),
                PathBuf::from("/corpus/about.txt"),
                FileType::Text,
            ),
        ]
    }

    #[test]
    fn policies_use_distinct_distances() {
        assert_eq!(
            ChunkPolicy::Response.distance(),
            DistanceStrategy::MaxInnerProduct
        );
        assert_eq!(ChunkPolicy::Reject.distance(), DistanceStrategy::Euclidean);
    }

    #[test]
    fn build_persist_load() {
        let tmp = tempfile::tempdir().unwrap();
        let work_dir = WorkDir::resolve(Some(tmp.path())).unwrap();
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(64));
        let timeout = CallTimeout::new(Duration::from_secs(10)).unwrap();

        let store =
            DualStore::build(&documents(), &embedder, &timeout, 4).unwrap();
        assert!(!store.response().is_empty());
        // the reject index keeps the raw code block
        let mentions_openmim = |index: &VectorIndex| {
            index.chunks().iter().any(|c| c.content.contains("openmim"))
        };
        assert!(mentions_openmim(store.reject()));
        assert!(!mentions_openmim(store.response()));

        store.persist(&work_dir).unwrap();
        let loaded = DualStore::load(&work_dir).unwrap();
        assert_eq!(loaded.response().chunks(), store.response().chunks());
        assert_eq!(loaded.reject().chunks(), store.reject().chunks());
        assert_eq!(loaded.reject().distance(), DistanceStrategy::Euclidean);
    }

    #[test]
    fn load_requires_both_indexes() {
        let tmp = tempfile::tempdir().unwrap();
        let work_dir = WorkDir::resolve(Some(tmp.path())).unwrap();
        let empty =
            |d| VectorIndex::from_parts(d, Vec::new(), Vec::new()).unwrap();
        empty(DistanceStrategy::MaxInnerProduct)
            .persist(&work_dir.index_dir(ChunkPolicy::Response))
            .unwrap();

        let err = DualStore::load(&work_dir).unwrap_err();
        assert!(matches!(
            err,
            Error::StoreNotInitialized { path } if path.ends_with("db_reject")
        ));
    }
}
