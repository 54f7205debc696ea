use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use crate::{
    calibrate::{self, Calibration},
    config::{Config, FeatureStoreConfig},
    embedding::{self, Embedder},
    error::{Error, Result},
    extractor::{Extractor, FileOperation},
    ingestion::{self, PreprocessReport},
    model_manager::{ModelManager, resolve_model_id},
    pipeline::{Evaluation, RankedChunk, RejectDecision, RetrievalPipeline},
    reranker::Reranker,
    store::DualStore,
    timeout::CallTimeout,
    work_dir::WorkDir,
};

/// Outcome of [`FeatureStore::initialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitReport {
    pub preprocess: PreprocessReport,
    /// Preprocessed files whose text could not be extracted.
    pub unreadable: usize,
    pub response_chunks: usize,
    pub reject_chunks: usize,
}

/// Builds, loads and queries the response and reject indexes of one work
/// directory.
///
/// Every operation is synchronous and blocks on model calls. From async
/// code, run them on a blocking thread (`tokio::task::spawn_blocking`);
/// called directly on a runtime thread, model calls fail with
/// [`Error::Capability`].
pub struct FeatureStore {
    settings: FeatureStoreConfig,
    embedder: Arc<dyn Embedder>,
    reranker: Arc<dyn Reranker>,
    extractor: Arc<dyn Extractor>,
    timeout: CallTimeout,
    store: Option<DualStore>,
}

impl FeatureStore {
    pub fn new(
        settings: FeatureStoreConfig,
        embedder: Arc<dyn Embedder>,
        reranker: Arc<dyn Reranker>,
    ) -> Result<Self> {
        let timeout = CallTimeout::new(settings.capability_timeout())?;
        Ok(Self {
            settings,
            embedder,
            reranker,
            extractor: Arc::new(FileOperation),
            timeout,
            store: None,
        })
    }

    /// Create a store backed by ColBERT models.
    ///
    /// `model_override` takes precedence over the configured model IDs. One
    /// model instance serves both roles when the IDs match.
    pub fn with_models(
        settings: FeatureStoreConfig,
        model_override: Option<&str>,
    ) -> Result<Self> {
        let embedding_id = resolve_model_id(
            model_override.or(settings.embedding_model.as_deref()),
        );
        let reranker_id = resolve_model_id(
            model_override.or(settings.reranker_model.as_deref()),
        );
        let keep = settings.keep_model_loaded;

        let embedding_model =
            Arc::new(ModelManager::new(embedding_id.clone(), keep));
        let reranker: Arc<dyn Reranker> = if reranker_id == embedding_id {
            embedding_model.clone() as Arc<dyn Reranker>
        } else {
            Arc::new(ModelManager::new(reranker_id, keep))
        };
        Self::new(settings, embedding_model, reranker)
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn Extractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn settings(&self) -> &FeatureStoreConfig {
        &self.settings
    }

    pub fn is_loaded(&self) -> bool {
        self.store.is_some()
    }

    /// Preprocess `files` into the work directory and build both indexes.
    ///
    /// Fails with [`Error::EmptyCorpus`] when no file could be preprocessed.
    /// The indexes are written to disk; call [`load`](Self::load) to query
    /// them.
    pub fn initialize(
        &self,
        files: &[PathBuf],
        work_dir: &WorkDir,
    ) -> Result<InitReport> {
        tracing::info!("initializing response and reject feature store");
        let preprocess_dir = work_dir.preprocess_dir();
        let exclude = ingestion::exclude_set(&self.settings.exclude)?;
        let preprocess = ingestion::preprocess(
            files,
            &preprocess_dir,
            self.extractor.as_ref(),
            &exclude,
        )?;
        tracing::info!(
            input = files.len(),
            success = preprocess.success,
            fail = preprocess.fail,
            skip = preprocess.skip,
            "preprocessed corpus"
        );
        if preprocess.success == 0 {
            return Err(Error::EmptyCorpus {
                dir: preprocess_dir,
            });
        }

        let corpus =
            ingestion::load_corpus(&preprocess_dir, self.extractor.as_ref())?;
        let store = DualStore::build(
            &corpus.documents,
            &self.embedder,
            &self.timeout,
            self.settings.embed_batch_size,
        );
        self.embedder.release();
        let store = store?;
        store.persist(work_dir)?;

        Ok(InitReport {
            preprocess,
            unreadable: corpus.unreadable,
            response_chunks: store.response().len(),
            reject_chunks: store.reject().len(),
        })
    }

    /// Load both indexes from the work directory.
    pub fn load(&mut self, work_dir: &WorkDir) -> Result<()> {
        self.store = Some(DualStore::load(work_dir)?);
        Ok(())
    }

    pub fn pipeline(&self) -> Result<RetrievalPipeline<'_>> {
        let store = self.store.as_ref().ok_or(Error::PipelineNotReady)?;
        Ok(RetrievalPipeline::new(
            store,
            &self.embedder,
            &self.reranker,
            &self.settings,
            &self.timeout,
        ))
    }

    pub fn is_reject(&self, query: &str) -> Result<RejectDecision> {
        self.pipeline()?.is_reject(query)
    }

    pub fn query(&self, query: &str) -> Result<Vec<RankedChunk<'_>>> {
        self.pipeline()?.query(query)
    }

    pub fn evaluate(&self, query: &str) -> Result<Evaluation<'_>> {
        self.pipeline()?.evaluate(query)
    }

    /// Calibrate the reject throttle, write it to `config_path` and use it
    /// from now on.
    pub fn update_throttle(
        &mut self,
        config_path: &Path,
        good: &[String],
        bad: &[String],
    ) -> Result<Calibration> {
        let calibration = calibrate::calibrate(&self.pipeline()?, good, bad)?;
        Config::persist_reject_throttle(config_path, calibration.threshold)?;
        self.settings.reject_throttle = calibration.threshold;
        Ok(calibration)
    }

    /// Embedding similarity of two texts mapped to `[0, 1]`:
    /// `0.5 + 0.5 * cos`, or 0 when either embedding is all zeros.
    pub fn text_similarity(&self, a: &str, b: &str) -> Result<f32> {
        let first = embedding::embed_query(&self.embedder, &self.timeout, a);
        let second = embedding::embed_query(&self.embedder, &self.timeout, b);
        self.embedder.release();
        let (first, second) = (first?, second?);

        let zero = |v: &[f32]| v.iter().all(|x| *x == 0.0);
        if zero(&first) || zero(&second) {
            return Ok(0.0);
        }
        Ok(0.5 + 0.5 * embedding::cosine_similarity(&first, &second))
    }
}
