//! docgate - the retrieval core of a document question-answering assistant.
//!
//! A corpus is indexed twice. The reject index decides whether a question is
//! answerable from the corpus at all; the response index retrieves the
//! passages an answer is generated from, reranked by a late-interaction
//! model. The reject threshold is calibrated from labeled good and bad
//! questions.
//!
//! # Quick start
//!
//! ```no_run
//! use std::path::Path;
//!
//! use docgate::{FeatureStore, WorkDir, config::Config};
//!
//! let config = Config::load(Path::new("config.toml")).unwrap();
//! let work_dir = WorkDir::resolve(Some(Path::new("workdir"))).unwrap();
//! let mut store =
//!     FeatureStore::with_models(config.feature_store, None).unwrap();
//! store.load(&work_dir).unwrap();
//!
//! let decision = store.is_reject("mmpose installation").unwrap();
//! if !decision.reject {
//!     for passage in store.query("mmpose installation").unwrap() {
//!         println!("{:.3} {}", passage.score, passage.chunk.source.display());
//!     }
//! }
//! ```

pub mod calibrate;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod feature_store;
pub mod ingestion;
pub mod model_manager;
pub mod pipeline;
pub mod reranker;
pub mod splitter;
pub mod store;
pub mod text_util;
pub mod timeout;
pub mod vector_index;
pub mod walker;
pub mod work_dir;

#[cfg(test)]
mod test_util;

pub use chunking::{Chunk, ChunkPolicy, Document};
pub use embedding::Embedder;
pub use error::{Error, Result};
pub use extractor::{Extractor, FileOperation, FileType};
pub use feature_store::FeatureStore;
pub use model_manager::ModelManager;
pub use reranker::Reranker;
pub use store::DualStore;
pub use vector_index::VectorIndex;
pub use work_dir::WorkDir;
