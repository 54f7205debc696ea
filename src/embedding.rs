use std::sync::Arc;

use kdam::{BarExt, tqdm};

use crate::{
    error::{Error, Result},
    timeout::CallTimeout,
};

/// Turns text into fixed-dimension dense vectors.
///
/// The same implementation must be used to build an index and to query it.
pub trait Embedder: Send + Sync {
    fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Release scratch memory held for the last call (accelerator caches,
    /// unloaded weights). Called at the end of every public operation.
    fn release(&self) {}
}

/// Embed a single query under the call timeout.
pub fn embed_query(
    embedder: &Arc<dyn Embedder>,
    timeout: &CallTimeout,
    text: &str,
) -> Result<Vec<f32>> {
    let embedder = Arc::clone(embedder);
    let text = text.to_string();
    timeout.run("embedder", move || embedder.embed_query(&text))
}

/// Embed a sequence of texts in batches.
///
/// Every batch is a separate timed call. Returns one vector per input text,
/// all with the same dimension.
pub fn embed_batched(
    embedder: &Arc<dyn Embedder>,
    timeout: &CallTimeout,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let mut bar = tqdm!(total = texts.len(), desc = "embedding");
    let mut vectors = Vec::with_capacity(texts.len());

    for batch in texts.chunks(batch_size.max(1)) {
        let owned = batch.to_vec();
        let worker = Arc::clone(embedder);
        let embedded =
            timeout.run("embedder", move || worker.embed_documents(&owned))?;
        embedder.release();

        if embedded.len() != batch.len() {
            return Err(Error::capability(
                "embedder",
                format!(
                    "returned {} vectors for {} texts",
                    embedded.len(),
                    batch.len()
                ),
            ));
        }
        vectors.extend(embedded);
        bar.update(batch.len())?;
    }
    eprintln!();

    let dimension = vectors[0].len();
    if let Some(bad) = vectors.iter().find(|v| v.len() != dimension) {
        return Err(Error::DimensionMismatch {
            expected: dimension,
            actual: bad.len(),
        });
    }

    Ok(vectors)
}

/// Cosine similarity of two vectors, 0 when either has zero length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test_util::{FailingEmbedder, HashEmbedder};

    fn timeout() -> CallTimeout {
        CallTimeout::new(Duration::from_secs(10)).unwrap()
    }

    #[test]
    fn batched_embedding_preserves_order_and_count() {
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(32));
        let texts: Vec<String> =
            (0..7).map(|i| format!("document number {i}")).collect();

        let vectors = embed_batched(&embedder, &timeout(), &texts, 3).unwrap();
        assert_eq!(vectors.len(), 7);
        for (text, vector) in texts.iter().zip(&vectors) {
            assert_eq!(vector, &embedder.embed_query(text).unwrap());
        }
    }

    #[test]
    fn empty_input_makes_no_calls() {
        let embedder: Arc<dyn Embedder> = Arc::new(FailingEmbedder);
        let vectors = embed_batched(&embedder, &timeout(), &[], 8).unwrap();
        assert!(vectors.is_empty());
    }

    #[test]
    fn embedder_failures_propagate() {
        let embedder: Arc<dyn Embedder> = Arc::new(FailingEmbedder);
        let err = embed_batched(&embedder, &timeout(), &["x".to_string()], 8)
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Capability {
                capability: "embedder",
                ..
            }
        ));
    }

    #[test]
    fn cosine_similarity_basics() {
        let same = cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]);
        assert!((same - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        let opposite = cosine_similarity(&[1.0, 0.0], &[-2.0, 0.0]);
        assert!((opposite + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
