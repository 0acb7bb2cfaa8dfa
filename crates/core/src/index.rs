use crate::config::DistanceMetric;
use crate::embeddings::EmbeddingProvider;
use crate::error::PipelineError;
use crate::models::ScoredChunk;
use tracing::info;

pub trait VectorIndex: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dimensions(&self) -> usize;

    /// The `min(k, len)` best chunks, best first; equal scores keep insertion order.
    fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, PipelineError>;
}

pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    if left.len() != right.len() || left.is_empty() {
        return 0.0;
    }
    let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    let left_norm = left.iter().map(|a| a * a).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|b| b * b).sum::<f32>().sqrt();
    if left_norm < f32::EPSILON || right_norm < f32::EPSILON {
        0.0
    } else {
        dot / (left_norm * right_norm)
    }
}

fn euclidean_distance(left: &[f32], right: &[f32]) -> f32 {
    left.iter()
        .zip(right)
        .map(|(a, b)| (a - b) * (a - b))
        .sum::<f32>()
        .sqrt()
}

/// Brute-force index over `(chunk, vector)` pairs. Immutable once built.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    chunks: Vec<String>,
    vectors: Vec<Vec<f32>>,
    dimensions: usize,
    metric: DistanceMetric,
}

impl FlatIndex {
    pub fn from_embeddings(
        chunks: Vec<String>,
        vectors: Vec<Vec<f32>>,
        dimensions: usize,
        metric: DistanceMetric,
    ) -> Result<Self, PipelineError> {
        if chunks.len() != vectors.len() {
            return Err(PipelineError::embedding(format!(
                "embedding count {} doesn't match chunk count {}",
                vectors.len(),
                chunks.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|vector| vector.len() != dimensions) {
            return Err(PipelineError::embedding(format!(
                "embedding dimension {} != {}",
                bad.len(),
                dimensions
            )));
        }

        Ok(Self {
            chunks,
            vectors,
            dimensions,
            metric,
        })
    }

    fn score(&self, query_vector: &[f32], vector: &[f32]) -> f32 {
        match self.metric {
            DistanceMetric::Cosine => cosine_similarity(query_vector, vector),
            DistanceMetric::Euclidean => -euclidean_distance(query_vector, vector),
        }
    }
}

impl VectorIndex for FlatIndex {
    fn len(&self) -> usize {
        self.chunks.len()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn search(&self, query_vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, PipelineError> {
        if query_vector.len() != self.dimensions {
            return Err(PipelineError::embedding(format!(
                "query vector dim {} is not {}",
                query_vector.len(),
                self.dimensions
            )));
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(position, vector)| (position, self.score(query_vector, vector)))
            .collect();

        scored.sort_by(|left, right| {
            right
                .1
                .total_cmp(&left.1)
                .then_with(|| left.0.cmp(&right.0))
        });

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(position, score)| ScoredChunk {
                position,
                text: self.chunks[position].clone(),
                score,
            })
            .collect())
    }
}

/// Embeds every chunk and assembles a [`FlatIndex`].
///
/// Nothing is returned unless every chunk got a vector of the provider's
/// dimension, so a failed build never yields a partial index.
pub async fn build_index(
    chunks: Vec<String>,
    embedder: &dyn EmbeddingProvider,
    metric: DistanceMetric,
) -> Result<FlatIndex, PipelineError> {
    if chunks.is_empty() {
        return Err(PipelineError::embedding("cannot build an index without chunks"));
    }

    let vectors = embedder.embed_batch(&chunks).await?;
    let index = FlatIndex::from_embeddings(chunks, vectors, embedder.dimensions(), metric)?;

    info!(
        chunks = index.len(),
        dimensions = index.dimensions(),
        model = embedder.model_name(),
        "vector index built"
    );
    Ok(index)
}
