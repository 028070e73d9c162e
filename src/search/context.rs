//! Decides whether a chat message needs repository context at all.
//!
//! Follow-up messages such as "fix this" or "translate the above" refer to
//! the conversation, not the codebase, and searching for them only adds
//! noise. Obvious cases are caught by patterns; everything else is compared
//! against the mean embeddings of labeled sample messages.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::{EmbeddingsError, Result};
use crate::search::QueryEmbedder;
use crate::vector::dot_f32;

static NO_CONTEXT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(previous|above)\s+(message|code|text)",
        concat!(
            r"(translate|convert|change|for|make|refactor|rewrite|ignore|explain|fix|try|show)",
            r"\s+(that|this|above|previous|it|again)",
        ),
        r"(this|that).*?\s+(is|seems|looks)\s+(wrong|incorrect|bad|good)",
        r"^(yes|no|correct|wrong|nope|yep|now|cool)(\s|\.|,)",
        // the message already carries its own code block
        r"```",
    ]
    .into_iter()
    .map(|pattern| Regex::new(pattern).expect("invalid no-context pattern"))
    .collect()
});

/// Mean embeddings of sample messages with and without a need for context.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContextDetectionIndex {
    pub with_context_mean: Vec<f32>,
    pub without_context_mean: Vec<f32>,
}

impl ContextDetectionIndex {
    pub fn new(with_context_mean: Vec<f32>, without_context_mean: Vec<f32>) -> Result<Self> {
        if with_context_mean.len() != without_context_mean.len() {
            return Err(EmbeddingsError::InvalidFormat(format!(
                "context detection means have dimensions {} and {}",
                with_context_mean.len(),
                without_context_mean.len()
            )));
        }
        Ok(Self {
            with_context_mean,
            without_context_mean,
        })
    }

    /// Builds the index from embeddings of labeled sample messages.
    pub fn from_samples(with_context: &[Vec<f32>], without_context: &[Vec<f32>]) -> Result<Self> {
        Self::new(mean(with_context)?, mean(without_context)?)
    }

    /// True unless the message looks like a follow-up that needs no
    /// repository context.
    pub async fn is_context_required(
        &self,
        embedder: &dyn QueryEmbedder,
        query: &str,
    ) -> Result<bool> {
        let lowered = query.trim().to_lowercase();
        if matches_no_context_pattern(&lowered) {
            return Ok(false);
        }
        if self.with_context_mean.is_empty() {
            return Ok(true);
        }

        let embedding = embedder.embed_query(query).await?.embedding;
        if embedding.len() != self.with_context_mean.len() {
            return Err(EmbeddingsError::InvalidRequest {
                reason: format!(
                    "query embedding has dimension {}, context detection index has {}",
                    embedding.len(),
                    self.with_context_mean.len()
                ),
            });
        }

        let with_context = dot_f32(&embedding, &self.with_context_mean);
        let without_context = dot_f32(&embedding, &self.without_context_mean);
        tracing::debug!(
            "[context] similarity with context {with_context:.4}, without {without_context:.4}"
        );
        Ok(with_context >= without_context)
    }
}

fn matches_no_context_pattern(message: &str) -> bool {
    NO_CONTEXT_PATTERNS.iter().any(|re| re.is_match(message))
}

fn mean(embeddings: &[Vec<f32>]) -> Result<Vec<f32>> {
    let Some(first) = embeddings.first() else {
        return Ok(Vec::new());
    };
    let dimension = first.len();
    let mut sum = vec![0.0f32; dimension];
    for embedding in embeddings {
        if embedding.len() != dimension {
            return Err(EmbeddingsError::InvalidFormat(format!(
                "sample embedding of dimension {} among dimension {dimension}",
                embedding.len()
            )));
        }
        for (acc, value) in sum.iter_mut().zip(embedding) {
            *acc += value;
        }
    }
    let n = embeddings.len() as f32;
    Ok(sum.into_iter().map(|value| value / n).collect())
}
