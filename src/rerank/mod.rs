//! Second-stage reranking over search candidates
//!
//! Three strategies, chosen from the persisted corpus mode at construction
//! time: a cross-encoder scoring (query, text) pairs, a text-derived cosine
//! rescoring for multimodal corpora, and the identity. Rerank failures are
//! never fatal; the search engine falls back to vector order.

use fastembed::RerankerModel;
use std::path::PathBuf;
use tracing::debug;

use crate::constants::RERANK_LOGIT_COLLAPSE_THRESHOLD;
use crate::embed::cache::{self, SharedRerankModel};
use crate::embed::{EmbedInput, Embedder};
use crate::error::{RagError, Result};
use crate::search::SearchHit;
use crate::store::RerankStrategy;

/// Canonical name of the default cross-encoder model
pub const CROSS_ENCODER_MODEL_NAME: &str = "bge-reranker-base";

/// A configured reranker
pub enum Reranker {
    CrossEncoder(CrossEncoderReranker),
    TextDerived(TextDerivedReranker),
    Disabled,
}

impl Reranker {
    pub fn strategy(&self) -> RerankStrategy {
        match self {
            Reranker::CrossEncoder(_) => RerankStrategy::CrossEncoder,
            Reranker::TextDerived(_) => RerankStrategy::TextDerived,
            Reranker::Disabled => RerankStrategy::Disabled,
        }
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, Reranker::Disabled)
    }

    /// Re-score and reorder `hits` in place. Non-score fields are
    /// untouched.
    pub fn rerank(&mut self, query: &str, hits: &mut Vec<SearchHit>) -> Result<()> {
        match self {
            Reranker::CrossEncoder(inner) => inner.rerank(query, hits),
            Reranker::TextDerived(inner) => inner.rerank(query, hits),
            Reranker::Disabled => Ok(()),
        }
    }
}

/// Pairwise (query, text) scorer over a cross-encoder model
pub struct CrossEncoderReranker {
    cache_dir: PathBuf,
    engine: Option<SharedRerankModel>,
}

impl CrossEncoderReranker {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            engine: None,
        }
    }

    fn engine(&mut self) -> Result<SharedRerankModel> {
        if self.engine.is_none() {
            self.engine = Some(cache::rerank_model(
                RerankerModel::BGERerankerBase,
                CROSS_ENCODER_MODEL_NAME,
                &self.cache_dir,
            )?);
        }
        self.engine
            .clone()
            .ok_or_else(|| RagError::model("reranking model is not loaded"))
    }

    fn rerank(&mut self, query: &str, hits: &mut Vec<SearchHit>) -> Result<()> {
        let engine = self.engine()?;
        let documents: Vec<String> = hits.iter().map(|hit| hit.content.clone()).collect();
        let results = {
            let mut guard = engine.lock().map_err(|_| {
                RagError::model("reranking model worker poisoned; retry the operation")
            })?;
            guard
                .rerank(query.to_string(), documents, false, None)
                .map_err(|e| RagError::model(format!("reranking failed: {e}")))?
        };

        let mut logits = vec![0.0f32; hits.len()];
        for result in &results {
            if let Some(slot) = logits.get_mut(result.index) {
                *slot = result.score;
            }
        }

        let spread = logits.iter().cloned().fold(f32::MIN, f32::max)
            - logits.iter().cloned().fold(f32::MAX, f32::min);
        if spread < RERANK_LOGIT_COLLAPSE_THRESHOLD {
            // The model scored every candidate the same; lexical signals
            // separate them better than noise would.
            debug!("cross-encoder logits collapsed (spread {spread}); using lexical bonuses");
            apply_lexical_bonus(query, hits);
            return Ok(());
        }

        for (hit, logit) in hits.iter_mut().zip(logits) {
            hit.score = sigmoid(logit);
        }
        sort_by_score(hits);
        Ok(())
    }
}

/// Cosine rescoring between the query embedding and text derived from each
/// result (title plus content), for corpora whose chunks may be images
pub struct TextDerivedReranker {
    embedder: Box<dyn Embedder>,
}

impl TextDerivedReranker {
    pub fn new(embedder: Box<dyn Embedder>) -> Self {
        Self { embedder }
    }

    fn rerank(&mut self, query: &str, hits: &mut Vec<SearchHit>) -> Result<()> {
        let query_vector = self.embedder.embed(&EmbedInput::Text(query.to_string()))?;

        let inputs: Vec<EmbedInput> = hits
            .iter()
            .map(|hit| EmbedInput::Text(derived_text(hit)))
            .collect();
        let vectors = self.embedder.embed_batch(&inputs)?;

        for (hit, vector) in hits.iter_mut().zip(vectors) {
            if let Some(vector) = vector {
                hit.score = cosine_similarity(&query_vector, &vector).clamp(0.0, 1.0);
            }
        }
        sort_by_score(hits);
        Ok(())
    }
}

/// The text stand-in for a result: its title plus a content prefix. For
/// image chunks the title and stored path are all the text there is.
fn derived_text(hit: &SearchHit) -> String {
    let prefix: String = hit.content.chars().take(512).collect();
    format!("{}\n{}", hit.document.title, prefix)
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }
    dot / (mag_a * mag_b)
}

fn sort_by_score(hits: &mut [SearchHit]) {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Lexical bonus scoring, the fallback when model scores collapse.
///
/// Bonuses: exact query match +0.15, title match +0.10, definitional
/// pattern for "what is X" queries +0.30, per-word matches up to +0.10
/// normalized by query length, introductory-section keywords +0.08. Scores
/// cap at 1.0.
pub fn apply_lexical_bonus(query: &str, hits: &mut Vec<SearchHit>) {
    let query_lower = query.to_lowercase();
    let query_words: Vec<&str> = query_lower.split_whitespace().collect();
    let definition_subject = query_lower
        .strip_prefix("what is ")
        .or_else(|| query_lower.strip_prefix("what are "))
        .map(|s| s.trim_end_matches('?').trim().to_string());

    for hit in hits.iter_mut() {
        let content_lower = hit.content.to_lowercase();
        let title_lower = hit.document.title.to_lowercase();
        let mut score = hit.score;

        if content_lower.contains(&query_lower) {
            score += 0.15;
        }
        if !title_lower.is_empty()
            && (title_lower.contains(&query_lower) || query_lower.contains(&title_lower))
        {
            score += 0.10;
        }
        if let Some(subject) = &definition_subject {
            if !subject.is_empty()
                && (content_lower.contains(&format!("{subject} is"))
                    || content_lower.contains(&format!("{subject} are"))
                    || content_lower.contains(&format!("{subject} refers to")))
            {
                score += 0.30;
            }
        }
        if !query_words.is_empty() {
            let matched = query_words
                .iter()
                .filter(|word| content_lower.contains(*word))
                .count();
            score += 0.10 * matched as f32 / query_words.len() as f32;
        }
        if ["introduction", "overview", "getting started"]
            .iter()
            .any(|keyword| content_lower.contains(keyword))
        {
            score += 0.08;
        }

        hit.score = score.min(1.0);
    }
    sort_by_score(hits);
}
