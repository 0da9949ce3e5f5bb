//! Consensus generation across 2 or 3 backends.
//!
//! Flow:
//! 1. Ground the prompt with web search (degrades, never fails)
//! 2. Fan the contextual prompt out to every primary, each with its own
//!    fallback chain, and wait for all chains to settle
//! 3. Reduce the answers by pairwise word overlap
//!
//! Any exhausted chain fails the whole generation; partial answers are
//! never published.

use std::sync::Arc;

use aegis_common::{
    similarity, ConfigError, ConsensusConfig, GenerationError, ModelResponse, SearchProvider,
};
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::fallback::FallbackQueryExecutor;
use crate::search::{contextual_prompt, grounded_search};

/// Result of comparing three answers pairwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreeWayOutcome {
    /// Every pair agrees.
    HighConsensus,
    /// The first agreeing pair in AB, AC, BC order; the third answer is the alternative.
    Pair {
        first: usize,
        second: usize,
        alternative: usize,
    },
    /// No pair agrees.
    DiverseViews,
}

/// Pick the three-way branch from the pairwise similarities.
pub fn select_three_way(ab: f64, ac: f64, bc: f64, threshold: f64) -> ThreeWayOutcome {
    if ab >= threshold && ac >= threshold && bc >= threshold {
        return ThreeWayOutcome::HighConsensus;
    }

    let pairs = [(ab, 0, 1, 2), (ac, 0, 2, 1), (bc, 1, 2, 0)];
    pairs
        .iter()
        .find(|(sim, ..)| *sim >= threshold)
        .map(|&(_, first, second, alternative)| ThreeWayOutcome::Pair {
            first,
            second,
            alternative,
        })
        .unwrap_or(ThreeWayOutcome::DiverseViews)
}

/// Labelled perspective sections, numbered from 1.
fn perspectives(responses: &[&ModelResponse]) -> String {
    responses
        .iter()
        .enumerate()
        .map(|(i, r)| format!("---\n**Perspective {} ({}):**\n{}", i + 1, r.backend_name, r.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn joined_names(responses: &[&ModelResponse], separator: &str) -> String {
    responses
        .iter()
        .map(|r| r.backend_name.as_str())
        .collect::<Vec<_>>()
        .join(separator)
}

fn reduce_two(a: &ModelResponse, b: &ModelResponse, threshold: f64) -> ModelResponse {
    let sim = similarity(&a.content, &b.content);
    debug!("similarity({}, {}) = {:.3}", a.backend_name, b.backend_name, sim);

    if sim >= threshold {
        return ModelResponse::new(a.content.clone(), a.backend_name.clone());
    }
    ModelResponse::new(perspectives(&[a, b]), joined_names(&[a, b], " + "))
}

fn reduce_three(
    a: &ModelResponse,
    b: &ModelResponse,
    c: &ModelResponse,
    threshold: f64,
) -> ModelResponse {
    let ab = similarity(&a.content, &b.content);
    let ac = similarity(&a.content, &c.content);
    let bc = similarity(&b.content, &c.content);
    debug!("similarity AB={:.3} AC={:.3} BC={:.3}", ab, ac, bc);

    let all = [a, b, c];
    match select_three_way(ab, ac, bc, threshold) {
        ThreeWayOutcome::HighConsensus => ModelResponse::new(
            a.content.clone(),
            format!("{} (High Consensus)", joined_names(&all, "+")),
        ),
        ThreeWayOutcome::Pair {
            first,
            second,
            alternative,
        } => {
            let (first, second, alternative) = (all[first], all[second], all[alternative]);
            let content = format!(
                "**Consensus ({} + {}):**\n{}\n\n---\n**Alternative Perspective ({}):**\n{}",
                first.backend_name,
                second.backend_name,
                first.content,
                alternative.backend_name,
                alternative.content
            );
            let label = format!(
                "{}+{} (Consensus) + {} (Alternative)",
                first.backend_name, second.backend_name, alternative.backend_name
            );
            ModelResponse::new(content, label)
        }
        ThreeWayOutcome::DiverseViews => ModelResponse::new(
            perspectives(&all),
            format!("{} (Diverse Views)", joined_names(&all, " + ")),
        ),
    }
}

/// Reduce settled answers into the published one. Sources are attached by the caller.
pub fn reduce(responses: &[ModelResponse], threshold: f64) -> ModelResponse {
    match responses {
        [single] => ModelResponse::new(single.content.clone(), single.backend_name.clone()),
        [a, b] => reduce_two(a, b, threshold),
        [a, b, c] => reduce_three(a, b, c, threshold),
        others => {
            let all: Vec<&ModelResponse> = others.iter().collect();
            ModelResponse::new(perspectives(&all), joined_names(&all, " + "))
        }
    }
}

/// Fans prompts out to the configured backends and reduces the answers.
pub struct ConsensusEngine {
    executor: Arc<FallbackQueryExecutor>,
    search: Arc<dyn SearchProvider>,
    config: ConsensusConfig,
    max_results: usize,
}

impl ConsensusEngine {
    pub fn new(
        executor: Arc<FallbackQueryExecutor>,
        search: Arc<dyn SearchProvider>,
        config: ConsensusConfig,
        max_results: usize,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            executor,
            search,
            config,
            max_results,
        })
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn executor(&self) -> &Arc<FallbackQueryExecutor> {
        &self.executor
    }

    pub fn search_provider(&self) -> &Arc<dyn SearchProvider> {
        &self.search
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }

    /// Search, fan out, reduce. Search results are attached on every branch.
    pub async fn generate(&self, prompt: &str) -> Result<ModelResponse, GenerationError> {
        info!("Generating consensus answer from {} backends", self.config.primaries.len());
        let sources = grounded_search(self.search.as_ref(), prompt, self.max_results).await;
        let contextual = contextual_prompt(prompt, &sources);

        let response = self.answer(&contextual).await?;
        Ok(response.with_sources(sources))
    }

    /// Fan an already contextualised prompt out and reduce the answers.
    pub async fn answer(&self, contextual: &str) -> Result<ModelResponse, GenerationError> {
        let chains = self.config.primaries.iter().map(|primary| {
            self.executor
                .query_with_fallback(primary, &self.config.fallback, contextual)
        });
        let settled = join_all(chains).await;

        let mut responses = Vec::with_capacity(settled.len());
        let mut failures = Vec::new();
        for outcome in settled {
            match outcome {
                Ok(response) => responses.push(response),
                Err(failure) => failures.push(failure),
            }
        }

        if !failures.is_empty() {
            let err = GenerationError { failures };
            warn!("{}", err);
            return Err(err);
        }

        let published = reduce(&responses, self.config.similarity_threshold);
        info!("Published answer from {}", published.backend_name);
        Ok(published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(name: &str, content: &str) -> ModelResponse {
        ModelResponse::new(content, name)
    }

    #[test]
    fn test_three_way_ab_pair_selected() {
        assert_eq!(
            select_three_way(0.9, 0.1, 0.1, 0.5),
            ThreeWayOutcome::Pair {
                first: 0,
                second: 1,
                alternative: 2
            }
        );
    }

    #[test]
    fn test_three_way_first_qualifying_pair_wins() {
        // AC and BC both qualify, AC comes first
        assert_eq!(
            select_three_way(0.1, 0.6, 0.8, 0.5),
            ThreeWayOutcome::Pair {
                first: 0,
                second: 2,
                alternative: 1
            }
        );
        assert_eq!(
            select_three_way(0.1, 0.2, 0.8, 0.5),
            ThreeWayOutcome::Pair {
                first: 1,
                second: 2,
                alternative: 0
            }
        );
    }

    #[test]
    fn test_three_way_extremes() {
        assert_eq!(select_three_way(0.5, 0.5, 0.5, 0.5), ThreeWayOutcome::HighConsensus);
        assert_eq!(select_three_way(0.4, 0.4, 0.4, 0.5), ThreeWayOutcome::DiverseViews);
    }

    #[test]
    fn test_two_way_agreement_publishes_primary_verbatim() {
        let out = reduce(
            &[response("a", "The answer is 4"), response("b", "the ANSWER is 4")],
            0.5,
        );
        assert_eq!(out.content, "The answer is 4");
        assert_eq!(out.backend_name, "a");
    }

    #[test]
    fn test_two_way_disagreement_shows_both() {
        let out = reduce(
            &[response("a", "alpha beta"), response("b", "gamma delta")],
            0.5,
        );
        assert_eq!(
            out.content,
            "---\n**Perspective 1 (a):**\nalpha beta\n\n---\n**Perspective 2 (b):**\ngamma delta"
        );
        assert_eq!(out.backend_name, "a + b");
    }

    #[test]
    fn test_three_way_pair_document() {
        let out = reduce(
            &[
                response("a", "x y z"),
                response("b", "x y z"),
                response("c", "p q r"),
            ],
            0.5,
        );
        assert!(out.content.starts_with("**Consensus (a + b):**\nx y z"));
        assert!(out.content.contains("**Alternative Perspective (c):**\np q r"));
        assert_eq!(out.backend_name, "a+b (Consensus) + c (Alternative)");
    }

    #[test]
    fn test_three_way_labels() {
        let same = reduce(
            &[response("a", "x"), response("b", "x"), response("c", "x")],
            0.5,
        );
        assert_eq!(same.backend_name, "a+b+c (High Consensus)");
        assert_eq!(same.content, "x");

        let diverse = reduce(
            &[response("a", "x"), response("b", "y"), response("c", "z")],
            0.5,
        );
        assert_eq!(diverse.backend_name, "a + b + c (Diverse Views)");
        assert!(diverse.content.contains("**Perspective 3 (c):**\nz"));
    }
}
