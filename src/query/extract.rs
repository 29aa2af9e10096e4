//! Parameter extraction strategies.
//!
//! Two interchangeable implementations behind the [`Extractor`] trait: a
//! deterministic regex grammar that always terminates and never calls out,
//! and the inference-assisted extractor in [`crate::query::infer`]. The
//! [`ExtractorStack`] applies the selection policy: inference first when
//! configured, deterministic on any failure, no user-visible error either
//! way.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use crate::config::InferenceConfig;
use crate::error::ExtractError;
use crate::query::infer::InferenceExtractor;
use crate::query::spec::{DraftOrigin, QuerySpecDraft, RankingIntent};

pub const MILES_TO_KM: f64 = 1.609344;

#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &'static str;
    async fn extract(&self, question: &str) -> Result<QuerySpecDraft, ExtractError>;
}

static RE_DRG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bdrg\s*#?\s*(\d{3})\b").unwrap());
static RE_ZIP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(\d{5})(?:-\d{4})?\b").unwrap());
static RE_RADIUS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d+(?:\.\d+)?)\s*(kilometers?|kms?|km|miles?|mi)\b").unwrap()
});
static RE_TOP_N: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:top|(?:the\s+)?first)\s+(\d{1,2})\b").unwrap());
static RE_N_SUPERLATIVE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d{1,2})\s+(?:best|cheapest)\b").unwrap());
static RE_PROC_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bfor\s+(?:an?\s+|the\s+)?(.+?)\s+(?:near|within|around|close to|in)\b")
        .unwrap()
});

/// Fixed-grammar extraction. The grammar covers the phrasings the service
/// documents: MS-DRG codes (`DRG 470`), a standalone 5-digit ZIP, a radius
/// with unit (`within 25 miles`, `40 km`), ranking superlatives, `top N`,
/// and a `for <procedure> near ...` text fragment.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeterministicExtractor;

impl DeterministicExtractor {
    pub fn parse(question: &str) -> QuerySpecDraft {
        let mut draft = QuerySpecDraft::empty(DraftOrigin::Deterministic);

        if let Some(c) = RE_DRG.captures(question) {
            draft.procedure_code = Some(c[1].to_string());
        }

        // The DRG capture is three digits, so a 5-digit token is never the
        // code; the first one is taken as the ZIP, as in `near 10001`.
        if let Some(c) = RE_ZIP.captures(question) {
            draft.postal_code = Some(c[1].to_string());
        }

        if let Some(c) = RE_RADIUS.captures(question) {
            if let Ok(value) = c[1].parse::<f64>() {
                let unit = c[2].to_ascii_lowercase();
                let km = if unit.starts_with('k') { value } else { value * MILES_TO_KM };
                if km.is_finite() && km > 0.0 {
                    draft.radius_km = Some(km);
                }
            }
        }

        let lowered = question.to_ascii_lowercase();
        let wants_cheapest = ["cheapest", "cheap", "lowest", "low cost", "least expensive"]
            .iter()
            .any(|w| lowered.contains(w));
        let wants_best_rated = ["best rated", "best-rated", "top rated", "highest rating", "highest rated", "best"]
            .iter()
            .any(|w| lowered.contains(w));

        if let Some(c) = RE_TOP_N.captures(question).or_else(|| RE_N_SUPERLATIVE.captures(question)) {
            if let Ok(n) = c[1].parse::<usize>() {
                if n > 0 {
                    draft.limit = Some(n);
                }
            }
        }

        // Cheapest takes precedence when both appear ("best cheap option").
        draft.intent = if wants_cheapest {
            Some(RankingIntent::Cheapest)
        } else if wants_best_rated {
            Some(RankingIntent::BestRated)
        } else if draft.limit.is_some() {
            Some(RankingIntent::TopN)
        } else {
            None
        };

        if draft.procedure_code.is_none() {
            if let Some(c) = RE_PROC_TEXT.captures(question) {
                let fragment = c[1].trim();
                if !fragment.is_empty() {
                    draft.procedure_text =
                        Some(fragment.chars().take(crate::query::spec::MAX_PROCEDURE_TEXT).collect());
                }
            }
        }

        draft
    }
}

#[async_trait]
impl Extractor for DeterministicExtractor {
    fn name(&self) -> &'static str {
        "deterministic"
    }

    async fn extract(&self, question: &str) -> Result<QuerySpecDraft, ExtractError> {
        Ok(Self::parse(question))
    }
}

/// Strategy selection: inference first when configured, deterministic
/// fallback on any failure or timeout. The fallback is a reliability
/// requirement — a slow or broken collaborator must never fail the request.
pub struct ExtractorStack {
    inference: Option<InferenceExtractor>,
    timeout: Duration,
}

impl ExtractorStack {
    pub fn new(cfg: &InferenceConfig) -> Self {
        let inference = InferenceExtractor::from_config(cfg);
        match &inference {
            Some(_) => tracing::info!("inference extractor enabled (model={})", cfg.model),
            None => tracing::info!("inference extractor not configured; deterministic grammar only"),
        }
        Self {
            inference,
            timeout: cfg.timeout(),
        }
    }

    /// Stack with no collaborator, for tests and offline deployments.
    pub fn deterministic_only() -> Self {
        Self {
            inference: None,
            timeout: Duration::from_secs(1),
        }
    }

    pub async fn extract(&self, question: &str) -> QuerySpecDraft {
        if let Some(inference) = &self.inference {
            match tokio::time::timeout(self.timeout, inference.extract(question)).await {
                Ok(Ok(draft)) => {
                    tracing::debug!("draft extracted by inference collaborator");
                    return draft;
                }
                Ok(Err(err)) => {
                    tracing::warn!("inference extraction failed; falling back: {err}");
                }
                Err(_) => {
                    tracing::warn!(
                        "inference extraction timed out after {:?}; falling back",
                        self.timeout
                    );
                }
            }
        }
        DeterministicExtractor::parse(question)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_drg_zip_radius_in_miles() {
        let d = DeterministicExtractor::parse("Who is cheapest for DRG 470 within 25 miles of 10001?");
        assert_eq!(d.procedure_code.as_deref(), Some("470"));
        assert_eq!(d.postal_code.as_deref(), Some("10001"));
        let r = d.radius_km.unwrap();
        assert!((r - 25.0 * MILES_TO_KM).abs() < 1e-9, "radius was {r}");
        assert_eq!(d.intent, Some(RankingIntent::Cheapest));
        assert_eq!(d.source, DraftOrigin::Deterministic);
    }

    #[test]
    fn extracts_radius_in_km() {
        let d = DeterministicExtractor::parse("hospitals for DRG 291 within 40 km of 94110");
        assert_eq!(d.radius_km, Some(40.0));
        assert_eq!(d.postal_code.as_deref(), Some("94110"));
        assert_eq!(d.intent, None);
    }

    #[test]
    fn extracts_best_rated_and_top_n() {
        let d = DeterministicExtractor::parse("top 5 best rated hospitals for DRG 023 near 60601");
        assert_eq!(d.intent, Some(RankingIntent::BestRated));
        assert_eq!(d.limit, Some(5));
        assert_eq!(d.procedure_code.as_deref(), Some("023"));
    }

    #[test]
    fn top_n_alone_is_top_n_intent() {
        let d = DeterministicExtractor::parse("top 3 hospitals for DRG 470 near 10001");
        assert_eq!(d.intent, Some(RankingIntent::TopN));
        assert_eq!(d.limit, Some(3));
    }

    #[test]
    fn extracts_procedure_text_fragment() {
        let d = DeterministicExtractor::parse("cheapest hospital for a hip replacement near 10001");
        assert_eq!(d.procedure_code, None);
        assert_eq!(d.procedure_text.as_deref(), Some("hip replacement"));
        assert_eq!(d.intent, Some(RankingIntent::Cheapest));
    }

    #[test]
    fn drg_code_is_not_mistaken_for_zip() {
        let d = DeterministicExtractor::parse("DRG 470 near 10001");
        assert_eq!(d.procedure_code.as_deref(), Some("470"));
        assert_eq!(d.postal_code.as_deref(), Some("10001"));
    }

    #[test]
    fn off_domain_question_yields_empty_draft() {
        let d = DeterministicExtractor::parse("what's the weather today?");
        assert!(!d.has_signal());
        assert_eq!(d.intent, None);
    }

    #[test]
    fn zero_radius_is_not_extracted() {
        let d = DeterministicExtractor::parse("DRG 470 within 0 km of 10001");
        assert_eq!(d.radius_km, None);
    }

    #[tokio::test]
    async fn stack_without_collaborator_uses_grammar() {
        let stack = ExtractorStack::deterministic_only();
        let d = stack.extract("cheapest for DRG 470 within 25 miles of 10001").await;
        assert_eq!(d.procedure_code.as_deref(), Some("470"));
        assert_eq!(d.source, DraftOrigin::Deterministic);
    }
}
