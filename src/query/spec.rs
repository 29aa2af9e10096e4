use serde::{Deserialize, Serialize};

use crate::geo::Point;

/// Longest procedure text fragment accepted from any extraction path.
pub const MAX_PROCEDURE_TEXT: usize = 80;

/// What to match procedure offerings against: an exact MS-DRG code, or a
/// fuzzy free-text fragment. A promoted spec always carries one of the two.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcedureMatch {
    Code(String),
    Text(String),
}

impl ProcedureMatch {
    /// Classify a user-supplied procedure value: a standalone 3-digit token
    /// is an MS-DRG code, anything else is a fuzzy text fragment. Returns
    /// None for empty input.
    pub fn parse(raw: &str) -> Option<Self> {
        let s = raw.trim();
        if s.is_empty() {
            return None;
        }
        if s.len() == 3 && s.chars().all(|c| c.is_ascii_digit()) {
            return Some(Self::Code(s.to_string()));
        }
        let mut text: String = s.chars().take(MAX_PROCEDURE_TEXT).collect();
        if let Some(trimmed) = text.strip_suffix(|c: char| c.is_ascii_punctuation()) {
            text = trimmed.to_string();
        }
        let text = text.trim().to_string();
        if text.is_empty() { None } else { Some(Self::Text(text)) }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RankingIntent {
    Cheapest,
    BestRated,
    TopN,
    Default,
}

impl RankingIntent {
    /// Closed vocabulary used when revalidating inference output and when
    /// mapping the structured `sort` parameter.
    pub fn from_keyword(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cheapest" => Some(Self::Cheapest),
            "best_rated" | "best-rated" => Some(Self::BestRated),
            "top_n" | "top-n" => Some(Self::TopN),
            "nearest" | "default" => Some(Self::Default),
            _ => None,
        }
    }
}

/// Which strategy produced a draft. Diagnostics only; ranking and validation
/// never look at this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftOrigin {
    Deterministic,
    Inference,
}

/// Pre-validation extraction result. Every field is optional; promotion to a
/// [`QuerySpec`] applies the same defaults, clamps, and geocoding regardless
/// of which strategy filled the fields in.
#[derive(Debug, Clone)]
pub struct QuerySpecDraft {
    pub procedure_code: Option<String>,
    pub procedure_text: Option<String>,
    pub postal_code: Option<String>,
    pub radius_km: Option<f64>,
    pub intent: Option<RankingIntent>,
    pub limit: Option<usize>,
    pub source: DraftOrigin,
}

impl QuerySpecDraft {
    pub fn empty(source: DraftOrigin) -> Self {
        Self {
            procedure_code: None,
            procedure_text: None,
            postal_code: None,
            radius_km: None,
            intent: None,
            limit: None,
            source,
        }
    }

    pub fn procedure(&self) -> Option<ProcedureMatch> {
        if let Some(code) = &self.procedure_code {
            return Some(ProcedureMatch::Code(code.clone()));
        }
        self.procedure_text
            .as_deref()
            .and_then(ProcedureMatch::parse)
    }

    /// Whether the request carries any in-domain signal at all.
    pub fn has_signal(&self) -> bool {
        self.procedure_code.is_some()
            || self.procedure_text.is_some()
            || self.postal_code.is_some()
    }
}

/// Validated, bounded structured query. Constructed once per request by the
/// intent guard, immutable afterwards.
#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub procedure: ProcedureMatch,
    pub origin: Point,
    pub radius_km: f64,
    pub intent: RankingIntent,
    pub limit: usize,
}
