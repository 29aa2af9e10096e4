//! Intent guard: scope classification and draft → QuerySpec promotion.
//!
//! Promotion is the single revalidation pass every draft goes through,
//! whether the deterministic grammar or the inference collaborator produced
//! it. A change to either extractor cannot bypass these checks.

use crate::config::QueryLimits;
use crate::error::QueryError;
use crate::geo::{GeocodeError, Geocoder};
use crate::query::spec::{QuerySpec, QuerySpecDraft, RankingIntent};

/// Keyword prefilter for free-text questions. Cheap fast-path rejection of
/// obviously off-domain questions before any extraction work; the
/// authoritative rule remains signal-absence after extraction.
const SCOPE_KEYWORDS: &[&str] = &[
    "drg",
    "ms-drg",
    "hospital",
    "provider",
    "procedure",
    "surgery",
    "replacement",
    "rating",
    "rated",
    "cost",
    "price",
    "cheapest",
    "charges",
    "payment",
    "near",
    "zip",
];

pub fn question_in_scope(question: &str) -> bool {
    let q = question.to_ascii_lowercase();
    SCOPE_KEYWORDS.iter().any(|k| q.contains(k))
}

/// Outcome of classification: a fully validated spec, or a distinct
/// out-of-scope result (a stable shape, never an empty success list).
#[derive(Debug, Clone)]
pub enum Resolution {
    InScope(QuerySpec),
    OutOfScope,
}

/// Promote a draft to a QuerySpec, applying defaults, clamps, and geocoding.
///
/// Rules:
/// - no procedure and no postal code → out of scope;
/// - a procedure without a postal code cannot be radius-bound → invalid;
/// - malformed postal code → invalid; well-formed but unknown → unknown
///   location (the spatial filter is never silently dropped);
/// - non-positive radius → invalid; oversized radius clamps to the max;
/// - limit clamps into `[1, max_limit]`; intent defaults to cheapest.
pub fn promote(
    draft: &QuerySpecDraft,
    geocoder: &Geocoder,
    limits: &QueryLimits,
) -> Result<Resolution, QueryError> {
    let procedure = draft.procedure();

    if procedure.is_none() && draft.postal_code.is_none() {
        return Ok(Resolution::OutOfScope);
    }

    let Some(procedure) = procedure else {
        return Err(QueryError::InvalidInput(
            "could not determine a procedure; include an MS-DRG code or a procedure phrase"
                .to_string(),
        ));
    };

    let Some(postal_code) = draft.postal_code.as_deref() else {
        return Err(QueryError::InvalidInput(
            "a 5-digit postal code is required for a radius search".to_string(),
        ));
    };

    let origin = geocoder.resolve(postal_code).map_err(|e| match e {
        GeocodeError::InvalidZip(zip) => {
            QueryError::InvalidInput(format!("malformed postal code: {zip:?}"))
        }
        GeocodeError::NotFound(zip) => QueryError::UnknownLocation(zip),
    })?;

    let radius_km = match draft.radius_km {
        None => limits.default_radius_km,
        Some(r) if !r.is_finite() || r <= 0.0 => {
            return Err(QueryError::InvalidInput(format!(
                "radius must be a positive number of kilometers, got {r}"
            )));
        }
        Some(r) => r.min(limits.max_radius_km),
    };

    let limit = draft
        .limit
        .unwrap_or(limits.default_limit)
        .clamp(1, limits.max_limit);

    let intent = draft.intent.unwrap_or(RankingIntent::Cheapest);

    Ok(Resolution::InScope(QuerySpec {
        procedure,
        origin,
        radius_km,
        intent,
        limit,
    }))
}
