//! Inference-assisted extraction via an OpenAI-compatible chat-completions
//! collaborator.
//!
//! The collaborator's reply is advisory only: every field is revalidated
//! against the same closed vocabularies and range checks as the
//! deterministic path before it enters a draft, and a failing field is
//! dropped, not trusted. Transport and parse failures surface as
//! [`ExtractError`] for the stack to absorb.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::config::InferenceConfig;
use crate::error::ExtractError;
use crate::geo::canonical_zip5;
use crate::query::extract::{Extractor, MILES_TO_KM};
use crate::query::spec::{DraftOrigin, ProcedureMatch, QuerySpecDraft, RankingIntent};

const SYSTEM_PROMPT: &str = "You are a data assistant that extracts structured parameters for \
hospital pricing queries. Return a strict JSON object with keys: intent (one of cheapest, \
best_rated, top_n, default), procedure (an MS-DRG code or a short procedure phrase, or null), \
zip_code (5-digit string or null), radius (number or null), unit (km or miles or null), \
limit (integer or null). Do not include any other keys.";

pub struct InferenceExtractor {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
}

impl InferenceExtractor {
    /// Returns None when the collaborator is disabled or has no API key —
    /// the stack then runs deterministic-only.
    pub fn from_config(cfg: &InferenceConfig) -> Option<Self> {
        let api_key = cfg.api_key()?;
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout())
            .build()
            .ok()?;
        Some(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            api_key,
        })
    }

    async fn request_draft(&self, question: &str) -> Result<Value, ExtractError> {
        let body = json!({
            "model": self.model,
            "temperature": 0.0,
            "response_format": {"type": "json_object"},
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": format!("Question: {question}")},
            ],
        });

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ExtractError::Status(status));
        }

        let reply: Value = resp.json().await?;
        let content = reply
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| ExtractError::Malformed("no message content".to_string()))?;
        serde_json::from_str(content)
            .map_err(|e| ExtractError::Malformed(format!("content is not a JSON object: {e}")))
    }
}

#[async_trait]
impl Extractor for InferenceExtractor {
    fn name(&self) -> &'static str {
        "inference"
    }

    async fn extract(&self, question: &str) -> Result<QuerySpecDraft, ExtractError> {
        let raw = self.request_draft(question).await?;
        Ok(revalidate(&raw))
    }
}

/// Map the collaborator's JSON onto a draft, field by field, dropping
/// anything that fails the same checks the deterministic grammar enforces.
/// Tolerates numbers arriving as strings; never tolerates out-of-vocabulary
/// or out-of-range values.
pub fn revalidate(raw: &Value) -> QuerySpecDraft {
    let mut draft = QuerySpecDraft::empty(DraftOrigin::Inference);

    if let Some(intent) = raw.get("intent").and_then(Value::as_str) {
        draft.intent = RankingIntent::from_keyword(intent);
    }

    if let Some(procedure) = raw.get("procedure").and_then(Value::as_str) {
        match ProcedureMatch::parse(procedure) {
            Some(ProcedureMatch::Code(code)) => draft.procedure_code = Some(code),
            Some(ProcedureMatch::Text(text)) => draft.procedure_text = Some(text),
            None => {}
        }
    }

    if let Some(zip) = raw.get("zip_code") {
        let zip = match zip {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => String::new(),
        };
        draft.postal_code = canonical_zip5(&zip);
    }

    if let Some(radius) = number_field(raw, "radius") {
        if radius.is_finite() && radius > 0.0 {
            let miles = raw
                .get("unit")
                .and_then(Value::as_str)
                .map(|u| u.trim().to_ascii_lowercase().starts_with('m'))
                .unwrap_or(false);
            draft.radius_km = Some(if miles { radius * MILES_TO_KM } else { radius });
        }
    }

    if let Some(limit) = number_field(raw, "limit") {
        if limit.fract() == 0.0 && limit >= 1.0 && limit <= 1000.0 {
            draft.limit = Some(limit as usize);
        }
    }

    draft
}

fn number_field(raw: &Value, key: &str) -> Option<f64> {
    match raw.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}
