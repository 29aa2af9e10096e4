use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, anyhow};
use axum::Json;
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use duckdb::Connection;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};

use crate::cli::ServeArgs;
use crate::config::{AppConfig, QueryLimits};
use crate::error::QueryError;
use crate::geo::Geocoder;
use crate::index::offerings::OfferingEngine;
use crate::query::extract::ExtractorStack;
use crate::query::guard::{self, Resolution};
use crate::query::plan::{Candidate, Planner};
use crate::query::rank;
use crate::query::spec::{DraftOrigin, ProcedureMatch, QuerySpecDraft, RankingIntent};
use crate::storage::{OfferingStore, StoragePaths, file_present_nonempty};

#[derive(Clone)]
struct AppState {
    geocoder: Arc<Geocoder>,
    extractors: Arc<ExtractorStack>,
    planner: Arc<Planner>,
    limits: QueryLimits,
}

pub async fn run(opts: ServeArgs) -> anyhow::Result<()> {
    let config_path = opts.config.as_deref().map(std::path::Path::new);
    let cfg = AppConfig::load(config_path).context("load config")?;

    let paths = StoragePaths::new(&opts.data_dir);
    if !file_present_nonempty(&paths.duckdb_path) {
        return Err(anyhow!(
            "DuckDB not found at {}. Run: cost-navigator build",
            paths.duckdb_path.display()
        ));
    }
    if !paths.offerings_index_dir.exists() {
        return Err(anyhow!(
            "Offering index not found at {}. Run: cost-navigator build",
            paths.offerings_index_dir.display()
        ));
    }
    if !file_present_nonempty(&paths.geonames_us_txt()) {
        return Err(anyhow!(
            "ZIP centroid file not found at {}. Run: cost-navigator build",
            paths.geonames_us_txt().display()
        ));
    }

    let geocoder = Geocoder::load(&paths.geonames_us_txt()).context("load geocoder")?;
    tracing::info!("Geocoder ready ({} ZIP centroids)", geocoder.len());

    let conn = Connection::open(&paths.duckdb_path)
        .with_context(|| format!("open duckdb at {}", paths.duckdb_path.display()))?;
    let engine =
        OfferingEngine::open(&paths.offerings_index_dir).context("open offering index")?;

    let store = OfferingStore::new(Arc::new(Mutex::new(conn)));
    let planner = Planner::new(Arc::new(engine), store, cfg.query.coarse_limit);
    let extractors = ExtractorStack::new(&cfg.inference);

    let state = AppState {
        geocoder: Arc::new(geocoder),
        extractors: Arc::new(extractors),
        planner: Arc::new(planner),
        limits: cfg.query,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/", get(api_root))
        .route("/providers", get(api_providers))
        .route("/ask", post(api_ask))
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", opts.host, opts.port)
        .parse()
        .context("parse host:port")?;

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn api_root() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// Error envelope: a stable kind string plus a human-readable message.
struct ApiError(QueryError);

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self.0 {
            QueryError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
            QueryError::UnknownLocation(_) => (StatusCode::NOT_FOUND, "unknown_location"),
            QueryError::Storage(_) | QueryError::Index(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable")
            }
        };
        if status == StatusCode::SERVICE_UNAVAILABLE {
            tracing::error!("query failed: {}", self.0);
        }
        (status, Json(json!({"error": kind, "message": self.0.to_string()}))).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ProviderResult {
    provider_id: String,
    name: String,
    city: Option<String>,
    state: Option<String>,
    postal_code: Option<String>,
    procedure_text: String,
    average_cost: Option<f64>,
    average_total_payments: Option<f64>,
    average_medicare_payments: Option<f64>,
    rating: Option<i64>,
    distance_km: f64,
}

impl ProviderResult {
    fn from_candidate(c: &Candidate) -> Self {
        Self {
            provider_id: c.row.provider_id.clone(),
            name: c.row.name.clone().unwrap_or_default(),
            city: c.row.city.clone(),
            state: c.row.state.clone(),
            postal_code: c.row.zip_code.clone(),
            procedure_text: c.row.drg_definition.clone(),
            average_cost: c.row.average_covered_charges,
            average_total_payments: c.row.average_total_payments,
            average_medicare_payments: c.row.average_medicare_payments,
            rating: c.row.rating,
            distance_km: round_km(c.distance_km),
        }
    }
}

/// Display rounding only; the radius contract is enforced on the raw value.
fn round_km(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[derive(Debug, Deserialize)]
struct ProvidersParams {
    procedure: Option<String>,
    postal_code: Option<String>,
    radius_km: Option<f64>,
    limit: Option<usize>,
    sort: Option<String>,
}

async fn api_providers(
    State(st): State<AppState>,
    Query(p): Query<ProvidersParams>,
) -> Result<Json<Vec<ProviderResult>>, ApiError> {
    let procedure = p
        .procedure
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| QueryError::InvalidInput("procedure is required".to_string()))?;
    let postal_code = p
        .postal_code
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| QueryError::InvalidInput("postal_code is required".to_string()))?;

    let intent = match p.sort.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        None => RankingIntent::Cheapest,
        Some(s) => RankingIntent::from_keyword(s).ok_or_else(|| {
            QueryError::InvalidInput(format!(
                "unknown sort {s:?}; expected cheapest, best_rated, or nearest"
            ))
        })?,
    };

    // The structured path goes through the same draft promotion as the
    // natural-language path, so both get identical validation.
    let mut draft = QuerySpecDraft::empty(DraftOrigin::Deterministic);
    match ProcedureMatch::parse(procedure) {
        Some(ProcedureMatch::Code(code)) => draft.procedure_code = Some(code),
        Some(ProcedureMatch::Text(text)) => draft.procedure_text = Some(text),
        None => return Err(QueryError::InvalidInput("procedure is required".to_string()).into()),
    }
    draft.postal_code = Some(postal_code.to_string());
    draft.radius_km = p.radius_km;
    draft.limit = p.limit;
    draft.intent = Some(intent);

    let spec = match guard::promote(&draft, &st.geocoder, &st.limits)? {
        Resolution::InScope(spec) => spec,
        Resolution::OutOfScope => {
            return Err(QueryError::InvalidInput(
                "request is not a procedure cost query".to_string(),
            )
            .into());
        }
    };

    let candidates = st.planner.plan(&spec).await?;
    let ranked = rank::rank(candidates, spec.intent, spec.limit);
    Ok(Json(ranked.iter().map(ProviderResult::from_candidate).collect()))
}

#[derive(Debug, Deserialize)]
struct AskRequest {
    question: String,
}

#[derive(Debug, Serialize)]
struct AskResponse {
    in_scope: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    results: Option<Vec<ProviderResult>>,
}

impl AskResponse {
    fn out_of_scope() -> Self {
        Self {
            in_scope: false,
            message: Some(
                "I can only help with hospital pricing and quality information. Please ask \
                 about medical procedures, costs, or hospital ratings."
                    .to_string(),
            ),
            results: None,
        }
    }
}

async fn api_ask(
    State(st): State<AppState>,
    Json(body): Json<AskRequest>,
) -> Result<Json<AskResponse>, ApiError> {
    let question = body.question.trim();
    if question.is_empty() {
        return Err(QueryError::InvalidInput("question is empty".to_string()).into());
    }

    if !guard::question_in_scope(question) {
        return Ok(Json(AskResponse::out_of_scope()));
    }

    let draft = st.extractors.extract(question).await;
    tracing::debug!(source = ?draft.source, "draft extracted");

    let spec = match guard::promote(&draft, &st.geocoder, &st.limits)? {
        Resolution::InScope(spec) => spec,
        Resolution::OutOfScope => return Ok(Json(AskResponse::out_of_scope())),
    };

    let candidates = st.planner.plan(&spec).await?;
    let ranked = rank::rank(candidates, spec.intent, spec.limit);
    Ok(Json(AskResponse {
        in_scope: true,
        message: None,
        results: Some(ranked.iter().map(ProviderResult::from_candidate).collect()),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_rounds_to_one_decimal() {
        assert_eq!(round_km(2.34), 2.3);
        assert_eq!(round_km(2.35), 2.4);
        assert_eq!(round_km(0.0), 0.0);
    }
}
