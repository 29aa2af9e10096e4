//! End-to-end tests over a real (temp-dir) DuckDB table and Tantivy index:
//! the full resolve pipeline from question or structured draft through the
//! guard, the two-phase planner, and the ranker.

use std::path::Path;
use std::sync::Arc;

use duckdb::{Connection, params};
use tokio::sync::Mutex;

use cost_navigator::config::QueryLimits;
use cost_navigator::error::QueryError;
use cost_navigator::geo::{Geocoder, ZipCentroid};
use cost_navigator::index::offerings::{OfferingEngine, build_offering_index};
use cost_navigator::query::extract::ExtractorStack;
use cost_navigator::query::guard::{self, Resolution};
use cost_navigator::query::plan::Planner;
use cost_navigator::query::rank;
use cost_navigator::query::spec::{
    DraftOrigin, ProcedureMatch, QuerySpec, QuerySpecDraft, RankingIntent,
};
use cost_navigator::storage::OfferingStore;

// ZIP 10001 centroid used by the fixtures.
const ORIGIN_LAT: f64 = 40.7506;
const ORIGIN_LON: f64 = -73.9972;

// Kilometers per degree of latitude at Earth radius 6371 km; used to place
// fixture providers due north at exact haversine distances.
const KM_PER_DEG: f64 = 111.194_926_644_558_74;

struct Fixture {
    planner: Planner,
    geocoder: Geocoder,
    limits: QueryLimits,
    _dir: tempfile::TempDir,
}

fn lat_at_km(distance_km: f64) -> f64 {
    ORIGIN_LAT + distance_km / KM_PER_DEG
}

fn insert_offering(
    conn: &Connection,
    offering_id: i64,
    provider_id: &str,
    name: &str,
    drg_code: &str,
    drg_definition: &str,
    charge: Option<f64>,
    rating: Option<i64>,
    distance_km: f64,
) {
    conn.execute(
        r#"
        INSERT INTO offering_search
          (offering_id, provider_id, name, city, state, zip_code, drg_code, drg_definition,
           total_discharges, average_covered_charges, average_total_payments,
           average_medicare_payments, rating, lat, lon)
        VALUES (?, ?, ?, 'NEW YORK', 'NY', '10001', ?, ?, 42, ?, NULL, NULL, ?, ?, ?)
    "#,
        params![
            offering_id,
            provider_id,
            name,
            drg_code,
            drg_definition,
            charge,
            rating,
            lat_at_km(distance_km),
            ORIGIN_LON,
        ],
    )
    .unwrap();
}

fn create_offering_table(conn: &Connection) {
    conn.execute(
        r#"
        CREATE TABLE offering_search (
          offering_id BIGINT,
          provider_id TEXT,
          name TEXT,
          city TEXT,
          state TEXT,
          zip_code TEXT,
          drg_code TEXT,
          drg_definition TEXT,
          total_discharges BIGINT,
          average_covered_charges DOUBLE,
          average_total_payments DOUBLE,
          average_medicare_payments DOUBLE,
          rating BIGINT,
          lat DOUBLE,
          lon DOUBLE
        )
    "#,
        [],
    )
    .unwrap();
}

/// Three providers offering DRG 470 at 2.3 / 10.1 / 50.0 km with charges
/// 84621 / 70000 / 60000 (the worked example), plus one heart-failure row.
fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("navigator.duckdb");
    let index_dir = dir.path().join("index").join("offerings");

    let conn = Connection::open(&db_path).unwrap();
    create_offering_table(&conn);

    const DRG_470: &str = "470 - MAJOR JOINT REPLACEMENT OR REATTACHMENT OF LOWER EXTREMITY W/O MCC";
    insert_offering(&conn, 1, "330101", "Near Hospital", "470", DRG_470, Some(84_621.0), Some(4), 2.3);
    insert_offering(&conn, 2, "330202", "Mid Hospital", "470", DRG_470, Some(70_000.0), Some(9), 10.1);
    insert_offering(&conn, 3, "330303", "Far Hospital", "470", DRG_470, Some(60_000.0), Some(7), 50.0);
    insert_offering(
        &conn,
        4,
        "330101",
        "Near Hospital",
        "291",
        "291 - HEART FAILURE & SHOCK W MCC",
        Some(30_000.0),
        Some(4),
        2.3,
    );

    build_offering_index(&conn, &index_dir, true).unwrap();

    let engine = OfferingEngine::open(&index_dir).unwrap();
    let store = OfferingStore::new(Arc::new(Mutex::new(conn)));
    let planner = Planner::new(Arc::new(engine), store, 1000);

    let geocoder = Geocoder::from_centroids(vec![ZipCentroid {
        zip5: "10001".to_string(),
        lat: ORIGIN_LAT,
        lon: ORIGIN_LON,
    }]);

    Fixture {
        planner,
        geocoder,
        limits: QueryLimits::default(),
        _dir: dir,
    }
}

fn spec_for(fx: &Fixture, draft: &QuerySpecDraft) -> QuerySpec {
    match guard::promote(draft, &fx.geocoder, &fx.limits).unwrap() {
        Resolution::InScope(spec) => spec,
        Resolution::OutOfScope => panic!("expected in-scope"),
    }
}

fn code_draft(code: &str) -> QuerySpecDraft {
    let mut d = QuerySpecDraft::empty(DraftOrigin::Deterministic);
    d.procedure_code = Some(code.to_string());
    d.postal_code = Some("10001".to_string());
    d
}

#[tokio::test]
async fn worked_example_cheapest_within_radius() {
    let fx = fixture();
    let spec = spec_for(&fx, &code_draft("470"));
    assert_eq!(spec.radius_km, 40.0);

    let candidates = fx.planner.plan(&spec).await.unwrap();
    // The 50 km provider is outside the 40 km radius.
    assert_eq!(candidates.len(), 2);
    for c in &candidates {
        assert!(c.distance_km <= spec.radius_km, "distance {}", c.distance_km);
    }

    let ranked = rank::rank(candidates, spec.intent, spec.limit);
    let ids: Vec<&str> = ranked.iter().map(|c| c.row.provider_id.as_str()).collect();
    // Cheapest in radius first: 70000 (Mid), then 84621 (Near).
    assert_eq!(ids, vec!["330202", "330101"]);
    assert!((ranked[0].distance_km - 10.1).abs() < 0.05);
    assert!((ranked[1].distance_km - 2.3).abs() < 0.05);
}

#[tokio::test]
async fn wider_radius_admits_the_far_provider() {
    let fx = fixture();
    let mut draft = code_draft("470");
    draft.radius_km = Some(100.0);
    let spec = spec_for(&fx, &draft);

    let candidates = fx.planner.plan(&spec).await.unwrap();
    assert_eq!(candidates.len(), 3);

    let ranked = rank::rank(candidates, RankingIntent::Cheapest, 10);
    assert_eq!(ranked[0].row.provider_id, "330303"); // 60000 is cheapest overall
    assert!(rank::is_ordered(&ranked, RankingIntent::Cheapest));
}

#[tokio::test]
async fn exact_code_match_does_not_leak_other_drgs() {
    let fx = fixture();
    let spec = spec_for(&fx, &code_draft("291"));
    let candidates = fx.planner.plan(&spec).await.unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].row.drg_code, "291");
}

#[tokio::test]
async fn fuzzy_text_match_tolerates_typos() {
    let fx = fixture();
    let mut draft = QuerySpecDraft::empty(DraftOrigin::Deterministic);
    draft.procedure_text = Some("joint replacment".to_string()); // sic
    draft.postal_code = Some("10001".to_string());
    let spec = spec_for(&fx, &draft);
    assert!(matches!(spec.procedure, ProcedureMatch::Text(_)));

    let candidates = fx.planner.plan(&spec).await.unwrap();
    assert!(!candidates.is_empty());
    for c in &candidates {
        assert_eq!(c.row.drg_code, "470");
    }
}

#[tokio::test]
async fn best_rated_ranks_by_rating_and_dedups() {
    let fx = fixture();
    let mut draft = code_draft("470");
    draft.intent = Some(RankingIntent::BestRated);
    let spec = spec_for(&fx, &draft);

    let candidates = fx.planner.plan(&spec).await.unwrap();
    let ranked = rank::rank(candidates, spec.intent, spec.limit);
    assert_eq!(ranked[0].row.provider_id, "330202"); // rating 9
    assert!(rank::is_ordered(&ranked, RankingIntent::BestRated));
}

#[tokio::test]
async fn fallback_law_deterministic_grammar_end_to_end() {
    // No inference collaborator configured: the natural-language path must
    // still resolve every phrasing the grammar covers.
    let fx = fixture();
    let stack = ExtractorStack::deterministic_only();

    let question = "Who is cheapest for DRG 470 within 25 miles of 10001?";
    assert!(guard::question_in_scope(question));
    let draft = stack.extract(question).await;
    let spec = spec_for(&fx, &draft);
    assert_eq!(spec.intent, RankingIntent::Cheapest);
    // 25 miles ≈ 40.2 km.
    assert!((spec.radius_km - 40.2336).abs() < 0.01);

    let candidates = fx.planner.plan(&spec).await.unwrap();
    let ranked = rank::rank(candidates, spec.intent, spec.limit);
    let ids: Vec<&str> = ranked.iter().map(|c| c.row.provider_id.as_str()).collect();
    assert_eq!(ids, vec!["330202", "330101"]);
}

#[tokio::test]
async fn identical_requests_produce_identical_output() {
    let fx = fixture();
    let spec = spec_for(&fx, &code_draft("470"));

    let a = rank::rank(fx.planner.plan(&spec).await.unwrap(), spec.intent, spec.limit);
    let b = rank::rank(fx.planner.plan(&spec).await.unwrap(), spec.intent, spec.limit);
    let ids = |v: &[cost_navigator::query::plan::Candidate]| {
        v.iter().map(|c| c.row.offering_id).collect::<Vec<_>>()
    };
    assert_eq!(ids(&a), ids(&b));
}

#[test]
fn out_of_scope_question_is_detected() {
    let fx = fixture();
    let question = "what's the weather today?";
    assert!(!guard::question_in_scope(question));

    // Even past the keyword gate, an empty draft resolves out of scope
    // rather than an empty success.
    let draft = QuerySpecDraft::empty(DraftOrigin::Deterministic);
    assert!(matches!(
        guard::promote(&draft, &fx.geocoder, &fx.limits).unwrap(),
        Resolution::OutOfScope
    ));
}

#[test]
fn unknown_zip_is_unknown_location_not_empty_success() {
    let fx = fixture();
    let mut draft = code_draft("470");
    draft.postal_code = Some("00000".to_string());
    assert!(matches!(
        guard::promote(&draft, &fx.geocoder, &fx.limits),
        Err(QueryError::UnknownLocation(_))
    ));
}
