//! Search planner: compiles a validated QuerySpec into the two-phase
//! candidate pipeline.
//!
//! Phase 1 is the coarse filter — the Tantivy offering index narrows by
//! procedure clause and bounding box. Phase 2 fetches the matching rows from
//! DuckDB by key and applies the exact haversine cut, which is what
//! guarantees the radius contract regardless of how loose the box is.

use std::sync::Arc;

use crate::error::QueryError;
use crate::geo::{self, GeoBounds};
use crate::index::offerings::OfferingEngine;
use crate::query::spec::QuerySpec;
use crate::storage::{OfferingRow, OfferingStore};

#[derive(Debug, Clone)]
pub struct Candidate {
    pub row: OfferingRow,
    pub distance_km: f64,
}

pub struct Planner {
    engine: Arc<OfferingEngine>,
    store: OfferingStore,
    coarse_limit: usize,
}

impl Planner {
    pub fn new(engine: Arc<OfferingEngine>, store: OfferingStore, coarse_limit: usize) -> Self {
        Self {
            engine,
            store,
            coarse_limit: coarse_limit.max(1),
        }
    }

    pub async fn plan(&self, spec: &QuerySpec) -> Result<Vec<Candidate>, QueryError> {
        let bounds = GeoBounds::around(spec.origin, spec.radius_km);

        let ids = self
            .engine
            .coarse_search(&spec.procedure, &bounds, self.coarse_limit)?;
        tracing::debug!(
            coarse_hits = ids.len(),
            radius_km = spec.radius_km,
            "coarse filter complete"
        );
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = self.store.fetch_offerings(&ids).await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(point) = row.point() else {
                continue;
            };
            let distance_km = geo::haversine_km(spec.origin, point);
            if distance_km <= spec.radius_km {
                candidates.push(Candidate { row, distance_km });
            }
        }
        tracing::debug!(candidates = candidates.len(), "exact distance filter complete");
        Ok(candidates)
    }
}
