use std::path::{Path, PathBuf};
use std::sync::Arc;

use duckdb::Connection;
use tokio::sync::Mutex;

use crate::error::QueryError;
use crate::geo::Point;

/// Largest `IN (...)` placeholder list sent to DuckDB in one statement.
const FETCH_CHUNK: usize = 256;

#[derive(Debug, Clone)]
pub struct StoragePaths {
    pub geo_dir: PathBuf,
    pub index_dir: PathBuf,
    pub duckdb_path: PathBuf,
    pub offerings_index_dir: PathBuf,
    pub meta_path: PathBuf,
}

impl StoragePaths {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir: PathBuf = data_dir.into();
        let geo_dir = data_dir.join("geo");
        let index_dir = data_dir.join("index");
        let duckdb_path = data_dir.join("navigator.duckdb");
        let offerings_index_dir = index_dir.join("offerings");
        let meta_path = data_dir.join("meta.json");

        Self {
            geo_dir,
            index_dir,
            duckdb_path,
            offerings_index_dir,
            meta_path,
        }
    }

    pub fn geonames_us_txt(&self) -> PathBuf {
        self.geo_dir.join("US.txt")
    }

    pub fn geonames_us_zip(&self) -> PathBuf {
        self.geo_dir.join("US.zip")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.geo_dir)?;
        std::fs::create_dir_all(&self.index_dir)?;
        Ok(())
    }
}

pub fn file_present_nonempty(path: &Path) -> bool {
    match std::fs::metadata(path) {
        Ok(m) => m.is_file() && m.len() > 0,
        Err(_) => false,
    }
}

/// One row of the `offering_search` serving table: a provider × procedure
/// pair with pricing, rating, and the provider's ZIP centroid.
#[derive(Debug, Clone)]
pub struct OfferingRow {
    pub offering_id: i64,
    pub provider_id: String,
    pub name: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub drg_code: String,
    pub drg_definition: String,
    pub total_discharges: Option<i64>,
    pub average_covered_charges: Option<f64>,
    pub average_total_payments: Option<f64>,
    pub average_medicare_payments: Option<f64>,
    pub rating: Option<i64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl OfferingRow {
    pub fn point(&self) -> Option<Point> {
        match (self.lat, self.lon) {
            (Some(lat), Some(lon)) => Some(Point { lat, lon }),
            _ => None,
        }
    }
}

/// Read-only serving-time access to the offering rows. The connection is
/// shared behind an async mutex; every lookup is a placeholder-parameterized
/// statement, never string-spliced values.
#[derive(Clone)]
pub struct OfferingStore {
    conn: Arc<Mutex<Connection>>,
}

impl OfferingStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub async fn fetch_offerings(&self, ids: &[i64]) -> Result<Vec<OfferingRow>, QueryError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock().await;
        let mut out = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(FETCH_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!(
                r#"
                SELECT
                  offering_id,
                  provider_id,
                  name,
                  city,
                  state,
                  zip_code,
                  drg_code,
                  drg_definition,
                  total_discharges,
                  average_covered_charges,
                  average_total_payments,
                  average_medicare_payments,
                  rating,
                  lat,
                  lon
                FROM offering_search
                WHERE offering_id IN ({placeholders})
            "#
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(duckdb::params_from_iter(chunk.iter().copied()), |row| {
                Ok(OfferingRow {
                    offering_id: row.get(0)?,
                    provider_id: row.get(1)?,
                    name: row.get(2)?,
                    city: row.get(3)?,
                    state: row.get(4)?,
                    zip_code: row.get(5)?,
                    drg_code: row.get(6)?,
                    drg_definition: row.get(7)?,
                    total_discharges: row.get(8)?,
                    average_covered_charges: row.get(9)?,
                    average_total_payments: row.get(10)?,
                    average_medicare_payments: row.get(11)?,
                    rating: row.get(12)?,
                    lat: row.get(13)?,
                    lon: row.get(14)?,
                })
            })?;
            for r in rows {
                out.push(r?);
            }
        }
        Ok(out)
    }
}
