use std::path::Path;

use anyhow::{Context, anyhow};
use duckdb::{Connection, params};
use serde::Serialize;

use crate::cli::BuildArgs;
use crate::download;
use crate::geo;
use crate::index;
use crate::storage::{StoragePaths, file_present_nonempty};

#[derive(Debug, Serialize)]
struct BuildMeta {
    built_at_utc: String,
    charges_csv: String,
    ratings_csv: Option<String>,
    duckdb_path: String,
    offerings_index_dir: String,
    provider_count: u64,
    offering_count: u64,
}

pub async fn run(opts: BuildArgs) -> anyhow::Result<()> {
    tracing::info!("cost-navigator build");
    tracing::info!("data_dir={}", opts.data_dir);
    tracing::info!("charges_csv={}", opts.charges_csv);
    if opts.offline {
        tracing::info!("offline=true (will not download missing inputs)");
    }
    if opts.rebuild {
        tracing::info!("rebuild=true (will rebuild tables and the index)");
    }

    if !file_present_nonempty(Path::new(&opts.charges_csv)) {
        return Err(anyhow!(
            "charges CSV not found at {} (pass --charges-csv)",
            opts.charges_csv
        ));
    }

    let paths = StoragePaths::new(&opts.data_dir);
    paths
        .ensure_dirs()
        .context("create backend data directories")?;

    tracing::info!("Step 1/5: ensure ZIP centroid input");
    let geonames_txt = download::ensure_zip_centroids(&paths, &opts).await?;
    tracing::info!("ZIP centroids ready: {}", geonames_txt.display());

    tracing::info!("Step 2/5: open DuckDB + create CSV views");
    let mut conn = Connection::open(&paths.duckdb_path)
        .with_context(|| format!("open duckdb at {}", paths.duckdb_path.display()))?;
    let _ = conn.execute("PRAGMA threads=4", []);

    create_or_replace_views(&mut conn, &opts.charges_csv, opts.ratings_csv.as_deref())
        .context("create views")?;

    tracing::info!("Step 3/5: build reference tables (providers + procedures + ratings)");
    if opts.rebuild || !table_exists(&mut conn, "providers")? {
        rebuild_providers(&mut conn).context("build providers")?;
    } else {
        tracing::info!("DuckDB table providers already exists; skipping");
    }

    if opts.rebuild || !table_exists(&mut conn, "procedures")? {
        rebuild_procedures(&mut conn).context("build procedures")?;
    } else {
        tracing::info!("DuckDB table procedures already exists; skipping");
    }

    if opts.rebuild || !table_exists(&mut conn, "ratings")? {
        rebuild_ratings(&mut conn, opts.ratings_csv.is_some()).context("build ratings")?;
    } else {
        tracing::info!("DuckDB table ratings already exists; skipping");
    }

    if opts.rebuild || !table_exists(&mut conn, "zip_centroids")? {
        rebuild_zip_centroids(&mut conn, &geonames_txt).context("build zip_centroids")?;
    } else {
        tracing::info!("DuckDB table zip_centroids already exists; skipping");
    }

    tracing::info!("Step 4/5: build serving table (offering_search)");
    if opts.rebuild || !table_exists(&mut conn, "offering_search")? {
        rebuild_offering_search(&mut conn).context("build offering_search")?;
    } else {
        tracing::info!("DuckDB table offering_search already exists; skipping");
    }

    tracing::info!("Step 5/5: build search index (Tantivy)");
    index::offerings::build_offering_index(&conn, &paths.offerings_index_dir, opts.rebuild)
        .context("build offering tantivy index")?;

    let provider_count: u64 = one_u64(&mut conn, "SELECT COUNT(*) FROM providers")?;
    let offering_count: u64 = one_u64(&mut conn, "SELECT COUNT(*) FROM offering_search")?;

    let meta = BuildMeta {
        built_at_utc: now_utc_stamp(),
        charges_csv: opts.charges_csv.clone(),
        ratings_csv: opts.ratings_csv.clone(),
        duckdb_path: paths.duckdb_path.display().to_string(),
        offerings_index_dir: paths.offerings_index_dir.display().to_string(),
        provider_count,
        offering_count,
    };
    write_json(&paths.meta_path, &meta).context("write meta.json")?;

    tracing::info!("Build complete.");
    tracing::info!("DuckDB: {}", paths.duckdb_path.display());
    tracing::info!(
        "Offering index: {} ({} providers, {} offerings)",
        paths.offerings_index_dir.display(),
        provider_count,
        offering_count
    );

    Ok(())
}

fn create_or_replace_views(
    conn: &mut Connection,
    charges_csv: &str,
    ratings_csv: Option<&str>,
) -> anyhow::Result<()> {
    let charges = sql_quote_path(Path::new(charges_csv));
    conn.execute(
        &format!(
            "CREATE OR REPLACE VIEW charges_raw AS \
             SELECT * FROM read_csv_auto('{charges}', header=true, all_varchar=true)"
        ),
        [],
    )?;
    if let Some(ratings_csv) = ratings_csv {
        let ratings = sql_quote_path(Path::new(ratings_csv));
        conn.execute(
            &format!(
                "CREATE OR REPLACE VIEW ratings_raw AS \
                 SELECT * FROM read_csv_auto('{ratings}', header=true, all_varchar=true)"
            ),
            [],
        )?;
    }
    Ok(())
}

/// One row per provider, first occurrence wins on conflicting descriptive
/// fields. Column names follow the CMS inpatient charge export.
fn rebuild_providers(conn: &mut Connection) -> anyhow::Result<()> {
    tracing::info!("Building providers from charges_raw...");
    conn.execute("DROP TABLE IF EXISTS providers", [])?;
    let sql = r#"
        CREATE TABLE providers AS
        WITH ranked AS (
          SELECT
            TRIM(Rndrng_Prvdr_CCN) AS provider_id,
            NULLIF(TRIM(Rndrng_Prvdr_Org_Name), '') AS name,
            NULLIF(TRIM(Rndrng_Prvdr_City), '') AS city,
            NULLIF(TRIM(Rndrng_Prvdr_State_Abrvtn), '') AS state,
            NULLIF(TRIM(Rndrng_Prvdr_Zip5), '') AS zip_code,
            ROW_NUMBER() OVER (
              PARTITION BY TRIM(Rndrng_Prvdr_CCN)
              ORDER BY TRIM(Rndrng_Prvdr_Org_Name)
            ) AS rn
          FROM charges_raw
          WHERE Rndrng_Prvdr_CCN IS NOT NULL AND TRIM(Rndrng_Prvdr_CCN) <> ''
        )
        SELECT provider_id, name, city, state, zip_code
        FROM ranked
        WHERE rn = 1
    "#;
    conn.execute(sql, [])?;
    Ok(())
}

/// One row per (provider, DRG). Money columns arrive with currency noise, so
/// they are stripped to digits before the cast (bad values become NULL).
fn rebuild_procedures(conn: &mut Connection) -> anyhow::Result<()> {
    tracing::info!("Building procedures from charges_raw...");
    conn.execute("DROP TABLE IF EXISTS procedures", [])?;
    let sql = r#"
        CREATE TABLE procedures AS
        SELECT
          TRIM(Rndrng_Prvdr_CCN) AS provider_id,
          TRIM(DRG_Cd) AS drg_code,
          TRIM(DRG_Cd) || ' - ' || TRIM(DRG_Desc) AS drg_definition,
          TRY_CAST(TRIM(Tot_Dschrgs) AS BIGINT) AS total_discharges,
          TRY_CAST(REGEXP_REPLACE(TRIM(Avg_Submtd_Cvrd_Chrg), '[^0-9.\-]', '', 'g') AS DOUBLE)
            AS average_covered_charges,
          TRY_CAST(REGEXP_REPLACE(TRIM(Avg_Tot_Pymt_Amt), '[^0-9.\-]', '', 'g') AS DOUBLE)
            AS average_total_payments,
          TRY_CAST(REGEXP_REPLACE(TRIM(Avg_Mdcr_Pymt_Amt), '[^0-9.\-]', '', 'g') AS DOUBLE)
            AS average_medicare_payments
        FROM charges_raw
        WHERE Rndrng_Prvdr_CCN IS NOT NULL AND TRIM(Rndrng_Prvdr_CCN) <> ''
          AND DRG_Cd IS NOT NULL AND TRIM(DRG_Cd) <> ''
        QUALIFY ROW_NUMBER() OVER (
          PARTITION BY TRIM(Rndrng_Prvdr_CCN), TRIM(DRG_Cd)
          ORDER BY TRIM(DRG_Desc)
        ) = 1
    "#;
    conn.execute(sql, [])?;
    Ok(())
}

/// Ratings come from the optional CSV when supplied; otherwise each provider
/// gets a deterministic pseudo-random score in [1, 10] derived from its id,
/// so repeated builds agree.
fn rebuild_ratings(conn: &mut Connection, from_csv: bool) -> anyhow::Result<()> {
    conn.execute("DROP TABLE IF EXISTS ratings", [])?;

    if from_csv {
        tracing::info!("Building ratings from ratings_raw...");
        let sql = r#"
            CREATE TABLE ratings AS
            SELECT
              TRIM(provider_id) AS provider_id,
              TRY_CAST(TRIM(rating) AS BIGINT) AS rating
            FROM ratings_raw
            WHERE provider_id IS NOT NULL AND TRIM(provider_id) <> ''
              AND TRY_CAST(TRIM(rating) AS BIGINT) BETWEEN 1 AND 10
            QUALIFY ROW_NUMBER() OVER (PARTITION BY TRIM(provider_id) ORDER BY rating DESC) = 1
        "#;
        conn.execute(sql, [])?;
        return Ok(());
    }

    tracing::info!("Building ratings (derived from provider ids)...");
    conn.execute(
        "CREATE TABLE ratings (provider_id TEXT PRIMARY KEY, rating BIGINT)",
        [],
    )?;

    let provider_ids: Vec<String> = {
        let mut stmt = conn.prepare("SELECT provider_id FROM providers")?;
        let rows = stmt.query_map([], |row| row.get::<usize, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        out
    };

    let tx = conn.transaction().context("begin tx")?;
    {
        let mut stmt = tx
            .prepare("INSERT OR REPLACE INTO ratings (provider_id, rating) VALUES (?, ?)")
            .context("prepare insert ratings")?;
        for provider_id in &provider_ids {
            stmt.execute(params![provider_id, stable_rating(provider_id)])?;
        }
    }
    tx.commit().context("commit ratings")?;
    Ok(())
}

/// Deterministic rating in [1, 10] from the provider id.
pub fn stable_rating(provider_id: &str) -> i64 {
    let mut h: u64 = 0;
    for ch in provider_id.chars() {
        h = (h.wrapping_mul(131).wrapping_add(ch as u64)) % 1_000_003;
    }
    (h % 10) as i64 + 1
}

fn rebuild_zip_centroids(conn: &mut Connection, geonames_txt: &Path) -> anyhow::Result<()> {
    tracing::info!("Building zip_centroids from {}...", geonames_txt.display());
    conn.execute("DROP TABLE IF EXISTS zip_centroids", [])?;
    conn.execute(
        "CREATE TABLE zip_centroids (zip5 TEXT PRIMARY KEY, lat DOUBLE, lon DOUBLE)",
        [],
    )?;

    let centroids = geo::parse_geonames_us_txt(geonames_txt)?;

    let tx = conn.transaction().context("begin tx")?;
    {
        let mut stmt = tx
            .prepare("INSERT OR REPLACE INTO zip_centroids (zip5, lat, lon) VALUES (?, ?, ?)")
            .context("prepare insert zip_centroids")?;
        for c in centroids {
            stmt.execute(params![c.zip5, c.lat, c.lon])?;
        }
    }
    tx.commit().context("commit zip_centroids")?;
    Ok(())
}

/// The serving table the planner fetches from: providers × procedures with
/// ratings and centroids joined in, keyed by a dense offering_id that the
/// Tantivy index stores per document.
fn rebuild_offering_search(conn: &mut Connection) -> anyhow::Result<()> {
    tracing::info!(
        "Building offering_search (joining providers + procedures + ratings + zip_centroids)..."
    );
    conn.execute("DROP TABLE IF EXISTS offering_search", [])?;

    let sql = r#"
        CREATE TABLE offering_search AS
        SELECT
          ROW_NUMBER() OVER (ORDER BY p.provider_id, pr.drg_code) AS offering_id,
          p.provider_id,
          p.name,
          p.city,
          p.state,
          p.zip_code,
          pr.drg_code,
          pr.drg_definition,
          pr.total_discharges,
          pr.average_covered_charges,
          pr.average_total_payments,
          pr.average_medicare_payments,
          r.rating,
          z.lat,
          z.lon
        FROM procedures pr
        JOIN providers p ON p.provider_id = pr.provider_id
        LEFT JOIN ratings r ON r.provider_id = p.provider_id
        LEFT JOIN zip_centroids z ON z.zip5 = p.zip_code
    "#;
    conn.execute(sql, [])?;
    Ok(())
}

fn table_exists(conn: &mut Connection, name: &str) -> anyhow::Result<bool> {
    let mut stmt = conn.prepare(
        r#"
        SELECT COUNT(*)::BIGINT
        FROM information_schema.tables
        WHERE table_schema = 'main' AND table_name = ?
    "#,
    )?;
    let count: i64 = stmt.query_row(params![name], |row| row.get(0))?;
    Ok(count > 0)
}

fn one_u64(conn: &mut Connection, sql: &str) -> anyhow::Result<u64> {
    let mut stmt = conn.prepare(sql)?;
    let v: i64 = stmt.query_row([], |row| row.get(0))?;
    Ok(v.max(0) as u64)
}

fn write_json(path: &Path, v: &impl Serialize) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let s = serde_json::to_string_pretty(v)?;
    std::fs::write(path, s)?;
    Ok(())
}

fn now_utc_stamp() -> String {
    // Avoid an extra chrono/time dependency; a seconds-since-epoch stamp is
    // enough for build provenance.
    let now = std::time::SystemTime::now();
    let dur = now
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}s_since_epoch", dur.as_secs())
}

fn sql_quote_path(path: &Path) -> String {
    // DuckDB expects single-quoted string literals; escape embedded single
    // quotes.
    path.display().to_string().replace('\'', "''")
}
