use std::ops::Bound;
use std::path::Path;

use anyhow::Context;
use duckdb::Connection;
use tantivy::collector::TopDocs;
use tantivy::directory::MmapDirectory;
use tantivy::query::{BooleanQuery, FuzzyTermQuery, Occur, Query, RangeQuery, TermQuery};
use tantivy::schema::{Field, IndexRecordOption, NumericOptions, STRING, Schema, TEXT, Value};
use tantivy::{DocAddress, Index, IndexReader, Score, TantivyDocument, Term};

use crate::geo::GeoBounds;
use crate::query::spec::ProcedureMatch;

/// Most description tokens considered for a fuzzy match; bounds the clause
/// count independently of input length.
const MAX_FUZZY_TOKENS: usize = 8;

/// Coarse-filter index over procedure offerings: one document per
/// (provider, MS-DRG) row of `offering_search`, carrying the DRG code as a
/// raw term, the tokenized description, and the provider centroid as fast
/// fields for the bounding-box clauses. Only the row key is stored; the full
/// rows live in DuckDB.
pub struct OfferingEngine {
    reader: IndexReader,
    fields: OfferingFields,
}

#[derive(Debug, Clone)]
struct OfferingFields {
    offering_id: Field,
    drg_code: Field,
    drg_desc: Field,
    lat: Field,
    lon: Field,
}

impl OfferingEngine {
    pub fn open(index_dir: &Path) -> anyhow::Result<Self> {
        let dir = MmapDirectory::open(index_dir)
            .with_context(|| format!("open index dir {}", index_dir.display()))?;
        let index = Index::open(dir).context("open tantivy index")?;
        let schema = index.schema();
        let fields = offering_fields(&schema)?;
        let reader = index.reader().context("create index reader")?;
        Ok(Self { reader, fields })
    }

    /// Phase-one candidate narrowing: procedure clause AND bounding-box
    /// range clauses, capped at `limit` docs. Every clause is a structured
    /// `Query` value built from typed terms — user text is never handed to a
    /// query parser.
    pub fn coarse_search(
        &self,
        procedure: &ProcedureMatch,
        bounds: &GeoBounds,
        limit: usize,
    ) -> Result<Vec<i64>, tantivy::TantivyError> {
        let Some(procedure_clause) = self.procedure_clause(procedure) else {
            return Ok(Vec::new());
        };

        let clauses: Vec<(Occur, Box<dyn Query>)> = vec![
            (Occur::Must, procedure_clause),
            (
                Occur::Must,
                Box::new(RangeQuery::new_f64_bounds(
                    "lat".to_string(),
                    Bound::Included(bounds.min_lat),
                    Bound::Included(bounds.max_lat),
                )),
            ),
            (
                Occur::Must,
                Box::new(RangeQuery::new_f64_bounds(
                    "lon".to_string(),
                    Bound::Included(bounds.min_lon),
                    Bound::Included(bounds.max_lon),
                )),
            ),
        ];
        let query = BooleanQuery::new(clauses);

        let searcher = self.reader.searcher();
        let top_docs: Vec<(Score, DocAddress)> =
            searcher.search(&query, &TopDocs::with_limit(limit.max(1)))?;

        let mut ids = Vec::with_capacity(top_docs.len());
        for (_score, addr) in top_docs {
            let doc: TantivyDocument = searcher.doc(addr)?;
            if let Some(id) = doc
                .get_first(self.fields.offering_id)
                .and_then(|v| v.as_i64())
            {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Exact term equality for a DRG code; a bounded Should-set of fuzzy
    /// terms over the description otherwise. Returns None when the text
    /// yields no usable tokens (match nothing, not everything).
    fn procedure_clause(&self, procedure: &ProcedureMatch) -> Option<Box<dyn Query>> {
        match procedure {
            ProcedureMatch::Code(code) => {
                let term = Term::from_field_text(self.fields.drg_code, code.trim());
                Some(Box::new(TermQuery::new(term, IndexRecordOption::Basic)))
            }
            ProcedureMatch::Text(text) => {
                let mut should: Vec<(Occur, Box<dyn Query>)> = Vec::new();
                for token in match_tokens(text) {
                    let term = Term::from_field_text(self.fields.drg_desc, &token);
                    should.push((
                        Occur::Should,
                        Box::new(FuzzyTermQuery::new(term, fuzzy_distance(&token), true)),
                    ));
                }
                if should.is_empty() {
                    None
                } else {
                    Some(Box::new(BooleanQuery::new(should)))
                }
            }
        }
    }
}

/// Lowercased alphanumeric tokens, short noise dropped, count bounded.
fn match_tokens(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3)
        .take(MAX_FUZZY_TOKENS)
        .map(str::to_string)
        .collect()
}

/// Edit-distance budget scaled to token length, so short tokens stay exact
/// and long medical terms tolerate a typo or two.
fn fuzzy_distance(token: &str) -> u8 {
    match token.chars().count() {
        0..=3 => 0,
        4..=6 => 1,
        _ => 2,
    }
}

pub fn build_offering_index(
    conn: &Connection,
    index_dir: &Path,
    rebuild: bool,
) -> anyhow::Result<()> {
    let success_marker = index_dir.join("_SUCCESS");
    if index_dir.exists() && !rebuild {
        if success_marker.exists() {
            tracing::info!(
                "Offering index already exists at {}; skipping",
                index_dir.display()
            );
            return Ok(());
        }
        tracing::info!(
            "Offering index dir exists but is missing {} (previous build likely failed); rebuilding",
            success_marker.display()
        );
        std::fs::remove_dir_all(index_dir)
            .with_context(|| format!("remove {}", index_dir.display()))?;
    } else if rebuild && index_dir.exists() {
        std::fs::remove_dir_all(index_dir)
            .with_context(|| format!("remove {}", index_dir.display()))?;
    }
    std::fs::create_dir_all(index_dir).with_context(|| format!("mkdir {}", index_dir.display()))?;

    let schema = offering_schema();
    let index = Index::create_in_dir(index_dir, schema).context("create offering index")?;
    let mut writer = index
        .writer_with_num_threads(2, 256_000_000)
        .context("create index writer")?;

    let schema = index.schema();
    let fields = offering_fields(&schema)?;

    // Rows without a centroid can never pass the exact distance filter, so
    // they are not indexed.
    let sql = r#"
        SELECT offering_id, drg_code, drg_definition, lat, lon
        FROM offering_search
        WHERE lat IS NOT NULL AND lon IS NOT NULL
    "#;

    let mut stmt = conn.prepare(sql).context("prepare offering_search scan")?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<usize, i64>(0)?,
            row.get::<usize, String>(1)?,
            row.get::<usize, String>(2)?,
            row.get::<usize, f64>(3)?,
            row.get::<usize, f64>(4)?,
        ))
    })?;

    let mut count: u64 = 0;
    for r in rows {
        let (offering_id, drg_code, drg_definition, lat, lon) = r?;

        let mut doc = tantivy::doc!();
        doc.add_i64(fields.offering_id, offering_id);
        doc.add_text(fields.drg_code, drg_code.trim());
        doc.add_text(fields.drg_desc, &drg_definition);
        doc.add_f64(fields.lat, lat);
        doc.add_f64(fields.lon, lon);

        writer.add_document(doc)?;
        count += 1;
        if count % 100_000 == 0 {
            tracing::info!("Indexed {} offerings...", count);
        }
    }

    tracing::info!("Committing offering index ({} docs)...", count);
    writer.commit().context("commit offering index")?;

    let _ = std::fs::write(&success_marker, "ok\n");
    Ok(())
}

fn offering_schema() -> Schema {
    let mut b = Schema::builder();

    let id_opts = NumericOptions::default()
        .set_fast()
        .set_indexed()
        .set_stored();
    b.add_i64_field("offering_id", id_opts);

    b.add_text_field("drg_code", STRING);
    b.add_text_field("drg_desc", TEXT);

    let coord_opts = NumericOptions::default().set_fast().set_indexed();
    b.add_f64_field("lat", coord_opts.clone());
    b.add_f64_field("lon", coord_opts);

    b.build()
}

fn offering_fields(schema: &Schema) -> anyhow::Result<OfferingFields> {
    Ok(OfferingFields {
        offering_id: schema.get_field("offering_id")?,
        drg_code: schema.get_field("drg_code")?,
        drg_desc: schema.get_field("drg_desc")?,
        lat: schema.get_field("lat")?,
        lon: schema.get_field("lon")?,
    })
}
