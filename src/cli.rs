use clap::{Parser, Subcommand};

const DEFAULT_DATA_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/data");
const DEFAULT_CHARGES_CSV: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/data/charges.csv");

#[derive(Parser, Debug)]
#[command(name = "cost-navigator")]
#[command(about = "Hospital procedure cost navigator backend (DuckDB + Tantivy)", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load the charge CSVs into DuckDB, join ZIP centroids, build the
    /// Tantivy offering index.
    Build(BuildArgs),
    /// Serve the HTTP API (requires a completed build).
    Serve(ServeArgs),
}

#[derive(clap::Args, Debug, Clone)]
pub struct BuildArgs {
    /// Backend data directory (DuckDB DB, Tantivy index, ZIP centroids).
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: String,

    /// CMS inpatient charge CSV (provider, MS-DRG, average charge columns).
    #[arg(long, default_value = DEFAULT_CHARGES_CSV)]
    pub charges_csv: String,

    /// Optional ratings CSV with provider_id,rating columns. When absent,
    /// ratings are derived deterministically from the provider id.
    #[arg(long)]
    pub ratings_csv: Option<String>,

    /// Use an already-downloaded ZIP centroid file (GeoNames tab-separated
    /// format).
    #[arg(long)]
    pub zip_centroids_file: Option<String>,

    /// Do not download missing inputs; error instead.
    #[arg(long)]
    pub offline: bool,

    /// Re-download inputs even if they already exist.
    #[arg(long)]
    pub force_download: bool,

    /// Rebuild DuckDB tables and the Tantivy index even if they already exist.
    #[arg(long)]
    pub rebuild: bool,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    /// Backend data directory (DuckDB DB, Tantivy index, ZIP centroids).
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_dir: String,

    /// TOML config file (inference collaborator, query bounds). Falls back
    /// to the NAVIGATOR_CONFIG env var, then built-in defaults.
    #[arg(long)]
    pub config: Option<String>,

    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    #[arg(long, default_value_t = 8787)]
    pub port: u16,
}
