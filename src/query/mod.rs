//! The query-resolution engine: request → draft → validated QuerySpec →
//! two-phase search plan → deterministic ranking.

pub mod extract;
pub mod guard;
pub mod infer;
pub mod plan;
pub mod rank;
pub mod spec;
