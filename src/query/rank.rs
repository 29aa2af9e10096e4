//! Result ranking. Each intent defines a deterministic total order; the
//! final tie-breaks (provider id, then DRG definition) make identical inputs
//! produce identical output. The limit applies after ranking so the ordering
//! always sees the full in-radius candidate set.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::query::plan::Candidate;
use crate::query::spec::RankingIntent;

pub fn rank(mut candidates: Vec<Candidate>, intent: RankingIntent, limit: usize) -> Vec<Candidate> {
    match intent {
        RankingIntent::Cheapest => {
            candidates.sort_by(|a, b| {
                charge(a)
                    .total_cmp(&charge(b))
                    .then_with(|| a.distance_km.total_cmp(&b.distance_km))
                    .then_with(|| stable_key(a).cmp(&stable_key(b)))
            });
        }
        RankingIntent::BestRated => {
            candidates.sort_by(|a, b| {
                rating(b)
                    .cmp(&rating(a))
                    .then_with(|| charge(a).total_cmp(&charge(b)))
                    .then_with(|| a.distance_km.total_cmp(&b.distance_km))
                    .then_with(|| stable_key(a).cmp(&stable_key(b)))
            });
            // One row per hospital for a quality ranking; the best-ranked
            // offering represents the provider.
            candidates = dedup_by_provider(candidates);
        }
        RankingIntent::TopN | RankingIntent::Default => {
            candidates.sort_by(|a, b| {
                a.distance_km
                    .total_cmp(&b.distance_km)
                    .then_with(|| charge(a).total_cmp(&charge(b)))
                    .then_with(|| stable_key(a).cmp(&stable_key(b)))
            });
        }
    }

    candidates.truncate(limit.max(1));
    candidates
}

/// Missing charges sort last under ascending cost.
fn charge(c: &Candidate) -> f64 {
    c.row.average_covered_charges.unwrap_or(f64::INFINITY)
}

/// Unrated providers sort last under descending rating, never excluded.
fn rating(c: &Candidate) -> i64 {
    c.row.rating.unwrap_or(i64::MIN)
}

fn stable_key(c: &Candidate) -> (&str, &str) {
    (c.row.provider_id.as_str(), c.row.drg_definition.as_str())
}

fn dedup_by_provider(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut seen: HashSet<String> = HashSet::with_capacity(candidates.len());
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.row.provider_id.clone()))
        .collect()
}

/// Verification helper for the ordering laws (also used by tests): whether
/// the sequence is correctly ordered for the intent.
pub fn is_ordered(candidates: &[Candidate], intent: RankingIntent) -> bool {
    candidates.windows(2).all(|w| match intent {
        RankingIntent::Cheapest => charge(&w[0]).total_cmp(&charge(&w[1])) != Ordering::Greater,
        RankingIntent::BestRated => rating(&w[0]) >= rating(&w[1]),
        RankingIntent::TopN | RankingIntent::Default => w[0].distance_km <= w[1].distance_km,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::OfferingRow;

    fn candidate(
        provider_id: &str,
        charge: Option<f64>,
        rating: Option<i64>,
        distance_km: f64,
    ) -> Candidate {
        Candidate {
            row: OfferingRow {
                offering_id: 0,
                provider_id: provider_id.to_string(),
                name: Some(format!("Hospital {provider_id}")),
                city: None,
                state: None,
                zip_code: None,
                drg_code: "470".to_string(),
                drg_definition: "470 - MAJOR JOINT REPLACEMENT".to_string(),
                total_discharges: None,
                average_covered_charges: charge,
                average_total_payments: None,
                average_medicare_payments: None,
                rating,
                lat: Some(40.0),
                lon: Some(-74.0),
            },
            distance_km,
        }
    }

    #[test]
    fn cheapest_orders_by_charge_then_distance() {
        let out = rank(
            vec![
                candidate("a", Some(84_621.0), Some(5), 2.3),
                candidate("b", Some(70_000.0), Some(4), 10.1),
                candidate("c", Some(70_000.0), Some(9), 3.0),
            ],
            RankingIntent::Cheapest,
            10,
        );
        let ids: Vec<&str> = out.iter().map(|c| c.row.provider_id.as_str()).collect();
        // Equal charges break on distance: c (3.0) before b (10.1).
        assert_eq!(ids, vec!["c", "b", "a"]);
        assert!(is_ordered(&out, RankingIntent::Cheapest));
    }

    #[test]
    fn cheapest_puts_missing_charges_last() {
        let out = rank(
            vec![
                candidate("a", None, None, 1.0),
                candidate("b", Some(50_000.0), None, 9.0),
            ],
            RankingIntent::Cheapest,
            10,
        );
        assert_eq!(out[0].row.provider_id, "b");
        assert_eq!(out[1].row.provider_id, "a");
    }

    #[test]
    fn best_rated_descends_with_unrated_last() {
        let out = rank(
            vec![
                candidate("a", Some(60_000.0), None, 1.0),
                candidate("b", Some(80_000.0), Some(9), 5.0),
                candidate("c", Some(70_000.0), Some(3), 2.0),
            ],
            RankingIntent::BestRated,
            10,
        );
        let ids: Vec<&str> = out.iter().map(|c| c.row.provider_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
        assert!(is_ordered(&out, RankingIntent::BestRated));
    }

    #[test]
    fn best_rated_dedups_providers() {
        let mut second = candidate("a", Some(90_000.0), Some(7), 2.0);
        second.row.drg_definition = "291 - HEART FAILURE".to_string();
        let out = rank(
            vec![
                candidate("a", Some(60_000.0), Some(7), 2.0),
                second,
                candidate("b", Some(70_000.0), Some(5), 4.0),
            ],
            RankingIntent::BestRated,
            10,
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].row.provider_id, "a");
        // The provider's best-ranked row (cheaper on the tie) survives.
        assert_eq!(out[0].row.average_covered_charges, Some(60_000.0));
    }

    #[test]
    fn default_orders_by_distance() {
        let out = rank(
            vec![
                candidate("a", Some(60_000.0), None, 9.0),
                candidate("b", Some(90_000.0), None, 1.5),
            ],
            RankingIntent::Default,
            10,
        );
        assert_eq!(out[0].row.provider_id, "b");
        assert!(is_ordered(&out, RankingIntent::Default));
    }

    #[test]
    fn limit_applies_after_ranking() {
        let out = rank(
            vec![
                candidate("a", Some(84_621.0), None, 2.3),
                candidate("b", Some(70_000.0), None, 10.1),
                candidate("c", Some(95_000.0), None, 1.0),
            ],
            RankingIntent::Cheapest,
            1,
        );
        // The cheapest overall wins even though it is not the nearest.
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].row.provider_id, "b");
    }

    #[test]
    fn ranking_is_idempotent() {
        let input = vec![
            candidate("a", Some(84_621.0), Some(2), 2.3),
            candidate("b", Some(70_000.0), Some(8), 10.1),
            candidate("c", Some(60_000.0), None, 5.0),
        ];
        let once = rank(input.clone(), RankingIntent::Cheapest, 10);
        let twice = rank(once.clone(), RankingIntent::Cheapest, 10);
        let a: Vec<String> = once.iter().map(|c| c.row.provider_id.clone()).collect();
        let b: Vec<String> = twice.iter().map(|c| c.row.provider_id.clone()).collect();
        assert_eq!(a, b);
        assert_eq!(a, vec!["c", "b", "a"]);
    }
}
