use super::TermResult;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RankMode {
    /// `1 + position`; equal averages get consecutive ranks in input order.
    #[default]
    Sequential,
    /// Standard competition ranking (`1, 2, 2, 4`).
    Competition,
}

/// Ranks a whole class+term. Callers must pass the complete set: every
/// rank depends on every other average.
pub fn rank(mut results: Vec<TermResult>, mode: RankMode) -> Vec<TermResult> {
    // sort_by is stable, so ties keep their input order.
    results.sort_by(|a, b| b.average.partial_cmp(&a.average).unwrap_or(Ordering::Equal));

    let mut prev: Option<(f64, usize)> = None;
    for (pos, r) in results.iter_mut().enumerate() {
        let sequential = pos + 1;
        let assigned = match (mode, prev) {
            (RankMode::Competition, Some((avg, shared))) if avg == r.average => shared,
            _ => sequential,
        };
        r.rank = Some(assigned);
        prev = Some((r.average, assigned));
    }
    results
}
