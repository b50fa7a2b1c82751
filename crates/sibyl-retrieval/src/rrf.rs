//! Reciprocal Rank Fusion over named ranked lists (§4.8 step 5).
//!
//! `score(e) = Σ_l w_l / (k + rank_l(e))`, summed over every list that
//! contains `e`; `rank_l` is the list's 1-based position. Results carry a
//! trace of which lists contributed and at what rank, for explainability.

use std::collections::HashMap;

pub const DEFAULT_K: f64 = 60.0;

#[derive(Debug, Clone)]
pub struct RankedList {
    pub name: String,
    pub weight: f64,
    /// Ids in rank order, best first.
    pub ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FusedEntry {
    pub id: String,
    pub score: f64,
    pub trace: Vec<(String, usize)>,
}

/// Fuses `lists` into a single ranking. Order of the returned vector is
/// descending by fused score; ties break by first-seen id order for
/// determinism.
pub fn fuse(lists: &[RankedList], k: f64) -> Vec<FusedEntry> {
    let mut scores: HashMap<String, f64> = HashMap::new();
    let mut trace: HashMap<String, Vec<(String, usize)>> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for list in lists {
        for (idx, id) in list.ids.iter().enumerate() {
            let rank = idx + 1;
            let contribution = list.weight / (k + rank as f64);
            *scores.entry(id.clone()).or_insert(0.0) += contribution;
            trace.entry(id.clone()).or_insert_with(|| {
                order.push(id.clone());
                Vec::new()
            });
            trace.get_mut(id).unwrap().push((list.name.clone(), rank));
        }
    }

    let mut fused: Vec<FusedEntry> = order
        .into_iter()
        .map(|id| {
            let score = scores.get(&id).copied().unwrap_or(0.0);
            let trace = trace.remove(&id).unwrap_or_default();
            FusedEntry { id, score, trace }
        })
        .collect();

    fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuse_combines_contributions_from_multiple_lists() {
        let lists = vec![
            RankedList { name: "vector".into(), weight: 1.0, ids: vec!["a".into(), "b".into()] },
            RankedList { name: "bm25".into(), weight: 1.0, ids: vec!["b".into(), "a".into()] },
        ];
        let fused = fuse(&lists, DEFAULT_K);
        assert_eq!(fused.len(), 2);
        // a is rank1+rank2 = b's rank2+rank1 -> equal score, first-seen (a) wins tie.
        assert!((fused[0].score - fused[1].score).abs() < 1e-9);
    }

    #[test]
    fn fuse_single_list_keeps_its_order() {
        let lists = vec![RankedList { name: "vector".into(), weight: 1.0, ids: vec!["x".into(), "y".into(), "z".into()] }];
        let fused = fuse(&lists, DEFAULT_K);
        assert_eq!(fused.iter().map(|e| e.id.clone()).collect::<Vec<_>>(), vec!["x", "y", "z"]);
    }

    #[test]
    fn fuse_trace_records_list_and_rank() {
        let lists = vec![RankedList { name: "graph".into(), weight: 1.0, ids: vec!["a".into()] }];
        let fused = fuse(&lists, DEFAULT_K);
        assert_eq!(fused[0].trace, vec![("graph".to_string(), 1)]);
    }
}
