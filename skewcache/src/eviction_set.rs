//! Generalized eviction set validation
//!
//! In a skewed cache an address competes with a different set of addresses in every way, so an
//! eviction set isn't a group of addresses sharing one set. Instead it needs, for each way of the
//! target, its own address which lands on the target's row in that way. Any one address can only
//! cover a single way at a time, since it only ever occupies one cell.

use crate::cache::CacheTrait;

/// Finds an assignment of candidates to target ways
///
/// Way `w` can be given candidate `c` when `candidates[c][w] == target_rows[w]`, and no candidate
/// is given to two ways. This is a depth first search with backtracking, kept on an explicit
/// stack which never grows past one frame per way. Worst case it's exponential, which is fine for
/// the handful of ways a real cache has.
///
/// # Arguments
///
/// * `target_rows`: The target's candidate row in each way
/// * `candidates`: The candidate rows of each address in the collection, in the same way order.
/// Extra candidates which end up unused don't matter
///
/// returns: Option<Vec<usize>>, the candidate index for each way
pub fn find_matching(target_rows: &[u64], candidates: &[Vec<u64>]) -> Option<Vec<usize>> {
    let ways = target_rows.len();
    let covers =
        |candidate: usize, way: usize| candidates[candidate].get(way) == Some(&target_rows[way]);

    // Bail out early when some way has no candidate at all
    if (0..ways).any(|way| !(0..candidates.len()).any(|c| covers(c, way))) {
        return None;
    }

    let mut used = vec![false; candidates.len()];
    let mut chosen: Vec<usize> = Vec::with_capacity(ways);
    let mut next_candidate = 0;
    while chosen.len() < ways {
        let way = chosen.len();
        let found = (next_candidate..candidates.len()).find(|c| !used[*c] && covers(*c, way));
        match found {
            Some(candidate) => {
                used[candidate] = true;
                chosen.push(candidate);
                next_candidate = 0;
            }
            None => {
                // Nothing left for this way, undo the previous choice and try its next option
                let previous = chosen.pop()?;
                used[previous] = false;
                next_candidate = previous + 1;
            }
        }
    }
    Some(chosen)
}

/// Decides whether the candidates collide with the target in every one of its ways
pub fn is_complete_eviction_set(target_rows: &[u64], candidates: &[Vec<u64>]) -> bool {
    find_matching(target_rows, candidates).is_some()
}

/// Checks a collection of addresses against a target, using the cache's own indexing
pub fn check_eviction_set<C: CacheTrait>(cache: &C, target: u64, addresses: &[u64]) -> bool {
    let candidates: Vec<Vec<u64>> = addresses.iter().map(|a| cache.candidate_rows(*a)).collect();
    is_complete_eviction_set(&cache.candidate_rows(target), &candidates)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// One candidate per way, each covering only its own way
    fn exact_cover(target: &[u64]) -> Vec<Vec<u64>> {
        (0..target.len())
            .map(|way| {
                target
                    .iter()
                    .enumerate()
                    .map(|(w, row)| if w == way { *row } else { row + 1 })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn exact_cover_is_complete() {
        let target = vec![3, 7, 0, 12];
        assert!(is_complete_eviction_set(&target, &exact_cover(&target)));
    }

    #[test]
    fn removing_a_cover_breaks_it() {
        let target = vec![3, 7, 0, 12];
        let full = exact_cover(&target);
        for removed in 0..full.len() {
            let mut partial = full.clone();
            partial.remove(removed);
            assert!(!is_complete_eviction_set(&target, &partial));
        }
    }

    #[test]
    fn one_candidate_cannot_cover_two_ways() {
        // The first candidate matches both ways, but only one way can have it
        let target = vec![1, 2];
        let candidates = vec![vec![1, 2]];
        assert!(!is_complete_eviction_set(&target, &candidates));
    }

    #[test]
    fn backtracks_out_of_a_greedy_choice() {
        // Greedily giving candidate 0 to way 0 leaves way 1 uncovered, the only valid assignment
        // is way 0 -> candidate 1, way 1 -> candidate 0
        let target = vec![5, 9];
        let candidates = vec![vec![5, 9], vec![5, 0]];
        assert_eq!(find_matching(&target, &candidates), Some(vec![1, 0]));
    }

    #[test]
    fn extra_candidates_are_ignored() {
        let target = vec![4, 4, 4, 4];
        let mut candidates = vec![vec![0, 0, 0, 0]; 10];
        candidates.extend(exact_cover(&target));
        candidates.push(vec![1, 1, 1, 1]);
        let matching = find_matching(&target, &candidates).unwrap();
        assert_eq!(matching, vec![10, 11, 12, 13]);
    }

    #[test]
    fn empty_collection_is_incomplete() {
        assert!(!is_complete_eviction_set(&[1, 2, 3, 4], &[]));
    }
}
