//! Content-mix apportioning.
//!
//! A check may flag at most `capacity` items. That capacity is split across
//! content types in proportion to the configured weights using the largest
//! remainder method; capacity a type cannot use spills to the remaining
//! candidates in due order.

use std::collections::BTreeMap;

/// Splits `capacity` across `weights`. Types with zero weight get nothing.
/// Ties in the remainder step go to the type that sorts first.
pub fn allocate(capacity: u32, weights: &BTreeMap<String, u32>) -> BTreeMap<String, u32> {
    let total: u64 = weights.values().map(|&w| u64::from(w)).sum();
    let mut shares = BTreeMap::new();
    if total == 0 || capacity == 0 {
        return shares;
    }

    let mut remainders: Vec<(&String, u64)> = Vec::new();
    let mut assigned: u64 = 0;
    for (content_type, &weight) in weights.iter().filter(|(_, &w)| w > 0) {
        let exact = u64::from(capacity) * u64::from(weight);
        let floor = exact / total;
        assigned += floor;
        shares.insert(content_type.clone(), floor as u32);
        remainders.push((content_type, exact % total));
    }

    // Stable sort keeps name order among equal remainders.
    remainders.sort_by(|a, b| b.1.cmp(&a.1));
    let leftover = u64::from(capacity).saturating_sub(assigned);
    for (content_type, _) in remainders.into_iter().take(leftover as usize) {
        if let Some(share) = shares.get_mut(content_type) {
            *share += 1;
        }
    }
    shares
}

/// Picks up to `capacity` candidates. `candidates` holds the content type
/// of each item in due order; the returned indices are in due order too.
pub fn select(capacity: u32, candidates: &[&str], weights: &BTreeMap<String, u32>) -> Vec<usize> {
    let capacity = capacity as usize;
    if weights.values().all(|&w| w == 0) {
        return (0..candidates.len().min(capacity)).collect();
    }

    let mut remaining = allocate(capacity as u32, weights);
    let mut chosen = vec![false; candidates.len()];
    let mut taken = 0usize;

    for (i, content_type) in candidates.iter().enumerate() {
        if let Some(share) = remaining.get_mut(*content_type) {
            if *share > 0 {
                *share -= 1;
                chosen[i] = true;
                taken += 1;
            }
        }
    }

    for flag in chosen.iter_mut() {
        if taken >= capacity {
            break;
        }
        if !*flag {
            *flag = true;
            taken += 1;
        }
    }

    chosen
        .iter()
        .enumerate()
        .filter_map(|(i, &c)| c.then_some(i))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weights(pairs: &[(&str, u32)]) -> BTreeMap<String, u32> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_allocate_largest_remainder() {
        let w = weights(&[("article", 2), ("product", 1)]);
        let shares = allocate(4, &w);
        // exact shares 2.67 / 1.33
        assert_eq!(shares["article"], 3);
        assert_eq!(shares["product"], 1);
        assert_eq!(shares.values().sum::<u32>(), 4);
    }

    #[test]
    fn test_allocate_ties_by_name() {
        let w = weights(&[("b", 1), ("a", 1)]);
        let shares = allocate(1, &w);
        assert_eq!(shares["a"], 1);
        assert_eq!(shares["b"], 0);
    }

    #[test]
    fn test_select_respects_mix() {
        let w = weights(&[("article", 1), ("product", 1)]);
        let candidates = ["article", "article", "article", "product"];
        assert_eq!(select(2, &candidates, &w), vec![0, 3]);
    }

    #[test]
    fn test_unused_share_spills_in_due_order() {
        let w = weights(&[("article", 1), ("product", 1)]);
        let candidates = ["article", "article", "article"];
        assert_eq!(select(2, &candidates, &w), vec![0, 1]);
    }

    #[test]
    fn test_unweighted_types_only_get_spill() {
        let w = weights(&[("article", 1)]);
        let candidates = ["video", "article", "video"];
        assert_eq!(select(2, &candidates, &w), vec![0, 1]);
    }

    #[test]
    fn test_empty_mix_is_due_order() {
        let candidates = ["a", "b", "c"];
        assert_eq!(select(2, &candidates, &BTreeMap::new()), vec![0, 1]);
        assert!(select(0, &candidates, &BTreeMap::new()).is_empty());
    }
}
