//! Entropy and rate calculators used by the window aggregator.

use std::collections::HashMap;
use std::hash::Hash;

use super::WindowSize;

/// Shannon entropy in bits of a multiset of categorical values.
///
/// H = -Σ p_i · log2(p_i), with p_i = count_i / n.
///
/// Empty and single-category inputs return exactly 0.0. Category counts are
/// summed in sorted order so the result does not depend on hash iteration.
pub fn entropy<I, T>(values: I) -> f64
where
    I: IntoIterator<Item = T>,
    T: Hash + Eq,
{
    let mut counts: HashMap<T, usize> = HashMap::new();
    let mut total = 0usize;
    for v in values {
        *counts.entry(v).or_default() += 1;
        total += 1;
    }
    if counts.len() <= 1 {
        return 0.0;
    }

    let mut counts: Vec<usize> = counts.into_values().collect();
    counts.sort_unstable();

    let n = total as f64;
    let mut h = 0.0;
    for count in counts {
        let p = count as f64 / n;
        h -= p * p.log2();
    }
    h
}

/// Normalize a per-window total to a per-second rate.
pub fn per_second(total: f64, window: WindowSize) -> f64 {
    total / window.secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entropy_empty_and_single() {
        assert_eq!(entropy(Vec::<&str>::new()), 0.0);
        assert_eq!(entropy(["a"]), 0.0);
        assert_eq!(entropy(["a", "a", "a", "a"]), 0.0);
    }

    #[test]
    fn test_entropy_fifty_fifty_is_one_bit() {
        let h = entropy(["a", "b", "a", "b"]);
        assert!((h - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_entropy_uniform_over_eight() {
        let h = entropy(0..8);
        assert!((h - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_entropy_skewed_is_between() {
        let h = entropy(["a", "a", "a", "b"]);
        // -(0.75 log2 0.75 + 0.25 log2 0.25) ≈ 0.8113
        assert!((h - 0.811_278).abs() < 1e-5);
    }

    #[test]
    fn test_per_second() {
        let half = WindowSize::new(0.5).unwrap();
        assert_eq!(per_second(10.0, half), 20.0);
        assert_eq!(per_second(10.0, WindowSize::ONE_SECOND), 10.0);
    }
}
