// ============================================================
// Layer 4 — Seeded Splitter
// ============================================================
// Shuffles samples with a seeded RNG and carves off a holdout
// set (validation or test):
//
//   holdout size = floor(total * ratio)
//
// The floor means a tiny dataset can end up with an empty
// holdout; callers decide whether that is acceptable.
//
// The same seed always yields the same split, so a test stage
// run later in a separate process sees the same partition as
// the fit stage did.
//
// Uses Fisher-Yates shuffle via rand::seq::SliceRandom on a
// StdRng seeded from the experiment's random_seed.
//
// Reference: rand crate documentation

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

/// Shuffle `samples` and split off a holdout of `floor(n * ratio)` items.
///
/// # Returns
/// A tuple (remaining_samples, holdout_samples)
///
/// # Example
/// ```ignore
/// let (train, val) = split_by_ratio(all_samples, 0.2, 42);
/// // val has floor(20%) of samples, train has the rest
/// ```
pub fn split_by_ratio<T>(mut samples: Vec<T>, ratio: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    let mut rng = StdRng::seed_from_u64(seed);
    samples.shuffle(&mut rng);

    let total        = samples.len();
    let holdout_size = ((total as f64) * ratio.clamp(0.0, 1.0)).floor() as usize;

    // split_off(n) leaves [0..n] in place and returns [n..total]
    let holdout = samples.split_off(total - holdout_size.min(total));

    tracing::debug!(
        "Dataset split (seed {}): {} kept, {} held out",
        seed,
        samples.len(),
        holdout.len(),
    );

    (samples, holdout)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_holdout_size_is_floored() {
        let items: Vec<usize> = (0..10).collect();
        let (train, val)      = split_by_ratio(items, 0.25, 42);
        assert_eq!(train.len(), 8);
        assert_eq!(val.len(),   2);
    }

    #[test]
    fn test_all_items_preserved() {
        let items: Vec<usize> = (0..50).collect();
        let (train, val)      = split_by_ratio(items, 0.3, 1);

        let mut all: Vec<usize> = train.into_iter().chain(val).collect();
        all.sort_unstable();
        assert_eq!(all, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn test_same_seed_same_split() {
        let a = split_by_ratio((0..40).collect::<Vec<usize>>(), 0.2, 42);
        let b = split_by_ratio((0..40).collect::<Vec<usize>>(), 0.2, 42);
        let c = split_by_ratio((0..40).collect::<Vec<usize>>(), 0.2, 43);
        assert_eq!(a, b);
        assert_ne!(a.1, c.1);
    }

    #[test]
    fn test_empty_dataset() {
        let (train, val) = split_by_ratio(Vec::<usize>::new(), 0.2, 0);
        assert!(train.is_empty());
        assert!(val.is_empty());
    }

    #[test]
    fn test_zero_ratio_keeps_everything() {
        let (train, val) = split_by_ratio((0..10).collect::<Vec<usize>>(), 0.0, 0);
        assert_eq!(train.len(), 10);
        assert!(val.is_empty());
    }
}
