//! Seeded randomness for photon counts and failure decisions.
//!
//! One ChaCha8 stream is shared by everything in a mock engine, so a fixed
//! seed reproduces both the images and any injected faults.

use parking_lot::Mutex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Thread-safe seeded RNG.
pub struct MockRng {
    inner: Mutex<ChaCha8Rng>,
}

impl MockRng {
    /// RNG with the given seed, or seeded from the OS when `None`.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => ChaCha8Rng::seed_from_u64(s),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            inner: Mutex::new(rng),
        }
    }

    /// Bernoulli trial with probability `rate`, clamped to `[0, 1]`.
    pub fn chance(&self, rate: f64) -> bool {
        if rate <= 0.0 {
            return false;
        }
        if rate >= 1.0 {
            return true;
        }
        self.inner.lock().gen::<f64>() < rate
    }

    /// Photon counts for one pixel of one frame.
    ///
    /// Uniform on `1..=2 * mean`, so a live detector never reports an
    /// exact zero and the long-run average is close to `mean`.
    pub fn photon_counts(&self, mean: u16) -> u16 {
        let upper = mean.max(1).saturating_mul(2);
        self.inner.lock().gen_range(1..=upper)
    }

    /// Fill `out` with photon counts scaled per pixel by `brightness`.
    ///
    /// Holds the lock once for the whole frame.
    pub fn fill_counts(&self, brightness: &[u16], out: &mut [u16]) {
        let mut rng = self.inner.lock();
        for (slot, &mean) in out.iter_mut().zip(brightness) {
            let upper = mean.max(1).saturating_mul(2);
            *slot = rng.gen_range(1..=upper);
        }
    }
}

impl Default for MockRng {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Debug for MockRng {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRng").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_is_reproducible() {
        let a = MockRng::new(Some(7));
        let b = MockRng::new(Some(7));
        let xs: Vec<u16> = (0..32).map(|_| a.photon_counts(10)).collect();
        let ys: Vec<u16> = (0..32).map(|_| b.photon_counts(10)).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn test_counts_never_zero() {
        let rng = MockRng::new(Some(1));
        assert!((0..1000).all(|_| rng.photon_counts(0) >= 1));

        let brightness = vec![0u16, 1, 5, 50];
        let mut out = vec![0u16; 4];
        rng.fill_counts(&brightness, &mut out);
        assert!(out.iter().all(|&c| c >= 1));
        assert!(out[3] <= 100);
    }

    #[test]
    fn test_chance_edges() {
        let rng = MockRng::new(Some(3));
        assert!(!rng.chance(0.0));
        assert!(!rng.chance(-1.0));
        assert!(rng.chance(1.0));
        assert!(rng.chance(2.0));
    }
}
