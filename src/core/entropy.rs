use rand::SeedableRng;
use rand::rngs::StdRng;

/// Source of per-worker randomness
///
/// `Seeded` makes every permutation and hold duration of a run reproducible;
/// the interleaving of threads stays up to the OS scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Entropy {
    /// Fresh OS seed for every worker
    #[default]
    Os,
    /// Deterministic streams derived from one seed
    Seeded(u64),
}

impl Entropy {
    /// Random number generator for the worker at `index`
    pub fn rng_for(&self, index: usize) -> StdRng {
        match *self {
            Entropy::Os => StdRng::from_os_rng(),
            Entropy::Seeded(seed) => {
                // Spread worker indices so neighbouring workers get unrelated streams
                let stream = (index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
                StdRng::seed_from_u64(seed ^ stream)
            }
        }
    }
}
