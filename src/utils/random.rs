//! Explicit randomness
//!
//! A single [`RandomContext`] is created from the configured seed and handed to
//! everything that needs randomness. Each data stream gets its own generator derived
//! as `seed + worker_index`, so streams never share state.

use burn::tensor::backend::Backend;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Fixed worker indices for the generators the trainer derives
pub mod workers {
    pub const SAMPLING: u64 = 0;
    pub const LABELED: u64 = 1;
    pub const WEAK: u64 = 2;
    pub const STRONG: u64 = 3;
    pub const AUGMENT: u64 = 4;
    pub const FINETUNE: u64 = 5;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RandomContext {
    seed: u64,
}

impl RandomContext {
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Generator for worker `index`, seeded with `seed + index`
    pub fn worker_rng(&self, index: u64) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(index))
    }

    /// Seed Burn's parameter initialisation for backend `B`
    pub fn seed_backend<B: Backend>(&self) {
        B::seed(self.seed);
    }
}
