//! Seeded benchmark inputs.

use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::buffer::HostBuffer;

/// Upper bound of generated values; inputs and the scale are uniform in
/// `[0, MAX_VALUE]`.
pub const MAX_VALUE: f32 = 1000.0;

/// Input buffer and scale factor of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct Workload {
    pub input: HostBuffer,
    pub scale: f32,
    pub seed: u64,
}

impl Workload {
    /// Draw `len` inputs and then the scale from a generator seeded with
    /// `seed`.  The same seed always yields the same workload.
    pub fn generate(len: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let input: Vec<f32> = (0..len).map(|_| rng.gen_range(0.0..=MAX_VALUE)).collect();
        let scale = rng.gen_range(0.0..=MAX_VALUE);
        Self {
            input: HostBuffer::from_vec(input),
            scale,
            seed,
        }
    }

    pub fn len(&self) -> usize {
        self.input.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_workload() {
        assert_eq!(Workload::generate(256, 7), Workload::generate(256, 7));
    }

    #[test]
    fn different_seed_different_workload() {
        assert_ne!(Workload::generate(256, 7).input, Workload::generate(256, 8).input);
    }

    #[test]
    fn values_in_range() {
        let workload = Workload::generate(1000, 1);
        assert!(workload
            .input
            .iter()
            .chain(std::iter::once(&workload.scale))
            .all(|v| (0.0..=MAX_VALUE).contains(v)));
    }
}
