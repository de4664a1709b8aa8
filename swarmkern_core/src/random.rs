//! Per-thread random state handed to agent functions.

use rand::distributions::uniform::SampleUniform;
use rand::distributions::{Distribution, Standard};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{LogNormal, Normal};

/// Random number source of one agent for one launch.
///
/// Seeded from the device seed, a per-launch stream and the thread index
/// (see `DeviceContext::thread_rng`), so draws do not depend on scheduling.
#[derive(Debug, Clone)]
pub struct AgentRandom {
    rng: ChaCha8Rng,
}

impl AgentRandom {
    pub fn new(rng: ChaCha8Rng) -> Self {
        Self { rng }
    }

    /// Uniform draw; floats are in `[0, 1)`.
    pub fn uniform<T>(&mut self) -> T
    where
        Standard: Distribution<T>,
    {
        self.rng.gen()
    }

    /// Uniform draw in `[min, max]`. Returns `min` if the range is empty.
    pub fn uniform_range<T>(&mut self, min: T, max: T) -> T
    where
        T: SampleUniform + PartialOrd + Copy,
    {
        if min < max {
            self.rng.gen_range(min..=max)
        } else {
            min
        }
    }

    /// Standard normal draw.
    pub fn normal(&mut self) -> f32 {
        Normal::new(0.0f32, 1.0)
            .map(|d| d.sample(&mut self.rng))
            .unwrap_or(0.0)
    }

    /// Log-normal draw with the given mean and standard deviation of the underlying normal.
    ///
    /// A negative or non-finite `std_dev` yields `exp(mean)` without drawing.
    pub fn log_normal(&mut self, mean: f32, std_dev: f32) -> f32 {
        if std_dev < 0.0 || !std_dev.is_finite() {
            return mean.exp();
        }
        match LogNormal::new(mean, std_dev) {
            Ok(dist) => dist.sample(&mut self.rng),
            Err(_) => mean.exp(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn random(seed: u64) -> AgentRandom {
        AgentRandom::new(ChaCha8Rng::seed_from_u64(seed))
    }

    #[test]
    fn test_random_is_deterministic() {
        let mut a = random(42);
        let mut b = random(42);
        for _ in 0..16 {
            assert_eq!(a.uniform::<u32>(), b.uniform::<u32>());
            assert_eq!(a.normal(), b.normal());
        }
    }

    #[test]
    fn test_uniform_ranges() {
        let mut rng = random(7);
        for _ in 0..256 {
            let f = rng.uniform::<f32>();
            assert!((0.0..1.0).contains(&f));
            let i = rng.uniform_range(-3i32, 3);
            assert!((-3..=3).contains(&i));
        }
        assert_eq!(rng.uniform_range(5u32, 5), 5);
        assert_eq!(rng.uniform_range(9u32, 2), 9);
    }

    #[test]
    fn test_log_normal_is_positive() {
        let mut rng = random(3);
        for _ in 0..64 {
            assert!(rng.log_normal(0.0, 0.5) > 0.0);
        }
        assert_eq!(rng.log_normal(0.0, -1.0), 1.0);
        assert_eq!(rng.log_normal(0.0, f32::NAN), 1.0);
        assert_eq!(rng.log_normal(1.0, f32::INFINITY), 1.0f32.exp());
    }
}
