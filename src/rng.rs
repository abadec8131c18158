use std::time::{SystemTime, UNIX_EPOCH};

use rand::{rngs::StdRng, Rng, SeedableRng};
use rand_distr::{Distribution, Normal, Uniform};

pub enum Dist {
    Normal(Normal<f32>),
    Uniform(Uniform<f32>),
}

impl Dist {
    pub fn new(mean: f32, stdev: f32, use_gaussian: bool) -> Self {
        match Normal::new(mean, stdev) {
            Ok(normal) if use_gaussian => Self::Normal(normal),
            _ => Self::Uniform(Uniform::new_inclusive(mean - stdev, mean + stdev)),
        }
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f32 {
        match self {
            Dist::Normal(x) => x.sample(rng),
            Dist::Uniform(x) => x.sample(rng),
        }
    }
}

pub fn vec_f32<R: Rng + ?Sized>(rng: &mut R, length: usize, mean: f32, stdev: f32, use_gaussian: bool) -> Vec<f32> {
    let dist = Dist::new(mean, stdev, use_gaussian);
    (0..length).map(|_| dist.sample(rng)).collect()
}

/// Table of uniform `[0, 1)` samples used to pick dropped neurons. The length is
/// rounded up to a power of two so offsets can be wrapped with a mask.
pub fn random_uniform_list<R: Rng + ?Sized>(rng: &mut R, length: usize) -> Vec<f32> {
    let length = length.max(1).next_power_of_two();
    (0..length).map(|_| rng.gen::<f32>()).collect()
}

pub fn seeded(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

pub fn with_time_seed() -> StdRng {
    let seed = SystemTime::now().duration_since(UNIX_EPOCH).map(|t| t.as_micros() as u64).unwrap_or_default();
    seeded(seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_table_is_power_of_two() {
        let mut rng = seeded(1);
        let table = random_uniform_list(&mut rng, 1000);

        assert_eq!(table.len(), 1024);
        assert!(table.iter().all(|x| (0.0..1.0).contains(x)));
    }

    #[test]
    fn uniform_init_stays_in_range() {
        let mut rng = seeded(7);
        let values = vec_f32(&mut rng, 256, 0.0, 0.25, false);

        assert!(values.iter().all(|x| x.abs() <= 0.25));
        assert_eq!(vec_f32(&mut seeded(3), 8, 0.0, 1.0, true), vec_f32(&mut seeded(3), 8, 0.0, 1.0, true));
    }
}
