use horizon_core::Plant;
use nalgebra::DVector;
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal, NormalError};

/// Adds zero-mean Gaussian noise to every measured state component of `P`.
///
/// The measurement is sampled once per sampling interval so that repeated reads within a tick
/// agree. Failure detection looks at the true state.
#[derive(Debug, Clone)]
pub struct NoisyPlant<P> {
    inner: P,
    noise: Normal<f64>,
    rng: StdRng,
    measured: DVector<f64>,
}

impl<P: Plant> NoisyPlant<P> {
    /// Wrap `inner` with noise of standard deviation `std_dev`, seeded for reproducible runs.
    ///
    /// `std_dev` must be finite and non-negative.
    pub fn new(inner: P, std_dev: f64, seed: u64) -> Result<Self, NormalError> {
        // Normal::new only rejects non-finite values
        if !(std_dev >= 0.0 && std_dev.is_finite()) {
            return Err(NormalError::BadVariance);
        }
        let noise = Normal::new(0.0, std_dev)?;
        let mut rng = StdRng::seed_from_u64(seed);
        let measured = Self::measure(&inner, &noise, &mut rng);
        Ok(Self {
            inner,
            noise,
            rng,
            measured,
        })
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// The noise-free state.
    pub fn true_state(&self) -> DVector<f64> {
        self.inner.state()
    }

    fn measure(inner: &P, noise: &Normal<f64>, rng: &mut StdRng) -> DVector<f64> {
        inner.state().map(|x| x + noise.sample(rng))
    }
}

impl<P: Plant> Plant for NoisyPlant<P> {
    fn state(&self) -> DVector<f64> {
        self.measured.clone()
    }

    fn apply(&mut self, control: &DVector<f64>, dt: f64) {
        self.inner.apply(control, dt);
        self.measured = Self::measure(&self.inner, &self.noise, &mut self.rng);
    }

    fn is_failed(&self) -> bool {
        self.inner.is_failed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FirstOrderSystem;

    #[test]
    fn noise_is_reproducible() {
        let a = NoisyPlant::new(FirstOrderSystem::new(1.0, 3.0), 0.1, 7).unwrap();
        let b = NoisyPlant::new(FirstOrderSystem::new(1.0, 3.0), 0.1, 7).unwrap();
        assert_eq!(a.state(), b.state());
        assert_eq!(a.state(), a.state());
        assert_ne!(a.state(), a.true_state());
    }

    #[test]
    fn zero_noise_is_transparent() {
        let mut plant = NoisyPlant::new(FirstOrderSystem::new(1.0, 3.0), 0.0, 1).unwrap();
        plant.apply(&DVector::from_vec(vec![1.0]), 0.1);
        assert_eq!(plant.state(), plant.true_state());
        assert_eq!(plant.inner().output(), plant.true_state()[0]);
    }

    #[test]
    fn noise_has_the_requested_spread() {
        let mut plant = NoisyPlant::new(FirstOrderSystem::new(1.0, 0.0), 0.5, 42).unwrap();
        let samples: Vec<f64> = (0..4000)
            .map(|_| {
                plant.apply(&DVector::zeros(1), 0.1);
                plant.state()[0]
            })
            .collect();
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let var = samples.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / samples.len() as f64;
        assert!(mean.abs() < 0.05);
        assert!((var.sqrt() - 0.5).abs() < 0.05);
    }

    #[test]
    fn negative_spread_is_rejected() {
        for std_dev in [-1.0, -1e-9, f64::NAN, f64::INFINITY] {
            let result = NoisyPlant::new(FirstOrderSystem::default(), std_dev, 0);
            assert!(matches!(result, Err(NormalError::BadVariance)), "{std_dev}");
        }
    }
}
