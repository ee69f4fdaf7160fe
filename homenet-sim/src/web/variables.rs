//! Random variables of a browsing session.

use homenet_core::SimError;
use homenet_core::config::WebObjectConfig;
use homenet_core::engine::{DeterministicRng, SimTime};
use rand_distr::{Exp, Normal};

/// Object sizes, page composition and reading time.
///
/// Every draw goes through the simulator's seeded RNG, so a browsing session
/// replays identically for the same seed.
#[derive(Debug, Clone)]
pub struct WebVariables {
    main_size: Normal<f64>,
    main_bounds: (u32, u32),
    embedded_size: Normal<f64>,
    embedded_bounds: (u32, u32),
    max_embedded: u32,
    reading_time: Exp<f64>,
    parsing_time: SimTime,
}

impl WebVariables {
    /// Builds the distributions from configuration.
    ///
    /// # Errors
    ///
    /// - `SimError::Configuration` - If a deviation is negative or not finite,
    ///   a size range is empty or starts at zero, or the mean reading time is
    ///   zero
    pub fn new(config: &WebObjectConfig) -> Result<Self, SimError> {
        let main_bounds = size_bounds(
            "main object",
            config.main_object_size_min,
            config.main_object_size_max,
        )?;
        let embedded_bounds = size_bounds(
            "embedded object",
            config.embedded_object_size_min,
            config.embedded_object_size_max,
        )?;
        let main_size = Normal::new(config.main_object_size_mean, config.main_object_size_std_dev)
            .map_err(|e| distribution_error("main object size", e))?;
        let embedded_size = Normal::new(
            config.embedded_object_size_mean,
            config.embedded_object_size_std_dev,
        )
        .map_err(|e| distribution_error("embedded object size", e))?;

        let reading_mean = config.reading_time_mean.as_secs_f64();
        if reading_mean <= 0.0 {
            return Err(SimError::Configuration {
                reason: "mean reading time must be positive".to_string(),
            });
        }
        let reading_time =
            Exp::new(1.0 / reading_mean).map_err(|e| distribution_error("reading time", e))?;

        Ok(Self {
            main_size,
            main_bounds,
            embedded_size,
            embedded_bounds,
            max_embedded: config.max_embedded_objects,
            reading_time,
            parsing_time: config.parsing_time,
        })
    }

    /// Size of the next main object in bytes, clamped to the configured bounds.
    pub fn main_object_size(&self, rng: &mut DeterministicRng) -> u32 {
        truncate(rng.sample(&self.main_size), self.main_bounds)
    }

    /// Size of the next embedded object in bytes, clamped to the configured bounds.
    pub fn embedded_object_size(&self, rng: &mut DeterministicRng) -> u32 {
        truncate(rng.sample(&self.embedded_size), self.embedded_bounds)
    }

    /// Embedded objects on the next page, uniform over `0..=max`.
    pub fn embedded_object_count(&self, rng: &mut DeterministicRng) -> u32 {
        rng.random_range(0, u64::from(self.max_embedded) + 1) as u32
    }

    /// Time the user spends on a page before requesting the next one.
    pub fn reading_time(&self, rng: &mut DeterministicRng) -> SimTime {
        let secs = rng.sample(&self.reading_time);
        SimTime::try_from_secs_f64(secs).unwrap_or(SimTime::ZERO)
    }

    /// Delay between a main object arriving and the first embedded request.
    pub fn parsing_time(&self) -> SimTime {
        self.parsing_time
    }
}

fn truncate(value: f64, (min, max): (u32, u32)) -> u32 {
    value.round().clamp(f64::from(min), f64::from(max)) as u32
}

// A zero-byte object has no segments and would never complete.
fn size_bounds(name: &str, min: u32, max: u32) -> Result<(u32, u32), SimError> {
    if min == 0 || min > max {
        return Err(SimError::Configuration {
            reason: format!("{name} size range {min}..={max} must start at one byte or more"),
        });
    }
    Ok((min, max))
}

fn distribution_error(name: &str, error: impl std::fmt::Display) -> SimError {
    SimError::Configuration {
        reason: format!("invalid {name} distribution: {error}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_main_object_sizes_center_on_mean() {
        let variables = WebVariables::new(&WebObjectConfig::default()).unwrap();
        let mut rng = DeterministicRng::from_seed(5);

        let draws: Vec<u32> = (0..2_000).map(|_| variables.main_object_size(&mut rng)).collect();
        let mean = draws.iter().map(|d| f64::from(*d)).sum::<f64>() / draws.len() as f64;

        assert!((mean - 102_400.0).abs() < 5_000.0, "mean {mean}");
        assert!(draws.iter().all(|d| (100..=2_000_000).contains(d)));
    }

    #[test]
    fn test_sizes_respect_bounds() {
        let config = WebObjectConfig {
            embedded_object_size_mean: 10.0,
            embedded_object_size_std_dev: 1_000.0,
            embedded_object_size_min: 50,
            embedded_object_size_max: 400,
            ..WebObjectConfig::default()
        };
        let variables = WebVariables::new(&config).unwrap();
        let mut rng = DeterministicRng::from_seed(1);

        for _ in 0..500 {
            let size = variables.embedded_object_size(&mut rng);
            assert!((50..=400).contains(&size));
        }
    }

    #[test]
    fn test_embedded_count_covers_range() {
        let variables = WebVariables::new(&WebObjectConfig::default()).unwrap();
        let mut rng = DeterministicRng::from_seed(3);

        let mut seen = [false; 6];
        for _ in 0..500 {
            let count = variables.embedded_object_count(&mut rng);
            assert!(count <= 5);
            seen[count as usize] = true;
        }
        assert!(seen.iter().all(|s| *s));
    }

    #[test]
    fn test_same_seed_same_draws() {
        let variables = WebVariables::new(&WebObjectConfig::default()).unwrap();
        let mut a = DeterministicRng::from_seed(11);
        let mut b = DeterministicRng::from_seed(11);

        for _ in 0..20 {
            assert_eq!(variables.reading_time(&mut a), variables.reading_time(&mut b));
        }
    }

    #[test]
    fn test_negative_deviation_rejected() {
        let config = WebObjectConfig {
            main_object_size_std_dev: -1.0,
            ..WebObjectConfig::default()
        };

        assert!(matches!(
            WebVariables::new(&config),
            Err(SimError::Configuration { .. })
        ));
    }

    #[test]
    fn test_zero_byte_objects_rejected() {
        let config = WebObjectConfig {
            embedded_object_size_min: 0,
            ..WebObjectConfig::default()
        };

        assert!(matches!(
            WebVariables::new(&config),
            Err(SimError::Configuration { .. })
        ));
    }
}
