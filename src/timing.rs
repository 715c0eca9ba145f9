//! Human-like pacing delays.
//!
//! Reading and writing a message both take a base time plus a per-letter
//! cost, an extra bonus when a selfie is attached, all scaled by a random
//! factor drawn from a deviation range.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// A `[min, max]` range a random scaling factor is drawn from.
///
/// Serialized as a two-element array so config files read `[0.8, 1.2]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 2]", into = "[f64; 2]")]
pub struct Deviation {
    pub min: f64,
    pub max: f64,
}

impl Deviation {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// A range that always yields the same factor.
    pub const fn fixed(factor: f64) -> Self {
        Self {
            min: factor,
            max: factor,
        }
    }

    pub fn validate(&self, name: &str) -> Result<()> {
        if !self.min.is_finite() || !self.max.is_finite() {
            return Err(Error::Config(format!("{name} must be finite")));
        }
        if self.min < 0.0 {
            return Err(Error::Config(format!("{name} must not be negative")));
        }
        if self.min > self.max {
            return Err(Error::Config(format!(
                "{name} minimum {} exceeds maximum {}",
                self.min, self.max
            )));
        }
        Ok(())
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        if self.min >= self.max {
            self.min
        } else {
            rng.gen_range(self.min..=self.max)
        }
    }
}

impl From<[f64; 2]> for Deviation {
    fn from(pair: [f64; 2]) -> Self {
        Self::new(pair[0], pair[1])
    }
}

impl From<Deviation> for [f64; 2] {
    fn from(d: Deviation) -> Self {
        [d.min, d.max]
    }
}

/// Seconds-based cost model for composing or reading one message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimingModel {
    pub base: f64,
    pub per_letter: f64,
    pub image_bonus: f64,
}

impl TimingModel {
    pub const fn new(base: f64, per_letter: f64, image_bonus: f64) -> Self {
        Self {
            base,
            per_letter,
            image_bonus,
        }
    }

    /// Length-independent pause: only `base` scaled by the deviation.
    pub const fn flat(base: f64) -> Self {
        Self::new(base, 0.0, 0.0)
    }

    /// Unscaled cost in seconds.
    pub fn cost(&self, text: &str, has_image: bool) -> f64 {
        let mut secs = self.base + text.chars().count() as f64 * self.per_letter;
        if has_image {
            secs += self.image_bonus;
        }
        secs
    }

    pub fn wait<R: Rng + ?Sized>(
        &self,
        text: &str,
        has_image: bool,
        deviation: Deviation,
        rng: &mut R,
    ) -> Duration {
        let secs = self.cost(text, has_image) * deviation.sample(rng);
        Duration::from_secs_f64(secs.max(0.0))
    }
}
