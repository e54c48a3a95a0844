//! Dynamic temperature schedule.
//!
//! The first iteration runs at the configured temperature. Every later
//! iteration moves the previous temperature toward the floor:
//!
//! ```text
//! t' = floor + (t - floor) * f
//! f  = decay      if the previous response was short
//!      decay^2    otherwise
//! ```
//!
//! Short responses suggest the model has not explored the task yet, so the
//! schedule cools more slowly after them. The result depends only on the
//! loop index, the previous temperature and the previous response, so two
//! runs over identical history use identical temperatures.

use relay_contracts::config::AgentConfig;

/// Monotonically damped temperature schedule.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DampedTemperature {
    pub initial: f64,
    pub floor: f64,
    pub decay: f64,
    /// Responses with fewer characters than this count as short.
    pub short_response_chars: usize,
}

impl DampedTemperature {
    pub const DEFAULT_DECAY: f64 = 0.8;
    pub const SHORT_RESPONSE_CHARS: usize = 200;

    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            initial: config.temperature,
            floor: config.temperature_floor.min(config.temperature),
            decay: Self::DEFAULT_DECAY,
            short_response_chars: Self::SHORT_RESPONSE_CHARS,
        }
    }

    /// Temperature for `loop_index` (1-based).
    ///
    /// `previous` is the temperature used on the prior iteration and
    /// `previous_response` the response it produced.
    pub fn temperature_for(&self, loop_index: u32, previous: f64, previous_response: Option<&str>) -> f64 {
        let Some(response) = previous_response.filter(|_| loop_index > 1) else {
            return self.initial;
        };

        let factor = if response.chars().count() < self.short_response_chars {
            self.decay
        } else {
            self.decay * self.decay
        };

        let previous = previous.max(self.floor);
        self.floor + (previous - self.floor) * factor
    }
}
