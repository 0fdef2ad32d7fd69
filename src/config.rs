//! Trainer configuration.

use crate::ConjugateGradientError;
use crate::direction::DirectionMethod;
use crate::history::{HistoryChannel, HistoryChannels};

/// Settings for one training run. Immutable while the run is in progress.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Configuration {
    pub direction_method: DirectionMethod,

    // Advisory thresholds: reaching them only logs a warning.
    pub warning_parameters_norm: f64,
    pub warning_gradient_norm: f64,
    pub warning_training_rate: f64,

    // Reaching any of these terminates the run with a numerical failure.
    pub error_parameters_norm: f64,
    pub error_gradient_norm: f64,
    /// Also the largest training rate the line search may try.
    pub error_training_rate: f64,

    pub minimum_parameters_increment_norm: f64,
    pub minimum_performance_increase: f64,
    pub performance_goal: f64,
    pub gradient_norm_goal: f64,
    /// Consecutive selection performance increases that trigger early stopping.
    pub maximum_selection_performance_decreases: usize,
    pub maximum_iterations_number: usize,
    /// Wall-clock budget in seconds, checked between iterations.
    pub maximum_time: f64,

    /// Force a gradient-descent step every `n` steps.
    pub restart_period: Option<usize>,

    pub reserved_history: HistoryChannels,

    /// Progress is logged every `display_period` iterations.
    pub display_period: usize,
    /// The checkpoint callback fires every `save_period` iterations.
    pub save_period: usize,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            direction_method: DirectionMethod::PolakRibiere,
            warning_parameters_norm: 1e6,
            warning_gradient_norm: 1e6,
            warning_training_rate: 1e6,
            error_parameters_norm: 1e10,
            error_gradient_norm: 1e10,
            error_training_rate: 1e10,
            minimum_parameters_increment_norm: 0.0,
            minimum_performance_increase: 0.0,
            performance_goal: f64::MIN,
            gradient_norm_goal: 0.0,
            maximum_selection_performance_decreases: 1_000_000,
            maximum_iterations_number: 1000,
            maximum_time: 1000.0,
            restart_period: None,
            reserved_history: HistoryChannels::none(),
            display_period: 5,
            save_period: usize::MAX,
        }
    }
}

impl Configuration {
    /// Rejects NaN thresholds, negative norms, rates and times, zero error limits
    /// and zero periods.
    pub fn validate(&self) -> Result<(), ConjugateGradientError> {
        let non_negative = [
            ("warning_parameters_norm", self.warning_parameters_norm),
            ("warning_gradient_norm", self.warning_gradient_norm),
            ("warning_training_rate", self.warning_training_rate),
            ("error_parameters_norm", self.error_parameters_norm),
            ("error_gradient_norm", self.error_gradient_norm),
            ("error_training_rate", self.error_training_rate),
            ("minimum_parameters_increment_norm", self.minimum_parameters_increment_norm),
            ("minimum_performance_increase", self.minimum_performance_increase),
            ("gradient_norm_goal", self.gradient_norm_goal),
            ("maximum_time", self.maximum_time),
        ];
        for (name, value) in non_negative {
            if value.is_nan() || value < 0.0 {
                return Err(ConjugateGradientError::InvalidConfiguration {
                    name,
                    value: value.to_string(),
                });
            }
        }
        // Norms are never negative and the initial training rate is zero, so a zero limit
        // would end every run before the first step.
        let positive = [
            ("error_parameters_norm", self.error_parameters_norm),
            ("error_gradient_norm", self.error_gradient_norm),
            ("error_training_rate", self.error_training_rate),
        ];
        for (name, value) in positive {
            if value <= 0.0 {
                return Err(ConjugateGradientError::InvalidConfiguration {
                    name,
                    value: value.to_string(),
                });
            }
        }
        if self.performance_goal.is_nan() {
            return Err(ConjugateGradientError::InvalidConfiguration {
                name: "performance_goal",
                value: self.performance_goal.to_string(),
            });
        }
        let periods = [
            ("display_period", Some(self.display_period)),
            ("save_period", Some(self.save_period)),
            ("restart_period", self.restart_period),
        ];
        for (name, period) in periods {
            if period == Some(0) {
                return Err(ConjugateGradientError::InvalidConfiguration {
                    name,
                    value: "0".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Reserves (or releases) every history channel at once.
    pub fn set_reserve_all_training_history(&mut self, reserve: bool) {
        for channel in HistoryChannel::ALL {
            self.reserved_history.set(channel, reserve);
        }
    }
}
