//! Stopping criteria and warning/error threshold checks.

use std::fmt;

use crate::line_search::LineSearchError;
use crate::{Configuration, IterationState};

/// Why a run terminated. Exactly one reason is recorded per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum StoppingReason {
    PerformanceGoalReached,
    GradientNormGoalReached,
    MinimumParametersIncrementReached,
    PerformanceIncreaseBelowMinimum,
    EarlyStoppingOnSelection,
    MaximumTimeExceeded,
    MaximumIterationsReached,
    NumericalFailure,
}

impl StoppingReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoppingReason::PerformanceGoalReached => "PerformanceGoalReached",
            StoppingReason::GradientNormGoalReached => "GradientNormGoalReached",
            StoppingReason::MinimumParametersIncrementReached => "MinimumParametersIncrementReached",
            StoppingReason::PerformanceIncreaseBelowMinimum => "PerformanceIncreaseBelowMinimum",
            StoppingReason::EarlyStoppingOnSelection => "EarlyStoppingOnSelection",
            StoppingReason::MaximumTimeExceeded => "MaximumTimeExceeded",
            StoppingReason::MaximumIterationsReached => "MaximumIterationsReached",
            StoppingReason::NumericalFailure => "NumericalFailure",
        }
    }

    /// True for every reason except [`StoppingReason::NumericalFailure`].
    pub fn is_success(&self) -> bool {
        !matches!(self, StoppingReason::NumericalFailure)
    }
}

impl fmt::Display for StoppingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Detail behind a [`StoppingReason::NumericalFailure`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NumericalFailure {
    #[error("Parameters norm {value} reached the error threshold {limit}.")]
    ParametersNorm { value: f64, limit: f64 },
    #[error("Gradient norm {value} reached the error threshold {limit}.")]
    GradientNorm { value: f64, limit: f64 },
    #[error("Training rate {value} reached the error threshold {limit}.")]
    TrainingRate { value: f64, limit: f64 },
    #[error("Line search failed: {0}")]
    LineSearch(#[from] LineSearchError),
}

/// Quantities that only exist once a step has been taken.
#[derive(Debug, Clone, Copy)]
pub struct StepProgress {
    pub previous_performance: f64,
}

/// Checks the stopping criteria in priority order; the first one that holds wins.
///
/// `step` is `None` for the initial state, which skips the increment and
/// performance-increase criteria. The selection criterion is skipped when no
/// selection evaluator is attached.
pub fn check_stopping(
    config: &Configuration,
    state: &IterationState,
    step: Option<StepProgress>,
    selection_enabled: bool,
) -> Option<StoppingReason> {
    if state.performance <= config.performance_goal {
        return Some(StoppingReason::PerformanceGoalReached);
    }
    if state.gradient_norm <= config.gradient_norm_goal {
        return Some(StoppingReason::GradientNormGoalReached);
    }
    if let Some(step) = step {
        if state.parameters_increment_norm <= config.minimum_parameters_increment_norm {
            return Some(StoppingReason::MinimumParametersIncrementReached);
        }
        if step.previous_performance - state.performance <= config.minimum_performance_increase {
            return Some(StoppingReason::PerformanceIncreaseBelowMinimum);
        }
    }
    if selection_enabled
        && state.selection_increases >= config.maximum_selection_performance_decreases
    {
        return Some(StoppingReason::EarlyStoppingOnSelection);
    }
    if state.elapsed_time >= config.maximum_time {
        return Some(StoppingReason::MaximumTimeExceeded);
    }
    if state.iteration >= config.maximum_iterations_number {
        return Some(StoppingReason::MaximumIterationsReached);
    }
    None
}

/// Returns the first error threshold reached by the parameters norm, gradient norm
/// or training rate. Non-finite norms count as reached.
pub fn check_error_thresholds(config: &Configuration, state: &IterationState) -> Option<NumericalFailure> {
    let breached = |value: f64, limit: f64| !value.is_finite() || value >= limit;
    if breached(state.parameters_norm, config.error_parameters_norm) {
        return Some(NumericalFailure::ParametersNorm {
            value: state.parameters_norm,
            limit: config.error_parameters_norm,
        });
    }
    if breached(state.gradient_norm, config.error_gradient_norm) {
        return Some(NumericalFailure::GradientNorm {
            value: state.gradient_norm,
            limit: config.error_gradient_norm,
        });
    }
    if breached(state.training_rate, config.error_training_rate) {
        return Some(NumericalFailure::TrainingRate {
            value: state.training_rate,
            limit: config.error_training_rate,
        });
    }
    None
}

/// Logs a warning for every warning threshold reached. Returns how many fired.
pub fn warn_thresholds(config: &Configuration, state: &IterationState) -> usize {
    let mut fired = 0;
    if state.parameters_norm >= config.warning_parameters_norm {
        log::warn!(
            "[CG] Iteration {}: parameters norm is {:.6e}.",
            state.iteration,
            state.parameters_norm
        );
        fired += 1;
    }
    if state.gradient_norm >= config.warning_gradient_norm {
        log::warn!(
            "[CG] Iteration {}: gradient norm is {:.6e}.",
            state.iteration,
            state.gradient_norm
        );
        fired += 1;
    }
    if state.training_rate >= config.warning_training_rate {
        log::warn!(
            "[CG] Iteration {}: training rate is {:.6e}.",
            state.iteration,
            state.training_rate
        );
        fired += 1;
    }
    fired
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn state() -> IterationState {
        IterationState {
            iteration: 3,
            parameters: array![1.0, 1.0],
            parameters_norm: 2f64.sqrt(),
            performance: 5.0,
            selection_performance: None,
            gradient: array![3.0, 4.0],
            gradient_norm: 5.0,
            training_direction: array![-3.0, -4.0],
            training_rate: 0.1,
            parameters_increment_norm: 0.5,
            elapsed_time: 1.0,
            selection_increases: 0,
        }
    }

    fn step() -> Option<StepProgress> {
        Some(StepProgress { previous_performance: 6.0 })
    }

    #[test]
    fn test_nothing_fires_with_default_configuration() {
        assert_eq!(check_stopping(&Configuration::default(), &state(), step(), true), None);
    }

    #[test]
    fn test_performance_goal_wins_over_gradient_goal() {
        let config = Configuration {
            performance_goal: 5.0,
            gradient_norm_goal: 5.0,
            ..Configuration::default()
        };
        assert_eq!(
            check_stopping(&config, &state(), step(), false),
            Some(StoppingReason::PerformanceGoalReached)
        );
    }

    #[test]
    fn test_boundary_values_stop() {
        let s = state();
        let cases = [
            (
                Configuration { gradient_norm_goal: 5.0, ..Configuration::default() },
                StoppingReason::GradientNormGoalReached,
            ),
            (
                Configuration { minimum_parameters_increment_norm: 0.5, ..Configuration::default() },
                StoppingReason::MinimumParametersIncrementReached,
            ),
            (
                Configuration { minimum_performance_increase: 1.0, ..Configuration::default() },
                StoppingReason::PerformanceIncreaseBelowMinimum,
            ),
            (
                Configuration { maximum_time: 1.0, ..Configuration::default() },
                StoppingReason::MaximumTimeExceeded,
            ),
            (
                Configuration { maximum_iterations_number: 3, ..Configuration::default() },
                StoppingReason::MaximumIterationsReached,
            ),
        ];
        for (config, expected) in cases {
            assert_eq!(check_stopping(&config, &s, step(), false), Some(expected));
        }
    }

    #[test]
    fn test_step_criteria_are_skipped_for_initial_state() {
        let config = Configuration {
            minimum_parameters_increment_norm: 10.0,
            minimum_performance_increase: 10.0,
            ..Configuration::default()
        };
        assert_eq!(check_stopping(&config, &state(), None, false), None);
    }

    #[test]
    fn test_selection_criterion_requires_evaluator() {
        let config = Configuration {
            maximum_selection_performance_decreases: 2,
            ..Configuration::default()
        };
        let mut s = state();
        s.selection_increases = 2;
        assert_eq!(check_stopping(&config, &s, step(), false), None);
        assert_eq!(
            check_stopping(&config, &s, step(), true),
            Some(StoppingReason::EarlyStoppingOnSelection)
        );
    }

    #[test]
    fn test_error_thresholds() {
        let config = Configuration {
            error_gradient_norm: 1.0,
            ..Configuration::default()
        };
        assert_eq!(
            check_error_thresholds(&config, &state()),
            Some(NumericalFailure::GradientNorm { value: 5.0, limit: 1.0 })
        );

        let mut s = state();
        s.parameters_norm = f64::NAN;
        assert!(matches!(
            check_error_thresholds(&Configuration::default(), &s),
            Some(NumericalFailure::ParametersNorm { .. })
        ));
        assert_eq!(check_error_thresholds(&Configuration::default(), &state()), None);
    }

    #[test]
    fn test_warnings_are_counted_but_not_fatal() {
        let config = Configuration {
            warning_gradient_norm: 1.0,
            warning_training_rate: 0.1,
            ..Configuration::default()
        };
        assert_eq!(warn_thresholds(&config, &state()), 2);
        assert_eq!(warn_thresholds(&Configuration::default(), &state()), 0);
    }

    #[test]
    fn test_reason_names() {
        assert_eq!(StoppingReason::NumericalFailure.to_string(), "NumericalFailure");
        assert!(!StoppingReason::NumericalFailure.is_success());
        assert!(StoppingReason::MaximumIterationsReached.is_success());
    }
}
