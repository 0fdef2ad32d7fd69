//! A nonlinear conjugate gradient trainer.
//!
//! This crate minimizes a scalar performance function of a parameter vector by
//! repeatedly building a search direction from the gradient history (Polak-Ribière
//! or Fletcher-Reeves) and minimizing along it with a one-dimensional line search.
//!
//! It features:
//! - PR+ and FR direction updates, with automatic restarts to steepest descent
//!   whenever the conjugate direction is not a descent direction.
//! - A Strong Wolfe line search (pluggable through [`LineMinimizer`]).
//! - Seven stopping criteria checked in a fixed priority order, with exactly one
//!   [`StoppingReason`] reported per run.
//! - Warning and error thresholds on the parameters norm, gradient norm and training
//!   rate. Error thresholds end the run with a partial, inspectable result.
//! - An optional held-out selection metric for early stopping.
//! - Optional per-iteration history for any subset of nine channels.
//!
//! # Example
//! Minimize the Rosenbrock function.
//!
//! ```
//! use conjugate_gradient::{ConjugateGradient, ConjugateGradientResults, DirectionMethod};
//! use ndarray::{array, Array1};
//!
//! let rosenbrock = |x: &Array1<f64>| -> (f64, Array1<f64>) {
//!     let a = 1.0;
//!     let b = 100.0;
//!     let f = (a - x[0]).powi(2) + b * (x[1] - x[0].powi(2)).powi(2);
//!     let g = array![
//!         -2.0 * (a - x[0]) - 4.0 * b * (x[1] - x[0].powi(2)) * x[0],
//!         2.0 * b * (x[1] - x[0].powi(2)),
//!     ];
//!     (f, g)
//! };
//!
//! let ConjugateGradientResults {
//!     final_parameters: x_min,
//!     final_performance,
//!     iterations,
//!     stopping_reason,
//!     ..
//! } = ConjugateGradient::new(array![-1.2, 1.0], rosenbrock)
//!     .with_direction_method(DirectionMethod::PolakRibiere)
//!     .with_gradient_norm_goal(1e-8)
//!     .with_max_iterations(1000)
//!     .run()
//!     .expect("invalid configuration");
//!
//! println!(
//!     "f({}) = {:.4e} after {} iterations ({})",
//!     x_min, final_performance, iterations, stopping_reason
//! );
//! assert!((x_min[0] - 1.0).abs() < 1e-4);
//! assert!((x_min[1] - 1.0).abs() < 1e-4);
//! ```

use ndarray::Array1;
use std::time::Instant;

pub mod config;
pub mod direction;
pub mod history;
pub mod line_search;
pub mod stopping;

pub use config::Configuration;
pub use direction::DirectionMethod;
pub use history::{HistoryChannel, HistoryChannels, HistoryRecorder, TrainingHistory};
pub use line_search::{LineMinimizer, LineSearchError, LineStart, LineStep, WolfeLineSearch};
pub use stopping::{NumericalFailure, StoppingReason};

use direction::{check_dimensions, gradient_descent_direction, is_descent_direction};
use line_search::initial_training_rate;
use stopping::{StepProgress, check_error_thresholds, check_stopping, warn_thresholds};

/// Errors that prevent a run from starting or continuing.
///
/// Numerical trouble during a run is not an error: it ends the run with
/// [`StoppingReason::NumericalFailure`] and a partial [`ConjugateGradientResults`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConjugateGradientError {
    #[error("Vector dimension mismatch: expected {expected} entries, found {found}.")]
    InvalidDimension { expected: usize, found: usize },
    #[error("Invalid configuration value for `{name}`: {value}.")]
    InvalidConfiguration { name: &'static str, value: String },
    #[error("Unknown training direction method `{name}` (expected \"PR\" or \"FR\").")]
    UnknownDirectionMethod { name: String },
}

/// The trainer's state at the end of an iteration (or at the start, for iteration 0).
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct IterationState {
    pub iteration: usize,
    pub parameters: Array1<f64>,
    pub parameters_norm: f64,
    pub performance: f64,
    /// `None` when no selection evaluator is attached.
    pub selection_performance: Option<f64>,
    pub gradient: Array1<f64>,
    pub gradient_norm: f64,
    /// Direction of the step that produced `parameters`; zero at iteration 0.
    pub training_direction: Array1<f64>,
    /// Rate of the step that produced `parameters`; zero at iteration 0.
    pub training_rate: f64,
    pub parameters_increment_norm: f64,
    /// Seconds since the run started.
    pub elapsed_time: f64,
    /// Consecutive iterations in which the selection performance increased.
    pub selection_increases: usize,
}

/// The outcome of a training run. Owned by the caller once returned.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ConjugateGradientResults {
    pub final_parameters: Array1<f64>,
    pub final_parameters_norm: f64,
    pub final_performance: f64,
    pub final_selection_performance: Option<f64>,
    pub final_gradient: Array1<f64>,
    pub final_gradient_norm: f64,
    pub final_training_direction: Array1<f64>,
    pub final_training_rate: f64,
    pub final_parameters_increment_norm: f64,
    /// Consecutive selection performance increases at the end of the run.
    pub final_selection_increases: usize,
    /// Seconds spent in the run.
    pub elapsed_time: f64,
    /// Iterations completed (iteration 0, the initial state, is not counted).
    pub iterations: usize,
    /// Total calls to the objective function.
    pub evaluations: usize,
    pub stopping_reason: StoppingReason,
    /// Set only when `stopping_reason` is [`StoppingReason::NumericalFailure`].
    #[cfg_attr(feature = "serde", serde(skip))]
    pub failure: Option<NumericalFailure>,
    pub history: TrainingHistory,
}

impl ConjugateGradientResults {
    /// Final values as `(name, value)` rows, floats printed with `precision` decimals.
    pub fn final_results_table(&self, precision: usize) -> Vec<(&'static str, String)> {
        let mut rows = vec![
            ("Final parameters norm", format!("{:.*}", precision, self.final_parameters_norm)),
            ("Final performance", format!("{:.*}", precision, self.final_performance)),
        ];
        if let Some(selection) = self.final_selection_performance {
            rows.push(("Final selection performance", format!("{:.*}", precision, selection)));
        }
        rows.extend([
            ("Final gradient norm", format!("{:.*}", precision, self.final_gradient_norm)),
            ("Final training rate", format!("{:.*}", precision, self.final_training_rate)),
            ("Iterations number", self.iterations.to_string()),
            ("Elapsed time", format!("{:.*}", precision, self.elapsed_time)),
            ("Stopping criterion", self.stopping_reason.to_string()),
        ]);
        rows
    }
}

/// A configurable nonlinear conjugate gradient trainer.
pub struct ConjugateGradient<ObjFn, SelFn = fn(&Array1<f64>) -> f64, L = WolfeLineSearch> {
    x0: Array1<f64>,
    obj_fn: ObjFn,
    selection_fn: Option<SelFn>,
    line_minimizer: L,
    config: Configuration,
}

impl<ObjFn> ConjugateGradient<ObjFn>
where
    ObjFn: Fn(&Array1<f64>) -> (f64, Array1<f64>),
{
    /// Creates a new trainer with the default [`Configuration`].
    ///
    /// # Arguments
    /// * `x0` - The starting parameters.
    /// * `obj_fn` - The performance function, returning `(value, gradient)`.
    pub fn new(x0: Array1<f64>, obj_fn: ObjFn) -> Self {
        Self {
            x0,
            obj_fn,
            selection_fn: None,
            line_minimizer: WolfeLineSearch::default(),
            config: Configuration::default(),
        }
    }
}

impl<ObjFn, SelFn, L> ConjugateGradient<ObjFn, SelFn, L>
where
    ObjFn: Fn(&Array1<f64>) -> (f64, Array1<f64>),
    SelFn: Fn(&Array1<f64>) -> f64,
    L: LineMinimizer,
{
    /// Replaces the whole configuration.
    pub fn with_config(mut self, config: Configuration) -> Self {
        self.config = config;
        self
    }

    /// Sets the conjugate direction formula (default: Polak-Ribière).
    pub fn with_direction_method(mut self, method: DirectionMethod) -> Self {
        self.config.direction_method = method;
        self
    }

    /// Sets the maximum number of iterations (default: 1000).
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.maximum_iterations_number = max_iterations;
        self
    }

    /// Sets the wall-clock budget in seconds (default: 1000).
    pub fn with_maximum_time(mut self, seconds: f64) -> Self {
        self.config.maximum_time = seconds;
        self
    }

    pub fn with_performance_goal(mut self, goal: f64) -> Self {
        self.config.performance_goal = goal;
        self
    }

    /// Sets the gradient norm at which training stops (default: 0).
    pub fn with_gradient_norm_goal(mut self, goal: f64) -> Self {
        self.config.gradient_norm_goal = goal;
        self
    }

    pub fn with_reserved_history(mut self, channels: HistoryChannels) -> Self {
        self.config.reserved_history = channels;
        self
    }

    /// Attaches a selection (held-out) performance evaluator, enabling early stopping.
    pub fn with_selection<S2>(self, selection_fn: S2) -> ConjugateGradient<ObjFn, S2, L>
    where
        S2: Fn(&Array1<f64>) -> f64,
    {
        ConjugateGradient {
            x0: self.x0,
            obj_fn: self.obj_fn,
            selection_fn: Some(selection_fn),
            line_minimizer: self.line_minimizer,
            config: self.config,
        }
    }

    /// Replaces the line search used along each direction.
    pub fn with_line_minimizer<L2: LineMinimizer>(self, line_minimizer: L2) -> ConjugateGradient<ObjFn, SelFn, L2> {
        ConjugateGradient {
            x0: self.x0,
            obj_fn: self.obj_fn,
            selection_fn: self.selection_fn,
            line_minimizer,
            config: self.config,
        }
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    /// Runs the trainer.
    pub fn run(&self) -> Result<ConjugateGradientResults, ConjugateGradientError> {
        self.run_with_checkpoint(|_| {})
    }

    /// Runs the trainer, handing the state to `checkpoint` at iteration 0 and then
    /// every `save_period` iterations.
    pub fn run_with_checkpoint<Checkpoint>(
        &self,
        mut checkpoint: Checkpoint,
    ) -> Result<ConjugateGradientResults, ConjugateGradientError>
    where
        Checkpoint: FnMut(&IterationState),
    {
        let config = &self.config;
        config.validate()?;
        check_dimensions(&self.x0, &[])?;

        let start_time = Instant::now();
        let n = self.x0.len();
        let parameters = self.x0.clone();
        let (performance, gradient) = (self.obj_fn)(&parameters);
        let mut evaluations = 1;
        check_dimensions(&parameters, &[&gradient])?;

        let mut state = IterationState {
            iteration: 0,
            parameters_norm: norm(&parameters),
            selection_performance: self.evaluate_selection(&parameters),
            parameters,
            performance,
            gradient_norm: norm(&gradient),
            gradient,
            training_direction: Array1::zeros(n),
            training_rate: 0.0,
            parameters_increment_norm: 0.0,
            elapsed_time: start_time.elapsed().as_secs_f64(),
            selection_increases: 0,
        };

        let mut recorder = HistoryRecorder::new(config.reserved_history.clone(), config.maximum_iterations_number);
        recorder.record(&state);
        checkpoint(&state);

        let selection_enabled = self.selection_fn.is_some();
        let mut step_progress: Option<StepProgress> = None;
        let mut old_gradient: Option<Array1<f64>> = None;
        let mut previous_rate: Option<f64> = None;

        let (stopping_reason, failure) = loop {
            if let Some(failure) = check_error_thresholds(config, &state) {
                log::error!("[CG] Iteration {}: {}", state.iteration, failure);
                break (StoppingReason::NumericalFailure, Some(failure));
            }
            warn_thresholds(config, &state);

            if state.iteration % config.display_period == 0 {
                log::info!(
                    "[CG] Iteration {}: performance = {:.6e}, gradient norm = {:.6e}, training rate = {:.3e}",
                    state.iteration,
                    state.performance,
                    state.gradient_norm,
                    state.training_rate
                );
            }

            if let Some(reason) = check_stopping(config, &state, step_progress, selection_enabled) {
                break (reason, None);
            }

            // --- Direction, with restarts to steepest descent ---
            let (direction, restarted) = self.training_direction(&state, old_gradient.as_ref())?;

            // --- Line search along the direction ---
            let start = LineStart {
                parameters: &state.parameters,
                performance: state.performance,
                gradient: &state.gradient,
            };
            let initial_rate = initial_training_rate(previous_rate, norm(&direction));
            let mut outcome = self
                .line_minimizer
                .minimize(&self.obj_fn, &start, &direction, initial_rate, config.error_training_rate)
                .map(|step| (step, direction));

            let collapsed = matches!(&outcome, Ok((step, _)) if !(step.training_rate > 0.0));
            if collapsed && !restarted {
                log::warn!(
                    "[CG] Iteration {}: training rate collapsed along conjugate direction; restarting with -g.",
                    state.iteration + 1
                );
                if let Ok((step, _)) = &outcome {
                    evaluations += step.evaluations;
                }
                let descent = gradient_descent_direction(&state.gradient)?;
                let retry_rate = initial_training_rate(None, norm(&descent));
                outcome = self
                    .line_minimizer
                    .minimize(&self.obj_fn, &start, &descent, retry_rate, config.error_training_rate)
                    .map(|step| (step, descent));
            }

            let (step, direction) = match outcome {
                Ok(found) => found,
                Err(err) => {
                    log::error!("[CG] Iteration {}: line search failed: {}", state.iteration + 1, err);
                    break (StoppingReason::NumericalFailure, Some(err.into()));
                }
            };
            evaluations += step.evaluations;
            check_dimensions(&state.parameters, &[&step.parameters, &step.gradient])?;

            // --- Update the iteration state ---
            let previous_performance = state.performance;
            let previous_selection = state.selection_performance;

            state.parameters_increment_norm = norm(&(&step.parameters - &state.parameters));
            state.parameters = step.parameters;
            state.parameters_norm = norm(&state.parameters);
            state.performance = step.performance;
            old_gradient = Some(std::mem::replace(&mut state.gradient, step.gradient));
            state.gradient_norm = norm(&state.gradient);
            state.training_direction = direction;
            state.training_rate = step.training_rate;
            state.iteration += 1;

            state.selection_performance = self.evaluate_selection(&state.parameters);
            state.selection_increases = match (previous_selection, state.selection_performance) {
                (Some(previous), Some(current)) if current > previous => state.selection_increases + 1,
                _ => 0,
            };
            state.elapsed_time = start_time.elapsed().as_secs_f64();

            previous_rate = Some(step.training_rate);
            step_progress = Some(StepProgress { previous_performance });

            recorder.record(&state);
            if state.iteration % config.save_period == 0 {
                checkpoint(&state);
            }
        };

        log::info!(
            "[CG] Training finished after {} iterations: {} (performance = {:.6e}, gradient norm = {:.6e})",
            state.iteration,
            stopping_reason,
            state.performance,
            state.gradient_norm
        );

        Ok(ConjugateGradientResults {
            final_parameters: state.parameters,
            final_parameters_norm: state.parameters_norm,
            final_performance: state.performance,
            final_selection_performance: state.selection_performance,
            final_gradient: state.gradient,
            final_gradient_norm: state.gradient_norm,
            final_training_direction: state.training_direction,
            final_training_rate: state.training_rate,
            final_parameters_increment_norm: state.parameters_increment_norm,
            final_selection_increases: state.selection_increases,
            elapsed_time: start_time.elapsed().as_secs_f64(),
            iterations: state.iteration,
            evaluations,
            stopping_reason,
            failure,
            history: recorder.finish(),
        })
    }

    fn evaluate_selection(&self, parameters: &Array1<f64>) -> Option<f64> {
        self.selection_fn.as_ref().map(|f| f(parameters))
    }

    /// Chooses the direction of the next step. The flag is true for a restart.
    fn training_direction(
        &self,
        state: &IterationState,
        old_gradient: Option<&Array1<f64>>,
    ) -> Result<(Array1<f64>, bool), ConjugateGradientError> {
        let descent = gradient_descent_direction(&state.gradient)?;
        let Some(old_gradient) = old_gradient else {
            return Ok((descent, true));
        };
        if let Some(period) = self.config.restart_period {
            if state.iteration % period == 0 {
                log::debug!("[CG] Iteration {}: periodic restart.", state.iteration + 1);
                return Ok((descent, true));
            }
        }

        let conjugate = self
            .config
            .direction_method
            .direction(old_gradient, &state.gradient, &state.training_direction)?;
        if is_descent_direction(&conjugate, &state.gradient) {
            Ok((conjugate, false))
        } else {
            log::warn!(
                "[CG] Iteration {}: non-descent {} direction; restarting with -g.",
                state.iteration + 1,
                self.config.direction_method
            );
            Ok((descent, true))
        }
    }
}

fn norm(v: &Array1<f64>) -> f64 {
    v.dot(v).sqrt()
}
