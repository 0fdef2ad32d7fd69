//! One-dimensional minimization along a search direction.
//!
//! The trainer only depends on the [`LineMinimizer`] trait; [`WolfeLineSearch`] is the
//! default implementation and follows Algorithms 3.5 and 3.6 of Nocedal & Wright.

use ndarray::Array1;

/// Reasons a line minimizer can give up.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LineSearchError {
    #[error("The search direction is not a descent direction (slope = {slope}).")]
    NotDescentDirection { slope: f64 },
    #[error("Bracketing the minimum would require a training rate above {max_rate}.")]
    RateLimitExceeded { max_rate: f64 },
    #[error("The line search failed to find a point satisfying the Wolfe conditions after {max_attempts} attempts.")]
    MaxAttemptsReached { max_attempts: usize },
    #[error("The objective returned a non-finite value at training rate {rate}.")]
    NonFiniteValue { rate: f64 },
}

/// The point a line search starts from.
#[derive(Debug, Clone, Copy)]
pub struct LineStart<'a> {
    pub parameters: &'a Array1<f64>,
    pub performance: f64,
    pub gradient: &'a Array1<f64>,
}

/// The point a line search settled on.
#[derive(Debug, Clone)]
pub struct LineStep {
    /// Step length along the direction.
    pub training_rate: f64,
    pub parameters: Array1<f64>,
    pub performance: f64,
    pub gradient: Array1<f64>,
    /// Objective evaluations spent by the search.
    pub evaluations: usize,
}

/// A one-dimensional minimizer along `parameters + rate * direction`.
pub trait LineMinimizer {
    /// Finds a training rate along `direction`, starting the search at `initial_rate`.
    ///
    /// Implementations must not return a rate above `max_rate`.
    fn minimize<ObjFn>(
        &self,
        obj_fn: &ObjFn,
        start: &LineStart<'_>,
        direction: &Array1<f64>,
        initial_rate: f64,
        max_rate: f64,
    ) -> Result<LineStep, LineSearchError>
    where
        ObjFn: Fn(&Array1<f64>) -> (f64, Array1<f64>);
}

/// Seed for the line search of the step about to be taken.
///
/// The first step (and any step following a degenerate rate) uses the normalized
/// step `min(1, 1 / ‖d‖)`; otherwise the previous rate is reused.
pub fn initial_training_rate(previous_rate: Option<f64>, direction_norm: f64) -> f64 {
    match previous_rate {
        Some(rate) if rate.is_finite() && rate > 0.0 => rate,
        _ => first_step_rate(direction_norm),
    }
}

fn first_step_rate(direction_norm: f64) -> f64 {
    if direction_norm.is_finite() && direction_norm > 1.0 {
        1.0 / direction_norm
    } else {
        1.0
    }
}

/// A line search that finds a step size satisfying the Strong Wolfe conditions.
#[derive(Debug, Clone)]
pub struct WolfeLineSearch {
    /// Sufficient decrease constant.
    pub c1: f64,
    /// Curvature constant. Nonlinear CG wants a tight value so successive
    /// directions stay conjugate.
    pub c2: f64,
    pub max_bracket_attempts: usize,
    pub max_zoom_attempts: usize,
}

impl Default for WolfeLineSearch {
    fn default() -> Self {
        Self {
            c1: 1e-4,
            c2: 0.1,
            max_bracket_attempts: 40,
            max_zoom_attempts: 30,
        }
    }
}

impl WolfeLineSearch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the Wolfe constants (`0 < c1 < c2 < 1`).
    pub fn with_wolfe_constants(mut self, c1: f64, c2: f64) -> Self {
        self.c1 = c1;
        self.c2 = c2;
        self
    }
}

/// One trial point on the line.
#[derive(Debug, Clone)]
struct Trial {
    rate: f64,
    value: f64,
    slope: f64,
}

/// Everything the zoom phase needs that stays fixed during one search.
struct LineContext<'a, ObjFn> {
    obj_fn: &'a ObjFn,
    start: &'a LineStart<'a>,
    direction: &'a Array1<f64>,
    c1: f64,
    c2: f64,
    evaluations: usize,
}

impl<ObjFn> LineContext<'_, ObjFn>
where
    ObjFn: Fn(&Array1<f64>) -> (f64, Array1<f64>),
{
    fn probe(&mut self, rate: f64) -> (Trial, Array1<f64>, Array1<f64>) {
        let mut x = self.start.parameters.clone();
        x.scaled_add(rate, self.direction);
        let (value, gradient) = (self.obj_fn)(&x);
        self.evaluations += 1;
        let slope = gradient.dot(self.direction);
        (Trial { rate, value, slope }, x, gradient)
    }

    fn armijo_holds(&self, trial: &Trial, slope0: f64) -> bool {
        trial.value <= self.start.performance + self.c1 * trial.rate * slope0
    }

    fn curvature_holds(&self, trial: &Trial, slope0: f64) -> bool {
        trial.slope.abs() <= self.c2 * slope0.abs()
    }

    fn accept(&self, trial: Trial, parameters: Array1<f64>, gradient: Array1<f64>) -> LineStep {
        log::debug!(
            "[CG LineSearch] accepted rate {:.3e} (f = {:.6e}) after {} evaluations",
            trial.rate,
            trial.value,
            self.evaluations
        );
        LineStep {
            training_rate: trial.rate,
            parameters,
            performance: trial.value,
            gradient,
            evaluations: self.evaluations,
        }
    }

    /// Shrinks a bracket `[lo, hi]` known to contain a Strong Wolfe point.
    fn zoom(
        &mut self,
        mut lo: Trial,
        mut hi: Trial,
        slope0: f64,
        max_attempts: usize,
    ) -> Result<LineStep, LineSearchError> {
        for _ in 0..max_attempts {
            // Minimizer of the cubic interpolating value and slope at both ends.
            let d1 = lo.slope + hi.slope - 3.0 * (lo.value - hi.value) / (lo.rate - hi.rate);
            let d2_sq = d1 * d1 - lo.slope * hi.slope;
            let (low_end, high_end) = if lo.rate < hi.rate {
                (lo.rate, hi.rate)
            } else {
                (hi.rate, lo.rate)
            };
            let mut rate = if d2_sq >= 0.0 {
                let d2 = (hi.rate - lo.rate).signum() * d2_sq.sqrt();
                hi.rate - (hi.rate - lo.rate) * (hi.slope + d2 - d1) / (hi.slope - lo.slope + 2.0 * d2)
            } else {
                f64::NAN
            };
            // Stay strictly inside the bracket, otherwise bisect.
            let margin = 0.1 * (high_end - low_end);
            if !rate.is_finite() || rate <= low_end + margin || rate >= high_end - margin {
                rate = 0.5 * (lo.rate + hi.rate);
            }

            let (trial, x, g) = self.probe(rate);
            if !trial.value.is_finite() {
                hi = trial;
                continue;
            }

            if !self.armijo_holds(&trial, slope0) || trial.value >= lo.value {
                hi = trial;
            } else {
                if self.curvature_holds(&trial, slope0) {
                    return Ok(self.accept(trial, x, g));
                }
                if trial.slope * (hi.rate - lo.rate) >= 0.0 {
                    hi = lo;
                }
                lo = trial;
            }
        }

        // The bracket collapsed without meeting the curvature condition. A point with
        // sufficient decrease is still a usable step for the trainer.
        if lo.rate > 0.0 {
            let (trial, x, g) = self.probe(lo.rate);
            if trial.value.is_finite() && self.armijo_holds(&trial, slope0) {
                log::debug!("[CG LineSearch] zoom exhausted; keeping sufficient-decrease point");
                return Ok(self.accept(trial, x, g));
            }
        }
        Err(LineSearchError::MaxAttemptsReached { max_attempts })
    }
}

impl LineMinimizer for WolfeLineSearch {
    fn minimize<ObjFn>(
        &self,
        obj_fn: &ObjFn,
        start: &LineStart<'_>,
        direction: &Array1<f64>,
        initial_rate: f64,
        max_rate: f64,
    ) -> Result<LineStep, LineSearchError>
    where
        ObjFn: Fn(&Array1<f64>) -> (f64, Array1<f64>),
    {
        let slope0 = start.gradient.dot(direction);
        if !(slope0 < 0.0) {
            return Err(LineSearchError::NotDescentDirection { slope: slope0 });
        }

        let mut ctx = LineContext {
            obj_fn,
            start,
            direction,
            c1: self.c1,
            c2: self.c2,
            evaluations: 0,
        };

        let mut prev = Trial {
            rate: 0.0,
            value: start.performance,
            slope: slope0,
        };
        let mut rate = initial_rate.min(max_rate);

        for attempt in 0..self.max_bracket_attempts {
            let (trial, x, g) = ctx.probe(rate);

            if !trial.value.is_finite() {
                // Overshot into a region where the objective is undefined: pull back.
                if attempt + 1 == self.max_bracket_attempts {
                    return Err(LineSearchError::NonFiniteValue { rate });
                }
                rate = 0.5 * (prev.rate + rate);
                continue;
            }

            if !ctx.armijo_holds(&trial, slope0) || (attempt > 0 && trial.value >= prev.value) {
                return ctx.zoom(prev, trial, slope0, self.max_zoom_attempts);
            }

            if ctx.curvature_holds(&trial, slope0) {
                return Ok(ctx.accept(trial, x, g));
            }

            if trial.slope >= 0.0 {
                return ctx.zoom(trial, prev, slope0, self.max_zoom_attempts);
            }

            // The step is too short, expand the search interval.
            if rate >= max_rate {
                return Err(LineSearchError::RateLimitExceeded { max_rate });
            }
            prev = trial;
            rate = (2.0 * rate).min(max_rate);
        }

        Err(LineSearchError::MaxAttemptsReached {
            max_attempts: self.max_bracket_attempts,
        })
    }
}
