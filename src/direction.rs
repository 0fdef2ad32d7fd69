//! Conjugate direction formulas.
//!
//! Both formulas build the new search direction as `d = -g + β d_old`, differing only
//! in how the scalar `β` is obtained from the current and previous gradients.

use ndarray::Array1;
use std::fmt;
use std::str::FromStr;

use crate::ConjugateGradientError;

/// Denominators (`g_old · g_old`) at or below this are treated as zero.
const DENOMINATOR_EPSILON: f64 = 1e-99;

/// Formula used to compute the conjugate coefficient `β`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DirectionMethod {
    /// Polak-Ribière, clipped at zero (PR+).
    #[default]
    PolakRibiere,
    /// Fletcher-Reeves.
    FletcherReeves,
}

impl DirectionMethod {
    /// Short name used in configuration documents: `"PR"` or `"FR"`.
    pub fn as_str(&self) -> &'static str {
        match self {
            DirectionMethod::PolakRibiere => "PR",
            DirectionMethod::FletcherReeves => "FR",
        }
    }

    /// Computes `β` for this method.
    pub fn parameter(&self, old_gradient: &Array1<f64>, gradient: &Array1<f64>) -> f64 {
        match self {
            DirectionMethod::PolakRibiere => polak_ribiere_parameter(old_gradient, gradient),
            DirectionMethod::FletcherReeves => fletcher_reeves_parameter(old_gradient, gradient),
        }
    }

    /// Computes the conjugate direction `-g + β d_old`.
    ///
    /// All three vectors must share one non-zero length.
    pub fn direction(
        &self,
        old_gradient: &Array1<f64>,
        gradient: &Array1<f64>,
        old_direction: &Array1<f64>,
    ) -> Result<Array1<f64>, ConjugateGradientError> {
        check_dimensions(gradient, &[old_gradient, old_direction])?;
        let beta = self.parameter(old_gradient, gradient);
        let mut direction = -gradient;
        direction.scaled_add(beta, old_direction);
        Ok(direction)
    }
}

impl fmt::Display for DirectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DirectionMethod {
    type Err = ConjugateGradientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PR" => Ok(DirectionMethod::PolakRibiere),
            "FR" => Ok(DirectionMethod::FletcherReeves),
            other => Err(ConjugateGradientError::UnknownDirectionMethod {
                name: other.to_string(),
            }),
        }
    }
}

/// `max(0, g · (g - g_old) / (g_old · g_old))`, or 0 when the denominator vanishes.
pub fn polak_ribiere_parameter(old_gradient: &Array1<f64>, gradient: &Array1<f64>) -> f64 {
    let denominator = old_gradient.dot(old_gradient);
    if !denominator.is_finite() || denominator <= DENOMINATOR_EPSILON {
        return 0.0;
    }
    let numerator = gradient.dot(&(gradient - old_gradient));
    let beta = numerator / denominator;
    // NaN fails the comparison and is mapped to zero as well.
    if beta > 0.0 { beta } else { 0.0 }
}

/// `(g · g) / (g_old · g_old)`, or 0 when the denominator vanishes.
pub fn fletcher_reeves_parameter(old_gradient: &Array1<f64>, gradient: &Array1<f64>) -> f64 {
    let denominator = old_gradient.dot(old_gradient);
    if !denominator.is_finite() || denominator <= DENOMINATOR_EPSILON {
        return 0.0;
    }
    let beta = gradient.dot(gradient) / denominator;
    if beta.is_finite() { beta } else { 0.0 }
}

/// The restart direction, `-g`.
pub fn gradient_descent_direction(gradient: &Array1<f64>) -> Result<Array1<f64>, ConjugateGradientError> {
    check_dimensions(gradient, &[])?;
    Ok(-gradient)
}

/// True when moving along `direction` decreases the objective to first order.
pub fn is_descent_direction(direction: &Array1<f64>, gradient: &Array1<f64>) -> bool {
    let slope = -direction.dot(gradient);
    slope > 0.0
}

pub(crate) fn check_dimensions(
    reference: &Array1<f64>,
    others: &[&Array1<f64>],
) -> Result<(), ConjugateGradientError> {
    let expected = reference.len();
    if expected == 0 {
        return Err(ConjugateGradientError::InvalidDimension { expected: 1, found: 0 });
    }
    match others.iter().find(|v| v.len() != expected) {
        Some(v) => Err(ConjugateGradientError::InvalidDimension {
            expected,
            found: v.len(),
        }),
        None => Ok(()),
    }
}
