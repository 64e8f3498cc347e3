//! Finite-difference verification of analytic gradients.
//!
//! For every coordinate the analytic gradient of `score(triple)` touches,
//! the central difference `(score(θ+ε) − score(θ−ε)) / 2ε` is compared with
//! the accumulated value. The relative error is
//! `|analytic − numeric| / max(|analytic|, |numeric|, 1)`, which degrades to
//! an absolute error for small gradients.

use serde::Serialize;

use crate::models::ScoringModel;
use crate::triples::Triple;

/// Default perturbation.
pub const DEFAULT_EPSILON: f64 = 1e-6;
/// Default relative error tolerance.
pub const DEFAULT_TOLERANCE: f64 = 1e-4;

/// Analytic and numeric derivative of one parameter coordinate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GradientDiscrepancy {
    /// Family path as reported by [`ScoringModel::families`].
    pub family: String,
    /// Embedding id.
    pub id: usize,
    /// Coordinate within the embedding.
    pub coordinate: usize,
    /// Accumulated analytic gradient.
    pub analytic: f64,
    /// Central finite difference.
    pub numeric: f64,
    /// See the module documentation.
    pub relative_error: f64,
}

impl GradientDiscrepancy {
    /// Whether the relative error exceeds `tolerance`.
    pub fn exceeds(&self, tolerance: f64) -> bool {
        self.relative_error.is_nan() || self.relative_error > tolerance
    }
}

/// Compare analytic and numeric gradients for every coordinate `triple` touches.
///
/// Leaves parameters unchanged and gradient buffers empty.
pub fn check_gradients(
    model: &mut dyn ScoringModel,
    triple: &Triple,
    epsilon: f64,
) -> Vec<GradientDiscrepancy> {
    model.reset_gradients();
    model.gradient(triple, 1.0);
    let analytic: Vec<(String, usize, Vec<f64>)> = model
        .families()
        .into_iter()
        .flat_map(|(path, family)| {
            family
                .gradient
                .iter()
                .map(|(id, _, grad)| (path.clone(), id, grad.to_vec()))
                .collect::<Vec<_>>()
        })
        .collect();
    model.reset_gradients();

    let mut report = Vec::new();
    for (family, id, grads) in analytic {
        for (coordinate, &value) in grads.iter().enumerate() {
            let Some(numeric) = central_difference(model, triple, &family, id, coordinate, epsilon)
            else {
                continue;
            };
            let relative_error =
                (value - numeric).abs() / value.abs().max(numeric.abs()).max(1.0);
            report.push(GradientDiscrepancy {
                family: family.clone(),
                id,
                coordinate,
                analytic: value,
                numeric,
                relative_error,
            });
        }
    }
    report
}

fn central_difference(
    model: &mut dyn ScoringModel,
    triple: &Triple,
    family: &str,
    id: usize,
    coordinate: usize,
    epsilon: f64,
) -> Option<f64> {
    let original = *model.parameter_mut(family, id)?.get(coordinate)?;

    let mut score_at = |value: f64| -> Option<f64> {
        *model.parameter_mut(family, id)?.get_mut(coordinate)? = value;
        Some(model.score(triple))
    };
    let plus = score_at(original + epsilon);
    let minus = score_at(original - epsilon);
    score_at(original);

    Some((plus? - minus?) / (2.0 * epsilon))
}

/// Largest relative error in `report`, 0 when empty.
pub fn max_relative_error(report: &[GradientDiscrepancy]) -> f64 {
    report
        .iter()
        .map(|d| d.relative_error)
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support::model;

    #[test]
    fn test_distmult_gradients_match() {
        let mut m = model("distmult", 3, 0);
        let report = check_gradients(m.as_mut(), &Triple::new(0, 1, 2), DEFAULT_EPSILON);
        // s, r, o rows of width 3
        assert_eq!(report.len(), 9);
        assert!(max_relative_error(&report) < DEFAULT_TOLERANCE);
    }

    #[test]
    fn test_parameters_restored() {
        let mut m = model("rescal", 2, 1);
        let triple = Triple::new(3, 0, 4);
        let before = m.score(&triple);
        check_gradients(m.as_mut(), &triple, 1e-3);
        assert_eq!(m.score(&triple), before);
        assert!(m.families().iter().all(|(_, f)| f.gradient.is_empty()));
    }

    #[test]
    fn test_self_loop_accumulates_both_roles() {
        let mut m = model("complex", 2, 2);
        let report = check_gradients(m.as_mut(), &Triple::new(1, 0, 1), DEFAULT_EPSILON);
        assert!(max_relative_error(&report) < DEFAULT_TOLERANCE);
    }

    #[test]
    fn test_nan_counts_as_exceeding() {
        let d = GradientDiscrepancy {
            family: "E".into(),
            id: 0,
            coordinate: 0,
            analytic: f64::NAN,
            numeric: 0.0,
            relative_error: f64::NAN,
        };
        assert!(d.exceeds(1.0));
    }
}
