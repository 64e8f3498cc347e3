//! Loss functions over (positive, negatives) batches.
//!
//! A loss scores every triple of a batch, accumulates its scalar value, and
//! drives the model's analytic gradient with the derivative of the loss with
//! respect to each score. After the batch it adds the L2 penalty once with
//! `model.l2(1/Z)`. The penalty is not part of the reported loss.
//!
//! | Loss | Config name | Per-example loss | Z |
//! |------|-------------|------------------|---|
//! | [`MarginLoss`] | `pair` | 1 per pair with s⁻ − s⁺ + γ > 0 | batch × negatives |
//! | [`SoftmaxLoss`] | `softmax` | −s⁺ + logsumexp(candidates) | batch |
//! | [`LogisticLoss`] | `logistic` | softplus(−s⁺) + Σ softplus(s⁻) | batch × (negatives + 1) |
//!
//! Z is computed from the configured batch size, so a short final batch
//! takes a proportionally smaller step.

use std::fmt::Debug;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::models::ScoringModel;
use crate::triples::Triple;

/// Turns scored batches into loss values and gradient calls.
pub trait LossFunction: Debug {
    /// Loss name as used in configuration.
    fn name(&self) -> &'static str;

    /// Process one batch. `negatives[i]` holds the negatives of `positives[i]`.
    fn gradient(
        &mut self,
        model: &mut dyn ScoringModel,
        positives: &[Triple],
        negatives: &[Vec<Triple>],
    );

    /// Clear the accumulated loss and counters.
    fn reset(&mut self);

    /// Accumulated loss since the last reset.
    fn loss(&self) -> f64;

    /// Sum of the normalizers Z of every processed batch.
    fn gradient_computations(&self) -> usize;

    /// Accumulated loss per gradient computation.
    fn mean_loss(&self) -> f64 {
        match self.gradient_computations() {
            0 => 0.0,
            n => self.loss() / n as f64,
        }
    }

    /// Whether the training loop must append each positive to its negatives.
    fn appends_positive(&self) -> bool {
        false
    }

    /// One-line progress report.
    fn summary(&self) -> String {
        format!("loss: {:.6}", self.mean_loss())
    }
}

/// Loss names accepted in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossKind {
    /// Pairwise hinge.
    Margin,
    /// Categorical cross-entropy over candidates.
    Softmax,
    /// Binary cross-entropy per triple.
    Logistic,
}

impl FromStr for LossKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pair" | "margin" => Ok(Self::Margin),
            "softmax" => Ok(Self::Softmax),
            "logistic" => Ok(Self::Logistic),
            _ => Err(Error::unknown("loss", s)),
        }
    }
}

/// Batch geometry every loss needs for its normalizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchShape {
    /// Configured positives per batch.
    pub batch_size: usize,
    /// Configured negatives per positive.
    pub number_of_negatives: usize,
}

/// Build the loss named `kind`. `margin` is only read by the pairwise loss.
pub fn build_loss(kind: &str, shape: BatchShape, margin: f64) -> Result<Box<dyn LossFunction>> {
    if shape.batch_size == 0 {
        return Err(Error::Config("batch size must be at least 1".into()));
    }
    Ok(match kind.parse::<LossKind>()? {
        LossKind::Margin => Box::new(MarginLoss::new(shape, margin)),
        LossKind::Softmax => Box::new(SoftmaxLoss::new(shape)),
        LossKind::Logistic => Box::new(LogisticLoss::new(shape)),
    })
}

// =============================================================================
// Numerics
// =============================================================================

/// `log Σ exp(xᵢ)`, shifted by the maximum for stability.
pub fn logsumexp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

/// `log(1 + eˣ)` without overflow.
pub fn softplus(x: f64) -> f64 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

/// `1 / (1 + e⁻ˣ)` without overflow.
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

// =============================================================================
// Losses
// =============================================================================

/// Pairwise hinge loss with margin γ.
///
/// The gradient follows the hinge; the reported loss is the number of
/// violating pairs.
#[derive(Debug, Clone)]
pub struct MarginLoss {
    margin: f64,
    z: usize,
    violations: usize,
    pairs: usize,
    computations: usize,
}

impl MarginLoss {
    /// Hinge loss for batches of `shape` with margin `margin`.
    pub fn new(shape: BatchShape, margin: f64) -> Self {
        Self {
            margin,
            z: (shape.batch_size * shape.number_of_negatives).max(1),
            violations: 0,
            pairs: 0,
            computations: 0,
        }
    }

    /// Pairs with a positive hinge since the last reset.
    pub fn violations(&self) -> usize {
        self.violations
    }
}

impl LossFunction for MarginLoss {
    fn name(&self) -> &'static str {
        "pair"
    }

    fn gradient(
        &mut self,
        model: &mut dyn ScoringModel,
        positives: &[Triple],
        negatives: &[Vec<Triple>],
    ) {
        let scale = 1.0 / self.z as f64;
        for (positive, negatives) in positives.iter().zip(negatives) {
            let positive_score = model.score(positive);
            for negative in negatives {
                self.pairs += 1;
                let hinge = model.score(negative) - positive_score + self.margin;
                if hinge > 0.0 {
                    self.violations += 1;
                    model.gradient(positive, -scale);
                    model.gradient(negative, scale);
                }
            }
        }
        model.l2(scale);
        self.computations += self.z;
    }

    fn reset(&mut self) {
        self.violations = 0;
        self.pairs = 0;
        self.computations = 0;
    }

    fn loss(&self) -> f64 {
        self.violations as f64
    }

    fn gradient_computations(&self) -> usize {
        self.computations
    }

    fn summary(&self) -> String {
        let pct = if self.pairs == 0 {
            0.0
        } else {
            100.0 * self.violations as f64 / self.pairs as f64
        };
        format!(
            "violations: {} ({pct:.2}%), loss: {:.6}",
            self.violations,
            self.mean_loss()
        )
    }
}

/// Softmax cross-entropy of the positive against its candidates.
///
/// The candidate list is `negatives[i]` as given; the training loop appends
/// the positive to it, so the positive competes with itself in the
/// normalizer.
#[derive(Debug, Clone)]
pub struct SoftmaxLoss {
    z: usize,
    loss: f64,
    computations: usize,
}

impl SoftmaxLoss {
    /// Softmax loss for batches of `shape`.
    pub fn new(shape: BatchShape) -> Self {
        Self {
            z: shape.batch_size.max(1),
            loss: 0.0,
            computations: 0,
        }
    }
}

impl LossFunction for SoftmaxLoss {
    fn name(&self) -> &'static str {
        "softmax"
    }

    fn gradient(
        &mut self,
        model: &mut dyn ScoringModel,
        positives: &[Triple],
        negatives: &[Vec<Triple>],
    ) {
        let scale = 1.0 / self.z as f64;
        for (positive, candidates) in positives.iter().zip(negatives) {
            if candidates.is_empty() {
                continue;
            }
            let positive_score = model.score(positive);
            let scores: Vec<f64> = candidates.iter().map(|c| model.score(c)).collect();
            let normalizer = logsumexp(&scores);
            self.loss += normalizer - positive_score;

            model.gradient(positive, -scale);
            for (candidate, score) in candidates.iter().zip(&scores) {
                model.gradient(candidate, (score - normalizer).exp() * scale);
            }
        }
        model.l2(scale);
        self.computations += self.z;
    }

    fn reset(&mut self) {
        self.loss = 0.0;
        self.computations = 0;
    }

    fn loss(&self) -> f64 {
        self.loss
    }

    fn gradient_computations(&self) -> usize {
        self.computations
    }

    fn appends_positive(&self) -> bool {
        true
    }
}

/// Logistic loss: positives labeled 1, negatives labeled 0.
#[derive(Debug, Clone)]
pub struct LogisticLoss {
    z: usize,
    loss: f64,
    computations: usize,
}

impl LogisticLoss {
    /// Logistic loss for batches of `shape`.
    pub fn new(shape: BatchShape) -> Self {
        Self {
            z: (shape.batch_size * (shape.number_of_negatives + 1)).max(1),
            loss: 0.0,
            computations: 0,
        }
    }
}

impl LossFunction for LogisticLoss {
    fn name(&self) -> &'static str {
        "logistic"
    }

    fn gradient(
        &mut self,
        model: &mut dyn ScoringModel,
        positives: &[Triple],
        negatives: &[Vec<Triple>],
    ) {
        let scale = 1.0 / self.z as f64;
        for (positive, negatives) in positives.iter().zip(negatives) {
            let score = model.score(positive);
            self.loss += softplus(-score);
            model.gradient(positive, -sigmoid(-score) * scale);

            for negative in negatives {
                let score = model.score(negative);
                self.loss += softplus(score);
                model.gradient(negative, sigmoid(score) * scale);
            }
        }
        model.l2(scale);
        self.computations += self.z;
    }

    fn reset(&mut self) {
        self.loss = 0.0;
        self.computations = 0;
    }

    fn loss(&self) -> f64 {
        self.loss
    }

    fn gradient_computations(&self) -> usize {
        self.computations
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support::model;

    const SHAPE: BatchShape = BatchShape {
        batch_size: 2,
        number_of_negatives: 1,
    };

    #[test]
    fn test_logsumexp_is_stable() {
        assert!((logsumexp(&[1000.0, 1000.0]) - (1000.0 + 2f64.ln())).abs() < 1e-9);
        assert!((logsumexp(&[-1000.0]) + 1000.0).abs() < 1e-9);
        assert_eq!(logsumexp(&[]), f64::NEG_INFINITY);
    }

    #[test]
    fn test_softplus_and_sigmoid() {
        assert!((softplus(0.0) - 2f64.ln()).abs() < 1e-12);
        assert!((softplus(800.0) - 800.0).abs() < 1e-9);
        assert!(softplus(-800.0) >= 0.0);
        assert_eq!(sigmoid(0.0), 0.5);
        assert!((sigmoid(-800.0)).abs() < 1e-12);
        assert!((sigmoid(3.0) + sigmoid(-3.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_margin_silent_when_satisfied() {
        let mut m = model("distmult", 3, 0);
        let (p, n) = (Triple::new(0, 0, 1), Triple::new(0, 0, 2));
        // hinge = s(n) - s(p) + (gap - 1) = -1
        let gap = m.score(&p) - m.score(&n);
        let mut loss = MarginLoss::new(SHAPE, gap - 1.0);
        m.reset_gradients();
        loss.gradient(m.as_mut(), &[p], &[vec![n]]);
        assert_eq!(loss.violations(), 0);
        assert_eq!(loss.loss(), 0.0);
        assert!(m.families().iter().all(|(_, f)| f.gradient.is_empty()));
    }

    #[test]
    fn test_margin_violation_counts_and_touches() {
        let mut m = model("transe", 2, 1);
        let (p, n) = (Triple::new(0, 0, 1), Triple::new(0, 0, 2));
        assert!(m.score(&n) - m.score(&p) + 100.0 > 0.0);
        let mut loss = MarginLoss::new(SHAPE, 100.0);
        m.reset_gradients();
        loss.gradient(m.as_mut(), &[p], &[vec![n]]);

        assert_eq!(loss.violations(), 1);
        assert_eq!(loss.loss(), 1.0);
        assert_eq!(loss.gradient_computations(), 2);
        assert_eq!(loss.mean_loss(), 0.5);
        assert!(loss.summary().starts_with("violations: 1 (100.00%)"));
    }

    #[test]
    fn test_softmax_loss_value() {
        let mut m = model("complex", 2, 2);
        let p = Triple::new(1, 1, 2);
        let candidates = vec![Triple::new(1, 1, 3), Triple::new(4, 1, 2), p];
        let scores: Vec<f64> = candidates.iter().map(|c| m.score(c)).collect();
        let expected = logsumexp(&scores) - m.score(&p);

        let mut loss = SoftmaxLoss::new(SHAPE);
        m.reset_gradients();
        loss.gradient(m.as_mut(), &[p], &[candidates]);
        assert!((loss.loss() - expected).abs() < 1e-12);
        assert!(expected > 0.0);
        assert!(loss.appends_positive());
    }

    #[test]
    fn test_logistic_loss_value() {
        let mut m = model("distmult", 2, 3);
        let (p, n) = (Triple::new(0, 1, 1), Triple::new(0, 1, 4));
        let expected = softplus(-m.score(&p)) + softplus(m.score(&n));

        let mut loss = LogisticLoss::new(SHAPE);
        m.reset_gradients();
        loss.gradient(m.as_mut(), &[p], &[vec![n]]);
        assert!((loss.loss() - expected).abs() < 1e-12);
        assert_eq!(loss.gradient_computations(), 4);
        assert!((loss.mean_loss() - expected / 4.0).abs() < 1e-12);

        loss.reset();
        assert_eq!(loss.loss(), 0.0);
        assert_eq!(loss.mean_loss(), 0.0);
    }

    #[test]
    fn test_factory() {
        assert_eq!(build_loss("pair", SHAPE, 1.0).unwrap().name(), "pair");
        assert_eq!(build_loss("Softmax", SHAPE, 1.0).unwrap().name(), "softmax");
        assert!(matches!(
            build_loss("hinge2", SHAPE, 1.0),
            Err(Error::UnknownVariant { component: "loss", .. })
        ));
    }
}
