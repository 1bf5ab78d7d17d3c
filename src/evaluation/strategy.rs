// =============================================================================
// Strategy evaluators — turn the matrix into per-symbol verdicts
// =============================================================================

use std::collections::HashMap;

use crate::evaluation::matrix::{EvalNote, EvaluatorKind, MatrixSnapshot};

pub trait StrategyEvaluator: Send {
    fn name(&self) -> &str;

    fn eval_type(&self) -> &'static str {
        "float"
    }

    /// Combine the current matrix into one note. `Pending` when there is
    /// nothing to combine yet.
    fn evaluate(&mut self, matrix: &MatrixSnapshot) -> anyhow::Result<EvalNote>;
}

/// Weighted mean of every non-pending TA, social and real-time note.
///
/// Evaluators without an explicit weight count with `default_weight`.
pub struct WeightedAverageStrategy {
    weights: HashMap<String, f64>,
    default_weight: f64,
}

impl WeightedAverageStrategy {
    pub fn new() -> Self {
        Self {
            weights: HashMap::new(),
            default_weight: 1.0,
        }
    }

    pub fn with_weight(mut self, evaluator: impl Into<String>, weight: f64) -> Self {
        self.weights.insert(evaluator.into(), weight);
        self
    }
}

impl Default for WeightedAverageStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl StrategyEvaluator for WeightedAverageStrategy {
    fn name(&self) -> &str {
        "WeightedAverageStrategy"
    }

    fn evaluate(&mut self, matrix: &MatrixSnapshot) -> anyhow::Result<EvalNote> {
        let mut total = 0.0;
        let mut weight_sum = 0.0;
        for entry in matrix.entries.iter().filter(|e| e.kind != EvaluatorKind::Strategies) {
            let Some(value) = entry.note.value() else {
                continue;
            };
            let weight = self.weights.get(&entry.name).copied().unwrap_or(self.default_weight);
            total += value * weight;
            weight_sum += weight;
        }
        if weight_sum <= 0.0 {
            return Ok(EvalNote::Pending);
        }
        Ok(EvalNote::Value(total / weight_sum))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::matrix::EvaluationMatrix;
    use crate::types::TimeFrame;

    #[test]
    fn averages_valid_notes_with_weights() {
        let m = EvaluationMatrix::new("BTC/USDT", "sim");
        m.set_eval(EvaluatorKind::Ta, "rsi", 1.0, Some(TimeFrame::OneHour));
        m.set_eval(EvaluatorKind::Ta, "rsi", 0.0, Some(TimeFrame::OneDay));
        m.set_eval(EvaluatorKind::Social, "news", -1.0, None);
        m.set_eval(EvaluatorKind::RealTime, "instant", EvalNote::Pending, None);
        m.set_eval(EvaluatorKind::Strategies, "old", 5.0, None);

        let mut strategy = WeightedAverageStrategy::new().with_weight("news", 2.0);
        let note = strategy.evaluate(&m.snapshot()).unwrap();
        // (1 + 0 - 2) / 4
        assert_eq!(note, EvalNote::Value(-0.25));
    }

    #[test]
    fn empty_matrix_is_pending() {
        let mut strategy = WeightedAverageStrategy::default();
        assert_eq!(
            strategy.evaluate(&MatrixSnapshot::default()).unwrap(),
            EvalNote::Pending
        );
    }
}
