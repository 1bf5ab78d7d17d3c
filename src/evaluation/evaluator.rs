// =============================================================================
// Evaluator contract + built-in RSI evaluator
// =============================================================================

use std::sync::Arc;

use parking_lot::Mutex;

use crate::channels::producer::Producer;
use crate::channels::routing::RoutingKey;
use crate::channels::topics::{EvaluationTopic, EvaluationTrigger};
use crate::evaluation::matrix::{EvalNote, EvaluatorKind};
use crate::symbol_data::CandleSnapshot;
use crate::types::TimeFrame;

/// A source of evaluation notes for one symbol.
///
/// TA evaluators are recomputed by the task manager on every accepted cycle;
/// social and real-time evaluators refresh themselves and only have their
/// current note read.
pub trait Evaluator: Send {
    fn name(&self) -> &str;

    fn kind(&self) -> EvaluatorKind;

    fn eval_type(&self) -> &'static str {
        "float"
    }

    fn is_active(&self) -> bool {
        true
    }

    fn evaluate(&mut self, candles: &CandleSnapshot) -> anyhow::Result<()>;

    fn eval_note(&self) -> EvalNote;

    /// Reset notes that are too old to be trusted. Called before each read.
    fn ensure_eval_note_is_not_expired(&mut self) {}
}

pub type SharedEvaluator = Arc<Mutex<Box<dyn Evaluator>>>;

pub fn shared(evaluator: impl Evaluator + 'static) -> SharedEvaluator {
    Arc::new(Mutex::new(Box::new(evaluator)))
}

// -----------------------------------------------------------------------------
// Notifier
// -----------------------------------------------------------------------------

/// Handle a self-refreshing evaluator uses to wake the evaluation tasks of
/// its symbol: one time frame for a TA task, every configured time frame for
/// the social and real-time evaluators shared across them.
#[derive(Clone)]
pub struct Notifier {
    producer: Producer<EvaluationTopic>,
    symbol: String,
    time_frames: Vec<TimeFrame>,
}

impl Notifier {
    pub fn new(producer: Producer<EvaluationTopic>, symbol: impl Into<String>, time_frame: TimeFrame) -> Self {
        Self::for_time_frames(producer, symbol, vec![time_frame])
    }

    pub fn for_time_frames(
        producer: Producer<EvaluationTopic>,
        symbol: impl Into<String>,
        time_frames: Vec<TimeFrame>,
    ) -> Self {
        Self {
            producer,
            symbol: symbol.into(),
            time_frames,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Send `trigger` to the task of every time frame, in order.
    pub async fn notify(&self, trigger: EvaluationTrigger) {
        for tf in &self.time_frames {
            self.producer
                .send(trigger.clone(), RoutingKey::with_time_frame(self.symbol.clone(), *tf))
                .await;
        }
    }

    /// Real-time evaluators signal a note change with an interruption.
    pub async fn interrupt(&self, source: &str) {
        self.notify(EvaluationTrigger::new(source).interruption()).await;
    }
}

// -----------------------------------------------------------------------------
// RSI evaluator
// -----------------------------------------------------------------------------

const OVERBOUGHT: f64 = 70.0;
const OVERSOLD: f64 = 30.0;

/// Wilder RSI over candle closes, mapped to a note in `[-1, 1]`:
/// oversold leans towards -1 (buy), overbought towards 1 (sell).
pub struct RsiEvaluator {
    period: usize,
    note: EvalNote,
}

impl RsiEvaluator {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            note: EvalNote::Pending,
        }
    }
}

impl Default for RsiEvaluator {
    fn default() -> Self {
        Self::new(14)
    }
}

impl Evaluator for RsiEvaluator {
    fn name(&self) -> &str {
        "RSIMomentumEvaluator"
    }

    fn kind(&self) -> EvaluatorKind {
        EvaluatorKind::Ta
    }

    fn evaluate(&mut self, candles: &CandleSnapshot) -> anyhow::Result<()> {
        self.note = match last_rsi(&candles.close, self.period) {
            Some(rsi) if rsi >= OVERBOUGHT => EvalNote::Value((rsi - 50.0) / 50.0),
            Some(rsi) if rsi <= OVERSOLD => EvalNote::Value((rsi - 50.0) / 50.0),
            Some(_) => EvalNote::Value(0.0),
            None => EvalNote::Pending,
        };
        Ok(())
    }

    fn eval_note(&self) -> EvalNote {
        self.note
    }
}

/// Latest Wilder-smoothed RSI, or `None` without `period + 1` closes.
fn last_rsi(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() <= period {
        return None;
    }
    let n = period as f64;
    let mut gain = 0.0;
    let mut loss = 0.0;
    for (i, w) in closes.windows(2).enumerate() {
        let delta = w[1] - w[0];
        let (up, down) = (delta.max(0.0), (-delta).max(0.0));
        if i < period {
            gain += up / n;
            loss += down / n;
        } else {
            gain = (gain * (n - 1.0) + up) / n;
            loss = (loss * (n - 1.0) + down) / n;
        }
    }
    let rsi = match (gain == 0.0, loss == 0.0) {
        (true, true) => 50.0,
        (_, true) => 100.0,
        _ => 100.0 - 100.0 / (1.0 + gain / loss),
    };
    rsi.is_finite().then_some(rsi)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn closes(values: Vec<f64>) -> CandleSnapshot {
        CandleSnapshot {
            time: (0..values.len() as i64).collect(),
            open: values.clone(),
            high: values.clone(),
            low: values.clone(),
            volume: vec![1.0; values.len()],
            close: values,
        }
    }

    #[test]
    fn rsi_needs_enough_closes() {
        assert!(last_rsi(&[1.0, 2.0], 14).is_none());
        assert!(last_rsi(&[1.0, 2.0], 0).is_none());
    }

    #[test]
    fn rsi_extremes() {
        let up: Vec<f64> = (1..=30).map(f64::from).collect();
        let down: Vec<f64> = up.iter().rev().copied().collect();
        assert_eq!(last_rsi(&up, 14), Some(100.0));
        assert_eq!(last_rsi(&down, 14), Some(0.0));
        assert_eq!(last_rsi(&[5.0; 20], 14), Some(50.0));
    }

    #[test]
    fn evaluator_maps_rsi_to_note() {
        let mut eval = RsiEvaluator::default();
        assert_eq!(eval.eval_note(), EvalNote::Pending);

        eval.evaluate(&closes((1..=30).map(f64::from).collect())).unwrap();
        assert_eq!(eval.eval_note(), EvalNote::Value(1.0));

        eval.evaluate(&closes((1..=30).rev().map(f64::from).collect())).unwrap();
        assert_eq!(eval.eval_note(), EvalNote::Value(-1.0));

        eval.evaluate(&closes(vec![1.0; 3])).unwrap();
        assert_eq!(eval.eval_note(), EvalNote::Pending);
    }

    #[tokio::test]
    async fn notifier_reaches_every_time_frame() {
        use crate::channels::{callback, Channel, Message, Subscription};

        let channel = Channel::<EvaluationTopic>::new("sim", 8, 1);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        channel.new_consumer(
            callback(move |m: Message<EvaluationTrigger>| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().push((m.key.time_frame, m.payload));
                    Ok(())
                }
            }),
            Subscription::symbol("BTC/USDT"),
        );
        let notifier = Notifier::for_time_frames(
            channel.new_producer().unwrap(),
            "BTC/USDT",
            vec![TimeFrame::OneHour, TimeFrame::FourHours],
        );

        notifier.interrupt("news").await;
        for _ in 0..100 {
            if seen.lock().len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let seen = seen.lock().clone();
        assert_eq!(
            seen.iter().map(|(tf, _)| *tf).collect::<Vec<_>>(),
            vec![Some(TimeFrame::OneHour), Some(TimeFrame::FourHours)]
        );
        assert!(seen.iter().all(|(_, t)| t.interruption && t.source == "news"));
    }
}
